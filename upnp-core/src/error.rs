use thiserror::Error;

/// Errors that can occur in the UPnP SDK core
#[derive(Error, Debug)]
pub enum UpnpError {
    /// Handle is out of range, free, or of the wrong role
    #[error("invalid handle: {0}")]
    InvalidHandle(i32),

    /// The handle table is at capacity
    #[error("handle table full ({capacity} handles)")]
    OutOfHandles { capacity: usize },

    /// A required pool, timer, or lock failed to initialize at startup
    #[error("SDK initialization failed: {0}")]
    InitFailed(String),

    /// A thread pool's queue is full; the caller may retry or drop
    #[error("thread pool {pool:?} rejected job: queue full")]
    Backpressure { pool: String },

    /// A thread pool is draining and no longer accepts jobs
    #[error("thread pool {pool:?} is shutting down")]
    ShuttingDown { pool: String },

    /// A timer job or other named resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A dispatch request could not be queued
    #[error("dispatch rejected: {0}")]
    Rejected(String),

    /// A bounded text field exceeded its maximum length
    #[error("field {field} too long: {len} bytes (max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// A synchronization primitive was poisoned by a panicking thread
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network interface resolution failed
    #[error("interface resolution failed: {0}")]
    Interface(#[from] upnp_netif::NetifError),

    /// A protocol operation performed inside a dispatched job failed
    #[error("protocol operation failed: {0}")]
    Protocol(String),
}

/// Result type for SDK core operations
pub type Result<T> = std::result::Result<T, UpnpError>;
