use thiserror::Error;

/// Errors that can occur while resolving a network interface
#[derive(Error, Debug)]
pub enum NetifError {
    /// No interface on the host satisfied the selection criteria
    #[error("no usable network interface found")]
    NoUsableInterface,

    /// A specific interface was requested but is missing or unusable
    #[error("interface {0:?} not found or not usable")]
    InterfaceNotFound(String),

    /// The requested interface has no IPv4 address
    #[error("interface {0:?} has no IPv4 address")]
    NoIpv4Address(String),

    /// The operating system interface enumeration failed
    #[error("interface enumeration failed: {0}")]
    Enumeration(String),
}

/// Result type for interface resolution operations
pub type Result<T> = std::result::Result<T, NetifError>;
