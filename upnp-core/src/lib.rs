//! # UPnP SDK Core
//!
//! The resource-management and dispatch core of a UPnP device/control-point
//! SDK: handle lifecycle, worker thread pools, timer-driven scheduling, and
//! asynchronous operation dispatch. The SSDP/GENA/SOAP message layer plugs
//! in behind the [`ProtocolClient`] trait.
//!
//! ## Overview
//!
//! A process runs one [`UpnpSdk`] session. Registered devices and control
//! points are tracked as small integer [`Handle`]s in a fixed-capacity
//! table behind a process-wide reader/writer lock. Blocking work never runs
//! on the caller's thread: operations are dispatched to worker pools and
//! their outcomes delivered through a single callback signature.
//!
//! ## Key Features
//!
//! - **Sync-First API**: plain OS threads and blocking primitives - no async/await required
//! - **Bounded Resources**: fixed handle capacity, bounded job queues, immediate backpressure
//! - **Drift-Free Scheduling**: periodic advertisements keyed off due times, not completion times
//! - **Exactly-Once Callbacks**: every dispatched operation reports back exactly once, even when its handle dies first
//! - **Staged Bring-Up**: init either fully succeeds or tears itself back down
//!
//! ## Usage
//!
//! ```rust,ignore
//! use upnp_core::prelude::*;
//!
//! let sdk = UpnpSdk::init(SdkConfig::default(), protocol)?;
//!
//! let device = sdk.register_device(DeviceRegistration {
//!     desc_url: "http://192.168.1.10:49152/desc.xml".parse()?,
//!     description,
//!     callback,
//!     cookie: Cookie::none(),
//!     max_age: None,
//!     address_family: AddressFamily::Ipv4,
//! })?;
//!
//! // ... the device re-announces itself automatically ...
//!
//! sdk.unregister(device)?;
//! sdk.shutdown();
//! ```

pub mod advertise;
pub mod callback;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod logging;
pub mod pool;
pub mod protocol;
pub mod session;
pub mod table;
pub mod timer;

// Re-export main types for convenience
pub use callback::{Callback, Cookie, EventPayload, SdkEvent};
pub use config::{PoolConfig, SdkConfig, MAX_CONTENT_LENGTH};
pub use dispatch::{NonblockParam, NonblockParamBuilder, OpKind};
pub use error::{Result, UpnpError};
pub use handle::{AddressFamily, Handle, HandleRole, SubscriptionId};
pub use logging::{init_logging, init_logging_from_env, LoggingMode};
pub use pool::JobPriority;
pub use protocol::{Advertisement, ProtocolClient, ProtocolRequest};
pub use session::{DeviceRegistration, UpnpSdk};

// Re-export the interface resolver types callers see at the API boundary
pub use upnp_netif::IfInfo;

/// Prelude module for convenient imports
///
/// Use this to import the most commonly used types and traits:
///
/// ```rust
/// use upnp_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        AddressFamily, Callback, Cookie, DeviceRegistration, EventPayload, Handle, HandleRole,
        IfInfo, JobPriority, NonblockParam, OpKind, ProtocolClient, Result, SdkConfig, SdkEvent,
        SubscriptionId, UpnpError, UpnpSdk,
    };
}
