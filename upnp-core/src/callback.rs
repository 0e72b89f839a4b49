//! The user callback boundary.
//!
//! Every asynchronous outcome in the SDK is delivered through one callback
//! signature: the operation kind, a result, the opaque cookie supplied at
//! registration or dispatch time, and kind-specific payload data. Callbacks
//! run on worker threads, never on the timer thread and never reentrantly on
//! the caller's own thread.

use std::any::Any;
use std::sync::Arc;

use xmltree::Element;

use crate::dispatch::OpKind;
use crate::error::UpnpError;
use crate::handle::{Handle, SubscriptionId};

/// An opaque, caller-owned value carried through registration and dispatch
/// and handed back on every callback invocation.
///
/// The SDK never interprets the contents. Cloning is cheap (reference
/// counted) so the same cookie can accompany many events.
#[derive(Clone)]
pub struct Cookie(Arc<dyn Any + Send + Sync>);

impl Cookie {
    /// Wrap a caller-owned value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// An empty cookie for callers that do not need one.
    pub fn none() -> Self {
        Self(Arc::new(()))
    }

    /// Borrow the wrapped value, if it has the expected type.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl std::fmt::Debug for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cookie(..)")
    }
}

/// Kind-specific event data delivered with a successful operation.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// A GENA subscription was accepted
    Subscribed {
        sid: SubscriptionId,
        timeout: std::time::Duration,
    },
    /// A GENA subscription was terminated
    Unsubscribed { sid: SubscriptionId },
    /// A GENA subscription was renewed
    Renewed {
        sid: SubscriptionId,
        timeout: std::time::Duration,
    },
    /// An event notification was delivered to all subscribers
    Notified,
    /// A state-variable query returned a value
    VariableValue(String),
    /// A SOAP action completed with a response document
    ActionResponse(Element),
    /// A device or service description document was fetched
    Description(Element),
    /// A mini-server unit of work completed
    MiniServer,
    /// An SSDP advertisement was sent
    Advertised,
}

/// One asynchronous outcome, delivered to the user callback.
#[derive(Debug)]
pub struct SdkEvent {
    /// The operation this outcome belongs to
    pub op: OpKind,
    /// The handle the operation was dispatched on
    pub handle: Handle,
    /// The operation result: payload on success, error code on failure.
    /// A handle freed before execution surfaces as `Err(InvalidHandle)`.
    pub result: std::result::Result<EventPayload, UpnpError>,
    /// The cookie supplied with the request
    pub cookie: Cookie,
}

/// The single callback signature invoked for every asynchronous outcome.
pub type Callback = Arc<dyn Fn(&SdkEvent) + Send + Sync>;
