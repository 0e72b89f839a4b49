//! The seam to the SSDP/GENA/SOAP message layer.
//!
//! The core never builds or parses protocol messages itself. Dispatched
//! operations and advertisements are handed to a [`ProtocolClient`]
//! implementation as immutable snapshots taken under the handle lock; the
//! implementation performs the blocking network work and returns a result
//! the dispatcher forwards to the user callback.

use std::time::Duration;

use url::Url;
use xmltree::Element;

use crate::callback::EventPayload;
use crate::dispatch::OpKind;
use crate::error::Result;
use crate::handle::{AddressFamily, Handle, SubscriptionId};

/// Snapshot of one dispatched operation, built by the worker thread from
/// the request parameters plus handle data copied out under the read lock.
#[derive(Debug, Clone)]
pub struct ProtocolRequest {
    pub op: OpKind,
    pub handle: Handle,
    pub timeout: Duration,
    pub url: Option<Url>,
    pub var_name: Option<String>,
    pub new_value: Option<String>,
    pub device_type: Option<String>,
    pub device_id: Option<String>,
    pub service_type: Option<String>,
    pub service_version: Option<String>,
    pub sid: Option<SubscriptionId>,
    /// SOAP action body, for [`OpKind::Action`]
    pub action: Option<Element>,
    /// Optional SOAP header document
    pub header: Option<Element>,
    /// Largest response body the message layer may accept, from the
    /// session configuration
    pub max_content_length: usize,
}

/// Snapshot of a device's advertisement data.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub handle: Handle,
    pub desc_url: Url,
    /// UDNs of the root and every embedded device, root first
    pub udns: Vec<String>,
    pub max_age: Duration,
    pub address_family: AddressFamily,
}

/// Blocking protocol operations, implemented by the message layer.
///
/// Implementations are called on pool worker threads, never under the
/// handle lock, and must be safe to call from several workers at once.
pub trait ProtocolClient: Send + Sync {
    /// Perform one dispatched operation and return its payload.
    fn perform(&self, request: &ProtocolRequest) -> Result<EventPayload>;

    /// Send one SSDP advertisement group for a device.
    fn advertise(&self, ad: &Advertisement) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::error::UpnpError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory protocol layer that records every call.
    #[derive(Default)]
    pub struct RecordingProtocol {
        pub performed: Mutex<Vec<OpKind>>,
        pub requests: Mutex<Vec<ProtocolRequest>>,
        pub advertised: AtomicUsize,
        pub fail_next: Mutex<Option<String>>,
    }

    impl RecordingProtocol {
        pub fn advertise_count(&self) -> usize {
            self.advertised.load(Ordering::SeqCst)
        }
    }

    impl ProtocolClient for RecordingProtocol {
        fn perform(&self, request: &ProtocolRequest) -> Result<EventPayload> {
            if let Some(message) = self.fail_next.lock().unwrap().take() {
                return Err(UpnpError::Protocol(message));
            }
            self.performed.lock().unwrap().push(request.op);
            self.requests.lock().unwrap().push(request.clone());
            Ok(match request.op {
                OpKind::Subscribe => EventPayload::Subscribed {
                    sid: SubscriptionId::generate(),
                    timeout: request.timeout,
                },
                OpKind::Unsubscribe => EventPayload::Unsubscribed {
                    sid: request.sid.unwrap_or_else(SubscriptionId::generate),
                },
                OpKind::Renew => EventPayload::Renewed {
                    sid: request.sid.unwrap_or_else(SubscriptionId::generate),
                    timeout: request.timeout,
                },
                OpKind::Notify => EventPayload::Notified,
                OpKind::QueryVariable => EventPayload::VariableValue("0".to_string()),
                OpKind::Action => {
                    EventPayload::ActionResponse(Element::new("ActionResponse"))
                }
                OpKind::DeviceDescription | OpKind::ServiceDescription => {
                    EventPayload::Description(Element::new("root"))
                }
                OpKind::MiniServer => EventPayload::MiniServer,
            })
        }

        fn advertise(&self, _ad: &Advertisement) -> Result<()> {
            self.advertised.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
