//! The nonblocking dispatcher.
//!
//! Converts the nominally synchronous SDK calls (subscribe, notify, invoke
//! action, fetch description, ...) into jobs on the worker pools. The
//! calling thread validates cheaply and returns immediately; a worker
//! re-validates the handle under the handle lock, performs the blocking
//! protocol work outside it, and invokes the user callback exactly once —
//! with an invalid-handle result if the handle was freed in between, so the
//! caller is never left uninformed.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use url::Url;
use xmltree::Element;

use crate::callback::{Callback, Cookie, SdkEvent};
use crate::error::{Result, UpnpError};
use crate::handle::{Handle, HandleRole, SubscriptionId};
use crate::pool::{Job, JobPriority, ThreadPool};
use crate::protocol::{ProtocolClient, ProtocolRequest};
use crate::table::HandleTable;

/// Maximum length of the bounded name-like text fields.
pub const MAX_NAME_LEN: usize = 256;
/// Maximum length of URL fields.
pub const MAX_URL_LEN: usize = 180;

/// The operation kinds that can be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Open a GENA subscription (client)
    Subscribe,
    /// Close a GENA subscription (client)
    Unsubscribe,
    /// Renew a GENA subscription (client)
    Renew,
    /// Notify subscribers of a state-variable change (device)
    Notify,
    /// Query a remote state variable (client)
    QueryVariable,
    /// Invoke a SOAP action (client)
    Action,
    /// Fetch a device description document (client)
    DeviceDescription,
    /// Fetch a service description document (client)
    ServiceDescription,
    /// One unit of mini web/SSDP server work
    MiniServer,
}

impl OpKind {
    /// The handle role an operation requires, if it is role-specific.
    fn required_role(self) -> Option<HandleRole> {
        match self {
            OpKind::Notify => Some(HandleRole::Device),
            OpKind::MiniServer => None,
            _ => Some(HandleRole::Client),
        }
    }
}

/// A request descriptor: everything one dispatched operation needs.
///
/// Constructed by the calling thread through [`NonblockParamBuilder`],
/// handed to exactly one worker, and consumed by that worker after the
/// callback fires.
pub struct NonblockParam {
    pub(crate) op: OpKind,
    pub(crate) handle: Handle,
    /// `None` means "use the session's configured default timeout"
    pub(crate) timeout: Option<Duration>,
    pub(crate) url: Option<Url>,
    pub(crate) var_name: Option<String>,
    pub(crate) new_value: Option<String>,
    pub(crate) device_type: Option<String>,
    pub(crate) device_id: Option<String>,
    pub(crate) service_type: Option<String>,
    pub(crate) service_version: Option<String>,
    pub(crate) sid: Option<SubscriptionId>,
    pub(crate) action: Option<Element>,
    pub(crate) header: Option<Element>,
    pub(crate) callback: Callback,
    pub(crate) cookie: Cookie,
}

impl NonblockParam {
    /// Start building a request for `op` on `handle`.
    pub fn builder(handle: Handle, op: OpKind) -> NonblockParamBuilder {
        NonblockParamBuilder {
            op,
            handle,
            timeout: None,
            url: None,
            var_name: None,
            new_value: None,
            device_type: None,
            device_id: None,
            service_type: None,
            service_version: None,
            sid: None,
            action: None,
            header: None,
            callback: None,
            cookie: Cookie::none(),
        }
    }
}

impl std::fmt::Debug for NonblockParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonblockParam")
            .field("op", &self.op)
            .field("handle", &self.handle)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`NonblockParam`] with explicit maximum-length validation on
/// every bounded text field. Oversized input fails the `build` with
/// [`UpnpError::FieldTooLong`] instead of being silently truncated.
pub struct NonblockParamBuilder {
    op: OpKind,
    handle: Handle,
    timeout: Option<Duration>,
    url: Option<String>,
    var_name: Option<String>,
    new_value: Option<String>,
    device_type: Option<String>,
    device_id: Option<String>,
    service_type: Option<String>,
    service_version: Option<String>,
    sid: Option<SubscriptionId>,
    action: Option<Element>,
    header: Option<Element>,
    callback: Option<Callback>,
    cookie: Cookie,
}

impl NonblockParamBuilder {
    /// Override the session's default timeout for this operation.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn var_name(mut self, name: impl Into<String>) -> Self {
        self.var_name = Some(name.into());
        self
    }

    pub fn new_value(mut self, value: impl Into<String>) -> Self {
        self.new_value = Some(value.into());
        self
    }

    pub fn device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    pub fn subscription_id(mut self, sid: SubscriptionId) -> Self {
        self.sid = Some(sid);
        self
    }

    pub fn action_document(mut self, action: Element) -> Self {
        self.action = Some(action);
        self
    }

    pub fn header_document(mut self, header: Element) -> Self {
        self.header = Some(header);
        self
    }

    pub fn callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.cookie = cookie;
        self
    }

    /// Validate field lengths and assemble the request.
    pub fn build(self) -> Result<NonblockParam> {
        let url = match self.url {
            Some(raw) => {
                check_len("url", &raw, MAX_URL_LEN)?;
                Some(
                    Url::parse(&raw)
                        .map_err(|e| UpnpError::Rejected(format!("invalid url: {e}")))?,
                )
            }
            None => None,
        };

        for (field, value) in [
            ("var_name", &self.var_name),
            ("new_value", &self.new_value),
            ("device_type", &self.device_type),
            ("device_id", &self.device_id),
            ("service_type", &self.service_type),
            ("service_version", &self.service_version),
        ] {
            if let Some(value) = value {
                check_len(field, value, MAX_NAME_LEN)?;
            }
        }

        let callback = self
            .callback
            .ok_or_else(|| UpnpError::Rejected("callback is required".to_string()))?;

        Ok(NonblockParam {
            op: self.op,
            handle: self.handle,
            timeout: self.timeout,
            url,
            var_name: self.var_name,
            new_value: self.new_value,
            device_type: self.device_type,
            device_id: self.device_id,
            service_type: self.service_type,
            service_version: self.service_version,
            sid: self.sid,
            action: self.action,
            header: self.header,
            callback,
            cookie: self.cookie,
        })
    }
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        Err(UpnpError::FieldTooLong {
            field,
            len: value.len(),
            max,
        })
    } else {
        Ok(())
    }
}

/// Submits dispatched operations to the worker pools.
pub(crate) struct Dispatcher {
    table: Arc<RwLock<HandleTable>>,
    send_pool: Arc<ThreadPool>,
    miniserver_pool: Arc<ThreadPool>,
    protocol: Arc<dyn ProtocolClient>,
    /// Applied when a request does not carry its own timeout
    default_timeout: Duration,
    /// Forwarded to the message layer with every request
    max_content_length: usize,
}

impl Dispatcher {
    pub fn new(
        table: Arc<RwLock<HandleTable>>,
        send_pool: Arc<ThreadPool>,
        miniserver_pool: Arc<ThreadPool>,
        protocol: Arc<dyn ProtocolClient>,
        default_timeout: Duration,
        max_content_length: usize,
    ) -> Self {
        Self {
            table,
            send_pool,
            miniserver_pool,
            protocol,
            default_timeout,
            max_content_length,
        }
    }

    /// Queue one operation for asynchronous execution.
    ///
    /// Validates eagerly what is cheap to validate — the handle is live and
    /// of the right role, the op's required fields are present — then
    /// returns. Full protocol validation happens on the worker.
    pub fn dispatch(&self, param: NonblockParam) -> Result<()> {
        self.validate_required_fields(&param)?;

        {
            let table = self.table.read().map_err(|_| UpnpError::LockPoisoned)?;
            check_handle(&table, param.handle, param.op)?;
        }

        let (pool, priority) = match param.op {
            OpKind::MiniServer => (&self.miniserver_pool, JobPriority::High),
            _ => (&self.send_pool, JobPriority::Medium),
        };

        let table = Arc::clone(&self.table);
        let protocol = Arc::clone(&self.protocol);
        let timeout = param.timeout.unwrap_or(self.default_timeout);
        let max_content_length = self.max_content_length;
        tracing::debug!(op = ?param.op, handle = %param.handle, ?timeout, "dispatching operation");
        pool.submit(Job::new(priority, move || {
            execute(table, protocol, param, timeout, max_content_length);
        }))
    }

    fn validate_required_fields(&self, param: &NonblockParam) -> Result<()> {
        let missing: Option<&str> = match param.op {
            OpKind::Subscribe
            | OpKind::DeviceDescription
            | OpKind::ServiceDescription => param.url.is_none().then_some("url"),
            OpKind::Unsubscribe | OpKind::Renew => {
                if param.sid.is_none() {
                    Some("subscription_id")
                } else {
                    param.url.is_none().then_some("url")
                }
            }
            OpKind::Notify => {
                if param.var_name.is_none() {
                    Some("var_name")
                } else {
                    param.new_value.is_none().then_some("new_value")
                }
            }
            OpKind::QueryVariable => {
                if param.var_name.is_none() {
                    Some("var_name")
                } else {
                    param.url.is_none().then_some("url")
                }
            }
            OpKind::Action => {
                if param.url.is_none() {
                    Some("url")
                } else {
                    param.action.is_none().then_some("action_document")
                }
            }
            OpKind::MiniServer => None,
        };

        match missing {
            Some(field) => Err(UpnpError::Rejected(format!(
                "{:?} requires {field}",
                param.op
            ))),
            None => Ok(()),
        }
    }
}

/// Worker-side body of a dispatched operation.
///
/// The handle may have been freed between submission and execution, so it
/// is re-validated under the read lock. Whatever happens, the callback is
/// invoked exactly once and the param is consumed here.
fn execute(
    table: Arc<RwLock<HandleTable>>,
    protocol: Arc<dyn ProtocolClient>,
    param: NonblockParam,
    timeout: Duration,
    max_content_length: usize,
) {
    let validated = match table.read() {
        Ok(table) => check_handle(&table, param.handle, param.op),
        Err(_) => Err(UpnpError::LockPoisoned),
    };

    let result = validated.and_then(|()| {
        // Blocking protocol work happens outside the handle lock.
        let request = ProtocolRequest {
            op: param.op,
            handle: param.handle,
            timeout,
            url: param.url,
            var_name: param.var_name,
            new_value: param.new_value,
            device_type: param.device_type,
            device_id: param.device_id,
            service_type: param.service_type,
            service_version: param.service_version,
            sid: param.sid,
            action: param.action,
            header: param.header,
            max_content_length,
        };
        protocol.perform(&request)
    });

    if let Err(e) = &result {
        tracing::debug!(op = ?param.op, handle = %param.handle, error = %e, "dispatched operation failed");
    }

    let event = SdkEvent {
        op: param.op,
        handle: param.handle,
        result,
        cookie: param.cookie,
    };
    (param.callback)(&event);
}

fn check_handle(table: &HandleTable, handle: Handle, op: OpKind) -> Result<()> {
    match op.required_role() {
        Some(HandleRole::Device) => table.device(handle).map(|_| ()),
        Some(HandleRole::Client) => table.client(handle).map(|_| ()),
        None => table.get(handle).map(|_| ()),
    }
}
