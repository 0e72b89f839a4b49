//! Per-session handle state.
//!
//! Every registered device or control point is tracked as a [`Handle`], a
//! small positive integer that is opaque to callers and never exposes
//! internal memory. The state behind a handle is a [`HandleInfo`] whose
//! role-specific part is a tagged variant: device state and client state
//! cannot coexist on one handle, and both roles can coexist in one process.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use url::Url;
use uuid::Uuid;
use xmltree::Element;

use crate::callback::{Callback, Cookie};
use crate::error::{Result, UpnpError};

/// A small positive integer identifying a live registration.
///
/// `0` and negative values are never valid and act as "invalid handle"
/// sentinels at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(i32);

impl Handle {
    /// Wrap a raw integer, rejecting the invalid sentinels.
    pub fn from_raw(raw: i32) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    /// Get the raw integer value.
    pub fn as_i32(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hnd-{}", self.0)
    }
}

/// GENA subscription identifier (SID), formatted as `uuid:<v4>` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Generate a fresh SID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a SID from its wire form, with or without the `uuid:` prefix.
    pub fn parse(s: &str) -> Option<Self> {
        let raw = s.strip_prefix("uuid:").unwrap_or(s);
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "uuid:{}", self.0)
    }
}

/// Address family a device handle is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// The role tag of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleRole {
    Device,
    Client,
}

/// State for one live handle.
pub struct HandleInfo {
    /// User callback invoked for every asynchronous outcome on this handle
    pub callback: Callback,
    /// Opaque caller-owned context, never interpreted
    pub cookie: Cookie,
    /// Whether a web-server alias is installed for this handle
    pub alias_installed: bool,
    /// Role-specific state
    pub state: RoleState,
}

impl HandleInfo {
    /// The role tag of this handle.
    pub fn role(&self) -> HandleRole {
        match self.state {
            RoleState::Device(_) => HandleRole::Device,
            RoleState::Client(_) => HandleRole::Client,
        }
    }

    /// The device state, if this is a device handle.
    pub fn device(&self) -> Option<&DeviceState> {
        match &self.state {
            RoleState::Device(d) => Some(d),
            RoleState::Client(_) => None,
        }
    }

    /// The device state, mutably.
    pub fn device_mut(&mut self) -> Option<&mut DeviceState> {
        match &mut self.state {
            RoleState::Device(d) => Some(d),
            RoleState::Client(_) => None,
        }
    }

    /// The client state, if this is a client handle.
    pub fn client(&self) -> Option<&ClientState> {
        match &self.state {
            RoleState::Client(c) => Some(c),
            RoleState::Device(_) => None,
        }
    }

    /// The client state, mutably.
    pub fn client_mut(&mut self) -> Option<&mut ClientState> {
        match &mut self.state {
            RoleState::Client(c) => Some(c),
            RoleState::Device(_) => None,
        }
    }
}

impl std::fmt::Debug for HandleInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleInfo")
            .field("role", &self.role())
            .field("alias_installed", &self.alias_installed)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Role-specific handle state. Exactly one variant per handle; the tag is
/// the single source of truth for the role.
#[derive(Debug)]
pub enum RoleState {
    Device(DeviceState),
    Client(ClientState),
}

/// State owned by a device-role handle.
pub struct DeviceState {
    /// URL the description document is served from
    pub desc_url: Url,
    /// The description document. Exclusively owned by this handle; dropped
    /// when the handle is freed.
    pub description: Element,
    /// Devices found in the description document (root and embedded)
    pub devices: Vec<DeviceEntry>,
    /// Services found in the description document
    pub services: Vec<ServiceEntry>,
    /// Active GENA subscriptions against this device's services
    pub service_table: ServiceTable,
    /// Advertisement max-age
    pub max_age: Duration,
    /// Address family the device is bound to
    pub address_family: AddressFamily,
}

impl std::fmt::Debug for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceState")
            .field("desc_url", &self.desc_url.as_str())
            .field("devices", &self.devices.len())
            .field("services", &self.services.len())
            .field("max_age", &self.max_age)
            .field("address_family", &self.address_family)
            .finish_non_exhaustive()
    }
}

impl DeviceState {
    /// Build device state from an owned description document.
    ///
    /// The device and service lists are derived from the document here, at
    /// construction, so they are plain owned data and can never outlive it.
    pub fn from_description(
        desc_url: Url,
        description: Element,
        max_age: Duration,
        address_family: AddressFamily,
        max_subscriptions: usize,
        max_subscription_timeout: Duration,
    ) -> Self {
        let mut devices = Vec::new();
        let mut services = Vec::new();
        collect_description(&description, &mut devices, &mut services);

        let service_table = ServiceTable::new(
            services.iter().map(|s| s.service_id.clone()),
            max_subscriptions,
            max_subscription_timeout,
        );

        Self {
            desc_url,
            description,
            devices,
            services,
            service_table,
            max_age,
            address_family,
        }
    }

    /// UDNs of every device in the description, root first.
    pub fn udns(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.udn.clone()).collect()
    }
}

/// State owned by a client-role handle.
#[derive(Debug, Default)]
pub struct ClientState {
    /// Active outgoing GENA subscriptions
    pub subscriptions: Vec<ClientSubscription>,
    /// SSDP searches currently in flight
    pub active_searches: Vec<SsdpSearch>,
}

/// One device element in a description document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// e.g. "urn:schemas-upnp-org:device:MediaServer:1"
    pub device_type: String,
    /// e.g. "uuid:9f0865b3-f5da-4ad5-85b7-7404637fdf37"
    pub udn: String,
}

/// One service element in a description document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// e.g. "urn:schemas-upnp-org:service:ContentDirectory:1"
    pub service_type: String,
    /// e.g. "urn:upnp-org:serviceId:ContentDirectory"
    pub service_id: String,
    /// Relative or absolute eventing URL, if the service declares one
    pub event_sub_url: Option<String>,
}

/// An outgoing GENA subscription held by a client handle.
#[derive(Debug, Clone)]
pub struct ClientSubscription {
    pub sid: SubscriptionId,
    pub event_url: Url,
    pub expires_at: SystemTime,
}

/// An SSDP search in flight on a client handle.
#[derive(Debug, Clone)]
pub struct SsdpSearch {
    /// Search target, e.g. "ssdp:all" or a device type URN
    pub target: String,
    /// When responses stop being collected
    pub deadline: SystemTime,
}

/// An incoming GENA subscription accepted by a device handle.
#[derive(Debug, Clone)]
pub struct GenaSubscription {
    pub sid: SubscriptionId,
    pub delivery_url: Url,
    pub expires_at: SystemTime,
}

/// Per-service GENA subscription table for one device handle.
///
/// Keyed by service id. Enforces the per-device subscription cap and clamps
/// requested durations to the configured maximum.
#[derive(Debug)]
pub struct ServiceTable {
    subscriptions: HashMap<String, Vec<GenaSubscription>>,
    max_subscriptions: usize,
    max_timeout: Duration,
}

impl ServiceTable {
    /// Create a table covering the given service ids.
    pub fn new(
        service_ids: impl IntoIterator<Item = String>,
        max_subscriptions: usize,
        max_timeout: Duration,
    ) -> Self {
        Self {
            subscriptions: service_ids.into_iter().map(|id| (id, Vec::new())).collect(),
            max_subscriptions,
            max_timeout,
        }
    }

    /// Accept a new subscription against a service.
    ///
    /// The requested timeout is clamped to the table maximum. Fails with
    /// `Rejected` when the service id is unknown or the per-device cap is
    /// reached.
    pub fn add_subscription(
        &mut self,
        service_id: &str,
        delivery_url: Url,
        requested_timeout: Duration,
    ) -> Result<GenaSubscription> {
        if self.total_subscriptions() >= self.max_subscriptions {
            return Err(UpnpError::Rejected(format!(
                "subscription cap {} reached",
                self.max_subscriptions
            )));
        }

        let timeout = requested_timeout.min(self.max_timeout);
        let subscription = GenaSubscription {
            sid: SubscriptionId::generate(),
            delivery_url,
            expires_at: SystemTime::now() + timeout,
        };

        let list = self
            .subscriptions
            .get_mut(service_id)
            .ok_or_else(|| UpnpError::NotFound(format!("service {service_id:?}")))?;
        list.push(subscription.clone());

        Ok(subscription)
    }

    /// Renew a subscription, returning the granted duration.
    pub fn renew_subscription(
        &mut self,
        sid: SubscriptionId,
        requested_timeout: Duration,
    ) -> Result<Duration> {
        let timeout = requested_timeout.min(self.max_timeout);
        for list in self.subscriptions.values_mut() {
            if let Some(sub) = list.iter_mut().find(|s| s.sid == sid) {
                sub.expires_at = SystemTime::now() + timeout;
                return Ok(timeout);
            }
        }
        Err(UpnpError::NotFound(format!("subscription {sid}")))
    }

    /// Remove a subscription by SID.
    pub fn remove_subscription(&mut self, sid: SubscriptionId) -> Result<()> {
        for list in self.subscriptions.values_mut() {
            if let Some(pos) = list.iter().position(|s| s.sid == sid) {
                list.remove(pos);
                return Ok(());
            }
        }
        Err(UpnpError::NotFound(format!("subscription {sid}")))
    }

    /// Look up a subscription by SID.
    pub fn subscription(&self, sid: SubscriptionId) -> Option<&GenaSubscription> {
        self.subscriptions
            .values()
            .flat_map(|list| list.iter())
            .find(|s| s.sid == sid)
    }

    /// Subscriptions currently registered against one service.
    pub fn subscriptions_for(&self, service_id: &str) -> Option<&[GenaSubscription]> {
        self.subscriptions.get(service_id).map(Vec::as_slice)
    }

    /// Drop every subscription that has expired, returning how many went.
    pub fn purge_expired(&mut self, now: SystemTime) -> usize {
        let mut removed = 0;
        for list in self.subscriptions.values_mut() {
            let before = list.len();
            list.retain(|s| s.expires_at > now);
            removed += before - list.len();
        }
        removed
    }

    /// Total live subscriptions across all services.
    pub fn total_subscriptions(&self) -> usize {
        self.subscriptions.values().map(Vec::len).sum()
    }
}

/// Walk a description document collecting device and service entries.
///
/// Handles the UPnP layout: a `root` element with one `device`, which may
/// nest further devices under `deviceList` and services under `serviceList`.
fn collect_description(
    element: &Element,
    devices: &mut Vec<DeviceEntry>,
    services: &mut Vec<ServiceEntry>,
) {
    if element.name == "device" {
        devices.push(DeviceEntry {
            device_type: child_text(element, "deviceType").unwrap_or_default(),
            udn: child_text(element, "UDN").unwrap_or_default(),
        });

        if let Some(service_list) = element.get_child("serviceList") {
            for service in child_elements(service_list, "service") {
                services.push(ServiceEntry {
                    service_type: child_text(service, "serviceType").unwrap_or_default(),
                    service_id: child_text(service, "serviceId").unwrap_or_default(),
                    event_sub_url: child_text(service, "eventSubURL"),
                });
            }
        }

        if let Some(device_list) = element.get_child("deviceList") {
            for embedded in child_elements(device_list, "device") {
                collect_description(embedded, devices, services);
            }
        }
    } else {
        for child in element.children.iter().filter_map(|n| n.as_element()) {
            collect_description(child, devices, services);
        }
    }
}

fn child_elements<'a>(parent: &'a Element, name: &'a str) -> impl Iterator<Item = &'a Element> {
    parent
        .children
        .iter()
        .filter_map(|n| n.as_element())
        .filter(move |e| e.name == name)
}

fn child_text(parent: &Element, name: &str) -> Option<String> {
    parent
        .get_child(name)
        .and_then(|e| e.get_text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Arc;

    pub const DESCRIPTION_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
    <friendlyName>Test Server</friendlyName>
    <UDN>uuid:9f0865b3-f5da-4ad5-85b7-7404637fdf37</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ContentDirectory:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:ContentDirectory</serviceId>
        <eventSubURL>/cd/event</eventSubURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:PrinterBasic:1</deviceType>
        <UDN>uuid:1b2aae51-cb30-4f45-9d11-4b9cb54c1f30</UDN>
      </device>
    </deviceList>
  </device>
</root>"#;

    pub fn sample_description() -> Element {
        Element::parse(DESCRIPTION_XML.as_bytes()).unwrap()
    }

    pub fn sample_device_state() -> DeviceState {
        DeviceState::from_description(
            Url::parse("http://192.168.1.10:49152/desc.xml").unwrap(),
            sample_description(),
            Duration::from_secs(1800),
            AddressFamily::Ipv4,
            8,
            Duration::from_secs(1800),
        )
    }

    pub fn noop_callback() -> Callback {
        Arc::new(|_event| {})
    }

    pub fn device_info() -> HandleInfo {
        HandleInfo {
            callback: noop_callback(),
            cookie: Cookie::none(),
            alias_installed: false,
            state: RoleState::Device(sample_device_state()),
        }
    }

    pub fn client_info() -> HandleInfo {
        HandleInfo {
            callback: noop_callback(),
            cookie: Cookie::none(),
            alias_installed: false,
            state: RoleState::Client(ClientState::default()),
        }
    }
}
