//! The SDK session: owns every process-wide resource.
//!
//! One [`UpnpSdk`] owns the handle table and its lock, the three worker
//! pools, and the timer thread. Bring-up is staged and a failure at any
//! stage tears the earlier stages back down before the error is returned,
//! so a failed init never leaks threads. Shutdown stops the timer first so
//! no new periodic work arrives while the pools drain.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use url::Url;
use xmltree::Element;

use upnp_netif::IfInfo;

use crate::advertise::{advertise_interval, Advertiser};
use crate::callback::{Callback, Cookie};
use crate::config::SdkConfig;
use crate::dispatch::{Dispatcher, NonblockParam};
use crate::error::{Result, UpnpError};
use crate::handle::{
    AddressFamily, ClientState, DeviceState, Handle, HandleInfo, RoleState,
};
use crate::pool::{Job, JobPriority, ThreadPool};
use crate::protocol::ProtocolClient;
use crate::table::HandleTable;
use crate::timer::TimerThread;

/// Everything needed to register a device-role handle.
pub struct DeviceRegistration {
    /// URL the description document is served from
    pub desc_url: Url,
    /// The parsed description document. Ownership transfers to the handle
    /// and the document is dropped when the handle is freed.
    pub description: Element,
    /// Callback for asynchronous outcomes on this handle
    pub callback: Callback,
    /// Opaque caller context echoed on every callback
    pub cookie: Cookie,
    /// Advertisement max-age; `None` uses the configured default
    pub max_age: Option<Duration>,
    /// Address family to announce on
    pub address_family: AddressFamily,
}

/// A running SDK session.
pub struct UpnpSdk {
    config: SdkConfig,
    ifinfo: IfInfo,
    table: Arc<RwLock<HandleTable>>,
    recv_pool: Arc<ThreadPool>,
    send_pool: Arc<ThreadPool>,
    miniserver_pool: Arc<ThreadPool>,
    timer: TimerThread,
    dispatcher: Dispatcher,
    advertiser: Arc<Advertiser>,
    shut_down: Mutex<bool>,
}

impl UpnpSdk {
    /// Bring the SDK up, resolving the bind interface from the config.
    pub fn init(config: SdkConfig, protocol: Arc<dyn ProtocolClient>) -> Result<Self> {
        let ifinfo = upnp_netif::resolve(config.interface.as_deref())?;
        Self::init_with_interface(config, protocol, ifinfo)
    }

    /// Bring the SDK up on an already-resolved interface.
    ///
    /// Stages: recv pool, send pool, mini-server pool, timer thread. A
    /// failure at any stage shuts the earlier stages down again and returns
    /// [`UpnpError::InitFailed`].
    pub fn init_with_interface(
        config: SdkConfig,
        protocol: Arc<dyn ProtocolClient>,
        ifinfo: IfInfo,
    ) -> Result<Self> {
        config.validate()?;

        tracing::info!(
            interface = %ifinfo.name,
            ip = ?ifinfo.ipv4,
            max_handles = config.max_handles,
            "starting UPnP SDK session"
        );

        let table = Arc::new(RwLock::new(HandleTable::new(config.max_handles)));

        // Pools roll themselves back on drop, so `?` unwinds a partial
        // bring-up without leaking workers.
        let recv_pool = Arc::new(ThreadPool::new("upnp-recv", &config.recv_pool)?);
        let send_pool = Arc::new(ThreadPool::new("upnp-send", &config.send_pool)?);
        let miniserver_pool = Arc::new(ThreadPool::new("upnp-mini", &config.miniserver_pool)?);
        let timer = TimerThread::start()?;

        let dispatcher = Dispatcher::new(
            Arc::clone(&table),
            Arc::clone(&send_pool),
            Arc::clone(&miniserver_pool),
            Arc::clone(&protocol),
            config.default_timeout,
            config.max_content_length,
        );
        let advertiser = Arc::new(Advertiser::new(
            Arc::clone(&table),
            Arc::clone(&send_pool),
            protocol,
        ));

        Ok(Self {
            config,
            ifinfo,
            table,
            recv_pool,
            send_pool,
            miniserver_pool,
            timer,
            dispatcher,
            advertiser,
            shut_down: Mutex::new(false),
        })
    }

    /// The interface this session is bound to.
    pub fn interface(&self) -> &IfInfo {
        &self.ifinfo
    }

    /// The configuration this session was started with.
    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// Register a device-role handle and start advertising it.
    ///
    /// The first advertisement group goes out immediately; re-announcement
    /// repeats at half the max-age from then on and stops when the handle
    /// is unregistered.
    pub fn register_device(&self, registration: DeviceRegistration) -> Result<Handle> {
        let max_age = registration.max_age.unwrap_or(self.config.default_max_age);
        let state = DeviceState::from_description(
            registration.desc_url,
            registration.description,
            max_age,
            registration.address_family,
            self.config.max_subscriptions,
            self.config.max_subscription_timeout,
        );
        let info = HandleInfo {
            callback: registration.callback,
            cookie: registration.cookie,
            alias_installed: false,
            state: RoleState::Device(state),
        };

        let handle = {
            tracing::trace!("acquiring handle lock (write) for device registration");
            let mut table = self.table.write().map_err(|_| UpnpError::LockPoisoned)?;
            table.allocate(info)?
        };

        let scheduled = self.timer.schedule_periodic(
            Duration::ZERO,
            advertise_interval(max_age),
            Some(handle),
            self.advertiser.periodic_payload(handle),
        );
        if let Err(e) = scheduled {
            // Roll the allocation back rather than leave a silent device.
            if let Ok(mut table) = self.table.write() {
                let _ = table.free(handle);
            }
            return Err(e);
        }

        tracing::info!(%handle, max_age = ?max_age, "registered device");
        Ok(handle)
    }

    /// Register a client-role (control point) handle.
    pub fn register_client(&self, callback: Callback, cookie: Cookie) -> Result<Handle> {
        let info = HandleInfo {
            callback,
            cookie,
            alias_installed: false,
            state: RoleState::Client(ClientState::default()),
        };

        tracing::trace!("acquiring handle lock (write) for client registration");
        let mut table = self.table.write().map_err(|_| UpnpError::LockPoisoned)?;
        let handle = table.allocate(info)?;
        drop(table);

        tracing::info!(%handle, "registered client");
        Ok(handle)
    }

    /// Unregister a handle of either role.
    ///
    /// Timer jobs owned by the handle are cancelled before the slot is
    /// freed, so no scheduled job ever runs against the dead handle. Role
    /// state (description document, subscription and search lists) is
    /// dropped with the returned info.
    pub fn unregister(&self, handle: Handle) -> Result<()> {
        let cancelled = self.timer.cancel_for_handle(handle);

        tracing::trace!(%handle, "acquiring handle lock (write) for unregister");
        let mut table = self.table.write().map_err(|_| UpnpError::LockPoisoned)?;
        let info = table.free(handle)?;
        drop(table);

        tracing::info!(%handle, role = ?info.role(), cancelled, "unregistered handle");
        Ok(())
    }

    /// Send one advertisement group for a device handle right now.
    ///
    /// `max_age` overrides the handle's configured value for this group
    /// only; the periodic schedule is unaffected.
    pub fn send_advertisement(&self, handle: Handle, max_age: Option<Duration>) -> Result<()> {
        self.advertiser.send(handle, max_age)
    }

    /// Queue an operation for asynchronous execution.
    pub fn dispatch(&self, param: NonblockParam) -> Result<()> {
        self.dispatcher.dispatch(param)
    }

    /// Hand one unit of inbound request work to the request-processing
    /// pool.
    ///
    /// This is the entry point the message layer uses for work arriving
    /// from the network (a received datagram, an accepted connection), so
    /// inbound processing never competes with outbound sends for workers.
    pub fn submit_request(
        &self,
        priority: JobPriority,
        work: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.recv_pool.submit(Job::new(priority, work))
    }

    /// Run a closure against a handle's state under the read lock.
    ///
    /// The closure must not block; copy out what you need and return.
    pub fn with_handle<T>(
        &self,
        handle: Handle,
        f: impl FnOnce(&HandleInfo) -> T,
    ) -> Result<T> {
        let table = self.table.read().map_err(|_| UpnpError::LockPoisoned)?;
        Ok(f(table.get(handle)?))
    }

    /// Run a closure against a handle's state under the write lock.
    pub fn with_handle_mut<T>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut HandleInfo) -> T,
    ) -> Result<T> {
        let mut table = self.table.write().map_err(|_| UpnpError::LockPoisoned)?;
        Ok(f(table.get_mut(handle)?))
    }

    /// The first live device handle, optionally restricted by family.
    pub fn first_device(&self, family: Option<AddressFamily>) -> Result<Handle> {
        let table = self.table.read().map_err(|_| UpnpError::LockPoisoned)?;
        table.first_device(family).map(|(handle, _)| handle)
    }

    /// The first live client handle.
    pub fn first_client(&self) -> Result<Handle> {
        let table = self.table.read().map_err(|_| UpnpError::LockPoisoned)?;
        table.first_client().map(|(handle, _)| handle)
    }

    /// Number of live handles.
    pub fn handle_count(&self) -> usize {
        self.table.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Mark whether a web-server alias is installed for a handle.
    pub fn set_alias_installed(&self, handle: Handle, installed: bool) -> Result<()> {
        self.with_handle_mut(handle, |info| info.alias_installed = installed)
    }

    /// Jobs queued across the three pools plus the timer, for diagnostics.
    pub fn pending_jobs(&self) -> usize {
        self.recv_pool.queued_jobs()
            + self.send_pool.queued_jobs()
            + self.miniserver_pool.queued_jobs()
            + self.timer.scheduled_jobs()
    }

    /// Stop the session.
    ///
    /// The timer goes down first so no new periodic jobs reach the pools,
    /// then each pool drains its queue and joins its workers. Safe to call
    /// more than once; `Drop` calls it as a backstop.
    pub fn shutdown(&self) {
        {
            let mut done = match self.shut_down.lock() {
                Ok(g) => g,
                Err(_) => return,
            };
            if *done {
                return;
            }
            *done = true;
        }

        tracing::info!("stopping UPnP SDK session");
        self.timer.shutdown();
        self.miniserver_pool.shutdown();
        self.send_pool.shutdown();
        self.recv_pool.shutdown();
    }
}

impl Drop for UpnpSdk {
    fn drop(&mut self) {
        self.shutdown();
    }
}
