//! SSDP advertisement scheduling.
//!
//! Registered devices re-announce themselves before their advertisements
//! expire. The timer thread fires a short payload that snapshots the
//! device's announcement data under the read lock and hands the actual
//! network send to the send pool, so neither the timer thread nor the
//! handle lock is ever held across I/O.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{Result, UpnpError};
use crate::handle::Handle;
use crate::pool::{Job, JobPriority, ThreadPool};
use crate::protocol::{Advertisement, ProtocolClient};
use crate::table::HandleTable;
use crate::timer::TimerPayload;

/// Re-announce at half the advertised max-age so a lost announcement still
/// leaves a full half-life of margin. Never below one second.
pub(crate) fn advertise_interval(max_age: Duration) -> Duration {
    (max_age / 2).max(Duration::from_secs(1))
}

/// Builds advertisement jobs for one device handle.
pub(crate) struct Advertiser {
    table: Arc<RwLock<HandleTable>>,
    send_pool: Arc<ThreadPool>,
    protocol: Arc<dyn ProtocolClient>,
}

impl Advertiser {
    pub fn new(
        table: Arc<RwLock<HandleTable>>,
        send_pool: Arc<ThreadPool>,
        protocol: Arc<dyn ProtocolClient>,
    ) -> Self {
        Self {
            table,
            send_pool,
            protocol,
        }
    }

    /// Snapshot the device's announcement data under the read lock.
    fn snapshot(&self, handle: Handle, max_age: Option<Duration>) -> Result<Advertisement> {
        let table = self.table.read().map_err(|_| UpnpError::LockPoisoned)?;
        let info = table.device(handle)?;
        let device = info
            .device()
            .ok_or(UpnpError::InvalidHandle(handle.as_i32()))?;
        Ok(Advertisement {
            handle,
            desc_url: device.desc_url.clone(),
            udns: device.udns(),
            max_age: max_age.unwrap_or(device.max_age),
            address_family: device.address_family,
        })
    }

    /// Send one advertisement group now, through the send pool.
    pub fn send(&self, handle: Handle, max_age: Option<Duration>) -> Result<()> {
        let ad = self.snapshot(handle, max_age)?;
        let protocol = Arc::clone(&self.protocol);
        self.send_pool.submit(Job::new(JobPriority::Medium, move || {
            if let Err(e) = protocol.advertise(&ad) {
                tracing::warn!(handle = %ad.handle, error = %e, "advertisement send failed");
            }
        }))
    }

    /// A timer payload that re-announces `handle` each period.
    ///
    /// Unregistration cancels the owning timer job before freeing the
    /// handle, so a payload that finds the handle gone can only be one
    /// already past cancellation; it degrades to a debug log.
    pub fn periodic_payload(self: &Arc<Self>, handle: Handle) -> TimerPayload {
        let advertiser = Arc::clone(self);
        Arc::new(move || match advertiser.send(handle, None) {
            Ok(()) => {}
            Err(UpnpError::InvalidHandle(_)) => {
                tracing::debug!(%handle, "skipping advertisement for freed handle");
            }
            Err(e) => {
                tracing::warn!(%handle, error = %e, "failed to queue advertisement");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::handle::test_support::{client_info, device_info};
    use crate::protocol::mock::RecordingProtocol;

    fn fixture() -> (Arc<RwLock<HandleTable>>, Arc<RecordingProtocol>, Arc<Advertiser>) {
        let table = Arc::new(RwLock::new(HandleTable::new(4)));
        let pool = Arc::new(
            ThreadPool::new(
                "send",
                &PoolConfig {
                    workers: 1,
                    queue_capacity: 16,
                },
            )
            .unwrap(),
        );
        let protocol = Arc::new(RecordingProtocol::default());
        let advertiser = Arc::new(Advertiser::new(
            Arc::clone(&table),
            pool,
            protocol.clone() as Arc<dyn ProtocolClient>,
        ));
        (table, protocol, advertiser)
    }

    fn wait_for_ads(protocol: &RecordingProtocol, count: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while protocol.advertise_count() < count {
            assert!(std::time::Instant::now() < deadline, "timed out waiting for ads");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_send_reaches_protocol() {
        let (table, protocol, advertiser) = fixture();
        let handle = table.write().unwrap().allocate(device_info()).unwrap();

        advertiser.send(handle, None).unwrap();
        wait_for_ads(&protocol, 1);
    }

    #[test]
    fn test_send_rejects_client_handle() {
        let (table, _protocol, advertiser) = fixture();
        let handle = table.write().unwrap().allocate(client_info()).unwrap();
        assert!(matches!(
            advertiser.send(handle, None),
            Err(UpnpError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_periodic_payload_tolerates_freed_handle() {
        let (table, protocol, advertiser) = fixture();
        let handle = table.write().unwrap().allocate(device_info()).unwrap();
        let payload = advertiser.periodic_payload(handle);

        table.write().unwrap().free(handle).unwrap();
        // Must neither panic nor advertise.
        payload();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(protocol.advertise_count(), 0);
    }

    #[test]
    fn test_interval_is_half_max_age_with_floor() {
        assert_eq!(
            advertise_interval(Duration::from_secs(1800)),
            Duration::from_secs(900)
        );
        assert_eq!(
            advertise_interval(Duration::from_millis(500)),
            Duration::from_secs(1)
        );
    }
}
