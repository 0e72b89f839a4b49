//! The fixed-capacity handle table.
//!
//! Maps small integer handles to [`HandleInfo`] slots. The table itself
//! performs no locking: the owning session wraps it in the process-wide
//! handle lock (`Arc<RwLock<HandleTable>>`) and every caller acquires the
//! right mode — read for lookups, write for allocate/free/mutate — around
//! the whole "find handle, then act" sequence. Long-running protocol I/O
//! must happen outside the lock, on data copied out while it was held.

use crate::error::{Result, UpnpError};
use crate::handle::{AddressFamily, Handle, HandleInfo, HandleRole};

/// Fixed-capacity registry of live handles.
///
/// Allocation always returns the lowest-numbered free slot, so handle
/// numbering is deterministic given a fixed free-list state and callers may
/// rely on first-match index order in the `first_*` scans.
pub struct HandleTable {
    slots: Vec<Option<HandleInfo>>,
}

impl HandleTable {
    /// Create an empty table with room for `capacity` live handles.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    /// Allocate the lowest-numbered free slot for `info`.
    ///
    /// Fails with [`UpnpError::OutOfHandles`] when every slot is occupied;
    /// the table never grows.
    pub fn allocate(&mut self, info: HandleInfo) -> Result<Handle> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(UpnpError::OutOfHandles {
                capacity: self.slots.len(),
            })?;

        self.slots[slot] = Some(info);
        // Slot 0 maps to handle 1; 0 stays an invalid sentinel.
        let handle = Handle::from_raw(slot as i32 + 1).expect("slot index overflow");
        tracing::debug!(%handle, "allocated handle");
        Ok(handle)
    }

    /// Free a handle, dropping all role-owned state (description document,
    /// subscription and search lists).
    ///
    /// Fails with [`UpnpError::InvalidHandle`] if the handle is out of range
    /// or already free.
    pub fn free(&mut self, handle: Handle) -> Result<HandleInfo> {
        let slot = self.slot_of(handle)?;
        let info = self.slots[slot]
            .take()
            .ok_or(UpnpError::InvalidHandle(handle.as_i32()))?;
        tracing::debug!(%handle, role = ?info.role(), "freed handle");
        Ok(info)
    }

    /// Look up a live handle.
    pub fn get(&self, handle: Handle) -> Result<&HandleInfo> {
        let slot = self.slot_of(handle)?;
        self.slots[slot]
            .as_ref()
            .ok_or(UpnpError::InvalidHandle(handle.as_i32()))
    }

    /// Look up a live handle, mutably. Callers must hold the handle lock in
    /// write mode.
    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut HandleInfo> {
        let slot = self.slot_of(handle)?;
        self.slots[slot]
            .as_mut()
            .ok_or(UpnpError::InvalidHandle(handle.as_i32()))
    }

    /// Typed lookup: the handle must be a live device-role handle.
    pub fn device(&self, handle: Handle) -> Result<&HandleInfo> {
        self.typed(handle, HandleRole::Device)
    }

    /// Typed lookup: the handle must be a live client-role handle.
    pub fn client(&self, handle: Handle) -> Result<&HandleInfo> {
        self.typed(handle, HandleRole::Client)
    }

    fn typed(&self, handle: Handle, role: HandleRole) -> Result<&HandleInfo> {
        let info = self.get(handle)?;
        if info.role() == role {
            Ok(info)
        } else {
            Err(UpnpError::InvalidHandle(handle.as_i32()))
        }
    }

    /// Linear scan for the first live device handle bound to the requested
    /// address family, or to either family when unspecified.
    pub fn first_device(&self, family: Option<AddressFamily>) -> Result<(Handle, &HandleInfo)> {
        self.scan(|info| {
            info.device()
                .is_some_and(|d| family.map_or(true, |f| d.address_family == f))
        })
    }

    /// Linear scan for the first live client handle. Used by callers that do
    /// not yet know their own handle.
    pub fn first_client(&self) -> Result<(Handle, &HandleInfo)> {
        self.scan(|info| info.role() == HandleRole::Client)
    }

    fn scan(&self, predicate: impl Fn(&HandleInfo) -> bool) -> Result<(Handle, &HandleInfo)> {
        for (slot, entry) in self.slots.iter().enumerate() {
            if let Some(info) = entry {
                if predicate(info) {
                    let handle = Handle::from_raw(slot as i32 + 1).expect("slot index overflow");
                    return Ok((handle, info));
                }
            }
        }
        Err(UpnpError::InvalidHandle(0))
    }

    /// Number of currently live handles.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether no handles are live.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// The fixed upper bound on live handles.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot_of(&self, handle: Handle) -> Result<usize> {
        let raw = handle.as_i32();
        let slot = (raw - 1) as usize;
        if slot < self.slots.len() {
            Ok(slot)
        } else {
            Err(UpnpError::InvalidHandle(raw))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::test_support::{client_info, device_info};

    #[test]
    fn test_capacity_two_scenario() {
        let mut table = HandleTable::new(2);

        let h1 = table.allocate(device_info()).unwrap();
        assert_eq!(h1.as_i32(), 1);

        let h2 = table.allocate(client_info()).unwrap();
        assert_eq!(h2.as_i32(), 2);

        assert!(matches!(
            table.allocate(client_info()),
            Err(UpnpError::OutOfHandles { capacity: 2 })
        ));

        table.free(h1).unwrap();

        // Lowest-free policy: slot 1 is reused.
        let h3 = table.allocate(client_info()).unwrap();
        assert_eq!(h3.as_i32(), 1);
    }

    #[test]
    fn test_free_then_lookup_is_invalid() {
        let mut table = HandleTable::new(4);
        let h = table.allocate(device_info()).unwrap();
        assert!(table.get(h).is_ok());

        table.free(h).unwrap();
        assert!(matches!(table.get(h), Err(UpnpError::InvalidHandle(1))));
        assert!(matches!(table.free(h), Err(UpnpError::InvalidHandle(1))));
    }

    #[test]
    fn test_out_of_range_handles() {
        let table = HandleTable::new(2);
        let past_end = Handle::from_raw(3).unwrap();
        assert!(matches!(
            table.get(past_end),
            Err(UpnpError::InvalidHandle(3))
        ));
    }

    #[test]
    fn test_typed_lookup_role_mismatch() {
        let mut table = HandleTable::new(4);
        let dev = table.allocate(device_info()).unwrap();
        let cli = table.allocate(client_info()).unwrap();

        assert!(table.device(dev).is_ok());
        assert!(table.client(cli).is_ok());
        assert!(table.device(cli).is_err());
        assert!(table.client(dev).is_err());
    }

    #[test]
    fn test_first_device_by_family() {
        let mut table = HandleTable::new(4);
        let _cli = table.allocate(client_info()).unwrap();
        let dev = table.allocate(device_info()).unwrap();

        let (found, info) = table.first_device(None).unwrap();
        assert_eq!(found, dev);
        assert_eq!(info.role(), HandleRole::Device);

        let (found, _) = table.first_device(Some(AddressFamily::Ipv4)).unwrap();
        assert_eq!(found, dev);

        assert!(table.first_device(Some(AddressFamily::Ipv6)).is_err());
    }

    #[test]
    fn test_first_client_index_order() {
        let mut table = HandleTable::new(4);
        let _dev = table.allocate(device_info()).unwrap();
        let c1 = table.allocate(client_info()).unwrap();
        let _c2 = table.allocate(client_info()).unwrap();

        let (found, _) = table.first_client().unwrap();
        assert_eq!(found, c1);
    }

    #[test]
    fn test_first_scans_on_empty_table() {
        let table = HandleTable::new(4);
        assert!(table.first_device(None).is_err());
        assert!(table.first_client().is_err());
    }

    #[test]
    fn test_len_tracks_live_handles() {
        let mut table = HandleTable::new(3);
        assert!(table.is_empty());
        let h = table.allocate(client_info()).unwrap();
        assert_eq!(table.len(), 1);
        table.free(h).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.capacity(), 3);
    }
}
