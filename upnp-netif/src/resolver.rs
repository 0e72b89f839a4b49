//! Interface scanning and selection.
//!
//! The selection rules are pure functions over [`Candidate`] records so they
//! can be tested with synthetic interfaces; only [`scan_candidates`] touches
//! the operating system.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{NetifError, Result};
use crate::{IfInfo, MAX_INTERFACES};

/// One network interface as reported by the operating system, with its
/// addresses merged across enumeration entries.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub name: String,
    pub index: u32,
    pub up: bool,
    pub loopback: bool,
    pub multicast: bool,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl Candidate {
    /// Whether this interface may carry UPnP traffic: up, not loopback,
    /// multicast-capable, and holding at least one address.
    fn usable(&self) -> bool {
        self.up
            && !self.loopback
            && self.multicast
            && (self.ipv4.is_some() || self.ipv6.is_some())
    }
}

/// Select the interface to operate on.
///
/// With a name, only that interface is considered and it must be usable.
/// Without one, the first usable interface in enumeration order wins.
pub(crate) fn select(name: Option<&str>, candidates: &[Candidate]) -> Result<IfInfo> {
    let chosen = match name {
        Some(wanted) => candidates
            .iter()
            .find(|c| c.name == wanted)
            .filter(|c| c.usable())
            .ok_or_else(|| NetifError::InterfaceNotFound(wanted.to_string()))?,
        None => candidates
            .iter()
            .find(|c| c.usable())
            .ok_or(NetifError::NoUsableInterface)?,
    };

    tracing::debug!(
        interface = %chosen.name,
        index = chosen.index,
        ipv4 = ?chosen.ipv4,
        ipv6 = ?chosen.ipv6,
        "selected network interface"
    );

    Ok(IfInfo {
        name: chosen.name.clone(),
        ipv4: chosen.ipv4,
        ipv6: chosen.ipv6,
        index: chosen.index,
    })
}

/// Enumerate host interfaces, merging the one-address-per-entry results of
/// getifaddrs into one [`Candidate`] per interface name.
///
/// The scan is bounded: entries past [`MAX_INTERFACES`] distinct interfaces
/// are ignored.
#[cfg(unix)]
pub(crate) fn scan_candidates() -> Result<Vec<Candidate>> {
    use nix::ifaddrs::getifaddrs;
    use nix::net::if_::{if_nametoindex, InterfaceFlags};

    let addrs = getifaddrs().map_err(|e| NetifError::Enumeration(e.to_string()))?;

    let mut candidates: Vec<Candidate> = Vec::new();
    for ifaddr in addrs {
        // Undo Linux aliasing: "eth0:1" is "eth0" really.
        let name = match ifaddr.interface_name.split_once(':') {
            None => ifaddr.interface_name.clone(),
            Some((prefix, _alias)) => prefix.to_string(),
        };

        let pos = match candidates.iter().position(|c| c.name == name) {
            Some(pos) => pos,
            None => {
                if candidates.len() >= MAX_INTERFACES {
                    tracing::warn!(
                        limit = MAX_INTERFACES,
                        "interface scan limit reached, ignoring remaining interfaces"
                    );
                    break;
                }
                let index = if_nametoindex(name.as_str()).unwrap_or(0);
                candidates.push(Candidate {
                    name,
                    index,
                    up: ifaddr.flags.contains(InterfaceFlags::IFF_UP),
                    loopback: ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK),
                    multicast: ifaddr.flags.contains(InterfaceFlags::IFF_MULTICAST),
                    ipv4: None,
                    ipv6: None,
                });
                candidates.len() - 1
            }
        };
        let candidate = &mut candidates[pos];

        if let Some(addr) = ifaddr.address {
            if let Some(sin) = addr.as_sockaddr_in() {
                candidate.ipv4.get_or_insert(sin.ip());
            } else if let Some(sin6) = addr.as_sockaddr_in6() {
                candidate.ipv6.get_or_insert(sin6.ip());
            }
        }
    }

    Ok(candidates)
}

#[cfg(not(unix))]
pub(crate) fn scan_candidates() -> Result<Vec<Candidate>> {
    Err(NetifError::Enumeration(
        "interface enumeration is only supported on unix targets".to_string(),
    ))
}
