//! Network interface resolution for the upnp-sdk UPnP stack
//!
//! Discovery and advertisement need one concrete network interface to bind
//! multicast sockets to and to build description URLs from. This crate scans
//! the host's interfaces once and picks one that can actually carry UPnP
//! traffic: it must be up, not a loopback, multicast-capable, and hold at
//! least one IPv4 or IPv6 address.
//!
//! # Quick Start
//!
//! ```no_run
//! // Let the resolver pick the first suitable interface
//! let info = upnp_netif::resolve(None)?;
//! println!("operating on {} (index {})", info.name, info.index);
//!
//! // Or pin the SDK to a specific interface
//! let info = upnp_netif::resolve(Some("eth0"))?;
//! # Ok::<(), upnp_netif::NetifError>(())
//! ```

mod error;
mod resolver;

pub use error::{NetifError, Result};

use std::net::Ipv4Addr;

/// Upper bound on the number of interfaces considered during a scan.
pub const MAX_INTERFACES: usize = 256;

/// The resolved network interface the SDK operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfInfo {
    /// Interface name (requested or found), e.g. "eth0"
    pub name: String,
    /// First IPv4 address on the interface, if any
    pub ipv4: Option<std::net::Ipv4Addr>,
    /// First IPv6 address on the interface, if any
    pub ipv6: Option<std::net::Ipv6Addr>,
    /// Operating-system interface index
    pub index: u32,
}

/// Resolve the network interface to operate on.
///
/// If `name` is given, only that interface is accepted and it must meet the
/// criteria (up, non-loopback, multicast-capable, addressed). If `name` is
/// `None`, the first interface meeting the criteria is returned. Fails
/// explicitly rather than guessing.
///
/// # Errors
///
/// Returns [`NetifError::InterfaceNotFound`] if a named interface is missing
/// or unusable, [`NetifError::NoUsableInterface`] if no interface qualifies,
/// or [`NetifError::Enumeration`] if the OS enumeration itself failed.
pub fn resolve(name: Option<&str>) -> Result<IfInfo> {
    let candidates = resolver::scan_candidates()?;
    resolver::select(name, &candidates)
}

/// Get the local IPv4 address of the default interface.
///
/// This is a convenience projection of [`resolve`] restricted to IPv4: the
/// same selection runs, and the call fails if the chosen interface carries
/// no IPv4 address.
pub fn local_host_ip() -> Result<Ipv4Addr> {
    let info = resolve(None)?;
    info.ipv4.ok_or(NetifError::NoIpv4Address(info.name))
}
