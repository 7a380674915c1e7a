//! Address filters for query results and routing table entries.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use peerscope_identity::Multiaddr;
use peerscope_identity::multiaddr::Protocol;
use serde::{Deserialize, Serialize};

/// Which addresses a DHT node accepts from the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFilter {
    /// Globally routable addresses only.
    #[default]
    Public,
    /// Everything, including loopback and private ranges.
    Any,
}

impl AddressFilter {
    pub fn allows(&self, addr: &Multiaddr) -> bool {
        match self {
            Self::Public => is_public_addr(addr),
            Self::Any => true,
        }
    }

    /// Keep the addresses this filter allows.
    pub fn apply(&self, addrs: impl IntoIterator<Item = Multiaddr>) -> Vec<Multiaddr> {
        addrs.into_iter().filter(|a| self.allows(a)).collect()
    }
}

/// Whether the address's host component is globally routable.
///
/// Addresses without an IP or DNS host component are not public.
pub fn is_public_addr(addr: &Multiaddr) -> bool {
    match addr.iter().next() {
        Some(Protocol::Ip4(ip)) => is_global_ipv4(ip),
        Some(Protocol::Ip6(ip)) => is_global_ipv6(ip),
        Some(Protocol::Dns(name) | Protocol::Dns4(name) | Protocol::Dns6(name)) => {
            !is_localhost(&name)
        }
        Some(Protocol::Dnsaddr(name)) => !is_localhost(&name),
        _ => false,
    }
}

pub fn is_global_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => is_global_ipv4(ip),
        IpAddr::V6(ip) => is_global_ipv6(ip),
    }
}

fn is_global_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    let this_network = a == 0;
    let shared = a == 100 && (b & 0b1100_0000) == 64;
    let benchmarking = a == 198 && (b & 0xfe) == 18;
    let reserved = (a & 0xf0) == 240;

    !(ip.is_unspecified()
        || this_network
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || shared
        || ip.is_documentation()
        || benchmarking
        || reserved
        || ip.is_broadcast()
        || ip.is_multicast())
}

fn is_global_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_global_ipv4(v4);
    }
    let [first, second, ..] = ip.segments();
    let documentation = first == 0x2001 && second == 0x0db8;

    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        || ip.is_unique_local()
        || ip.is_unicast_link_local()
        || documentation)
}

fn is_localhost(name: &str) -> bool {
    let name = name.trim_end_matches('.');
    name.eq_ignore_ascii_case("localhost") || name.to_ascii_lowercase().ends_with(".localhost")
}
