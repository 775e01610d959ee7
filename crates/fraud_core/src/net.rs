//! Small IP-range helpers shared by the IP-intelligence and velocity checks.

use std::net::IpAddr;

/// True for addresses that should never be sent to an upstream IP
/// intelligence provider or counted against per-IP velocity: private,
/// loopback, link-local and otherwise reserved ranges.
pub fn is_non_routable(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                // 100.64.0.0/10 carrier-grade NAT
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Parse an IP string, treating unparseable values as non-routable.
pub fn parse_routable(ip: &str) -> Option<IpAddr> {
    let addr: IpAddr = ip.trim().parse().ok()?;
    if is_non_routable(&addr) {
        None
    } else {
        Some(addr)
    }
}
