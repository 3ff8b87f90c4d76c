//! Local address lookups.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

/// The local address the OS would use to reach `peer`.
///
/// Connecting a UDP socket sends nothing; it only asks the routing table.
pub fn local_address_for(peer: IpAddr) -> Option<IpAddr> {
    let bind: SocketAddr = match peer {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect((peer, 1)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// Best guess at this host's LAN address, falling back to loopback.
pub fn primary_ip() -> IpAddr {
    const PROBES: [Ipv4Addr; 3] = [
        Ipv4Addr::new(192, 168, 1, 1),
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(172, 16, 0, 1),
    ];

    PROBES
        .into_iter()
        .filter_map(|probe| local_address_for(IpAddr::V4(probe)))
        .find(|ip| !ip.is_unspecified() && !ip.is_loopback())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_answers_from_loopback() {
        let local = local_address_for(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(local, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn test_primary_ip_is_usable() {
        assert!(!primary_ip().is_unspecified());
    }
}
