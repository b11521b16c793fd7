//! Socket construction for the responders.
//!
//! Listeners are built with socket2 so that every responder binds the same
//! way, then handed to tokio. Listen addresses accept the short `:port` form
//! (all interfaces).

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::error::ServeError;

/// Listen backlog for stream listeners.
const LISTEN_BACKLOG: i32 = 1024;

/// Expand a `:port` address to listen on all IPv4 interfaces.
pub fn normalize_listen(listen: &str) -> String {
    if listen.starts_with(':') {
        format!("0.0.0.0{listen}")
    } else {
        listen.to_string()
    }
}

/// Resolve a listen address (`host:port`, `ip:port` or `:port`).
///
/// The first resolved address wins.
pub async fn resolve_listen_addr(listen: &str) -> Result<SocketAddr, ServeError> {
    let normalized = normalize_listen(listen);
    let mut addrs = tokio::net::lookup_host(normalized.as_str())
        .await
        .map_err(|source| ServeError::Resolve {
            addr: listen.to_string(),
            source,
        })?;

    addrs.next().ok_or_else(|| ServeError::Resolve {
        addr: listen.to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
    })
}

fn domain_for(addr: &SocketAddr) -> Domain {
    match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    }
}

/// Create a non-blocking TCP listener bound to `addr`.
pub fn create_tcp_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(domain_for(&addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Create a non-blocking UDP socket bound to `addr`.
pub fn create_udp_socket(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(domain_for(&addr), Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    Ok(socket.into())
}

/// IP family named by a packet network string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    /// `ip`: follow the listen address
    Any,
    /// `ip4`
    V4,
    /// `ip6`
    V6,
}

/// A packet network such as `ip4:icmp`, `ip6:58` or `ip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNetwork {
    pub family: IpFamily,
    /// IP protocol number; `None` means ICMP for the chosen family.
    pub protocol: Option<u8>,
}

impl FromStr for RawNetwork {
    type Err = String;

    fn from_str(network: &str) -> Result<Self, Self::Err> {
        let (family, protocol) = match network.split_once(':') {
            Some((family, protocol)) => (family, Some(protocol)),
            None => (network, None),
        };

        let family = match family {
            "ip" => IpFamily::Any,
            "ip4" => IpFamily::V4,
            "ip6" => IpFamily::V6,
            other => return Err(format!("unknown network family '{other}'")),
        };

        let protocol = match protocol {
            None => None,
            Some(name) => Some(protocol_number(name)?),
        };

        Ok(RawNetwork { family, protocol })
    }
}

fn protocol_number(name: &str) -> Result<u8, String> {
    if let Ok(number) = name.parse::<u8>() {
        return Ok(number);
    }
    match name.to_ascii_lowercase().as_str() {
        "icmp" => Ok(1),
        "igmp" => Ok(2),
        "tcp" => Ok(6),
        "udp" => Ok(17),
        "ipv6-icmp" | "icmpv6" => Ok(58),
        "" => Err("missing protocol after ':'".to_string()),
        other => Err(format!("unknown protocol '{other}'")),
    }
}

/// Host part of a raw listen address. Any port is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RawHost {
    /// Empty host or the `:port` form
    Unspecified,
    Ip(IpAddr),
    Name(String),
}

fn raw_host(listen: &str) -> RawHost {
    let listen = listen.trim();
    if listen.is_empty() {
        return RawHost::Unspecified;
    }
    // Literals first: `::1` also starts with a colon
    if let Ok(ip) = listen.parse::<IpAddr>() {
        return RawHost::Ip(ip);
    }
    if let Ok(addr) = listen.parse::<SocketAddr>() {
        return RawHost::Ip(addr.ip());
    }
    if let Some(inner) = listen.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        if let Ok(ip) = inner.parse::<Ipv6Addr>() {
            return RawHost::Ip(IpAddr::V6(ip));
        }
    }
    if let Some(port) = listen.strip_prefix(':') {
        if port.bytes().all(|b| b.is_ascii_digit()) {
            return RawHost::Unspecified;
        }
    }

    match listen.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            RawHost::Name(name.to_string())
        }
        _ => RawHost::Name(listen.to_string()),
    }
}

impl IpFamily {
    fn admits(self, ip: &IpAddr) -> bool {
        match self {
            IpFamily::Any => true,
            IpFamily::V4 => ip.is_ipv4(),
            IpFamily::V6 => ip.is_ipv6(),
        }
    }
}

impl RawNetwork {
    /// Resolve the host part of `listen`. `None` means the unspecified
    /// address.
    ///
    /// Host names are looked up and the first address of this network's
    /// family is used (IPv4 first for `ip`). Literals are returned as given;
    /// [`RawNetwork::bind_target`] rejects a literal of the wrong family.
    pub async fn resolve_host(&self, listen: &str) -> Result<Option<IpAddr>, ServeError> {
        let name = match raw_host(listen) {
            RawHost::Unspecified => return Ok(None),
            RawHost::Ip(ip) => return Ok(Some(ip)),
            RawHost::Name(name) => name,
        };

        let resolve_err = |source| ServeError::Resolve {
            addr: listen.to_string(),
            source,
        };
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((name.as_str(), 0))
            .await
            .map_err(resolve_err)?
            .map(|addr| addr.ip())
            .collect();

        let chosen = match self.family {
            IpFamily::Any => addrs.iter().find(|ip| ip.is_ipv4()).or(addrs.first()),
            family => addrs.iter().find(|ip| family.admits(ip)),
        };
        match chosen {
            Some(ip) => Ok(Some(*ip)),
            None => Err(resolve_err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address of the network's family for '{name}'"),
            ))),
        }
    }

    /// Pick the local address and protocol number to open for a resolved
    /// `host`.
    pub fn bind_target(&self, host: Option<IpAddr>) -> Result<(IpAddr, u8), String> {
        let v6 = match (self.family, host) {
            (IpFamily::V4, Some(IpAddr::V6(_))) => {
                return Err("IPv6 address given for an ip4 network".to_string())
            }
            (IpFamily::V6, Some(IpAddr::V4(_))) => {
                return Err("IPv4 address given for an ip6 network".to_string())
            }
            (IpFamily::V6, _) => true,
            (IpFamily::V4, _) => false,
            (IpFamily::Any, host) => matches!(host, Some(IpAddr::V6(_))),
        };

        let ip = match host {
            Some(ip) => ip,
            None if v6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let protocol = self.protocol.unwrap_or(if v6 { 58 } else { 1 });

        Ok((ip, protocol))
    }
}

/// Open a non-blocking raw IP socket for `protocol` bound to `ip`.
///
/// Requires CAP_NET_RAW (or root) on Linux.
pub fn open_raw_socket(ip: IpAddr, protocol: u8) -> io::Result<Socket> {
    let domain = match ip {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::RAW, Some(Protocol::from(i32::from(protocol))))?;

    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(SocketAddr::new(ip, 0)))?;

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_listen() {
        assert_eq!(normalize_listen(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_listen("127.0.0.1:9000"), "127.0.0.1:9000");
        assert_eq!(normalize_listen("[::1]:9000"), "[::1]:9000");
    }

    #[tokio::test]
    async fn test_resolve_short_form() {
        let addr = resolve_listen_addr(":8080").await.unwrap();
        assert_eq!(addr, "0.0.0.0:8080".parse().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_rejects_missing_port() {
        let err = resolve_listen_addr("127.0.0.1").await.unwrap_err();
        assert!(matches!(err, ServeError::Resolve { .. }));
    }

    #[test]
    fn test_tcp_listener_rejects_address_in_use() {
        let first = create_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        let err = create_tcp_listener(addr).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[test]
    fn test_udp_socket_rejects_address_in_use() {
        let first = create_udp_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        assert!(create_udp_socket(addr).is_err());
    }

    #[test]
    fn test_parse_raw_networks() {
        assert_eq!(
            "ip4:icmp".parse::<RawNetwork>().unwrap(),
            RawNetwork {
                family: IpFamily::V4,
                protocol: Some(1)
            }
        );
        assert_eq!(
            "ip6:ipv6-icmp".parse::<RawNetwork>().unwrap(),
            RawNetwork {
                family: IpFamily::V6,
                protocol: Some(58)
            }
        );
        assert_eq!(
            "ip:17".parse::<RawNetwork>().unwrap(),
            RawNetwork {
                family: IpFamily::Any,
                protocol: Some(17)
            }
        );
        assert_eq!(
            "ip6".parse::<RawNetwork>().unwrap(),
            RawNetwork {
                family: IpFamily::V6,
                protocol: None
            }
        );
        assert_eq!("ip4:TCP".parse::<RawNetwork>().unwrap().protocol, Some(6));
    }

    #[test]
    fn test_parse_raw_network_errors() {
        assert!("http2".parse::<RawNetwork>().is_err());
        assert!("ip4:".parse::<RawNetwork>().is_err());
        assert!("ip4:bogus".parse::<RawNetwork>().is_err());
        assert!("ip4:256".parse::<RawNetwork>().is_err());
        assert!("".parse::<RawNetwork>().is_err());
    }

    async fn target(network: &str, listen: &str) -> Result<(IpAddr, u8), String> {
        let raw: RawNetwork = network.parse().unwrap();
        let host = raw.resolve_host(listen).await.map_err(|e| e.to_string())?;
        raw.bind_target(host)
    }

    #[test]
    fn test_raw_host_forms() {
        assert_eq!(raw_host(""), RawHost::Unspecified);
        assert_eq!(raw_host(":8080"), RawHost::Unspecified);
        assert_eq!(raw_host("::"), RawHost::Ip(IpAddr::V6(Ipv6Addr::UNSPECIFIED)));
        assert_eq!(raw_host("::1"), RawHost::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert_eq!(raw_host("[::1]"), RawHost::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert_eq!(raw_host("[::1]:0"), RawHost::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert_eq!(
            raw_host("127.0.0.1:9000"),
            RawHost::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert_eq!(raw_host("localhost"), RawHost::Name("localhost".to_string()));
        assert_eq!(raw_host("localhost:0"), RawHost::Name("localhost".to_string()));
    }

    #[tokio::test]
    async fn test_bind_target_defaults() {
        assert_eq!(
            target("ip4", ":8080").await.unwrap(),
            (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 1)
        );
        assert_eq!(
            target("ip6", "").await.unwrap(),
            (IpAddr::V6(Ipv6Addr::UNSPECIFIED), 58)
        );
        assert_eq!(
            target("ip", "::").await.unwrap(),
            (IpAddr::V6(Ipv6Addr::UNSPECIFIED), 1)
        );
    }

    #[tokio::test]
    async fn test_bind_target_host_forms() {
        assert_eq!(
            target("ip:icmp", "::1").await.unwrap(),
            (IpAddr::V6(Ipv6Addr::LOCALHOST), 1)
        );
        assert_eq!(
            target("ip:icmp", "127.0.0.1:9000").await.unwrap(),
            (IpAddr::V4(Ipv4Addr::LOCALHOST), 1)
        );
        assert_eq!(
            target("ip6", "[::1]").await.unwrap(),
            (IpAddr::V6(Ipv6Addr::LOCALHOST), 58)
        );
    }

    #[tokio::test]
    async fn test_bind_target_family_mismatch() {
        assert!(target("ip4:icmp", "::1").await.is_err());
        assert!(target("ip4:icmp", "[::1]:0").await.is_err());
        assert!(target("ip6:58", "127.0.0.1").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_host_name() {
        let v4: RawNetwork = "ip4:icmp".parse().unwrap();
        for listen in ["localhost", "localhost:0"] {
            let host = v4.resolve_host(listen).await.unwrap();
            assert_eq!(host, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
            assert_eq!(
                v4.bind_target(host).unwrap(),
                (IpAddr::V4(Ipv4Addr::LOCALHOST), 1)
            );
        }
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_resolve_error() {
        let v4: RawNetwork = "ip4:icmp".parse().unwrap();
        let err = v4.resolve_host("no-such-host.invalid").await.unwrap_err();
        assert!(matches!(err, ServeError::Resolve { .. }));
    }
}
