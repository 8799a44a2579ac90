use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Address of one participant. Ordering is address first, then port, which
/// keeps peer tables iterating in the same order on every instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }

    pub const fn localhost(port: u16) -> Self {
        Self::new(Ipv4Addr::LOCALHOST, port)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.addr, self.port))
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl TryFrom<SocketAddr> for Endpoint {
    type Error = EndpointError;

    fn try_from(addr: SocketAddr) -> Result<Self, Self::Error> {
        match addr {
            SocketAddr::V4(v4) => Ok(v4.into()),
            SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
                Some(ip) => Ok(Self::new(ip, v6.port())),
                None => Err(EndpointError::NotIpv4(addr)),
            },
        }
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.socket_addr()
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: SocketAddr = s
            .parse()
            .map_err(|_| EndpointError::Invalid(s.to_string()))?;
        Self::try_from(addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("{0} is not an IPv4 address")]
    NotIpv4(SocketAddr),
    #[error("invalid endpoint '{0}'")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_ordering() {
        let a = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 9000);
        let b = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 9001);
        let c = Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 1);

        let mut endpoints = vec![c, b, a];
        endpoints.sort();
        assert_eq!(endpoints, vec![a, b, c]);
    }

    #[test]
    fn test_endpoint_parse_and_display() {
        let endpoint: Endpoint = "192.168.1.20:27016".parse().unwrap();
        assert_eq!(endpoint.addr, Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(endpoint.port, 27016);
        assert_eq!(endpoint.to_string(), "192.168.1.20:27016");

        assert!("[::1]:80".parse::<Endpoint>().is_err());
        assert!("nonsense".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_ipv4_mapped_socket_addr() {
        let addr: SocketAddr = "[::ffff:127.0.0.1]:4000".parse().unwrap();
        assert_eq!(Endpoint::try_from(addr).unwrap(), Endpoint::localhost(4000));
    }
}
