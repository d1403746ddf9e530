//! Addresses, namespaces and binding keys of the datagram messaging core.
//!
//! A local endpoint is identified by an IPv4 address and a namespace. The
//! namespace is an isolation domain: the same address bound in two
//! namespaces names two unrelated endpoints. The text form follows the
//! multiaddr convention: `/ip4/10.0.0.5/ns/0/port/4000`.
#![deny(missing_docs)]
#![deny(warnings)]
#![allow(non_local_definitions)]
use failure::Fail;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 address in host byte order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Addr(u32);

impl Addr {
    /// The unspecified wildcard address `0.0.0.0`.
    pub const UNSPECIFIED: Addr = Addr(0);

    /// Returns true for the wildcard address.
    pub fn is_unspecified(self) -> bool {
        self.0 == 0
    }

    /// Returns true for addresses in `224.0.0.0/4`.
    pub fn is_multicast(self) -> bool {
        self.0 >> 28 == 0xe
    }

    /// Returns true for the limited broadcast address.
    pub fn is_broadcast(self) -> bool {
        self.0 == u32::max_value()
    }
}

impl From<Ipv4Addr> for Addr {
    fn from(ip: Ipv4Addr) -> Self {
        Addr(u32::from(ip))
    }
}

impl From<[u8; 4]> for Addr {
    fn from(octets: [u8; 4]) -> Self {
        Ipv4Addr::from(octets).into()
    }
}

impl From<Addr> for Ipv4Addr {
    fn from(addr: Addr) -> Self {
        Ipv4Addr::from(addr.0)
    }
}

impl FromStr for Addr {
    type Err = EndpointParseError;

    fn from_str(addr: &str) -> Result<Self, Self::Err> {
        Ok(addr.parse::<Ipv4Addr>()?.into())
    }
}

impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        Ipv4Addr::from(self.0).fmt(f)
    }
}

/// An isolation domain an address is bound within.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Namespace(pub u32);

impl Namespace {
    /// The default namespace.
    pub const DEFAULT: Namespace = Namespace(0);
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Key of a binding directory entry.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BindKey {
    /// Local address.
    pub addr: Addr,
    /// Namespace the address is bound within.
    pub ns: Namespace,
}

impl std::fmt::Display for BindKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "/ip4/{}/ns/{}", self.addr, self.ns)
    }
}

/// Address of a bindable endpoint.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Endpoint {
    /// IPv4 address.
    pub addr: Addr,
    /// Namespace.
    pub ns: Namespace,
    /// Port, zero if unset.
    pub port: u16,
}

impl Endpoint {
    /// Creates a new endpoint.
    pub fn new(addr: Addr, ns: Namespace, port: u16) -> Self {
        Self { addr, ns, port }
    }

    /// Returns the binding key of the endpoint.
    pub fn key(&self) -> BindKey {
        BindKey {
            addr: self.addr,
            ns: self.ns,
        }
    }
}

/// Endpoint parse error.
#[derive(Debug, Fail)]
pub enum EndpointParseError {
    /// Unknown protocol.
    #[fail(display = "Unknown protocol.")]
    UnknownProtocol,
    /// Ip address parse error.
    #[fail(display = "{}", _0)]
    Ip(std::net::AddrParseError),
    /// Namespace or port parse error.
    #[fail(display = "{}", _0)]
    Num(std::num::ParseIntError),
}

impl From<std::net::AddrParseError> for EndpointParseError {
    fn from(err: std::net::AddrParseError) -> Self {
        Self::Ip(err)
    }
}

impl From<std::num::ParseIntError> for EndpointParseError {
    fn from(err: std::num::ParseIntError) -> Self {
        Self::Num(err)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(addr: &str) -> Result<Self, Self::Err> {
        let parts: Vec<_> = addr.split("/").collect();
        let mut ip = None;
        let mut ns = None;
        let mut port = None;
        for p in parts[1..].chunks(2).enumerate() {
            match p {
                (0, [k, v]) => {
                    ip = Some(match *k {
                        "ip4" => v.parse::<Ipv4Addr>()?.into(),
                        _ => return Err(EndpointParseError::UnknownProtocol),
                    })
                }
                (1, [k, v]) => {
                    ns = Some(match *k {
                        "ns" => Namespace(u32::from_str(v)?),
                        _ => return Err(EndpointParseError::UnknownProtocol),
                    })
                }
                (2, [k, v]) => {
                    port = Some(match *k {
                        "port" => u16::from_str(v)?,
                        _ => return Err(EndpointParseError::UnknownProtocol),
                    })
                }
                _ => return Err(EndpointParseError::UnknownProtocol),
            }
        }
        if ip.is_none() {
            return Err(EndpointParseError::UnknownProtocol);
        }
        Ok(Self {
            addr: ip.unwrap(),
            ns: ns.unwrap_or(Namespace::DEFAULT),
            port: port.unwrap_or(0),
        })
    }
}

/// Trait to abstract over types that can be parsed to an `Endpoint`.
pub trait ToEndpoint {
    /// Returns the endpoint.
    fn to_endpoint(self) -> Result<Endpoint, EndpointParseError>;
}

impl ToEndpoint for Endpoint {
    fn to_endpoint(self) -> Result<Endpoint, EndpointParseError> {
        Ok(self)
    }
}

impl ToEndpoint for &str {
    fn to_endpoint(self) -> Result<Endpoint, EndpointParseError> {
        Endpoint::from_str(self)?.to_endpoint()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "/ip4/{}/ns/{}/port/{}", self.addr, self.ns, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rt(sep: &str) {
        // parse
        let ep: Endpoint = sep.parse().unwrap();
        // format
        assert!(format!("{}", ep).starts_with(sep));
        // &str -> Endpoint
        let ep2 = sep.to_endpoint().unwrap();
        assert_eq!(ep, ep2);
        // Endpoint -> Endpoint
        let ep2 = ep.clone().to_endpoint().unwrap();
        assert_eq!(ep, ep2);
    }

    #[test]
    fn test_endpoint() {
        rt("/ip4/127.0.0.1/ns/0/port/0");
        rt("/ip4/10.0.0.5/ns/7/port/4000");
        rt("/ip4/0.0.0.0");
        rt("/ip4/10.0.0.5/ns/1");
    }

    #[test]
    fn test_addr_classes() {
        let addr: Addr = "0.0.0.0".parse().unwrap();
        assert!(addr.is_unspecified());
        let addr: Addr = "239.0.0.1".parse().unwrap();
        assert!(addr.is_multicast());
        let addr: Addr = "255.255.255.255".parse().unwrap();
        assert!(addr.is_broadcast());
        let addr: Addr = "10.0.0.5".parse().unwrap();
        assert!(!addr.is_unspecified() && !addr.is_multicast() && !addr.is_broadcast());
    }

    #[test]
    fn test_key_order() {
        let a = BindKey {
            addr: "10.0.0.1".parse().unwrap(),
            ns: Namespace(0),
        };
        let b = BindKey {
            addr: "10.0.0.1".parse().unwrap(),
            ns: Namespace(1),
        };
        let c = BindKey {
            addr: "10.0.0.2".parse().unwrap(),
            ns: Namespace(0),
        };
        assert!(a < b && b < c);
    }
}
