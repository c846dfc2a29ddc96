//! Addressing of remote objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Location of one bound object: an object id on a host and port.
///
/// Several objects may share a host and port; the invoker routes on the full
/// triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    object_id: i32,
    host: IpAddr,
    port: u16,
}

impl Address {
    /// Create an address.
    #[must_use]
    pub const fn new(object_id: i32, host: IpAddr, port: u16) -> Self {
        Self {
            object_id,
            host,
            port,
        }
    }

    /// Address of `object_id` at a socket endpoint.
    #[must_use]
    pub const fn at(object_id: i32, endpoint: SocketAddr) -> Self {
        Self::new(object_id, endpoint.ip(), endpoint.port())
    }

    /// Object id.
    #[must_use]
    pub const fn object_id(&self) -> i32 {
        self.object_id
    }

    /// Host.
    #[must_use]
    pub const fn host(&self) -> IpAddr {
        self.host
    }

    /// Port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// The listener endpoint this address lives on.
    #[must_use]
    pub const fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.object_id, self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_value_equality() {
        let a = Address::new(1, IpAddr::V4(Ipv4Addr::LOCALHOST), 9000);
        let b = Address::at(1, "127.0.0.1:9000".parse().unwrap());
        let c = Address::new(2, IpAddr::V4(Ipv4Addr::LOCALHOST), 9000);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.endpoint(), c.endpoint());
    }

    #[test]
    fn test_display() {
        let a = Address::new(7, IpAddr::V4(Ipv4Addr::LOCALHOST), 9000);
        assert_eq!(a.to_string(), "7@127.0.0.1:9000");
    }
}
