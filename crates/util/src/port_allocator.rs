use parking_lot::Mutex;
use std::{
    collections::hash_map::RandomState,
    hash::BuildHasher,
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket},
    sync::LazyLock,
};

const FIRST_PORT: u16 = 20000;
const PORT_SPAN: u16 = 20000;

/// Next candidate port, seeded randomly so parallel test binaries rarely collide.
static NEXT_PORT: LazyLock<Mutex<u16>> = LazyLock::new(|| {
    let seed = RandomState::new().hash_one(std::process::id());
    #[allow(clippy::cast_possible_truncation)]
    let offset = (seed % u64::from(PORT_SPAN)) as u16;
    Mutex::new(FIRST_PORT + offset)
});

/// Allocate a loopback port that is free for both TCP and UDP.
///
/// # Panics
///
/// Panics when no free port is found in the whole range.
pub fn allocate_port() -> u16 {
    let mut next = NEXT_PORT.lock();

    for _ in 0..PORT_SPAN {
        let port = *next;
        *next = if port + 1 >= FIRST_PORT + PORT_SPAN {
            FIRST_PORT
        } else {
            port + 1
        };

        if is_port_available(port) {
            return port;
        }
    }

    panic!("No available ports found in {FIRST_PORT}..{}", FIRST_PORT + PORT_SPAN)
}

/// Check if a port can currently be bound on loopback for TCP and UDP.
#[must_use]
pub fn is_port_available(port: u16) -> bool {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    TcpListener::bind(addr).is_ok() && UdpSocket::bind(addr).is_ok()
}

/// Allocate a loopback socket address with an available port.
#[must_use]
pub fn allocate_socket_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), allocate_port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_ports_are_distinct() {
        let first = allocate_port();
        let second = allocate_port();
        assert_ne!(first, second);
        assert!(is_port_available(second));
    }
}
