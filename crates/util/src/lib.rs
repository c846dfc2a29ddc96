//! Shared helpers for courier tests and demos.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod port_allocator;

pub use port_allocator::{allocate_port, allocate_socket_addr};
