//! Naming directory mapping service identifiers to bound addresses.
//!
//! The middleware itself only ever calls [`Directory::lookup_all`], to find
//! alternate instances for failover and forwarding. The remaining operations
//! are the registry surface used by servers publishing their objects.

mod memory;

pub use memory::MemoryDirectory;

use async_trait::async_trait;

use crate::address::Address;
use crate::error::DirectoryError;

/// One published object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectoryEntry {
    /// Service identifier shared by interchangeable instances.
    pub identifier: String,
    /// Where this instance is bound.
    pub address: Address,
}

impl DirectoryEntry {
    /// Create an entry.
    pub fn new(identifier: impl Into<String>, address: Address) -> Self {
        Self {
            identifier: identifier.into(),
            address,
        }
    }
}

/// Lookup service for bound objects.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Publish a new entry.
    ///
    /// Fails if the address is already published.
    async fn bind(&self, entry: DirectoryEntry) -> Result<(), DirectoryError>;

    /// Replace the entry at an address.
    ///
    /// Fails if the address is unknown or published under another identifier.
    async fn rebind(&self, entry: DirectoryEntry) -> Result<(), DirectoryError>;

    /// Remove the entry at an address.
    async fn unbind(&self, address: &Address) -> Result<(), DirectoryError>;

    /// First instance published under `identifier`.
    async fn lookup(&self, identifier: &str) -> Result<Address, DirectoryError>;

    /// Every instance published under `identifier`, in publication order.
    async fn lookup_all(&self, identifier: &str) -> Result<Vec<Address>, DirectoryError>;

    /// Every entry.
    async fn list(&self) -> Result<Vec<DirectoryEntry>, DirectoryError>;
}
