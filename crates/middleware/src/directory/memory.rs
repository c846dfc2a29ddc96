use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use super::{Directory, DirectoryEntry};
use crate::address::Address;
use crate::error::DirectoryError;

/// In-process directory for single-node deployments and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryDirectory {
    entries: Arc<RwLock<Vec<DirectoryEntry>>>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn bind(&self, entry: DirectoryEntry) -> Result<(), DirectoryError> {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.address == entry.address) {
            return Err(DirectoryError::AlreadyBound(entry.address));
        }

        debug!("Publishing {} at {}", entry.identifier, entry.address);
        entries.push(entry);
        Ok(())
    }

    async fn rebind(&self, entry: DirectoryEntry) -> Result<(), DirectoryError> {
        let mut entries = self.entries.write();
        let existing = entries
            .iter_mut()
            .find(|e| e.address == entry.address)
            .ok_or(DirectoryError::NotBound(entry.address))?;

        if existing.identifier != entry.identifier {
            return Err(DirectoryError::IdentifierMismatch {
                address: entry.address,
                existing: existing.identifier.clone(),
                requested: entry.identifier,
            });
        }

        *existing = entry;
        Ok(())
    }

    async fn unbind(&self, address: &Address) -> Result<(), DirectoryError> {
        let mut entries = self.entries.write();
        let position = entries
            .iter()
            .position(|e| e.address == *address)
            .ok_or(DirectoryError::NotBound(*address))?;

        let removed = entries.remove(position);
        debug!("Withdrew {} at {}", removed.identifier, removed.address);
        Ok(())
    }

    async fn lookup(&self, identifier: &str) -> Result<Address, DirectoryError> {
        self.entries
            .read()
            .iter()
            .find(|e| e.identifier == identifier)
            .map(|e| e.address)
            .ok_or_else(|| DirectoryError::NotFound(identifier.to_string()))
    }

    async fn lookup_all(&self, identifier: &str) -> Result<Vec<Address>, DirectoryError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.identifier == identifier)
            .map(|e| e.address)
            .collect())
    }

    async fn list(&self) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        Ok(self.entries.read().clone())
    }
}
