//! In-memory PersistentStore
//!
//! Nothing survives a restart. Used in tests and when no store path is
//! configured.

use crate::error::StoreError;
use crate::models::*;
use crate::tables::Tables;
use crate::store_trait::PersistentStore;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory store
///
/// Cloning shares the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistentStore for MemoryStore {
    async fn reset(&self) -> Result<(), StoreError> {
        self.tables.lock().await.clear();
        Ok(())
    }

    async fn insert_addresses(&self, range: &RangeId, addresses: &[Ipv4Addr]) -> Result<usize, StoreError> {
        Ok(self.tables.lock().await.insert_addresses(range, addresses))
    }

    async fn allocate_next(&self, range: &RangeId) -> Result<Option<Ipv4Addr>, StoreError> {
        Ok(self.tables.lock().await.allocate_next(range))
    }

    async fn claim_address(&self, address: Ipv4Addr, range: &RangeId) -> Result<ClaimOutcome, StoreError> {
        Ok(self.tables.lock().await.claim_address(address, range))
    }

    async fn release_address(&self, address: Ipv4Addr) -> Result<(), StoreError> {
        self.tables.lock().await.release_address(address);
        Ok(())
    }

    async fn insert_binding(&self, binding: Binding) -> Result<(), StoreError> {
        self.tables.lock().await.insert_binding(binding).map(|_| ())
    }

    async fn delete_binding(&self, binding: &Binding) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.delete_binding(binding))
    }

    async fn find_bindings(&self, hostname: &str) -> Result<Vec<Binding>, StoreError> {
        Ok(self.tables.lock().await.find_bindings(hostname))
    }

    async fn list_bindings(&self) -> Result<Vec<Binding>, StoreError> {
        Ok(self.tables.lock().await.bindings())
    }

    async fn available_count(&self, range: &RangeId) -> Result<usize, StoreError> {
        Ok(self.tables.lock().await.available_count(range))
    }

    async fn address_records(&self) -> Result<Vec<AddressRecord>, StoreError> {
        Ok(self.tables.lock().await.address_records())
    }
}
