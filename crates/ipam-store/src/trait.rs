//! PersistentStore trait
//!
//! Abstracts the address/binding tables so the controller can run against
//! the in-memory store in tests and the file-backed store in production.

use crate::error::StoreError;
use crate::models::*;
use std::net::Ipv4Addr;

/// Durable table of pool addresses and hostname bindings.
///
/// All methods must be `Send` to work with Tokio's work-stealing runtime.
/// Each call is atomic with respect to every other call on the same store.
#[async_trait::async_trait]
pub trait PersistentStore: Send + Sync {
    /// Drop every address and binding
    async fn reset(&self) -> Result<(), StoreError>;

    /// Bulk insert `addresses` as Available, tagged with `range`.
    ///
    /// Addresses already present are skipped. Returns how many rows were added.
    async fn insert_addresses(&self, range: &RangeId, addresses: &[Ipv4Addr]) -> Result<usize, StoreError>;

    /// Mark the lowest-id Available address in `range` Allocated and return it
    async fn allocate_next(&self, range: &RangeId) -> Result<Option<Ipv4Addr>, StoreError>;

    /// Mark a specific address Allocated if it is Available
    async fn claim_address(&self, address: Ipv4Addr, range: &RangeId) -> Result<ClaimOutcome, StoreError>;

    /// Mark an address Available (no-op if already Available or unknown)
    async fn release_address(&self, address: Ipv4Addr) -> Result<(), StoreError>;

    /// Record a binding; fails with `Conflict` if the address is bound to another host
    async fn insert_binding(&self, binding: Binding) -> Result<(), StoreError>;

    /// Remove a binding; returns whether a row was removed
    async fn delete_binding(&self, binding: &Binding) -> Result<bool, StoreError>;

    /// All bindings held by `hostname`
    async fn find_bindings(&self, hostname: &str) -> Result<Vec<Binding>, StoreError>;

    /// Every binding in the store
    async fn list_bindings(&self) -> Result<Vec<Binding>, StoreError>;

    /// Number of Available addresses in `range`
    async fn available_count(&self, range: &RangeId) -> Result<usize, StoreError>;

    /// Every address row, in insertion order
    async fn address_records(&self) -> Result<Vec<AddressRecord>, StoreError>;
}
