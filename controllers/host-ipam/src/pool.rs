//! Pool allocator
//!
//! Owns the configured ranges and fronts the [`PersistentStore`] with
//! bounded retries. Everything that touches the address or binding tables
//! goes through here.

use crate::backoff::RetryPolicy;
use crate::error::{ConfigError, ControllerError};
use crate::range::parse_range_config;
use ipam_store::{Binding, ClaimOutcome, PersistentStore, RangeId, StoreError};
use std::collections::BTreeSet;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info};

/// Configured ranges over a [`PersistentStore`]
pub struct PoolAllocator {
    store: Arc<dyn PersistentStore>,
    ranges: BTreeSet<RangeId>,
    retry: RetryPolicy,
}

impl PoolAllocator {
    /// Build the pool from a range configuration string.
    ///
    /// The store is wiped first; every enumerated address is inserted
    /// Available. Fails if no entry in `config` is usable.
    pub async fn from_config(
        config: &str,
        store: Arc<dyn PersistentStore>,
        retry: RetryPolicy,
    ) -> Result<Self, ControllerError> {
        let exprs = parse_range_config(config);
        if exprs.is_empty() {
            return Err(ConfigError::NoUsableRanges(config.to_string()).into());
        }

        store.reset().await?;

        let mut ranges = BTreeSet::new();
        for expr in exprs {
            let addresses = expr.addresses();
            let inserted = store.insert_addresses(&expr.range, &addresses).await?;
            info!(
                "Seeded {} addresses ({} to {}) into range {}",
                inserted, expr.start, expr.end, expr.range
            );
            ranges.insert(expr.range);
        }

        Ok(Self { store, ranges, retry })
    }

    /// Whether `range` is one of the configured ranges
    pub fn contains_range(&self, range: &RangeId) -> bool {
        self.ranges.contains(range)
    }

    /// Configured ranges in order
    pub fn ranges(&self) -> impl Iterator<Item = &RangeId> {
        self.ranges.iter()
    }

    /// Hand out the lowest Available address in `range`, or `None` if the
    /// range is exhausted
    pub async fn allocate(&self, range: &RangeId) -> Result<Option<Ipv4Addr>, StoreError> {
        let store = &self.store;
        let address = self
            .with_retry("allocate", move || store.allocate_next(range))
            .await?;
        debug!("Allocate from {}: {:?}", range, address);
        Ok(address)
    }

    /// Mark a specific address Allocated if it is still Available
    pub async fn claim(&self, address: Ipv4Addr, range: &RangeId) -> Result<ClaimOutcome, StoreError> {
        let store = &self.store;
        self.with_retry("claim", move || store.claim_address(address, range))
            .await
    }

    /// Return an address to the pool. Releasing twice is harmless.
    pub async fn release(&self, address: Ipv4Addr) -> Result<(), StoreError> {
        let store = &self.store;
        self.with_retry("release", move || store.release_address(address))
            .await
    }

    /// Available addresses left in `range`
    pub async fn available_count(&self, range: &RangeId) -> Result<usize, StoreError> {
        self.store.available_count(range).await
    }

    /// Every binding held by `hostname`
    pub async fn bindings_for(&self, hostname: &str) -> Result<Vec<Binding>, StoreError> {
        let store = &self.store;
        self.with_retry("find bindings", move || store.find_bindings(hostname))
            .await
    }

    /// Binding currently holding `address`, if any
    pub async fn holder_of(&self, address: Ipv4Addr) -> Result<Option<Binding>, StoreError> {
        let store = &self.store;
        let bindings = self
            .with_retry("list bindings", move || store.list_bindings())
            .await?;
        Ok(bindings.into_iter().find(|b| b.address == address))
    }

    /// Persist a binding; `Conflict` is returned without retrying
    pub async fn bind(&self, binding: &Binding) -> Result<(), StoreError> {
        let store = &self.store;
        self.with_retry("insert binding", move || store.insert_binding(binding.clone()))
            .await
    }

    /// Remove `binding`; returns whether it existed
    pub async fn unbind(&self, binding: &Binding) -> Result<bool, StoreError> {
        let store = &self.store;
        self.with_retry("delete binding", move || store.delete_binding(binding))
            .await
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.retry.run(what, StoreError::is_transient, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipam_store::MemoryStore;

    fn range(s: &str) -> RangeId {
        s.parse().unwrap()
    }

    async fn pool(config: &str) -> PoolAllocator {
        PoolAllocator::from_config(config, Arc::new(MemoryStore::new()), RetryPolicy::none())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_from_config_seeds_every_range() {
        let pool = pool("10.0.0.1/24-10.0.0.3/24, 172.16.1.50/22-172.16.1.55/22").await;

        let ranges: Vec<String> = pool.ranges().map(ToString::to_string).collect();
        assert_eq!(ranges, vec!["10.0.0.0/24", "172.16.0.0/22"]);
        assert_eq!(pool.available_count(&range("10.0.0.0/24")).await.unwrap(), 3);
        assert_eq!(pool.available_count(&range("172.16.0.0/22")).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_from_config_rejects_unusable_config() {
        let result = PoolAllocator::from_config(
            "10.0.0.1/24-10.0.0.3/23, garbage",
            Arc::new(MemoryStore::new()),
            RetryPolicy::none(),
        )
        .await;

        assert!(matches!(
            result,
            Err(ControllerError::Config(ConfigError::NoUsableRanges(_)))
        ));
    }

    #[tokio::test]
    async fn test_from_config_wipes_previous_contents() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_addresses(&range("192.168.0.0/24"), &[Ipv4Addr::new(192, 168, 0, 1)])
            .await
            .unwrap();

        let pool = PoolAllocator::from_config("10.0.0.1/24-10.0.0.2/24", store.clone(), RetryPolicy::none())
            .await
            .unwrap();

        assert!(!pool.contains_range(&range("192.168.0.0/24")));
        assert_eq!(store.address_records().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_allocate_in_order_until_exhausted() {
        let pool = pool("10.0.0.1/24-10.0.0.2/24").await;
        let r = range("10.0.0.0/24");

        assert_eq!(pool.allocate(&r).await.unwrap(), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(pool.allocate(&r).await.unwrap(), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(pool.allocate(&r).await.unwrap(), None);

        pool.release(Ipv4Addr::new(10, 0, 0, 1)).await.unwrap();
        assert_eq!(pool.available_count(&r).await.unwrap(), 1);
        assert_eq!(pool.allocate(&r).await.unwrap(), Some(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[tokio::test]
    async fn test_claim_specific_address() {
        let pool = pool("10.0.0.1/24-10.0.0.3/24").await;
        let r = range("10.0.0.0/24");

        assert_eq!(pool.claim(Ipv4Addr::new(10, 0, 0, 2), &r).await.unwrap(), ClaimOutcome::Claimed);
        assert_eq!(
            pool.claim(Ipv4Addr::new(10, 0, 0, 2), &r).await.unwrap(),
            ClaimOutcome::AlreadyAllocated
        );
        assert_eq!(
            pool.claim(Ipv4Addr::new(10, 0, 0, 9), &r).await.unwrap(),
            ClaimOutcome::NotInPool
        );
        // Allocation skips the claimed address
        assert_eq!(pool.allocate(&r).await.unwrap(), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(pool.allocate(&r).await.unwrap(), Some(Ipv4Addr::new(10, 0, 0, 3)));
    }
}
