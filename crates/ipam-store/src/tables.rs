//! In-memory tables shared by every store backend.
//!
//! Callers hold the backend's lock for the whole call, which is what makes
//! select-then-mark in [`Tables::allocate_next`] a single atomic step.

use crate::error::StoreError;
use crate::models::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub(crate) struct Tables {
    next_id: u64,
    addresses: BTreeMap<u64, AddressRecord>,
    by_address: HashMap<Ipv4Addr, u64>,
    bindings: Vec<Binding>,
}

/// On-disk image of the tables. Available rows are left out; they are
/// rebuilt from configuration on every start.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub version: String,
    pub addresses: Vec<AddressRecord>,
    pub bindings: Vec<Binding>,
}

impl Tables {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn insert_addresses(&mut self, range: &RangeId, addresses: &[Ipv4Addr]) -> usize {
        let mut inserted = 0;
        for address in addresses {
            if let Some(id) = self.by_address.get(address) {
                let owner = self.addresses.get(id).map(|r| r.range.to_string()).unwrap_or_default();
                warn!("Address {} already in pool (range {}), skipping for range {}", address, owner, range);
                continue;
            }
            self.next_id += 1;
            let id = self.next_id;
            self.addresses.insert(
                id,
                AddressRecord {
                    id,
                    address: *address,
                    range: *range,
                    state: AddressState::Available,
                },
            );
            self.by_address.insert(*address, id);
            inserted += 1;
        }
        inserted
    }

    pub fn allocate_next(&mut self, range: &RangeId) -> Option<Ipv4Addr> {
        let record = self
            .addresses
            .values_mut()
            .find(|r| r.range == *range && r.state == AddressState::Available)?;
        record.state = AddressState::Allocated;
        Some(record.address)
    }

    pub fn claim_address(&mut self, address: Ipv4Addr, range: &RangeId) -> ClaimOutcome {
        let Some(record) = self
            .by_address
            .get(&address)
            .and_then(|id| self.addresses.get_mut(id))
        else {
            return ClaimOutcome::NotInPool;
        };
        if record.range != *range {
            return ClaimOutcome::NotInPool;
        }
        match record.state {
            AddressState::Available => {
                record.state = AddressState::Allocated;
                ClaimOutcome::Claimed
            }
            AddressState::Allocated => ClaimOutcome::AlreadyAllocated,
        }
    }

    /// Returns the state the address had before, if it is in the pool
    pub fn release_address(&mut self, address: Ipv4Addr) -> Option<AddressState> {
        match self
            .by_address
            .get(&address)
            .and_then(|id| self.addresses.get_mut(id))
        {
            Some(record) => Some(std::mem::replace(&mut record.state, AddressState::Available)),
            None => {
                debug!("Release of unknown address {} ignored", address);
                None
            }
        }
    }

    pub fn set_state(&mut self, address: Ipv4Addr, state: AddressState) {
        if let Some(record) = self
            .by_address
            .get(&address)
            .and_then(|id| self.addresses.get_mut(id))
        {
            record.state = state;
        }
    }

    /// Returns whether a new row was added
    pub fn insert_binding(&mut self, binding: Binding) -> Result<bool, StoreError> {
        if let Some(existing) = self.bindings.iter().find(|b| b.address == binding.address) {
            if *existing == binding {
                return Ok(false);
            }
            return Err(StoreError::Conflict(format!(
                "address {} already bound to {}",
                binding.address, existing.hostname
            )));
        }
        self.bindings.push(binding);
        Ok(true)
    }

    pub fn delete_binding(&mut self, binding: &Binding) -> bool {
        let before = self.bindings.len();
        self.bindings.retain(|b| b != binding);
        self.bindings.len() != before
    }

    pub fn find_bindings(&self, hostname: &str) -> Vec<Binding> {
        self.bindings
            .iter()
            .filter(|b| b.hostname == hostname)
            .cloned()
            .collect()
    }

    pub fn bindings(&self) -> Vec<Binding> {
        self.bindings.clone()
    }

    pub fn available_count(&self, range: &RangeId) -> usize {
        self.addresses
            .values()
            .filter(|r| r.range == *range && r.state == AddressState::Available)
            .count()
    }

    pub fn address_records(&self) -> Vec<AddressRecord> {
        self.addresses.values().cloned().collect()
    }

    pub fn snapshot(&self, version: &str) -> Snapshot {
        Snapshot {
            version: version.to_string(),
            addresses: self
                .addresses
                .values()
                .filter(|r| r.state != AddressState::Available)
                .cloned()
                .collect(),
            bindings: self.bindings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> RangeId {
        "10.0.0.0/24".parse().unwrap()
    }

    #[test]
    fn test_allocate_lowest_id_first() {
        let mut tables = Tables::default();
        let addrs = [Ipv4Addr::new(10, 0, 0, 9), Ipv4Addr::new(10, 0, 0, 1)];
        assert_eq!(tables.insert_addresses(&range(), &addrs), 2);

        // Insertion order wins over address order
        assert_eq!(tables.allocate_next(&range()), Some(Ipv4Addr::new(10, 0, 0, 9)));
        assert_eq!(tables.allocate_next(&range()), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(tables.allocate_next(&range()), None);
    }

    #[test]
    fn test_duplicate_address_is_skipped() {
        let mut tables = Tables::default();
        let other: RangeId = "10.0.0.0/16".parse().unwrap();
        tables.insert_addresses(&range(), &[Ipv4Addr::new(10, 0, 0, 1)]);
        assert_eq!(tables.insert_addresses(&other, &[Ipv4Addr::new(10, 0, 0, 1)]), 0);
        assert_eq!(tables.available_count(&other), 0);
        assert_eq!(tables.available_count(&range()), 1);
    }

    #[test]
    fn test_claim_outcomes() {
        let mut tables = Tables::default();
        let addr = Ipv4Addr::new(10, 0, 0, 5);
        tables.insert_addresses(&range(), &[addr]);

        let other: RangeId = "10.0.1.0/24".parse().unwrap();
        assert_eq!(tables.claim_address(addr, &other), ClaimOutcome::NotInPool);
        assert_eq!(tables.claim_address(addr, &range()), ClaimOutcome::Claimed);
        assert_eq!(tables.claim_address(addr, &range()), ClaimOutcome::AlreadyAllocated);
        assert_eq!(
            tables.claim_address(Ipv4Addr::new(10, 0, 0, 6), &range()),
            ClaimOutcome::NotInPool
        );
    }

    #[test]
    fn test_snapshot_skips_available_rows() {
        let mut tables = Tables::default();
        tables.insert_addresses(&range(), &[Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]);
        assert!(tables.snapshot("1.0").addresses.is_empty());

        tables.allocate_next(&range());
        let snapshot = tables.snapshot("1.0");
        assert_eq!(snapshot.addresses.len(), 1);
        assert_eq!(snapshot.addresses[0].address, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn test_binding_address_conflict() {
        let mut tables = Tables::default();
        let addr = Ipv4Addr::new(10, 0, 0, 5);
        assert!(tables.insert_binding(Binding::new("h1", addr, range())).unwrap());
        // Same row again is fine
        assert!(!tables.insert_binding(Binding::new("h1", addr, range())).unwrap());
        assert!(matches!(
            tables.insert_binding(Binding::new("h2", addr, range())),
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(tables.find_bindings("h1").len(), 1);
    }
}
