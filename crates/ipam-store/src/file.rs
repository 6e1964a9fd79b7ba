//! File-backed PersistentStore
//!
//! Keeps the tables in memory and writes a compact JSON snapshot of the
//! allocated rows and bindings after every mutation (write to a temporary
//! file, then rename over the old one). Available rows are not written.
//! Opening the store removes any previous snapshot: the pool is rebuilt
//! from configuration on every start and prior bindings are replayed from
//! resource status, so the file only reflects the running process.
//!
//! If a snapshot write fails, the mutation is undone before the error is
//! returned, so a caller that retries never double-applies it.
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "addresses": [{"id": 1, "address": "10.0.0.1", "range": "10.0.0.0/24", "state": "Allocated"}],
//!   "bindings": [{"hostname": "web-1", "address": "10.0.0.1", "range": "10.0.0.0/24"}]
//! }
//! ```

use crate::error::StoreError;
use crate::models::*;
use crate::store_trait::PersistentStore;
use crate::tables::Tables;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Snapshot format version
const SNAPSHOT_VERSION: &str = "1.0";

/// File-backed store
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl FileStore {
    /// Open a fresh store at `path`, discarding any previous snapshot
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }

        for stale in [path.clone(), Self::temp_path(&path)] {
            match fs::remove_file(&stale).await {
                Ok(()) => debug!("Removed previous snapshot {}", stale.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let store = Self {
            path,
            tables: Mutex::new(Tables::default()),
        };
        store.write_snapshot(&*store.tables.lock().await).await?;
        Ok(store)
    }

    /// Snapshot file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    async fn write_snapshot(&self, tables: &Tables) -> Result<(), StoreError> {
        let json = serde_json::to_vec(&tables.snapshot(SNAPSHOT_VERSION))?;
        let temp = Self::temp_path(&self.path);

        let mut file = fs::File::create(&temp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp, &self.path).await?;
        Ok(())
    }

    /// Apply `op`, persist, and run `undo` if the snapshot could not be written
    async fn mutate<T, Op, Undo>(&self, op: Op, undo: Undo) -> Result<T, StoreError>
    where
        T: Send,
        Op: FnOnce(&mut Tables) -> Result<T, StoreError> + Send,
        Undo: FnOnce(&mut Tables, &T) + Send,
    {
        let mut tables = self.tables.lock().await;
        let value = op(&mut *tables)?;
        if let Err(e) = self.write_snapshot(&tables).await {
            undo(&mut *tables, &value);
            return Err(e);
        }
        Ok(value)
    }
}

#[async_trait::async_trait]
impl PersistentStore for FileStore {
    async fn reset(&self) -> Result<(), StoreError> {
        self.mutate(
            |t| {
                t.clear();
                Ok(())
            },
            |_, _| {},
        )
        .await
    }

    async fn insert_addresses(&self, range: &RangeId, addresses: &[Ipv4Addr]) -> Result<usize, StoreError> {
        // Only runs during startup, where a failure is fatal anyway
        self.mutate(|t| Ok(t.insert_addresses(range, addresses)), |_, _| {})
            .await
    }

    async fn allocate_next(&self, range: &RangeId) -> Result<Option<Ipv4Addr>, StoreError> {
        self.mutate(
            |t| Ok(t.allocate_next(range)),
            |t, allocated| {
                if let Some(address) = allocated {
                    t.release_address(*address);
                }
            },
        )
        .await
    }

    async fn claim_address(&self, address: Ipv4Addr, range: &RangeId) -> Result<ClaimOutcome, StoreError> {
        self.mutate(
            |t| Ok(t.claim_address(address, range)),
            |t, outcome| {
                if *outcome == ClaimOutcome::Claimed {
                    t.release_address(address);
                }
            },
        )
        .await
    }

    async fn release_address(&self, address: Ipv4Addr) -> Result<(), StoreError> {
        self.mutate(
            |t| Ok(t.release_address(address)),
            |t, previous| {
                if let Some(state) = previous {
                    t.set_state(address, *state);
                }
            },
        )
        .await
        .map(|_| ())
    }

    async fn insert_binding(&self, binding: Binding) -> Result<(), StoreError> {
        let undo_binding = binding.clone();
        self.mutate(
            |t| t.insert_binding(binding),
            |t, inserted| {
                if *inserted {
                    t.delete_binding(&undo_binding);
                }
            },
        )
        .await
        .map(|_| ())
    }

    async fn delete_binding(&self, binding: &Binding) -> Result<bool, StoreError> {
        self.mutate(
            |t| Ok(t.delete_binding(binding)),
            |t, removed| {
                if *removed {
                    let _ = t.insert_binding(binding.clone());
                }
            },
        )
        .await
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
