//! Address pool and binding store
//!
//! Holds the two tables behind the Host IPAM controller: pool addresses
//! (each tagged with its owning range and an Available/Allocated state) and
//! hostname bindings.
//!
//! # Example
//!
//! ```no_run
//! use ipam_store::{MemoryStore, PersistentStore, RangeId};
//! use std::net::Ipv4Addr;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! let range: RangeId = "10.0.0.0/24".parse()?;
//!
//! store.insert_addresses(&range, &[Ipv4Addr::new(10, 0, 0, 1)]).await?;
//! let address = store.allocate_next(&range).await?;
//! assert_eq!(address, Some(Ipv4Addr::new(10, 0, 0, 1)));
//! # Ok(())
//! # }
//! ```
//!
//! # Backends
//!
//! - [`MemoryStore`]: tables in memory only
//! - [`FileStore`]: tables in memory plus a JSON snapshot after every write

pub mod error;
pub mod file;
pub mod memory;
pub mod models;
#[path = "trait.rs"]
pub mod store_trait;
mod tables;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use models::*;
pub use store_trait::PersistentStore;
