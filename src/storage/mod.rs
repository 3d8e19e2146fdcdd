//! Storage layer
//!
//! # Architecture
//!
//! All routing metadata lives in a flat key space of typed values:
//!
//! ```text
//! /servers/{hash}                               → hash   (server attributes)
//! /{db}/master                                  → string (server hash)
//! /{db}/replicas                                → set    (server hashes)
//! /{db}/{table}/shards                          → list   (boundaries)
//! /{db}/{table}/shards/{start}-{end}/{role}/{rw} → string | set
//! ```
//!
//! ## Metadata Store
//!
//! The `MetadataStore` trait exposes the primitives the shard logic needs:
//! string get/set, hash get/upsert, list read and compare-and-swap, set
//! add/members, key copy, existence, delete and prefix enumeration, plus a
//! named lease that multi-key mutations hold while they run.
//!
//! ## Implementations
//!
//! - **MemoryStore**: shared in-memory key space (tests, dry runs)
//! - **FileStore**: JSON snapshot guarded by an OS file lock

pub mod engine;
pub mod file;
pub mod flock;
pub mod keyspace;
pub mod memory;

pub use engine::{Lease, MetadataStore};
pub use file::FileStore;
pub use keyspace::{Keyspace, StoredValue};
pub use memory::MemoryStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use std::sync::Arc;

/// Build the backend described by `config`.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn MetadataStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::File => Ok(Arc::new(FileStore::open(&config.path)?)),
    }
}
