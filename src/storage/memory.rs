//! In-memory metadata store
//!
//! Used as the test double for every component and as the `memory` backend,
//! whose contents are discarded when the process exits.

use crate::error::Result;
use crate::storage::engine::{Lease, MetadataStore};
use crate::storage::keyspace::Keyspace;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory metadata store
#[derive(Clone, Default)]
pub struct MemoryStore {
    keyspace: Arc<RwLock<Keyspace>>,
    leases: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            keyspace: Arc::new(RwLock::new(Keyspace::new())),
            leases: Arc::new(DashMap::new()),
        }
    }

    /// Number of keys stored
    pub fn len(&self) -> usize {
        self.keyspace.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyspace.read().is_empty()
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Keyspace {
        self.keyspace.read().clone()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.keyspace.read().get(key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.keyspace.write().set(key, value);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        self.keyspace.read().hash_get_all(key)
    }

    async fn hash_set(&self, key: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        self.keyspace.write().hash_set(key, fields).map(|_| ())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<u32>> {
        self.keyspace.read().list_range(key)
    }

    async fn list_compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u32]>,
        new: &[u32],
    ) -> Result<bool> {
        self.keyspace
            .write()
            .list_compare_and_swap(key, expected, new)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()> {
        self.keyspace.write().set_add(key, members).map(|_| ())
    }

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>> {
        self.keyspace.read().set_members(key)
    }

    async fn copy(&self, src: &str, dst: &str, replace: bool) -> Result<bool> {
        Ok(self.keyspace.write().copy(src, dst, replace))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.keyspace.read().exists(key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.keyspace.write().delete(key))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.keyspace.read().keys_with_prefix(prefix))
    }

    async fn lease(&self, name: &str) -> Result<Lease> {
        let mutex = self.leases.entry(name.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        Ok(Lease::new(name, guard))
    }
}
