//! Metadata store trait

use crate::error::Result;
use async_trait::async_trait;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Exclusive hold on a named lease, released on drop.
///
/// Every handle to the same store (including handles in other processes,
/// for durable backends) contends for the same lease name.
pub struct Lease {
    name: String,
    _hold: Box<dyn Any + Send>,
}

impl Lease {
    pub fn new<H: Any + Send>(name: &str, hold: H) -> Self {
        Self {
            name: name.to_string(),
            _hold: Box::new(hold),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("name", &self.name).finish()
    }
}

/// Key-value backend holding all routing metadata.
///
/// Each call is atomic on its own key (or key pair for [`copy`]). There are no
/// transactions spanning several calls; callers order their writes so that a
/// single compare-and-swap publishes the result. Multi-key mutations that
/// must not interleave with one another hold a [`lease`] for their duration.
///
/// [`copy`]: MetadataStore::copy
/// [`lease`]: MetadataStore::lease
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// All fields of a hash; empty when the key is missing.
    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>>;

    /// Field-wise upsert into a hash.
    async fn hash_set(&self, key: &str, fields: &BTreeMap<String, String>) -> Result<()>;

    /// Full contents of a list; empty when the key is missing.
    async fn list_range(&self, key: &str) -> Result<Vec<u32>>;

    /// Swap the list to `new` iff it currently equals `expected`
    /// (`None` = key absent). An empty `new` deletes the key.
    async fn list_compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u32]>,
        new: &[u32],
    ) -> Result<bool>;

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()>;

    /// Members of a set; empty when the key is missing.
    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>>;

    /// Copy any value from `src` to `dst`. Returns false if `src` is missing
    /// or `dst` exists and `replace` is off.
    async fn copy(&self, src: &str, dst: &str, replace: bool) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Wait for exclusive use of `name`. Leases are advisory: they order
    /// callers that take them and do not block plain reads or writes.
    async fn lease(&self, name: &str) -> Result<Lease>;
}
