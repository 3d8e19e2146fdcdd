//! Server registry
//!
//! Physical servers are identified by an opaque hash and carry a free-form
//! attribute map (`host`, `port`, `dc`, ...). The registry never interprets
//! the attributes; other components only ask whether a hash is registered.

use crate::error::{Error, Result};
use crate::keys;
use crate::storage::MetadataStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// A registered server and its attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub hash: String,
    pub attrs: BTreeMap<String, String>,
}

/// Parse `key=value` pairs. The value may itself contain `=`.
pub fn parse_attr_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<BTreeMap<String, String>> {
    let mut attrs = BTreeMap::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            Error::MalformedInput(format!(
                "server data must look like <key>=<value>, got '{}'",
                pair
            ))
        })?;
        if key.is_empty() {
            return Err(Error::MalformedInput(format!(
                "server data key is empty in '{}'",
                pair
            )));
        }
        attrs.insert(key.to_string(), value.to_string());
    }
    Ok(attrs)
}

/// Registry of physical servers
#[derive(Clone)]
pub struct ServerRegistry {
    store: Arc<dyn MetadataStore>,
}

impl ServerRegistry {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Upsert attributes for `hash`; existing fields not named are kept.
    pub async fn add_server(&self, hash: &str, attrs: &BTreeMap<String, String>) -> Result<()> {
        if hash.is_empty() {
            return Err(Error::MalformedInput("server hash is empty".to_string()));
        }
        if attrs.is_empty() {
            return Err(Error::MalformedInput(format!(
                "server '{}' needs at least one <key>=<value> pair",
                hash
            )));
        }
        self.store.hash_set(&keys::server_key(hash), attrs).await?;
        info!(server = %hash, fields = attrs.len(), "Server data stored");
        Ok(())
    }

    /// `None` when the server is not registered.
    pub async fn get_server(&self, hash: &str) -> Result<Option<ServerRecord>> {
        let key = keys::server_key(hash);
        if !self.store.exists(&key).await? {
            return Ok(None);
        }
        let attrs = self.store.hash_get_all(&key).await?;
        Ok(Some(ServerRecord {
            hash: hash.to_string(),
            attrs,
        }))
    }

    pub async fn list_server_hashes(&self) -> Result<BTreeSet<String>> {
        let prefix = keys::servers_prefix();
        let hashes = self
            .store
            .keys_with_prefix(prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(prefix).map(str::to_string))
            .collect();
        Ok(hashes)
    }

    pub async fn server_exists(&self, hash: &str) -> Result<bool> {
        self.store.exists(&keys::server_key(hash)).await
    }

    /// Fail with `UnknownServer` on the first hash that is not registered.
    pub async fn require_servers<'a, I>(&self, hashes: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for hash in hashes {
            if !self.server_exists(hash).await? {
                debug!(server = %hash, "Server lookup failed");
                return Err(Error::UnknownServer(hash.to_string()));
            }
        }
        Ok(())
    }
}
