//! Endpoint records
//!
//! An endpoint is one master server plus a replica set. Databases carry a
//! single endpoint; every shard carries two (read and write), stored as four
//! keys:
//!
//! ```text
//! /{db}/{table}/shards/{start}-{end}/master/read      string
//! /{db}/{table}/shards/{start}-{end}/master/write     string
//! /{db}/{table}/shards/{start}-{end}/replicas/read    set
//! /{db}/{table}/shards/{start}-{end}/replicas/write   set
//! ```

use crate::error::{Error, Result};
use crate::keys::{self, Access, Role, ShardId};
use crate::registry::ServerRegistry;
use crate::storage::MetadataStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Master server plus replica set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub master: String,
    pub replicas: BTreeSet<String>,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.master)?;
        if !self.replicas.is_empty() {
            let replicas: Vec<&str> = self.replicas.iter().map(String::as_str).collect();
            write!(f, " (replicas: {})", replicas.join(", "))?;
        }
        Ok(())
    }
}

/// Read and write endpoints of one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRoute {
    pub shard: ShardId,
    pub read: Endpoint,
    pub write: Endpoint,
}

/// Endpoint assigned to a database
pub type DatabaseRecord = Endpoint;

/// Reads and writes endpoint keys, validating server references
#[derive(Clone)]
pub struct EndpointStore {
    store: Arc<dyn MetadataStore>,
    registry: ServerRegistry,
}

impl EndpointStore {
    pub fn new(store: Arc<dyn MetadataStore>, registry: ServerRegistry) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Point `key` at `server_hash`, which must be registered.
    pub async fn assign_master(&self, key: &str, server_hash: &str) -> Result<()> {
        self.registry.require_servers([server_hash]).await?;
        self.store.set(key, server_hash).await?;
        debug!(key = %key, server = %server_hash, "Master assigned");
        Ok(())
    }

    /// Replace the set at `key` with `server_hashes`.
    ///
    /// Every hash is checked before the set is cleared, so an unknown server
    /// leaves the previous set untouched.
    pub async fn assign_replica_set(&self, key: &str, server_hashes: &[String]) -> Result<()> {
        self.registry
            .require_servers(server_hashes.iter().map(String::as_str))
            .await?;
        self.store.delete(key).await?;
        if !server_hashes.is_empty() {
            self.store.set_add(key, server_hashes).await?;
        }
        debug!(key = %key, replicas = server_hashes.len(), "Replica set assigned");
        Ok(())
    }

    /// Assign the master (and optionally replicas) of a database.
    pub async fn set_database(
        &self,
        name: &str,
        master: &str,
        replicas: Option<&[String]>,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::MalformedInput("database name is empty".to_string()));
        }
        // Validate everything up front so a bad replica does not leave a
        // half-updated database behind.
        self.registry.require_servers([master]).await?;
        if let Some(replicas) = replicas {
            self.registry
                .require_servers(replicas.iter().map(String::as_str))
                .await?;
        }

        self.assign_master(&keys::db_master_key(name), master).await?;
        if let Some(replicas) = replicas {
            self.assign_replica_set(&keys::db_replicas_key(name), replicas)
                .await?;
        }
        info!(db = %name, master = %master, "Database endpoint stored");
        Ok(())
    }

    /// `None` when no master is recorded for the database.
    pub async fn get_database(&self, name: &str) -> Result<Option<DatabaseRecord>> {
        let Some(master) = self.store.get(&keys::db_master_key(name)).await? else {
            return Ok(None);
        };
        let replicas = self.store.set_members(&keys::db_replicas_key(name)).await?;
        Ok(Some(Endpoint { master, replicas }))
    }

    /// Load one side of a shard. A missing master key is `RouteNotFound`;
    /// a missing replica key is an empty set.
    pub async fn shard_endpoint(
        &self,
        db: &str,
        table: &str,
        shard: ShardId,
        access: Access,
    ) -> Result<Endpoint> {
        let master_key = keys::shard_role_key(db, table, shard, Role::Master, access);
        let master = self.store.get(&master_key).await?.ok_or_else(|| {
            Error::RouteNotFound(format!("{} endpoint key {} is not set", access.as_str(), master_key))
        })?;
        let replicas_key = keys::shard_role_key(db, table, shard, Role::Replicas, access);
        let replicas = self.store.set_members(&replicas_key).await?;
        Ok(Endpoint { master, replicas })
    }

    pub async fn shard_route(&self, db: &str, table: &str, shard: ShardId) -> Result<ShardRoute> {
        let read = self.shard_endpoint(db, table, shard, Access::Read).await?;
        let write = self.shard_endpoint(db, table, shard, Access::Write).await?;
        Ok(ShardRoute {
            shard,
            read,
            write,
        })
    }
}
