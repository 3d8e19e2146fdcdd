//! Shard catalog
//!
//! Single entry point tying the registry, endpoint, shard-map and splitter
//! components to one metadata store. Mutations that touch several keys of a
//! table (`enable_sharding`, `split_shard`) hold the table's store lease for
//! their whole duration, so they never interleave, whether they run on one
//! catalog, on several catalogs, or in separate processes sharing a file
//! store.

use crate::config::StoreConfig;
use crate::endpoint::{DatabaseRecord, EndpointStore, ShardRoute};
use crate::error::Result;
use crate::keys::ShardId;
use crate::registry::{ServerRecord, ServerRegistry};
use crate::shard_map::ShardMapStore;
use crate::splitter::{ShardSplitter, ShardState, SplitOutcome};
use crate::storage::{self, MetadataStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::instrument;

/// Routing metadata for all databases and tables in one store
#[derive(Clone)]
pub struct ShardCatalog {
    registry: ServerRegistry,
    endpoints: EndpointStore,
    maps: ShardMapStore,
    splitter: ShardSplitter,
}

impl std::fmt::Debug for ShardCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardCatalog").finish_non_exhaustive()
    }
}

impl ShardCatalog {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        let registry = ServerRegistry::new(store.clone());
        let endpoints = EndpointStore::new(store.clone(), registry.clone());
        let maps = ShardMapStore::new(store.clone(), endpoints.clone());
        let splitter = ShardSplitter::new(store, maps.clone());
        Self {
            registry,
            endpoints,
            maps,
            splitter,
        }
    }

    /// Open the backend described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Ok(Self::new(storage::open_store(config)?))
    }

    // --- Servers ---

    #[instrument(skip(self, attrs))]
    pub async fn add_server(&self, hash: &str, attrs: &BTreeMap<String, String>) -> Result<()> {
        self.registry.add_server(hash, attrs).await
    }

    pub async fn get_server(&self, hash: &str) -> Result<Option<ServerRecord>> {
        self.registry.get_server(hash).await
    }

    pub async fn list_server_hashes(&self) -> Result<BTreeSet<String>> {
        self.registry.list_server_hashes().await
    }

    pub async fn server_exists(&self, hash: &str) -> Result<bool> {
        self.registry.server_exists(hash).await
    }

    // --- Databases ---

    #[instrument(skip(self))]
    pub async fn set_database(
        &self,
        name: &str,
        master: &str,
        replicas: Option<&[String]>,
    ) -> Result<()> {
        self.endpoints.set_database(name, master, replicas).await
    }

    pub async fn get_database(&self, name: &str) -> Result<Option<DatabaseRecord>> {
        self.endpoints.get_database(name).await
    }

    // --- Tables ---

    pub async fn is_sharding_enabled(&self, db: &str, table: &str) -> Result<bool> {
        self.maps.is_sharding_enabled(db, table).await
    }

    /// Returns false when sharding was already enabled.
    #[instrument(skip(self))]
    pub async fn enable_sharding(&self, db: &str, table: &str) -> Result<bool> {
        self.maps.enable_sharding(db, table).await
    }

    pub async fn get_shard_map(&self, db: &str, table: &str) -> Result<Vec<u32>> {
        self.maps.get_shard_map(db, table).await
    }

    pub async fn shard_exists(&self, db: &str, table: &str, start: u32, end: u32) -> Result<bool> {
        self.maps.shard_exists(db, table, ShardId::new(start, end)).await
    }

    #[instrument(skip(self))]
    pub async fn route_key(&self, db: &str, table: &str, key: i64) -> Result<ShardRoute> {
        self.maps.route_key(db, table, key).await
    }

    /// Endpoints of every shard, in boundary order.
    pub async fn list_shard_routes(&self, db: &str, table: &str) -> Result<Vec<ShardRoute>> {
        let Some(map) = self.maps.load(db, table).await? else {
            return Ok(Vec::new());
        };
        let mut routes = Vec::with_capacity(map.shard_count());
        for shard in map.shards() {
            routes.push(self.endpoints.shard_route(db, table, shard).await?);
        }
        Ok(routes)
    }

    #[instrument(skip(self))]
    pub async fn split_shard(
        &self,
        db: &str,
        table: &str,
        start: u32,
        end: u32,
        new_master: &str,
        new_replicas: Option<&[String]>,
    ) -> Result<SplitOutcome> {
        self.splitter
            .split_shard(db, table, ShardId::new(start, end), new_master, new_replicas)
            .await
    }

    pub async fn is_shard_ready_for_reshard(
        &self,
        db: &str,
        table: &str,
        start: u32,
        end: u32,
    ) -> Result<bool> {
        self.splitter
            .is_shard_ready_for_reshard(db, table, ShardId::new(start, end))
            .await
    }

    pub async fn shard_state(&self, db: &str, table: &str, start: u32, end: u32) -> Result<ShardState> {
        self.splitter
            .shard_state(db, table, ShardId::new(start, end))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::registry::parse_attr_pairs;
    use crate::storage::MemoryStore;
    use crate::MODULO;

    #[tokio::test]
    async fn test_concurrent_splits_of_same_shard_serialise() -> Result<()> {
        let catalog = ShardCatalog::new(Arc::new(MemoryStore::new()));
        for server in ["srvA", "srvB", "srvC"] {
            catalog
                .add_server(server, &parse_attr_pairs(&["dc=eu"])?)
                .await?;
        }
        catalog.set_database("shopA", "srvA", None).await?;
        catalog.enable_sharding("shopA", "orders").await?;

        let first = catalog.clone();
        let second = catalog.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move {
                first.split_shard("shopA", "orders", 0, MODULO, "srvB", None).await
            }),
            tokio::spawn(async move {
                second.split_shard("shopA", "orders", 0, MODULO, "srvC", None).await
            }),
        );
        let results = [a.expect("task"), b.expect("task")];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let not_found = results
            .iter()
            .filter(|r| matches!(r, Err(Error::ShardNotFound(_))))
            .count();
        assert_eq!((ok, not_found), (1, 1));
        assert_eq!(
            catalog.get_shard_map("shopA", "orders").await?,
            vec![0, 32768, MODULO]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_list_shard_routes() -> Result<()> {
        let catalog = ShardCatalog::open(&StoreConfig::memory())?;
        assert!(catalog.list_shard_routes("shopA", "orders").await?.is_empty());

        catalog
            .add_server("srvA", &parse_attr_pairs(&["dc=eu"])?)
            .await?;
        catalog
            .add_server("srvB", &parse_attr_pairs(&["dc=us"])?)
            .await?;
        catalog.set_database("shopA", "srvA", None).await?;
        catalog.enable_sharding("shopA", "orders").await?;
        catalog
            .split_shard("shopA", "orders", 0, MODULO, "srvB", None)
            .await?;

        let routes = catalog.list_shard_routes("shopA", "orders").await?;
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].shard, ShardId::new(0, 32768));
        assert_eq!(routes[1].write.master, "srvB");
        assert_eq!(routes[1].read.master, "srvA");
        Ok(())
    }
}
