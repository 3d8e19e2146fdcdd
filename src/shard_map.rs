//! Shard maps
//!
//! # Overview
//!
//! A sharded table's key space `[0, MODULO)` is cut into contiguous half-open
//! ranges by an ordered boundary list:
//!
//! ```text
//! boundaries: [0, 16384, 32768, 65536]
//! shards:     [0, 16384) [16384, 32768) [32768, 65536)
//! ```
//!
//! A record key is routed by its remainder `|key| mod MODULO`; exactly one
//! shard contains every remainder. The boundary list is persisted as a list
//! under `/{db}/{table}/shards`, and a table without that list is not sharded.

use crate::endpoint::{EndpointStore, ShardRoute};
use crate::error::{Error, Result};
use crate::keys::{self, Access, Role, ShardId};
use crate::storage::MetadataStore;
use crate::MODULO;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bucket of the key hash space a record key falls into.
pub fn remainder(key: i64) -> u32 {
    (key.unsigned_abs() % u64::from(MODULO)) as u32
}

/// Floored midpoint of `[start, end)`.
///
/// The shift must be grouped explicitly: `start + (end - start) >> 1` parses
/// as `(start + end - start) >> 1 == end >> 1`, which lands outside the range
/// for any shard not starting at 0.
pub fn split_pivot(start: u32, end: u32) -> u32 {
    start + ((end - start) >> 1)
}

impl ShardId {
    pub fn width(&self) -> u32 {
        self.end - self.start
    }

    pub fn contains(&self, remainder: u32) -> bool {
        self.start <= remainder && remainder < self.end
    }
}

/// Validated boundary list: strictly increasing, from 0 to `MODULO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardMap {
    boundaries: Vec<u32>,
}

impl ShardMap {
    /// Single shard covering the whole key space.
    pub fn full() -> Self {
        Self {
            boundaries: vec![0, MODULO],
        }
    }

    pub fn from_boundaries(boundaries: Vec<u32>) -> Result<Self> {
        if boundaries.len() < 2 {
            return Err(Error::CorruptShardMap(format!(
                "expected at least 2 boundaries, found {}",
                boundaries.len()
            )));
        }
        if boundaries[0] != 0 || boundaries[boundaries.len() - 1] != MODULO {
            return Err(Error::CorruptShardMap(format!(
                "boundaries must span [0, {}], found {:?}",
                MODULO, boundaries
            )));
        }
        if let Some(pair) = boundaries.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(Error::CorruptShardMap(format!(
                "boundaries not strictly increasing at {} -> {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self { boundaries })
    }

    pub fn boundaries(&self) -> &[u32] {
        &self.boundaries
    }

    pub fn shard_count(&self) -> usize {
        self.boundaries.len() - 1
    }

    pub fn shards(&self) -> impl Iterator<Item = ShardId> + '_ {
        self.boundaries
            .windows(2)
            .map(|pair| ShardId::new(pair[0], pair[1]))
    }

    /// True iff `[start, end)` is one adjacent pair of boundaries.
    pub fn contains_shard(&self, shard: ShardId) -> bool {
        self.shards().any(|s| s == shard)
    }

    /// Shard holding `remainder`.
    ///
    /// Walks forward from the second boundary until one exceeds the
    /// remainder; the first boundary is never compared.
    pub fn locate(&self, remainder: u32) -> Option<ShardId> {
        let mut prev = self.boundaries[0];
        for &boundary in &self.boundaries[1..] {
            if boundary > remainder {
                return Some(ShardId::new(prev, boundary));
            }
            prev = boundary;
        }
        None
    }

    /// Map with `shard` cut at its pivot, plus the pivot itself.
    pub fn split(&self, shard: ShardId) -> Result<(ShardMap, u32)> {
        let index = self
            .boundaries
            .windows(2)
            .position(|pair| pair[0] == shard.start && pair[1] == shard.end)
            .ok_or_else(|| Error::ShardNotFound(format!("[{}, {})", shard.start, shard.end)))?;
        if shard.width() < 2 {
            return Err(Error::InvalidSplit(format!(
                "shard [{}, {}) is too narrow to split",
                shard.start, shard.end
            )));
        }

        let pivot = split_pivot(shard.start, shard.end);
        let mut boundaries = self.boundaries.clone();
        boundaries.insert(index + 1, pivot);
        Ok((Self { boundaries }, pivot))
    }
}

impl fmt::Display for ShardMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.boundaries)
    }
}

/// Shard map lifecycle and routing for tables
#[derive(Clone)]
pub struct ShardMapStore {
    store: Arc<dyn MetadataStore>,
    endpoints: EndpointStore,
}

impl ShardMapStore {
    pub fn new(store: Arc<dyn MetadataStore>, endpoints: EndpointStore) -> Self {
        Self { store, endpoints }
    }

    pub fn endpoints(&self) -> &EndpointStore {
        &self.endpoints
    }

    /// Raw boundary list, empty when the table is not sharded.
    pub async fn get_shard_map(&self, db: &str, table: &str) -> Result<Vec<u32>> {
        self.store.list_range(&keys::shards_list_key(db, table)).await
    }

    /// Whether the table has a usable boundary list.
    ///
    /// A list with fewer than two entries cannot describe a shard; it is
    /// deleted here so the table reads as unsharded.
    pub async fn is_sharding_enabled(&self, db: &str, table: &str) -> Result<bool> {
        let key = keys::shards_list_key(db, table);
        if !self.store.exists(&key).await? {
            return Ok(false);
        }
        let boundaries = self.store.list_range(&key).await?;
        if boundaries.len() >= 2 {
            return Ok(true);
        }

        warn!(
            db = %db,
            table = %table,
            boundaries = ?boundaries,
            "Discarding corrupt shard map with fewer than 2 boundaries"
        );
        self.store.delete(&key).await?;
        Ok(false)
    }

    /// Validated shard map, `None` when the table is not sharded.
    pub async fn load(&self, db: &str, table: &str) -> Result<Option<ShardMap>> {
        if !self.is_sharding_enabled(db, table).await? {
            return Ok(None);
        }
        let boundaries = self.get_shard_map(db, table).await?;
        ShardMap::from_boundaries(boundaries).map(Some)
    }

    pub async fn shard_exists(&self, db: &str, table: &str, shard: ShardId) -> Result<bool> {
        let boundaries = self.get_shard_map(db, table).await?;
        Ok(boundaries
            .windows(2)
            .any(|pair| pair[0] == shard.start && pair[1] == shard.end))
    }

    /// Create the single-shard map `[0, MODULO)` from the database endpoint.
    ///
    /// Returns false when the table was already sharded. Runs under the
    /// table's store lease. The boundary list is written last, with a
    /// compare-and-swap against "absent", so a failure while copying
    /// endpoints leaves the table unsharded.
    pub async fn enable_sharding(&self, db: &str, table: &str) -> Result<bool> {
        let key = keys::shards_list_key(db, table);
        let _lease = self.store.lease(&key).await?;

        if self.is_sharding_enabled(db, table).await? {
            debug!(db = %db, table = %table, "Sharding already enabled");
            return Ok(false);
        }
        if !self.store.exists(&keys::db_master_key(db)).await? {
            return Err(Error::UnknownDatabase(db.to_string()));
        }

        let full = ShardId::new(0, MODULO);
        for role in [Role::Master, Role::Replicas] {
            let src = keys::db_role_key(db, role);
            for access in [Access::Read, Access::Write] {
                let dst = keys::shard_role_key(db, table, full, role, access);
                if !self.store.copy(&src, &dst, true).await? {
                    if role == Role::Master {
                        return Err(Error::UnknownDatabase(db.to_string()));
                    }
                    // No database replicas: the shard has none either.
                    self.store.delete(&dst).await?;
                }
                debug!(src = %src, dst = %dst, "Endpoint copied");
            }
        }

        let initial = ShardMap::full();
        if !self
            .store
            .list_compare_and_swap(&key, None, initial.boundaries())
            .await?
        {
            if self.is_sharding_enabled(db, table).await? {
                info!(db = %db, table = %table, "Sharding was enabled concurrently");
                return Ok(false);
            }
            return Err(Error::ConcurrentModification(format!(
                "shard map {} changed while enabling sharding",
                key
            )));
        }

        info!(db = %db, table = %table, map = %initial, "Sharding enabled");
        Ok(true)
    }

    /// Read and write endpoints for the shard holding `key`.
    pub async fn route_key(&self, db: &str, table: &str, key: i64) -> Result<ShardRoute> {
        let map = self
            .load(db, table)
            .await?
            .ok_or_else(|| Error::ShardingDisabled(format!("{}.{}", db, table)))?;

        let remainder = remainder(key);
        let shard = map.locate(remainder).ok_or_else(|| {
            Error::CorruptShardMap(format!("no shard of {} holds remainder {}", map, remainder))
        })?;
        debug!(key, remainder, shard = %shard, "Key routed");

        self.endpoints.shard_route(db, table, shard).await
    }
}
