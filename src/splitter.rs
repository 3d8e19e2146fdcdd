//! Shard splitting
//!
//! Splitting `[start, end)` at `pivot = start + ((end - start) >> 1)`:
//!
//! ```text
//!                 read                 write
//! [start, end)    R                    W            (old shard)
//! [start, pivot)  R                    W            lower child: full copy
//! [pivot, end)    R                    new server   upper child: transitioning
//! ```
//!
//! The upper child keeps serving reads from the old location until an
//! out-of-band migration moves the data and its read master is set equal to
//! its write master. Until then it reports [`ShardState::Transitioning`].
//!
//! # Write ordering
//!
//! 0. take the table's store lease (named after its boundary list key)
//! 1. validate: shard exists and is wide enough, new servers registered, old
//!    endpoints readable
//! 2. write the child endpoint keys
//! 3. compare-and-swap the boundary list from the map observed in step 1
//!
//! The lease spans steps 1 to 3 and is shared by every handle to the store,
//! other processes included, so two splits of one table never interleave: a
//! second split of the same range validates only after the first has
//! published and fails with `ShardNotFound` without writing anything.
//!
//! Nothing is rolled back if step 2 or 3 fails. A failed split leaves child
//! keys that no map references, and a later split of the same range
//! overwrites them. The compare-and-swap in step 3 only guards against
//! writers that change the boundary list without taking the lease.

use crate::error::{Error, Result};
use crate::keys::{self, Access, Role, ShardId};
use crate::shard_map::ShardMapStore;
use crate::storage::MetadataStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Routing state of a shard, derived from its endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardState {
    /// Read master equals write master
    Stable,
    /// Writes already go to a new master; reads still hit the old one
    Transitioning,
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardState::Stable => write!(f, "stable"),
            ShardState::Transitioning => write!(f, "transitioning"),
        }
    }
}

/// Result of a successful split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitOutcome {
    pub pivot: u32,
    pub lower: ShardId,
    pub upper: ShardId,
    pub boundaries: Vec<u32>,
}

/// Subdivides shards of a table
#[derive(Clone)]
pub struct ShardSplitter {
    store: Arc<dyn MetadataStore>,
    maps: ShardMapStore,
}

impl ShardSplitter {
    pub fn new(store: Arc<dyn MetadataStore>, maps: ShardMapStore) -> Self {
        Self { store, maps }
    }

    /// Split `shard` in two, pointing the upper child's writes at
    /// `new_master` (and `new_replicas`, if given).
    pub async fn split_shard(
        &self,
        db: &str,
        table: &str,
        shard: ShardId,
        new_master: &str,
        new_replicas: Option<&[String]>,
    ) -> Result<SplitOutcome> {
        let not_found = || {
            Error::ShardNotFound(format!(
                "{}.{} has no shard [{}, {})",
                db, table, shard.start, shard.end
            ))
        };
        let list_key = keys::shards_list_key(db, table);
        let _lease = self.store.lease(&list_key).await?;

        let map = self.maps.load(db, table).await?.ok_or_else(not_found)?;
        if !map.contains_shard(shard) {
            return Err(not_found());
        }
        let (split_map, pivot) = map.split(shard)?;

        let endpoints = self.maps.endpoints();
        endpoints.registry().require_servers([new_master]).await?;
        if let Some(replicas) = new_replicas {
            endpoints
                .registry()
                .require_servers(replicas.iter().map(String::as_str))
                .await?;
        }
        // Fails with RouteNotFound before any write if the old shard is incomplete.
        endpoints.shard_route(db, table, shard).await?;

        let lower = ShardId::new(shard.start, pivot);
        let upper = ShardId::new(pivot, shard.end);

        let mut written = Vec::new();
        let result = self
            .write_children(db, table, shard, lower, upper, new_master, new_replicas, &mut written)
            .await;
        if let Err(e) = result {
            error!(
                db = %db,
                table = %table,
                shard = %shard,
                written = ?written,
                error = %e,
                "Split aborted after partial endpoint writes; shard map unchanged, re-run the split"
            );
            return Err(e);
        }

        if !self
            .store
            .list_compare_and_swap(&list_key, Some(map.boundaries()), split_map.boundaries())
            .await?
        {
            error!(
                db = %db,
                table = %table,
                shard = %shard,
                written = ?written,
                "Shard map changed during split; child endpoints written but not published"
            );
            return Err(Error::ConcurrentModification(format!(
                "shard map {} changed during split of [{}, {})",
                list_key, shard.start, shard.end
            )));
        }

        info!(
            db = %db,
            table = %table,
            shard = %shard,
            pivot,
            new_master = %new_master,
            map = %split_map,
            "Shard split"
        );
        Ok(SplitOutcome {
            pivot,
            lower,
            upper,
            boundaries: split_map.boundaries().to_vec(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_children(
        &self,
        db: &str,
        table: &str,
        old: ShardId,
        lower: ShardId,
        upper: ShardId,
        new_master: &str,
        new_replicas: Option<&[String]>,
        written: &mut Vec<String>,
    ) -> Result<()> {
        let endpoints = self.maps.endpoints();

        for role in [Role::Master, Role::Replicas] {
            for access in [Access::Read, Access::Write] {
                let src = keys::shard_role_key(db, table, old, role, access);

                // Lower child inherits everything.
                if let Some(dst) = keys::retarget(&src, old, lower) {
                    self.copy_or_clear(&src, &dst).await?;
                    written.push(dst);
                }

                // Upper child inherits only the read side.
                if access == Access::Read {
                    if let Some(dst) = keys::retarget(&src, old, upper) {
                        self.copy_or_clear(&src, &dst).await?;
                        written.push(dst);
                    }
                }
            }
        }

        let write_master = keys::shard_role_key(db, table, upper, Role::Master, Access::Write);
        endpoints.assign_master(&write_master, new_master).await?;
        written.push(write_master);

        let write_replicas = keys::shard_role_key(db, table, upper, Role::Replicas, Access::Write);
        match new_replicas {
            Some(replicas) => endpoints.assign_replica_set(&write_replicas, replicas).await?,
            None => {
                self.store.delete(&write_replicas).await?;
            }
        }
        written.push(write_replicas);

        Ok(())
    }

    /// Copy `src` over `dst`; a missing `src` (an empty replica set) clears `dst`.
    async fn copy_or_clear(&self, src: &str, dst: &str) -> Result<()> {
        if !self.store.copy(src, dst, true).await? {
            self.store.delete(dst).await?;
        }
        debug!(src = %src, dst = %dst, "Endpoint copied");
        Ok(())
    }

    /// True once the shard's read master has caught up with its write master.
    ///
    /// `shard` must be a shard of the current map; ranges that were split
    /// away (whose keys are left behind) fail with `ShardNotFound`.
    pub async fn is_shard_ready_for_reshard(
        &self,
        db: &str,
        table: &str,
        shard: ShardId,
    ) -> Result<bool> {
        if !self.maps.shard_exists(db, table, shard).await? {
            return Err(Error::ShardNotFound(format!(
                "{}.{} has no shard [{}, {})",
                db, table, shard.start, shard.end
            )));
        }
        let read_key = keys::shard_role_key(db, table, shard, Role::Master, Access::Read);
        let write_key = keys::shard_role_key(db, table, shard, Role::Master, Access::Write);
        let read = self.store.get(&read_key).await?;
        let write = self.store.get(&write_key).await?;
        match (read, write) {
            (Some(read), Some(write)) => Ok(read == write),
            _ => Err(Error::RouteNotFound(format!(
                "one of {} or {} is not set",
                read_key, write_key
            ))),
        }
    }

    pub async fn shard_state(&self, db: &str, table: &str, shard: ShardId) -> Result<ShardState> {
        if self.is_shard_ready_for_reshard(db, table, shard).await? {
            Ok(ShardState::Stable)
        } else {
            Ok(ShardState::Transitioning)
        }
    }
}
