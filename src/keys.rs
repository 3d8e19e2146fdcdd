//! Metadata key paths
//!
//! Every key is a `/`-separated path. Shard-scoped keys embed a shard id of
//! the form `{start}-{end}`, which [`retarget`] swaps to address the same
//! role/access slot of a different shard.

use serde::{Deserialize, Serialize};
use std::fmt;

const SERVERS_PREFIX: &str = "/servers/";

/// Half-open shard range `[start, end)` as it appears in key paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId {
    pub start: u32,
    pub end: u32,
}

impl ShardId {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Which half of an endpoint a key holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Single server hash (string value)
    Master,
    /// Server hash set
    Replicas,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replicas => "replicas",
        }
    }
}

/// Read or write path of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
        }
    }
}

/// Join path segments, guaranteeing a single leading `/`.
fn path(segments: &[&str]) -> String {
    let joined = segments.join("/");
    if joined.starts_with('/') {
        joined
    } else {
        format!("/{}", joined)
    }
}

pub fn server_key(server_hash: &str) -> String {
    format!("{}{}", SERVERS_PREFIX, server_hash)
}

/// Prefix shared by every server key; stripping it yields the hash.
pub fn servers_prefix() -> &'static str {
    SERVERS_PREFIX
}

pub fn db_master_key(db: &str) -> String {
    path(&[db, "master"])
}

pub fn db_replicas_key(db: &str) -> String {
    path(&[db, "replicas"])
}

/// Database-level key for the given role.
pub fn db_role_key(db: &str, role: Role) -> String {
    match role {
        Role::Master => db_master_key(db),
        Role::Replicas => db_replicas_key(db),
    }
}

pub fn shards_list_key(db: &str, table: &str) -> String {
    path(&[db, table, "shards"])
}

pub fn shard_role_key(db: &str, table: &str, shard: ShardId, role: Role, access: Access) -> String {
    let shard = shard.to_string();
    path(&[db, table, "shards", &shard, role.as_str(), access.as_str()])
}

/// Rewrite a shard-scoped key so it addresses `to` instead of `from`.
///
/// Only the shard id segment directly under `/shards/` is replaced, so
/// database or table names that happen to look like a shard id are left
/// untouched.
pub fn retarget(key: &str, from: ShardId, to: ShardId) -> Option<String> {
    let needle = format!("/shards/{}/", from);
    let at = key.rfind(&needle)?;
    let mut out = String::with_capacity(key.len() + 8);
    out.push_str(&key[..at]);
    out.push_str(&format!("/shards/{}/", to));
    out.push_str(&key[at + needle.len()..]);
    Some(out)
}
