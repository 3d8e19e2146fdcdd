//! File-backed metadata store
//!
//! The whole key space is kept as one JSON snapshot. Every operation runs
//! under an exclusive lock on a sibling `.lock` file:
//!
//! ```text
//! lock ─→ load snapshot ─→ apply primitive ─→ (if changed) write tmp + rename ─→ unlock
//! ```
//!
//! Because each primitive reloads the snapshot under the lock, separate
//! processes sharing one file observe each other's writes, and
//! `list_compare_and_swap` is atomic across processes.
//!
//! Leases are separate lock files next to the snapshot
//! (`{path}.{name}.lease`), so a process holding a lease still runs
//! ordinary primitives.

use crate::error::{Error, Result};
use crate::storage::engine::{Lease, MetadataStore};
use crate::storage::flock::FileLock;
use crate::storage::keyspace::Keyspace;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const SNAPSHOT_FORMAT: u32 = 1;

/// On-disk snapshot layout
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    format: u32,
    updated_at: DateTime<Utc>,
    keyspace: Keyspace,
}

/// Metadata store persisted to a JSON snapshot file
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    local: Mutex<()>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}

impl FileStore {
    /// Open (or lazily create) the snapshot at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");

        Ok(Self {
            path,
            lock_path: PathBuf::from(lock_name),
            local: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lease_path(&self, name: &str) -> PathBuf {
        let slug: String = name
            .trim_matches('/')
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let mut lease_name = self.path.as_os_str().to_owned();
        lease_name.push(format!(".{}.lease", slug));
        PathBuf::from(lease_name)
    }

    fn load(&self) -> Result<Keyspace> {
        if !self.path.exists() {
            return Ok(Keyspace::new());
        }
        let bytes = fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(Keyspace::new());
        }
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        Ok(snapshot.keyspace)
    }

    fn persist(&self, keyspace: Keyspace) -> Result<()> {
        let snapshot = Snapshot {
            format: SNAPSHOT_FORMAT,
            updated_at: Utc::now(),
            keyspace,
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        debug!(path = %self.path.display(), keys = snapshot.keyspace.len(), "Snapshot written");
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&Keyspace) -> Result<T>) -> Result<T> {
        let _local = self.local.lock();
        let _lock = FileLock::acquire(&self.lock_path)?;
        let keyspace = self.load()?;
        f(&keyspace)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Keyspace) -> Result<T>) -> Result<T> {
        let _local = self.local.lock();
        let _lock = FileLock::acquire(&self.lock_path)?;
        let mut keyspace = self.load()?;
        let before = keyspace.clone();
        let out = f(&mut keyspace)?;
        if keyspace != before {
            self.persist(keyspace)?;
        }
        Ok(out)
    }
}

#[async_trait]
impl MetadataStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.read(|ks| ks.get(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write(|ks| {
            ks.set(key, value);
            Ok(())
        })
    }

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        self.read(|ks| ks.hash_get_all(key))
    }

    async fn hash_set(&self, key: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        self.write(|ks| ks.hash_set(key, fields).map(|_| ()))
    }

    async fn list_range(&self, key: &str) -> Result<Vec<u32>> {
        self.read(|ks| ks.list_range(key))
    }

    async fn list_compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u32]>,
        new: &[u32],
    ) -> Result<bool> {
        self.write(|ks| ks.list_compare_and_swap(key, expected, new))
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()> {
        self.write(|ks| ks.set_add(key, members).map(|_| ()))
    }

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>> {
        self.read(|ks| ks.set_members(key))
    }

    async fn copy(&self, src: &str, dst: &str, replace: bool) -> Result<bool> {
        self.write(|ks| Ok(ks.copy(src, dst, replace)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.read(|ks| Ok(ks.exists(key)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.write(|ks| Ok(ks.delete(key)))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.read(|ks| Ok(ks.keys_with_prefix(prefix)))
    }

    async fn lease(&self, name: &str) -> Result<Lease> {
        let path = self.lease_path(name);
        let lock = tokio::task::spawn_blocking(move || FileLock::acquire(path))
            .await
            .map_err(|e| Error::Storage(format!("lease wait aborted: {}", e)))??;
        debug!(lease = %name, path = %lock.path().display(), "Lease acquired");
        Ok(Lease::new(name, lock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> (PathBuf, FileStore) {
        let dir = std::env::temp_dir().join(format!("shardctl_{}_{}", name, std::process::id()));
        let path = dir.join("metadata.json");
        let store = FileStore::open(&path).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() -> Result<()> {
        let (dir, store) = temp_store("persist");

        store.set("/shopA/master", "srvA").await?;
        store
            .list_compare_and_swap("/shopA/orders/shards", None, &[0, 65536])
            .await?;
        drop(store);

        let reopened = FileStore::open(dir.join("metadata.json"))?;
        assert_eq!(reopened.get("/shopA/master").await?.as_deref(), Some("srvA"));
        assert_eq!(
            reopened.list_range("/shopA/orders/shards").await?,
            vec![0, 65536]
        );

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store_two_handles_see_each_other() -> Result<()> {
        let (dir, first) = temp_store("handles");
        let second = FileStore::open(first.path())?;

        assert!(first.list_compare_and_swap("/t/shards", None, &[0, 65536]).await?);
        assert!(!second.list_compare_and_swap("/t/shards", None, &[0, 65536]).await?);
        assert!(
            second
                .list_compare_and_swap("/t/shards", Some(&[0, 65536][..]), &[0, 32768, 65536])
                .await?
        );
        assert_eq!(first.list_range("/t/shards").await?, vec![0, 32768, 65536]);

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() -> Result<()> {
        let (dir, store) = temp_store("empty");
        assert!(!store.exists("/anything").await?);
        assert!(store.keys_with_prefix("/servers/").await?.is_empty());
        assert!(!store.path().exists());

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lease_is_exclusive_across_handles() -> Result<()> {
        let (dir, first) = temp_store("lease");
        let second = FileStore::open(first.path())?;

        let held = first.lease("/shopA/orders/shards").await?;
        // Leases do not block ordinary primitives.
        second.set("/shopA/master", "srvA").await?;

        let waiting = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            second.lease("/shopA/orders/shards"),
        )
        .await;
        assert!(waiting.is_err(), "second handle got the lease while it was held");

        drop(held);
        let again = second.lease("/shopA/orders/shards").await?;
        assert_eq!(again.name(), "/shopA/orders/shards");

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }
}
