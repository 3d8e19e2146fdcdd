//! Typed key space shared by the storage backends
//!
//! Every key holds exactly one kind of value. Primitives that read a key of a
//! different kind fail with [`Error::WrongType`]; primitives that read a
//! missing key behave as if it held an empty value of the expected kind.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A value stored under one metadata key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StoredValue {
    String(String),
    Hash(BTreeMap<String, String>),
    List(Vec<u32>),
    Set(BTreeSet<String>),
}

/// Ordered map of metadata keys to typed values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyspace {
    entries: BTreeMap<String, StoredValue>,
}

fn wrong_type(key: &str, expected: &'static str) -> Error {
    Error::WrongType {
        key: key.to_string(),
        expected,
    }
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(StoredValue::String(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key, "string")),
        }
    }

    /// Plain string write; replaces whatever the key held before.
    pub fn set(&mut self, key: &str, value: &str) {
        self.entries
            .insert(key.to_string(), StoredValue::String(value.to_string()));
    }

    pub fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        match self.entries.get(key) {
            None => Ok(BTreeMap::new()),
            Some(StoredValue::Hash(fields)) => Ok(fields.clone()),
            Some(_) => Err(wrong_type(key, "hash")),
        }
    }

    /// Upserts fields, returning how many were newly created.
    pub fn hash_set(&mut self, key: &str, fields: &BTreeMap<String, String>) -> Result<usize> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::Hash(BTreeMap::new()));
        let StoredValue::Hash(existing) = entry else {
            return Err(wrong_type(key, "hash"));
        };

        let mut created = 0;
        for (field, value) in fields {
            if existing.insert(field.clone(), value.clone()).is_none() {
                created += 1;
            }
        }
        Ok(created)
    }

    pub fn list_range(&self, key: &str) -> Result<Vec<u32>> {
        match self.entries.get(key) {
            None => Ok(Vec::new()),
            Some(StoredValue::List(items)) => Ok(items.clone()),
            Some(_) => Err(wrong_type(key, "list")),
        }
    }

    /// Replaces the list only if it currently equals `expected`.
    ///
    /// `expected == None` means the key must be absent. An empty `new` list
    /// removes the key.
    pub fn list_compare_and_swap(
        &mut self,
        key: &str,
        expected: Option<&[u32]>,
        new: &[u32],
    ) -> Result<bool> {
        let matches = match (self.entries.get(key), expected) {
            (None, None) => true,
            (None, Some(_)) | (Some(StoredValue::List(_)), None) => false,
            (Some(StoredValue::List(current)), Some(expected)) => current.as_slice() == expected,
            (Some(_), _) => return Err(wrong_type(key, "list")),
        };
        if !matches {
            return Ok(false);
        }

        if new.is_empty() {
            self.entries.remove(key);
        } else {
            self.entries
                .insert(key.to_string(), StoredValue::List(new.to_vec()));
        }
        Ok(true)
    }

    /// Adds members, returning how many were not already present.
    pub fn set_add(&mut self, key: &str, members: &[String]) -> Result<usize> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::Set(BTreeSet::new()));
        let StoredValue::Set(existing) = entry else {
            return Err(wrong_type(key, "set"));
        };

        Ok(members
            .iter()
            .filter(|member| existing.insert((*member).clone()))
            .count())
    }

    pub fn set_members(&self, key: &str) -> Result<BTreeSet<String>> {
        match self.entries.get(key) {
            None => Ok(BTreeSet::new()),
            Some(StoredValue::Set(members)) => Ok(members.clone()),
            Some(_) => Err(wrong_type(key, "set")),
        }
    }

    /// Copies `src` to `dst`. Returns false when `src` is missing, or when
    /// `dst` exists and `replace` is off.
    pub fn copy(&mut self, src: &str, dst: &str, replace: bool) -> bool {
        let Some(value) = self.entries.get(src).cloned() else {
            return false;
        };
        if !replace && self.entries.contains_key(dst) {
            return false;
        }
        self.entries.insert(dst.to_string(), value);
        true
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_and_wrong_type() {
        let mut ks = Keyspace::new();
        ks.set("/a", "1");
        assert_eq!(ks.get("/a").unwrap().as_deref(), Some("1"));
        assert!(matches!(ks.set_members("/a"), Err(Error::WrongType { .. })));
        assert_eq!(ks.get("/missing").unwrap(), None);
    }

    #[test]
    fn test_hash_upsert_is_field_wise() {
        let mut ks = Keyspace::new();
        let mut first = BTreeMap::new();
        first.insert("host".to_string(), "10.0.0.1".to_string());
        first.insert("port".to_string(), "5432".to_string());
        assert_eq!(ks.hash_set("/servers/a", &first).unwrap(), 2);

        let mut second = BTreeMap::new();
        second.insert("port".to_string(), "6432".to_string());
        assert_eq!(ks.hash_set("/servers/a", &second).unwrap(), 0);

        let fields = ks.hash_get_all("/servers/a").unwrap();
        assert_eq!(fields["host"], "10.0.0.1");
        assert_eq!(fields["port"], "6432");
    }

    #[test]
    fn test_list_compare_and_swap() {
        let mut ks = Keyspace::new();
        assert!(!ks.list_compare_and_swap("/l", Some(&[0, 1][..]), &[0, 2]).unwrap());
        assert!(ks.list_compare_and_swap("/l", None, &[0, 2]).unwrap());
        assert!(!ks.list_compare_and_swap("/l", None, &[0, 3]).unwrap());
        assert!(ks.list_compare_and_swap("/l", Some(&[0, 2][..]), &[0, 1, 2]).unwrap());
        assert_eq!(ks.list_range("/l").unwrap(), vec![0, 1, 2]);

        assert!(ks.list_compare_and_swap("/l", Some(&[0, 1, 2][..]), &[]).unwrap());
        assert!(!ks.exists("/l"));
    }

    #[test]
    fn test_copy_semantics() {
        let mut ks = Keyspace::new();
        assert!(!ks.copy("/src", "/dst", true));

        ks.set_add("/src", &["x".to_string(), "y".to_string()]).unwrap();
        ks.set("/dst", "old");
        assert!(!ks.copy("/src", "/dst", false));
        assert!(ks.copy("/src", "/dst", true));
        assert_eq!(ks.set_members("/dst").unwrap().len(), 2);
    }

    #[test]
    fn test_keys_with_prefix() {
        let mut ks = Keyspace::new();
        ks.set("/servers/a", "");
        ks.set("/servers/b", "");
        ks.set("/serverz", "");
        ks.set("/db/master", "a");
        assert_eq!(
            ks.keys_with_prefix("/servers/"),
            vec!["/servers/a".to_string(), "/servers/b".to_string()]
        );
    }
}
