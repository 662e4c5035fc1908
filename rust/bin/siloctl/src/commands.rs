//! Silo commands: `get`, `set`, `delete`, `list`.
//!
//! Each command works on any `KVStore`, so the same code runs against an
//! embedded silo, a cached datastore silo, or a memory store in tests.

use std::io::Write;

use anyhow::{Context, Result};
use youppi_kv::KVStore;

/// Print the value of `key`. Returns false when the key is absent.
pub fn get(store: &dyn KVStore, key: &str, out: &mut dyn Write) -> Result<bool> {
    match store.get(key).with_context(|| format!("reading {:?}", key))? {
        Some(value) => {
            writeln!(out, "{}", value)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

pub fn set(store: &dyn KVStore, key: &str, value: &str) -> Result<()> {
    store
        .set(key, value)
        .with_context(|| format!("writing {:?}", key))
}

pub fn delete(store: &dyn KVStore, key: &str) -> Result<()> {
    store
        .delete(key)
        .with_context(|| format!("deleting {:?}", key))
}

/// Print `key<TAB>value` lines in key order. Returns the number of entries.
pub fn list(store: &dyn KVStore, prefix: &str, out: &mut dyn Write) -> Result<usize> {
    let entries = store
        .scan(prefix)
        .with_context(|| format!("listing prefix {:?}", prefix))?;
    for (key, value) in &entries {
        writeln!(out, "{}\t{}", key, value)?;
    }
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use youppi_kv::MemoryStore;

    use super::*;

    #[test]
    fn get_prints_value() {
        let store = MemoryStore::with_entries([("alice", "4")]);
        let mut out = Vec::new();
        assert!(get(&store, "alice", &mut out).unwrap());
        assert_eq!(String::from_utf8(out).unwrap(), "4\n");
    }

    #[test]
    fn get_missing_prints_nothing() {
        let store = MemoryStore::new();
        let mut out = Vec::new();
        assert!(!get(&store, "alice", &mut out).unwrap());
        assert!(out.is_empty());
    }

    #[test]
    fn set_and_delete() {
        let store = MemoryStore::new();
        set(&store, "alice", "3").unwrap();
        assert_eq!(store.get("alice").unwrap().as_deref(), Some("3"));
        delete(&store, "alice").unwrap();
        delete(&store, "alice").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn list_is_tab_separated_and_sorted() {
        let store = MemoryStore::with_entries([("bob", "7"), ("alice", "3"), ("zed", "0")]);
        let mut out = Vec::new();
        let n = list(&store, "", &mut out).unwrap();
        assert_eq!(n, 3);
        assert_eq!(String::from_utf8(out).unwrap(), "alice\t3\nbob\t7\nzed\t0\n");
    }

    #[test]
    fn errors_carry_the_key() {
        let store = MemoryStore::new();
        store.close().unwrap();
        let err = set(&store, "alice", "1").unwrap_err();
        assert!(format!("{:#}", err).contains("\"alice\""));
    }
}
