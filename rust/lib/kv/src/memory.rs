use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::KVError;
use crate::traits::KVStore;

/// MemoryStore is a non-durable KVStore kept entirely in process memory.
///
/// Plugins under test get one of these injected in place of a real silo.
pub struct MemoryStore {
    entries: RwLock<Option<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Some(BTreeMap::new())),
        }
    }

    /// Create a store pre-populated with the given entries.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: RwLock::new(Some(map)),
        }
    }

    /// Number of entries held. Zero once closed.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|e| e.as_ref().map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KVStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, KVError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let map = entries.as_ref().ok_or(KVError::Closed)?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KVError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| KVError::WriteFailed(e.to_string()))?;
        let map = entries.as_mut().ok_or(KVError::Closed)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| KVError::WriteFailed(e.to_string()))?;
        let map = entries.as_mut().ok_or(KVError::Closed)?;
        map.remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, KVError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let map = entries.as_ref().ok_or(KVError::Closed)?;
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn close(&self) -> Result<(), KVError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| KVError::CloseFailed(e.to_string()))?;
        entries.take().map(|_| ()).ok_or(KVError::Closed)
    }
}
