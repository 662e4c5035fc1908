use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Mutex, MutexGuard, RwLock};

use tracing::debug;

use crate::error::KVError;
use crate::traits::KVStore;

/// Number of per-key write locks. Keys hash onto one of these stripes.
const KEY_STRIPES: usize = 32;

/// WriteThroughCache mirrors a whole silo in memory in front of a slower
/// backend (the remote datastore in production).
///
/// - **Reads** (`get`, `scan`) are served from the mirror only.
/// - **Writes** (`set`, `delete`) go to the backend first. The mirror is
///   updated only after the backend acknowledged the write, so a failed write
///   leaves the mirror exactly as it was and the error reaches the caller.
///
/// The mirror is filled by a full scan when the cache is built. There is no
/// eviction: a silo is small and the whole of it is held.
///
/// Writes to the same key are serialized through a striped lock held across
/// "backend write, then mirror update". The last writer wins in both places.
/// Writes to different keys run in parallel unless their stripes collide.
pub struct WriteThroughCache<B: KVStore> {
    mirror: RwLock<Option<HashMap<String, String>>>,
    stripes: Vec<Mutex<()>>,
    backend: B,
}

impl<B: KVStore> WriteThroughCache<B> {
    /// Warm a cache from `backend`. Fails with the backend's error if the scan
    /// fails, since a cold mirror would report keys as missing.
    pub fn wrap(backend: B) -> Result<Self, KVError> {
        let entries = backend.scan("")?;
        debug!("WriteThroughCache: warmed with {} entries", entries.len());

        Ok(Self {
            mirror: RwLock::new(Some(entries.into_iter().collect())),
            stripes: (0..KEY_STRIPES).map(|_| Mutex::new(())).collect(),
            backend,
        })
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of mirrored entries.
    pub fn len(&self) -> usize {
        self.mirror
            .read()
            .map(|m| m.as_ref().map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> Result<(), KVError> {
        let mirror = self
            .mirror
            .read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        match mirror.as_ref() {
            Some(_) => Ok(()),
            None => Err(KVError::Closed),
        }
    }

    fn lock_key(&self, key: &str) -> Result<MutexGuard<'_, ()>, KVError> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[stripe]
            .lock()
            .map_err(|e| KVError::WriteFailed(e.to_string()))
    }

    fn update_mirror<F>(&self, f: F) -> Result<(), KVError>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let mut mirror = self
            .mirror
            .write()
            .map_err(|e| KVError::WriteFailed(e.to_string()))?;
        let map = mirror.as_mut().ok_or(KVError::Closed)?;
        f(map);
        Ok(())
    }
}

impl<B: KVStore> KVStore for WriteThroughCache<B> {
    fn get(&self, key: &str) -> Result<Option<String>, KVError> {
        let mirror = self
            .mirror
            .read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let map = mirror.as_ref().ok_or(KVError::Closed)?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KVError> {
        let _guard = self.lock_key(key)?;
        self.ensure_open()?;
        self.backend.set(key, value)?;
        self.update_mirror(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        let _guard = self.lock_key(key)?;
        self.ensure_open()?;
        self.backend.delete(key)?;
        self.update_mirror(|map| {
            map.remove(key);
        })
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, KVError> {
        let mirror = self
            .mirror
            .read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let map = mirror.as_ref().ok_or(KVError::Closed)?;

        let mut results: Vec<(String, String)> = map
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    /// Close the backend and drop the mirror.
    ///
    /// Writes that start after `close` fail with `Closed` without reaching
    /// the backend. A write already past that check when `close` runs may be
    /// durable in the backend and still report `Closed`.
    fn close(&self) -> Result<(), KVError> {
        let result = self.backend.close();
        if let Ok(mut mirror) = self.mirror.write() {
            mirror.take();
        }
        result
    }
}
