use std::sync::Arc;

use crate::error::KVError;

/// KVStore is the contract every silo backend implements.
///
/// A store instance is scoped to exactly one namespace: keys passed here never
/// carry the namespace themselves. Keys and values are opaque strings.
/// Implementations must be safe to call concurrently from many threads.
pub trait KVStore: Send + Sync {
    /// Get the value for a key. Returns None if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<String>, KVError>;

    /// Set a key-value pair. Returns only once the write is durable in the backend.
    fn set(&self, key: &str, value: &str) -> Result<(), KVError>;

    /// Delete a key. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<(), KVError>;

    /// Scan all keys matching a prefix. Returns (key, value) pairs sorted by key.
    /// An empty prefix lists the whole namespace.
    fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, KVError>;

    /// Release the backend's resources. Every later call fails with `KVError::Closed`.
    fn close(&self) -> Result<(), KVError>;
}

impl<T: KVStore + ?Sized> KVStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, KVError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KVError> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        (**self).delete(key)
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, KVError> {
        (**self).scan(prefix)
    }

    fn close(&self) -> Result<(), KVError> {
        (**self).close()
    }
}
