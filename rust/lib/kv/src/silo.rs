use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::KVError;
use crate::memory::MemoryStore;
use crate::selector::{BackendKind, StoreConfig, open_silo};
use crate::traits::KVStore;

/// Silo is the handle a plugin holds for its namespace.
///
/// It owns exactly one backend and hides which one it is. `close` reaches the
/// backend at most once; later calls are no-ops. A silo dropped without an
/// explicit close is closed on drop, so early returns during startup still
/// release locks and connections.
pub struct Silo {
    name: String,
    kind: BackendKind,
    store: Box<dyn KVStore>,
    closed: AtomicBool,
}

impl Silo {
    pub fn new(name: impl Into<String>, kind: BackendKind, store: Box<dyn KVStore>) -> Self {
        Self {
            name: name.into(),
            kind,
            store,
            closed: AtomicBool::new(false),
        }
    }

    /// A silo backed by process memory, for injecting into plugins under test.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(name, BackendKind::Memory, Box::new(MemoryStore::new()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl KVStore for Silo {
    fn get(&self, key: &str) -> Result<Option<String>, KVError> {
        self.store.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KVError> {
        self.store.set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        self.store.delete(key)
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, KVError> {
        self.store.scan(prefix)
    }

    fn close(&self) -> Result<(), KVError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("silo {:?} already closed", self.name);
            return Ok(());
        }
        self.store.close()?;
        debug!("silo {:?} closed", self.name);
        Ok(())
    }
}

impl Drop for Silo {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close() {
                warn!("silo {:?}: close on drop failed: {}", self.name, e);
            }
        }
    }
}

/// Silos opens one silo per namespace and owns them until shutdown.
///
/// Handles are shared (`Arc<Silo>`) so a plugin can use its silo from many
/// threads. `close_all` closes every silo once; dropping the registry does the
/// same for anything still open.
///
/// Opens are serialized on their own lock, so a slow remote open never holds
/// up `adopt`, `len` or `close_all`.
pub struct Silos {
    config: StoreConfig,
    opening: Mutex<()>,
    opened: Mutex<Vec<Arc<Silo>>>,
}

impl Silos {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            opening: Mutex::new(()),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open the silo for `namespace`, or hand out the already open one.
    pub fn open(&self, namespace: &str) -> Result<Arc<Silo>, KVError> {
        let _opening = self
            .opening
            .lock()
            .map_err(|e| KVError::OpenFailed(e.to_string()))?;

        if let Some(existing) = self.find_open(namespace)? {
            return Ok(existing);
        }

        let silo = Arc::new(open_silo(namespace, &self.config)?);
        self.opened
            .lock()
            .map_err(|e| KVError::OpenFailed(e.to_string()))?
            .push(Arc::clone(&silo));
        Ok(silo)
    }

    fn find_open(&self, namespace: &str) -> Result<Option<Arc<Silo>>, KVError> {
        let opened = self
            .opened
            .lock()
            .map_err(|e| KVError::OpenFailed(e.to_string()))?;
        Ok(opened
            .iter()
            .find(|s| s.name() == namespace && !s.is_closed())
            .cloned())
    }

    /// Take ownership of a silo built elsewhere (e.g. [`Silo::in_memory`]).
    pub fn adopt(&self, silo: Silo) -> Result<Arc<Silo>, KVError> {
        let silo = Arc::new(silo);
        self.opened
            .lock()
            .map_err(|e| KVError::OpenFailed(e.to_string()))?
            .push(Arc::clone(&silo));
        Ok(silo)
    }

    /// Number of silos still open.
    pub fn len(&self) -> usize {
        self.opened
            .lock()
            .map(|o| o.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every silo, most recently opened first. Failures are logged and
    /// returned; they never stop the remaining silos from closing.
    pub fn close_all(&self) -> Vec<(String, KVError)> {
        let silos: Vec<Arc<Silo>> = match self.opened.lock() {
            Ok(mut opened) => opened.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };

        let mut failures = Vec::new();
        for silo in silos.iter().rev() {
            if let Err(e) = silo.close() {
                warn!("silo {:?}: close failed: {}", silo.name(), e);
                failures.push((silo.name().to_string(), e));
            }
        }
        failures
    }
}

impl Drop for Silos {
    fn drop(&mut self) {
        self.close_all();
    }
}
