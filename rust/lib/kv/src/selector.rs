use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::WriteThroughCache;
use crate::datastore::{DatastoreConfig, DatastoreStore};
use crate::error::KVError;
use crate::redb::RedbStore;
use crate::silo::Silo;

/// Storage settings for every silo of a process.
///
/// The presence of `gcloud_project_id` selects the remote datastore (behind a
/// write-through cache); otherwise silos live under `storage_path`. Empty
/// strings count as unset, so a config file may leave keys blank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for embedded silos: `{storage_path}/{silo}/`.
    pub storage_path: Option<PathBuf>,

    /// Google Cloud project id. When set, silos are stored in Cloud Datastore.
    pub gcloud_project_id: Option<String>,

    /// Service-account JSON key for the datastore.
    pub gcloud_credentials_file: Option<PathBuf>,

    /// Datastore endpoint override, mainly for the emulator.
    pub datastore_endpoint: Option<String>,
}

/// Which concrete backend a silo ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// redb database on local disk.
    Embedded,
    /// Cloud Datastore behind a write-through cache.
    CachedRemote,
    /// Process memory only.
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Embedded => write!(f, "embedded"),
            BackendKind::CachedRemote => write!(f, "cached-remote"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn non_empty_path(p: &Option<PathBuf>) -> Option<&Path> {
    p.as_deref().filter(|p| !p.as_os_str().is_empty())
}

impl StoreConfig {
    /// Config for embedded silos rooted at `path`.
    pub fn embedded(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// The remote project id, if one is configured.
    pub fn remote_project(&self) -> Option<&str> {
        non_empty(&self.gcloud_project_id)
    }

    /// The backend `open_silo` will pick for this configuration.
    pub fn backend_kind(&self) -> BackendKind {
        if self.remote_project().is_some() {
            BackendKind::CachedRemote
        } else {
            BackendKind::Embedded
        }
    }

    /// Check that the settings needed by the selected backend are present.
    pub fn validate(&self) -> Result<(), KVError> {
        match self.backend_kind() {
            BackendKind::CachedRemote => {
                if non_empty_path(&self.gcloud_credentials_file).is_none()
                    && non_empty(&self.datastore_endpoint).is_none()
                {
                    return Err(KVError::InvalidConfig(
                        "gcloud_credentials_file is required when gcloud_project_id is set"
                            .to_string(),
                    ));
                }
            }
            _ => {
                if non_empty_path(&self.storage_path).is_none() {
                    return Err(KVError::InvalidConfig(
                        "storage_path is required when no gcloud_project_id is set".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn datastore(&self, project_id: &str) -> DatastoreConfig {
        DatastoreConfig {
            project_id: project_id.to_string(),
            credentials_file: non_empty_path(&self.gcloud_credentials_file).map(Path::to_path_buf),
            endpoint: non_empty(&self.datastore_endpoint).map(str::to_string),
        }
    }
}

/// Open the silo `namespace` with the backend selected by `config`.
///
/// With a remote project configured, the datastore is opened and wrapped in a
/// [`WriteThroughCache`]. Any failure there is returned as is: an explicit
/// remote configuration never falls back to local disk. Without a remote
/// project, a [`RedbStore`] is opened under `storage_path`.
pub fn open_silo(namespace: &str, config: &StoreConfig) -> Result<Silo, KVError> {
    config.validate()?;

    match (config.remote_project(), non_empty_path(&config.storage_path)) {
        (Some(project_id), _) => {
            let remote = DatastoreStore::open(namespace, &config.datastore(project_id))?;
            let cached = WriteThroughCache::wrap(remote)?;
            info!(
                "silo {:?}: datastore project {} ({} entries cached)",
                namespace,
                project_id,
                cached.len()
            );
            Ok(Silo::new(namespace, BackendKind::CachedRemote, Box::new(cached)))
        }
        (None, Some(root)) => {
            let store = RedbStore::open(namespace, root)?;
            info!("silo {:?}: embedded at {}", namespace, store.path().display());
            Ok(Silo::new(namespace, BackendKind::Embedded, Box::new(store)))
        }
        (None, None) => Err(KVError::InvalidConfig(
            "storage_path is required when no gcloud_project_id is set".to_string(),
        )),
    }
}
