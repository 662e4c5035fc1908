//! Bot configuration file.
//!
//! ```toml
//! debug = false
//!
//! [storage]
//! storage_path = "/var/lib/youppi"
//! # Set these two to keep silos in Cloud Datastore instead.
//! gcloud_project_id = ""
//! gcloud_credentials_file = ""
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use youppi_kv::StoreConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Turn on debug logging everywhere.
    #[serde(default)]
    pub debug: bool,

    /// Where silos live.
    #[serde(default)]
    pub storage: StoreConfig,
}

impl Config {
    /// Load the configuration file. Unlike client-side config, a missing file
    /// is an error: the bot cannot pick a storage backend without it.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Error loading configuration file [{}]", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Error parsing configuration file [{}]", path.display()))?;
        config
            .storage
            .validate()
            .with_context(|| format!("Invalid storage settings in [{}]", path.display()))?;
        Ok(config)
    }
}
