//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::backend::{DEFAULT_MAX_CONNECTIONS, StoreConfig};
use crate::error::{StoreError, StoreResult};

/// Settings for [`FsEngine::open`](crate::engine::FsEngine::open).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// `sqlite:<path>`, `sqlite::memory:` or a `postgres://` URL.
    pub database_url: String,
    pub max_connections: u32,
    /// Create the root and system directories on open.
    pub seed_on_open: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:simfs.db".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            seed_on_open: true,
        }
    }
}

impl FsConfig {
    /// Load from the process environment.
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source, using defaults for absent keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StoreResult<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("SIMFS_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            config.database_url = url;
        }
        if let Some(raw) = lookup("SIMFS_MAX_CONNECTIONS") {
            config.max_connections = raw
                .trim()
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    StoreError::Config(format!("SIMFS_MAX_CONNECTIONS: invalid value {raw:?}"))
                })?;
        }
        if let Some(raw) = lookup("SIMFS_SEED") {
            config.seed_on_open = parse_flag(&raw)
                .ok_or_else(|| StoreError::Config(format!("SIMFS_SEED: invalid value {raw:?}")))?;
        }
        Ok(config)
    }

    pub fn from_json(json: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn store_config(&self) -> StoreResult<StoreConfig> {
        StoreConfig::from_url(&self.database_url)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
