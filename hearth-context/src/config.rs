//! Controller configuration.
//!
//! Loaded from a TOML file when one is present:
//!
//! ```toml
//! identifier = "library"
//! root_directory = "/var/lib/library"
//! store_file_name = "library.sqlite"
//! enforce_tier_confinement = true
//! ```

use crate::{DataStoreError, DataStoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable consulted when no root directory is configured.
pub const ROOT_DIR_ENV: &str = "HEARTH_ROOT_DIR";

const DEFAULT_ROOT_DIR: &str = ".hearth";

/// Configuration for a [`DataStoreController`](crate::DataStoreController).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Logical store name. Also the default file stem.
    pub identifier: String,
    /// Directory holding the store file.
    pub root_directory: Option<PathBuf>,
    /// File name inside the root directory.
    pub store_file_name: Option<String>,
    /// Reject session calls made from the wrong tier.
    pub enforce_tier_confinement: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            identifier: "hearth".to_string(),
            root_directory: None,
            store_file_name: None,
            enforce_tier_confinement: true,
        }
    }
}

impl ControllerConfig {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    pub fn with_root_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_directory = Some(dir.into());
        self
    }

    pub fn with_store_file_name(mut self, name: impl Into<String>) -> Self {
        self.store_file_name = Some(name.into());
        self
    }

    pub fn with_tier_confinement(mut self, enforce: bool) -> Self {
        self.enforce_tier_confinement = enforce;
        self
    }

    /// Loads configuration from a TOML file.
    ///
    /// A missing or unreadable file yields the defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!("No config file found at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<ControllerConfig>(&contents) {
                Ok(config) => {
                    info!("Loaded store config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?}: {}. Using defaults.", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Directory the store file lives in: the configured one, then
    /// `$HEARTH_ROOT_DIR`, then `./.hearth`.
    pub fn resolved_root_directory(&self) -> PathBuf {
        if let Some(dir) = &self.root_directory {
            return dir.clone();
        }
        std::env::var_os(ROOT_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_DIR))
    }

    /// File name of the store, defaulting to `<identifier>.sqlite`.
    pub fn resolved_file_name(&self) -> String {
        self.store_file_name
            .clone()
            .unwrap_or_else(|| format!("{}.sqlite", self.identifier))
    }

    /// Full path of the store file.
    pub fn store_path(&self) -> PathBuf {
        self.resolved_root_directory().join(self.resolved_file_name())
    }

    /// Rejects configurations that cannot name a store file.
    pub fn validate(&self) -> DataStoreResult<()> {
        if self.identifier.trim().is_empty() {
            return Err(DataStoreError::Config("identifier must not be empty".into()));
        }
        let name = self.resolved_file_name();
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(DataStoreError::Config(format!(
                "store file name '{name}' must be a plain file name"
            )));
        }
        Ok(())
    }
}
