//! Layered application configuration.
//!
//! Values are merged from, lowest to highest priority: built-in defaults,
//! a TOML file (`--config` or `config.toml` in the platform config
//! directory), `GEOSTAGE_*` environment variables, and finally CLI flags
//! applied by the caller.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::bootstrap::routines::DEFAULT_DOWNLOAD_CHUNK_SIZE;
use crate::bootstrap::ChangePolicy;
use crate::chunks::DEFAULT_STEP;

/// Prefix of environment variables read into the configuration.
pub const ENV_PREFIX: &str = "GEOSTAGE_";

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON file recording source digests. Without one, change checks
    /// return `changed_without_store`.
    pub hash_store: Option<PathBuf>,
    /// Treat sources missing from the store as changed.
    pub assume_changed_on_missing: bool,
    /// Result of a change check when no store is configured.
    pub changed_without_store: bool,
    /// Chunk cell size in degrees.
    pub step: f64,
    /// Read size of the download routine in bytes.
    pub download_chunk_size: usize,
    /// Show progress bars.
    pub progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hash_store: None,
            assume_changed_on_missing: false,
            changed_without_store: false,
            step: DEFAULT_STEP,
            download_chunk_size: DEFAULT_DOWNLOAD_CHUNK_SIZE,
            progress: true,
        }
    }
}

impl Config {
    /// Load the configuration.
    ///
    /// An explicit `path` must exist; the platform default is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                anyhow::ensure!(path.is_file(), "Config file not found: {}", path.display());
                Some(path.to_path_buf())
            }
            None => Self::config_path().filter(|p| p.is_file()),
        };
        if let Some(file) = &file {
            log::debug!("Loading config from {}", file.display());
        }
        Self::figment(file.as_deref())
            .extract()
            .context("Invalid configuration")
    }

    /// The provider stack used by [`load`](Self::load).
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Default platform-specific configuration path.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "geostage", "geostage")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Change-tracking policy described by this configuration.
    #[must_use]
    pub fn change_policy(&self) -> ChangePolicy {
        let mut policy = ChangePolicy::default()
            .with_assume_changed_on_missing(self.assume_changed_on_missing)
            .with_changed_without_store(self.changed_without_store);
        if let Some(store) = &self.hash_store {
            policy = policy.with_hash_store(store.clone());
        }
        policy
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}
