//! TOML batch manifests.
//!
//! ```toml
//! hash_store = "data/hashes.json"
//! assume_changed_on_missing = false
//!
//! [[asset]]
//! source = "https://example.com/huc8.zip"
//! destination = "data/huc8.zip"
//! routine = "download"
//!
//! [[asset]]
//! source = "data/huc8.zip"
//! destination = "data/huc8.geojson"
//! routine = "unzip"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{Asset, ChangePolicy, CreateArgs, RoutineKind, RoutineRegistry};

/// One `[[asset]]` table of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSpec {
    /// Source descriptor (path or URL).
    pub source: String,
    /// Destination file.
    pub destination: PathBuf,
    /// Built-in routine producing the destination.
    #[serde(default)]
    pub routine: RoutineKind,
    /// Optional working directory to create first.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Routine keyword arguments.
    #[serde(default)]
    pub args: CreateArgs,
}

impl AssetSpec {
    /// Resolve the routine through `registry` and build the asset.
    #[must_use]
    pub fn to_asset(&self, registry: &RoutineRegistry) -> Asset {
        let mut asset = Asset::new(
            self.source.clone(),
            self.destination.clone(),
            registry.resolve(self.routine),
        )
        .with_args(self.args.clone());
        if let Some(directory) = &self.directory {
            asset = asset.with_directory(directory.clone());
        }
        asset
    }
}

/// An ordered list of assets plus optional change-tracking settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Hash store overriding the configured one.
    #[serde(default)]
    pub hash_store: Option<PathBuf>,
    /// Overrides the configured missing-key policy.
    #[serde(default)]
    pub assume_changed_on_missing: Option<bool>,
    /// Assets in materialization order.
    #[serde(default, rename = "asset")]
    pub assets: Vec<AssetSpec>,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid manifest: {}", path.display()))
    }

    /// Parse manifest TOML.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply the manifest's overrides on top of a base policy.
    #[must_use]
    pub fn policy(&self, base: &ChangePolicy) -> ChangePolicy {
        let mut policy = base.clone();
        if let Some(store) = &self.hash_store {
            policy.hash_store = Some(store.clone());
        }
        if let Some(value) = self.assume_changed_on_missing {
            policy.assume_changed_on_missing = value;
        }
        policy
    }

    /// Build all assets through `registry`.
    #[must_use]
    pub fn assets(&self, registry: &RoutineRegistry) -> Vec<Asset> {
        self.assets.iter().map(|spec| spec.to_asset(registry)).collect()
    }
}
