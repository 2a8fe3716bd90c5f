//! Asset materialization with change tracking.
//!
//! An [`Asset`] pairs a source descriptor with a destination file and the
//! routine that can (re)produce it. [`ensure_asset`] creates the destination
//! when it is missing or when its source changed since the last run;
//! [`ensure_assets`] runs an ordered batch and stops at the first failure.
//!
//! # Architecture
//!
//! * [`hasher`]: MD5 digests of source files.
//! * [`hashstore`]: the persisted source → digest table and change checks.
//! * [`routines`]: built-in creation routines and their registry.
//! * [`manifest`]: TOML batch manifests.
//!
//! # Example
//!
//! ```no_run
//! use geostage::bootstrap::{ensure_asset, Asset, ChangePolicy, RoutineKind, RoutineRegistry};
//!
//! let registry = RoutineRegistry::default();
//! let asset = Asset::new(
//!     "https://example.com/boundaries.zip",
//!     "data/boundaries.zip",
//!     registry.resolve(RoutineKind::Download),
//! );
//! let policy = ChangePolicy::default().with_hash_store("data/hashes.json");
//! ensure_asset(&asset, &policy).unwrap();
//! ```

pub mod hasher;
pub mod hashstore;
pub mod manifest;
pub mod routines;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::files::{ensure_directory, FilesError};

pub use hasher::{hash_file, HashError, BLOCK_SIZE};
pub use hashstore::{check_source_changes, ChangePolicy, HashStore, HashStoreError};
pub use manifest::{AssetSpec, Manifest};
pub use routines::{
    CopyTree, CreateArgs, CreationRoutine, Download, RoutineError, RoutineKind, RoutineRegistry,
    Unzip,
};

/// A creation routine ran but the destination still does not exist.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{} MISSING after creation", .destination.display())]
pub struct CreationError {
    /// The destination that was expected to exist.
    pub destination: PathBuf,
}

/// Errors raised while materializing assets.
#[derive(thiserror::Error, Debug)]
pub enum MaterializeError {
    /// The destination is still missing after creation.
    #[error(transparent)]
    Creation(#[from] CreationError),

    /// The creation routine itself failed.
    #[error("Creating {} with {routine} failed: {source}", .destination.display())]
    Routine {
        /// Destination being produced
        destination: PathBuf,
        /// Routine name
        routine: String,
        /// The routine error
        #[source]
        source: RoutineError,
    },

    /// Change tracking failed.
    #[error(transparent)]
    HashStore(#[from] HashStoreError),

    /// The working directory could not be prepared.
    #[error(transparent)]
    Files(#[from] FilesError),
}

impl MaterializeError {
    /// Whether this is a [`CreationError`].
    #[must_use]
    pub fn is_creation_error(&self) -> bool {
        matches!(self, Self::Creation(_))
    }
}

/// A derived file plus the means to produce it.
#[derive(Clone)]
pub struct Asset {
    /// Source descriptor (local path or URL), tracked under this exact string.
    pub source: String,
    /// File that must exist after materialization.
    pub destination: PathBuf,
    /// Routine that produces the destination.
    pub routine: Arc<dyn CreationRoutine>,
    /// Keyword arguments for the routine.
    pub args: CreateArgs,
    /// Directory to create before anything else.
    pub directory: Option<PathBuf>,
}

impl std::fmt::Debug for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Asset")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("routine", &self.routine.name())
            .field("args", &self.args)
            .field("directory", &self.directory)
            .finish()
    }
}

impl Asset {
    /// Create an asset without routine arguments.
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<PathBuf>,
        routine: Arc<dyn CreationRoutine>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            routine,
            args: CreateArgs::new(),
            directory: None,
        }
    }

    /// Add a routine argument.
    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Replace all routine arguments.
    #[must_use]
    pub fn with_args(mut self, args: CreateArgs) -> Self {
        self.args = args;
        self
    }

    /// Ensure a working directory exists before checking the asset.
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

/// What [`ensure_asset`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Destination present and source unchanged.
    Fresh,
    /// The routine ran and produced the destination.
    Created,
}

/// Counts from a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Assets that were already fresh.
    pub fresh: usize,
    /// Assets that were (re)created.
    pub created: usize,
}

/// Make sure an asset's destination exists and is current.
///
/// The source is always run through [`check_source_changes`] so its digest
/// is refreshed even when the destination is missing. The routine runs when
/// the destination is not a regular file or the source changed.
///
/// The store is consulted before the destination check rather than only for
/// present destinations. A first creation therefore records the digest, and
/// a second call under `assume_changed_on_missing` finds the asset fresh
/// instead of rebuilding it.
///
/// # Errors
///
/// [`MaterializeError::Creation`] when the routine ran but the destination
/// is still missing; other variants for routine, hash store and directory
/// failures.
pub fn ensure_asset(asset: &Asset, policy: &ChangePolicy) -> Result<Outcome, MaterializeError> {
    if let Some(directory) = &asset.directory {
        ensure_directory(directory, false)?;
    }

    let missing = !asset.destination.is_file();
    let changed = check_source_changes(&[asset.source.as_str()], policy)?;

    if !missing && !changed {
        log::info!("{} AVAILABLE", asset.destination.display());
        return Ok(Outcome::Fresh);
    }

    log::info!(
        "Attempting creation of {} from {} ({})",
        asset.destination.display(),
        asset.source,
        if missing { "missing" } else { "source changed" }
    );
    asset
        .routine
        .create(&asset.source, &asset.destination, &asset.args)
        .map_err(|source| MaterializeError::Routine {
            destination: asset.destination.clone(),
            routine: asset.routine.name().to_string(),
            source,
        })?;

    verify_created(&asset.destination)?;
    log::info!("{} AVAILABLE", asset.destination.display());
    Ok(Outcome::Created)
}

fn verify_created(destination: &Path) -> Result<(), CreationError> {
    if destination.is_file() {
        Ok(())
    } else {
        Err(CreationError {
            destination: destination.to_path_buf(),
        })
    }
}

/// Materialize assets in order, stopping at the first failure.
///
/// The failure is logged once here and returned; assets after it are not
/// attempted and nothing is retried.
pub fn ensure_assets(
    assets: &[Asset],
    policy: &ChangePolicy,
) -> Result<BatchReport, MaterializeError> {
    let mut report = BatchReport::default();
    for (index, asset) in assets.iter().enumerate() {
        match ensure_asset(asset, policy) {
            Ok(Outcome::Fresh) => report.fresh += 1,
            Ok(Outcome::Created) => report.created += 1,
            Err(e) => {
                log::error!(
                    "Batch stopped at asset {} of {}: {}",
                    index + 1,
                    assets.len(),
                    e
                );
                return Err(e);
            }
        }
    }
    log::info!(
        "{} assets available ({} created, {} fresh)",
        assets.len(),
        report.created,
        report.fresh
    );
    Ok(report)
}
