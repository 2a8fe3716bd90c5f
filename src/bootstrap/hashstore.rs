//! Persisted source → digest table.
//!
//! The store is a single JSON object mapping source identifiers (paths or
//! URLs exactly as the caller passed them) to lowercase hex MD5 digests.
//! It is read in full for every checked source and rewritten in full right
//! after, so the last writer wins. Concurrent writers against the same file
//! are not supported and must be serialized by the caller.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::hasher::{hash_file, HashError};

/// Errors raised while reading, updating or writing a hash store.
#[derive(thiserror::Error, Debug)]
pub enum HashStoreError {
    /// The store file exists but could not be read.
    #[error("Failed to read hash store {path}: {source}")]
    Read {
        /// Store location
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The store file is not a JSON object of strings.
    #[error("Hash store {path} is corrupted: {source}")]
    Parse {
        /// Store location
        path: PathBuf,
        /// The underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// The store could not be written back.
    #[error("Failed to write hash store {path}: {source}")]
    Write {
        /// Store location
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A tracked source could not be hashed.
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// In-memory view of a hash store file.
#[derive(Debug, Clone)]
pub struct HashStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl HashStore {
    /// Load the store at `path`. A missing or empty file yields an empty store.
    pub fn open(path: &Path) -> Result<Self, HashStoreError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(HashStoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let entries = if content.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&content).map_err(|source| HashStoreError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored digest for a source identifier.
    #[must_use]
    pub fn get(&self, source: &str) -> Option<&str> {
        self.entries.get(source).map(String::as_str)
    }

    /// Record a digest, returning the previous one.
    pub fn insert(&mut self, source: &str, digest: String) -> Option<String> {
        self.entries.insert(source.to_string(), digest)
    }

    /// Number of tracked sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no source is tracked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the whole store, creating parent directories as needed.
    pub fn save(&self) -> Result<(), HashStoreError> {
        let write_err = |source| HashStoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let json = serde_json::to_string_pretty(&self.entries).map_err(|source| {
            HashStoreError::Parse {
                path: self.path.clone(),
                source,
            }
        })?;
        fs::write(&self.path, json).map_err(write_err)
    }
}

/// How change detection treats missing information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePolicy {
    /// Hash store to track sources in. `None` disables tracking.
    pub hash_store: Option<PathBuf>,
    /// Report a change when a tracked source has no stored digest yet.
    pub assume_changed_on_missing: bool,
    /// Result of every check when no hash store is configured.
    pub changed_without_store: bool,
}

impl ChangePolicy {
    /// Track sources in the given hash store.
    #[must_use]
    pub fn with_hash_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.hash_store = Some(path.into());
        self
    }

    /// Treat sources without a stored digest as changed.
    #[must_use]
    pub fn with_assume_changed_on_missing(mut self, value: bool) -> Self {
        self.assume_changed_on_missing = value;
        self
    }

    /// Answer for every check when no hash store is configured.
    #[must_use]
    pub fn with_changed_without_store(mut self, value: bool) -> Self {
        self.changed_without_store = value;
        self
    }
}

/// Check whether any of `sources` changed since it was last observed.
///
/// Only local regular files are tracked; URLs and directories are skipped and
/// never count as changed when a store is configured. Each tracked source's
/// fresh digest is written back to the store immediately, whatever the
/// comparison said, so repeated checks of an unchanged source converge to
/// "no change".
///
/// # Errors
///
/// Returns [`HashStoreError`] when the store cannot be read or written, or a
/// tracked source cannot be hashed.
pub fn check_source_changes<S: AsRef<str>>(
    sources: &[S],
    policy: &ChangePolicy,
) -> Result<bool, HashStoreError> {
    let Some(store_path) = policy.hash_store.as_deref() else {
        return Ok(policy.changed_without_store);
    };

    let mut changed = false;
    for source in sources {
        let source = source.as_ref();
        if !Path::new(source).is_file() {
            log::debug!("{} is not a local file, not tracked", source);
            continue;
        }

        let mut store = HashStore::open(store_path)?;
        let digest = hash_file(Path::new(source))?;
        match store.insert(source, digest.clone()) {
            None => {
                log::debug!("{} not tracked yet in {}", source, store_path.display());
                changed |= policy.assume_changed_on_missing;
            }
            Some(previous) if previous != digest => {
                log::info!("{} changed since last run", source);
                changed = true;
            }
            Some(_) => {}
        }
        store.save()?;
    }

    Ok(changed)
}
