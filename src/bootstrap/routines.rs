//! Creation routines and their registry.
//!
//! A creation routine produces a destination from a source descriptor. The
//! materializer never trusts a routine's return value alone: success means
//! the destination exists afterwards.
//!
//! Built-in routines form a closed set ([`RoutineKind`]) resolved through an
//! explicit [`RoutineRegistry`]. Any closure with the routine signature is a
//! routine as well.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytesize::ByteSize;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::progress::ProgressCallback;

/// Keyword arguments handed to a creation routine.
pub type CreateArgs = BTreeMap<String, String>;

/// Default chunk size for streamed downloads, in bytes.
pub const DEFAULT_DOWNLOAD_CHUNK_SIZE: usize = 32_000;

/// Errors a creation routine can raise.
#[derive(thiserror::Error, Debug)]
pub enum RoutineError {
    /// The copy-tree source is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The copy-tree target already exists.
    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    /// An I/O error occurred while producing the destination.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Directory traversal failed.
    #[error("Failed to walk {path}: {source}")]
    Walk {
        /// Root of the traversal
        path: PathBuf,
        /// The underlying walkdir error
        #[source]
        source: walkdir::Error,
    },

    /// The source is not a readable zip archive.
    #[error("Invalid zip archive {path}: {source}")]
    Zip {
        /// Archive location
        path: PathBuf,
        /// The underlying zip error
        #[source]
        source: zip::result::ZipError,
    },

    /// A download was stopped by a shutdown request.
    #[error("Download interrupted: {0}")]
    Interrupted(String),

    /// Failure reported by a caller-supplied routine.
    #[error("{0}")]
    Custom(String),
}

impl RoutineError {
    /// I/O failure at `path`, for custom routines.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Something that can produce `destination` from `source`.
pub trait CreationRoutine: Send + Sync {
    /// Produce the destination. Returning `Ok` does not imply success; the
    /// caller verifies that the destination exists.
    fn create(&self, source: &str, destination: &Path, args: &CreateArgs)
        -> Result<(), RoutineError>;

    /// Name used in log messages.
    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> CreationRoutine for F
where
    F: Fn(&str, &Path, &CreateArgs) -> Result<(), RoutineError> + Send + Sync,
{
    fn create(
        &self,
        source: &str,
        destination: &Path,
        args: &CreateArgs,
    ) -> Result<(), RoutineError> {
        self(source, destination, args)
    }
}

/// The closed set of built-in routines.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, ValueEnum, Serialize,
    Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum RoutineKind {
    /// Recursive directory copy
    #[default]
    CopyTree,
    /// Streamed HTTP download
    Download,
    /// Zip extraction beside the archive
    Unzip,
}

impl RoutineKind {
    /// Stable name of the routine.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CopyTree => "copy-tree",
            Self::Download => "download",
            Self::Unzip => "unzip",
        }
    }
}

impl std::fmt::Display for RoutineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit mapping from [`RoutineKind`] to routine implementations.
#[derive(Clone)]
pub struct RoutineRegistry {
    copy_tree: Arc<dyn CreationRoutine>,
    download: Arc<dyn CreationRoutine>,
    unzip: Arc<dyn CreationRoutine>,
}

impl std::fmt::Debug for RoutineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutineRegistry")
            .field("copy_tree", &self.copy_tree.name())
            .field("download", &self.download.name())
            .field("unzip", &self.unzip.name())
            .finish()
    }
}

impl Default for RoutineRegistry {
    fn default() -> Self {
        Self::builtin(Download::default())
    }
}

impl RoutineRegistry {
    /// Registry of the built-in routines using the given download settings.
    #[must_use]
    pub fn builtin(download: Download) -> Self {
        Self {
            copy_tree: Arc::new(CopyTree),
            download: Arc::new(download),
            unzip: Arc::new(Unzip),
        }
    }

    /// Replace the implementation behind a routine kind.
    #[must_use]
    pub fn with_routine(mut self, kind: RoutineKind, routine: Arc<dyn CreationRoutine>) -> Self {
        match kind {
            RoutineKind::CopyTree => self.copy_tree = routine,
            RoutineKind::Download => self.download = routine,
            RoutineKind::Unzip => self.unzip = routine,
        }
        self
    }

    /// Look up the routine for a kind.
    #[must_use]
    pub fn resolve(&self, kind: RoutineKind) -> Arc<dyn CreationRoutine> {
        match kind {
            RoutineKind::CopyTree => Arc::clone(&self.copy_tree),
            RoutineKind::Download => Arc::clone(&self.download),
            RoutineKind::Unzip => Arc::clone(&self.unzip),
        }
    }
}

/// Copy a directory tree.
///
/// The tree lands in the `directory` argument when given, otherwise at the
/// destination path itself. The target must not exist yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyTree;

impl CreationRoutine for CopyTree {
    fn create(
        &self,
        source: &str,
        destination: &Path,
        args: &CreateArgs,
    ) -> Result<(), RoutineError> {
        let source = Path::new(source);
        let target = args
            .get("directory")
            .map(PathBuf::from)
            .unwrap_or_else(|| destination.to_path_buf());

        if !source.is_dir() {
            return Err(RoutineError::NotADirectory(source.to_path_buf()));
        }
        if target.exists() {
            return Err(RoutineError::DestinationExists(target));
        }

        log::info!("Copying {} to {}", source.display(), target.display());
        for entry in WalkDir::new(source).follow_links(true) {
            let entry = entry.map_err(|e| RoutineError::Walk {
                path: source.to_path_buf(),
                source: e,
            })?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .unwrap_or_else(|_| entry.path());
            let out = target.join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&out).map_err(|e| RoutineError::io(&out, e))?;
            } else {
                fs::copy(entry.path(), &out).map_err(|e| RoutineError::io(&out, e))?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        RoutineKind::CopyTree.as_str()
    }
}

/// Streamed HTTP download.
///
/// Remote failures (connection errors, non-success status) are logged and
/// leave the destination absent, so a later run retries. Data is written to
/// a `.part` sibling first and renamed on completion.
#[derive(Clone)]
pub struct Download {
    chunk_size: usize,
    progress: Option<Arc<dyn ProgressCallback>>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("chunk_size", &self.chunk_size)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .field("shutdown_flag", &self.shutdown_flag)
            .finish()
    }
}

impl Default for Download {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_DOWNLOAD_CHUNK_SIZE,
            progress: None,
            shutdown_flag: None,
        }
    }
}

impl Download {
    /// Set the read chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Report byte progress to a callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Abort between chunks once the flag is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Fetch `url` into `destination`.
    ///
    /// Returns `Ok(false)` when the remote side failed; the failure is logged
    /// and nothing is written.
    pub fn fetch(&self, url: &str, destination: &Path) -> Result<bool, RoutineError> {
        let mut response = match reqwest::blocking::get(url) {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Download of {} failed: {}", url, e);
                return Ok(false);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            log::warn!("Download of {} returned {}: {}", url, status, body.trim());
            return Ok(false);
        }

        let partial = partial_path(destination);
        let total = response.content_length();
        match self.stream_to(&mut response, &partial, total) {
            Ok(written) => {
                fs::rename(&partial, destination).map_err(|e| RoutineError::io(destination, e))?;
                log::info!(
                    "Downloaded {} ({})",
                    destination.display(),
                    ByteSize::b(written)
                );
                Ok(true)
            }
            Err(e) => {
                let _ = fs::remove_file(&partial);
                Err(e)
            }
        }
    }

    fn stream_to(
        &self,
        reader: &mut impl Read,
        partial: &Path,
        total: Option<u64>,
    ) -> Result<u64, RoutineError> {
        let mut handle = File::create(partial).map_err(|e| RoutineError::io(partial, e))?;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut written = 0u64;
        let label = partial
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if let Some(progress) = &self.progress {
            progress.on_phase_start("download", total.unwrap_or(0) as usize);
        }

        loop {
            if self.is_shutdown_requested() {
                return Err(RoutineError::Interrupted(label));
            }
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(RoutineError::io(partial, e)),
            };
            handle
                .write_all(&buffer[..read])
                .map_err(|e| RoutineError::io(partial, e))?;
            written += read as u64;

            if let Some(progress) = &self.progress {
                progress.on_item_completed(read as u64);
                progress.on_progress(written as usize, &label);
            }
        }

        handle.flush().map_err(|e| RoutineError::io(partial, e))?;
        if let Some(progress) = &self.progress {
            progress.on_phase_end("download");
        }
        Ok(written)
    }
}

impl CreationRoutine for Download {
    fn create(
        &self,
        source: &str,
        destination: &Path,
        _args: &CreateArgs,
    ) -> Result<(), RoutineError> {
        self.fetch(source, destination).map(|_| ())
    }

    fn name(&self) -> &str {
        RoutineKind::Download.as_str()
    }
}

/// `<destination>.part`, where in-flight writes land before the rename.
pub(crate) fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Extract a zip archive into the directory that holds it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unzip;

impl CreationRoutine for Unzip {
    fn create(
        &self,
        source: &str,
        _destination: &Path,
        _args: &CreateArgs,
    ) -> Result<(), RoutineError> {
        let archive_path = Path::new(source);
        let target = archive_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let file = File::open(archive_path).map_err(|e| RoutineError::io(archive_path, e))?;
        let zip_err = |e| RoutineError::Zip {
            path: archive_path.to_path_buf(),
            source: e,
        };
        let mut archive = zip::ZipArchive::new(file).map_err(zip_err)?;
        log::info!(
            "Extracting {} entries from {} into {}",
            archive.len(),
            archive_path.display(),
            target.display()
        );
        archive.extract(target).map_err(zip_err)
    }

    fn name(&self) -> &str {
        RoutineKind::Unzip.as_str()
    }
}
