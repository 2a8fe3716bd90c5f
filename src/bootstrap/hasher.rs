//! MD5 content hasher for change tracking.
//!
//! Digests are computed over the whole file in fixed-size blocks and rendered
//! as lowercase hex. Only byte content is hashed: file names and timestamps
//! never influence the result.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

/// Block size used when streaming a file through the hasher (64 KiB).
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Errors that can occur while hashing a source file.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl HashError {
    fn from_io(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// Compute the lowercase hex MD5 digest of a file's content.
///
/// # Errors
///
/// Returns [`HashError`] if the file cannot be opened or read.
///
/// # Examples
///
/// ```no_run
/// use geostage::bootstrap::hash_file;
/// use std::path::Path;
///
/// let digest = hash_file(Path::new("data/rivers.geojson")).unwrap();
/// assert_eq!(digest.len(), 32);
/// ```
pub fn hash_file(path: &Path) -> Result<String, HashError> {
    let mut file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; BLOCK_SIZE];

    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(HashError::from_io(path, e)),
        };
        hasher.update(&buffer[..read]);
    }

    let digest = format!("{:x}", hasher.finalize());
    log::trace!("Hashed {}: {}", path.display(), digest);
    Ok(digest)
}
