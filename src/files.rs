//! File and directory bookkeeping.
//!
//! Helpers for preparing working directories, checking that required inputs
//! are present and bundling shapefiles for upload.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;

/// Errors raised by file helpers. All of them indicate malformed input.
#[derive(thiserror::Error, Debug)]
pub enum FilesError {
    /// The path exists but is not a directory.
    #[error("File exists but is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The file does not carry the expected extension.
    #[error("{path}: Incorrect file extension, expected .{expected}")]
    IncorrectExtension {
        /// Offending path
        path: PathBuf,
        /// Extension that was expected
        expected: &'static str,
    },

    /// A required source file is missing.
    #[error("{0} is missing")]
    MissingSource(PathBuf),

    /// An I/O error occurred.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Writing the zip archive failed.
    #[error("Failed to write archive {path}: {source}")]
    Zip {
        /// Archive location
        path: PathBuf,
        /// The underlying zip error
        #[source]
        source: zip::result::ZipError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> FilesError + '_ {
    move |source| FilesError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Make sure `directory` exists, optionally wiping it first.
///
/// # Errors
///
/// [`FilesError::NotADirectory`] when a regular file sits at that path.
pub fn ensure_directory(directory: &Path, empty: bool) -> Result<(), FilesError> {
    log::debug!("Ensuring directory {}", directory.display());
    if empty && directory.is_dir() {
        fs::remove_dir_all(directory).map_err(io_err(directory))?;
    }
    if directory.exists() && !directory.is_dir() {
        return Err(FilesError::NotADirectory(directory.to_path_buf()));
    }
    fs::create_dir_all(directory).map_err(io_err(directory))
}

/// Verify that every source is a regular file.
pub fn check_sources<P: AsRef<Path>>(sources: &[P]) -> Result<(), FilesError> {
    for source in sources {
        let source = source.as_ref();
        if !source.is_file() {
            log::error!("{} is missing", source.display());
            return Err(FilesError::MissingSource(source.to_path_buf()));
        }
        log::debug!("{} present", source.display());
    }
    Ok(())
}

/// Bundle all parts of a shapefile into `<stem>.zip` beside it.
///
/// Every sibling named `<stem>.*` is added except existing zip archives,
/// including multi-part sidecars such as `<stem>.shp.xml`.
/// Returns the archive path.
pub fn zip_shp(shp: &Path) -> Result<PathBuf, FilesError> {
    let is_shp = shp
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("shp"));
    if !is_shp {
        return Err(FilesError::IncorrectExtension {
            path: shp.to_path_buf(),
            expected: "shp",
        });
    }

    let prefix = shp
        .file_stem()
        .map(|s| format!("{}.", s.to_string_lossy()))
        .unwrap_or_default();
    let parent = shp
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let archive = shp.with_extension("zip");

    let mut parts: Vec<PathBuf> = fs::read_dir(parent)
        .map_err(io_err(parent))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with(prefix.as_str()))
        })
        .filter(|path| {
            !path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
        })
        .collect();
    parts.sort();

    let zip_err = |source| FilesError::Zip {
        path: archive.clone(),
        source,
    };
    let file = File::create(&archive).map_err(io_err(&archive))?;
    let mut writer = zip::ZipWriter::new(file);
    for part in &parts {
        let name = part
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        log::debug!("Adding {} to {}", name, archive.display());
        writer
            .start_file(name, SimpleFileOptions::default())
            .map_err(zip_err)?;
        let content = fs::read(part).map_err(io_err(part))?;
        writer.write_all(&content).map_err(io_err(&archive))?;
    }
    writer.finish().map_err(zip_err)?;

    log::info!("{} created ({} parts)", archive.display(), parts.len());
    Ok(archive)
}

/// Sorted stems of all `.shp` files in a directory.
pub fn publish_snippets(directory: &Path) -> Result<Vec<String>, FilesError> {
    let mut snippets: Vec<String> = fs::read_dir(directory)
        .map_err(io_err(directory))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "shp"))
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
        .collect();
    snippets.sort();
    Ok(snippets)
}

/// `directory/<snippet><extension>` for every snippet.
pub fn extend_from_snippets<S: AsRef<str>>(
    snippets: &[S],
    directory: &Path,
    extension: &str,
) -> Vec<PathBuf> {
    snippets
        .iter()
        .map(|s| directory.join(format!("{}{}", s.as_ref(), extension)))
        .collect()
}

/// `root/<source>/<file_name>` for every source.
pub fn file_list<S: AsRef<Path>>(root: &Path, sources: &[S], file_name: &str) -> Vec<PathBuf> {
    sources
        .iter()
        .map(|s| root.join(s.as_ref()).join(file_name))
        .collect()
}
