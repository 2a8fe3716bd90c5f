//! Per-cell raster download and merge.
//!
//! [`download_parts`] walks the cells of a boundary, asks an
//! [`ImageSource`] for a zip archive per missing cell and moves the GeoTIFF
//! inside it to the cell's stitch path. [`raster_download`] hands the
//! collected tiles to a [`RasterMerger`].

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use regex::Regex;

use super::{generate_path, get_chunks, ChunkError, RegionCell, DEFAULT_STEP};
use crate::bootstrap::routines::partial_path;
use crate::bootstrap::{Download, RoutineError};
use crate::files::{ensure_directory, FilesError};
use crate::progress::ProgressCallback;

/// Nodata value written by merges unless configured otherwise.
pub const DEFAULT_NODATA: f64 = -32768.0;

/// Errors raised by the download pipeline.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Chunking the boundary failed.
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// Preparing an output directory failed.
    #[error(transparent)]
    Files(#[from] FilesError),

    /// Fetching a cell failed.
    #[error(transparent)]
    Download(#[from] RoutineError),

    /// A downloaded archive could not be read.
    #[error("Failed to read archive {path}: {source}")]
    Archive {
        /// Archive path
        path: PathBuf,
        /// The underlying zip error
        #[source]
        source: zip::result::ZipError,
    },

    /// An I/O error occurred.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The run was stopped by a shutdown request.
    #[error("Interrupted after {completed} of {total} cells")]
    Interrupted {
        /// Cells processed before the interrupt
        completed: usize,
        /// Cells in the run
        total: usize,
    },

    /// The raster merger reported a failure.
    #[error("Merge failed: {0}")]
    Merge(String),
}

/// Something that can produce a zipped GeoTIFF for one cell.
pub trait ImageSource {
    /// Write an archive for `cell` to `archive`.
    ///
    /// Returns `Ok(false)` when the remote side had nothing to deliver.
    fn fetch_region(&self, cell: &RegionCell, archive: &Path) -> Result<bool, PipelineError>;
}

/// Mosaics per-cell rasters into one file.
pub trait RasterMerger {
    /// Merge `files` into `destination`, filling gaps with `nodata`.
    fn merge(&self, files: &[PathBuf], destination: &Path, nodata: f64)
        -> Result<(), PipelineError>;
}

/// HTTP image source built from a URL template.
///
/// Placeholders: `{region}` (JSON corner list), `{west}`, `{south}`,
/// `{east}`, `{north}` and `{name}` (the cell's raster filename).
#[derive(Debug, Clone, Default)]
pub struct UrlTemplateSource {
    template: String,
    download: Download,
}

impl UrlTemplateSource {
    /// Source expanding `template` per cell.
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            download: Download::default(),
        }
    }

    /// Use a configured downloader (chunk size, progress, shutdown flag).
    #[must_use]
    pub fn with_download(mut self, download: Download) -> Self {
        self.download = download;
        self
    }

    /// Expanded URL for `cell`.
    #[must_use]
    pub fn url_for(&self, cell: &RegionCell) -> String {
        let [sw, _, ne, _] = cell.coords;
        self.template
            .replace("{region}", &cell.region_json())
            .replace("{west}", &sw.x.to_string())
            .replace("{south}", &sw.y.to_string())
            .replace("{east}", &ne.x.to_string())
            .replace("{north}", &ne.y.to_string())
            .replace("{name}", &cell.filename())
    }
}

impl ImageSource for UrlTemplateSource {
    fn fetch_region(&self, cell: &RegionCell, archive: &Path) -> Result<bool, PipelineError> {
        let url = self.url_for(cell);
        log::debug!("Requesting {url}");
        Ok(self.download.fetch(&url, archive)?)
    }
}

/// Names of the `.tif` entries in a zip archive.
pub fn tif_entries(archive: &Path) -> Result<Vec<String>, PipelineError> {
    static TIF: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = TIF.get_or_init(|| Regex::new(r"^.*\.tif$").ok());

    let zip = open_archive(archive)?;
    Ok(zip
        .file_names()
        .filter(|name| pattern.as_ref().is_some_and(|re| re.is_match(name)))
        .map(str::to_string)
        .collect())
}

fn open_archive(archive: &Path) -> Result<zip::ZipArchive<File>, PipelineError> {
    let file = File::open(archive).map_err(|source| PipelineError::Io {
        path: archive.to_path_buf(),
        source,
    })?;
    zip::ZipArchive::new(file).map_err(|source| PipelineError::Archive {
        path: archive.to_path_buf(),
        source,
    })
}

/// Copy every `.tif` entry of `archive` to `target`; the last one wins.
///
/// Entries are written to a `.part` sibling and renamed once complete, so a
/// failed extraction never leaves a tile at `target`.
fn extract_tifs(archive: &Path, target: &Path) -> Result<usize, PipelineError> {
    let entries = tif_entries(archive)?;
    if entries.is_empty() {
        return Ok(0);
    }
    let partial = partial_path(target);
    match copy_entries(archive, &entries, &partial) {
        Ok(()) => {
            fs::rename(&partial, target).map_err(|source| PipelineError::Io {
                path: target.to_path_buf(),
                source,
            })?;
            Ok(entries.len())
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn copy_entries(archive: &Path, entries: &[String], partial: &Path) -> Result<(), PipelineError> {
    let mut zip = open_archive(archive)?;
    for name in entries {
        let mut entry = zip.by_name(name).map_err(|source| PipelineError::Archive {
            path: archive.to_path_buf(),
            source,
        })?;
        let io_err = |source| PipelineError::Io {
            path: partial.to_path_buf(),
            source,
        };
        let mut out = File::create(partial).map_err(io_err)?;
        io::copy(&mut entry, &mut out).map_err(io_err)?;
    }
    Ok(())
}

/// Settings for [`download_parts`] and [`raster_download`].
#[derive(Clone)]
pub struct PartsOptions {
    /// Working directory for tiles, the chunk map and the temporary archive.
    pub dest: PathBuf,
    /// Cell size in degrees.
    pub step: f64,
    /// Refetch cells whose tile already exists.
    pub clean: bool,
    /// Nodata value passed to the merger.
    pub nodata: f64,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for PartsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartsOptions")
            .field("dest", &self.dest)
            .field("step", &self.step)
            .field("clean", &self.clean)
            .field("nodata", &self.nodata)
            .field("shutdown_flag", &self.shutdown_flag)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl PartsOptions {
    /// Options writing into `dest` with the default step.
    #[must_use]
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self {
            dest: dest.into(),
            step: DEFAULT_STEP,
            clean: false,
            nodata: DEFAULT_NODATA,
            shutdown_flag: None,
            progress: None,
        }
    }

    /// Set the cell size.
    #[must_use]
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    /// Refetch existing tiles.
    #[must_use]
    pub fn with_clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    /// Set the merge nodata value.
    #[must_use]
    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = nodata;
        self
    }

    /// Stop between cells once the flag is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Report per-cell progress.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Chunk map written next to the tiles.
    #[must_use]
    pub fn tile_map(&self) -> PathBuf {
        self.dest.join(format!("downloaded_tiles_{}.geojson", self.step))
    }

    fn archive(&self) -> PathBuf {
        self.dest.join("tmp.zip")
    }
}

/// Download one tile per intersecting cell of `boundary`.
///
/// Existing tiles are kept unless `options.clean` is set. Cells the source
/// could not deliver are logged and left out of the result.
pub fn download_parts(
    boundary: &Path,
    source: &dyn ImageSource,
    options: &PartsOptions,
) -> Result<Vec<PathBuf>, PipelineError> {
    ensure_directory(&options.dest, false)?;
    let archive = options.archive();
    let cells = get_chunks(boundary, options.step, Some(&options.tile_map()))?;
    let total = cells.len();
    log::info!("{total} chunks to process");

    if let Some(progress) = &options.progress {
        progress.on_phase_start("chunks", total);
    }

    let mut tiles = Vec::with_capacity(total);
    for (index, cell) in cells.iter().enumerate() {
        if options.is_shutdown_requested() {
            return Err(PipelineError::Interrupted {
                completed: index,
                total,
            });
        }

        let tile = generate_path(&options.dest, cell, options.step)?;
        if tile.is_file() && !options.clean {
            log::info!("{} ok", tile.display());
        } else {
            let fetched = source.fetch_region(cell, &archive)?;
            if fetched {
                let extracted = extract_tifs(&archive, &tile);
                remove_archive(&archive);
                if extracted? == 0 {
                    log::warn!("No GeoTIFF in archive for {}", cell.filename());
                }
            } else {
                log::warn!("No image delivered for {}", cell.filename());
            }
        }

        if tile.is_file() {
            tiles.push(tile);
        }
        if let Some(progress) = &options.progress {
            progress.on_progress(index + 1, &cell.filename());
        }
    }

    if let Some(progress) = &options.progress {
        progress.on_phase_end("chunks");
    }
    Ok(tiles)
}

fn remove_archive(archive: &Path) {
    if let Err(e) = fs::remove_file(archive) {
        log::debug!("Could not remove {}: {}", archive.display(), e);
    }
}

/// Download all tiles of `boundary` and merge them into `destination`.
pub fn raster_download(
    boundary: &Path,
    destination: &Path,
    source: &dyn ImageSource,
    merger: &dyn RasterMerger,
    options: &PartsOptions,
) -> Result<(), PipelineError> {
    let files = download_parts(boundary, source, options)?;
    if files.is_empty() {
        log::warn!("No images to process");
        return Ok(());
    }
    merger.merge(&files, destination, options.nodata)?;
    log::info!("{} merged from {} tiles", destination.display(), files.len());
    Ok(())
}
