//! Region chunking.
//!
//! Splits the bounding box of a boundary layer into a grid of `step`-sized
//! cells, keeps the cells that intersect the boundary's first feature and
//! names each one after its anchor corner (`EE_<x>_<y>.tif`).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use geostage::chunks::get_chunks;
//!
//! let cells = get_chunks(Path::new("boundary.geojson"), 0.02, None)?;
//! for cell in &cells {
//!     println!("{}", cell.filename());
//! }
//! # Ok::<(), geostage::chunks::ChunkError>(())
//! ```

pub mod pipeline;

use std::path::{Path, PathBuf};

use geo::{Coord, Geometry, Intersects, LineString, Polygon};
use geojson::JsonValue;

use crate::files::{ensure_directory, FilesError};
use crate::spatial::{feature_from_geometry, Crs, LayerError, VectorLayer};

pub use pipeline::{
    download_parts, raster_download, tif_entries, ImageSource, PartsOptions, PipelineError,
    RasterMerger, UrlTemplateSource, DEFAULT_NODATA,
};

/// Default cell size in degrees.
pub const DEFAULT_STEP: f64 = 0.02;

/// Property holding the raster filename in chunk maps.
pub const RASTERFILE_PROPERTY: &str = "rasterfile";

/// Number of characters kept from each rendered coordinate.
const TOKEN_LEN: usize = 8;

/// Errors raised while chunking a region.
#[derive(thiserror::Error, Debug)]
pub enum ChunkError {
    /// The cell size must be a positive finite number.
    #[error("Invalid step {0}: must be a positive number")]
    InvalidStep(f64),

    /// Reading the boundary or writing the chunk map failed.
    #[error(transparent)]
    Layer(#[from] LayerError),

    /// Creating an output directory failed.
    #[error(transparent)]
    Files(#[from] FilesError),
}

/// Half-open range of floats built by repeated addition.
///
/// Values accumulate rounding error the way a running sum does:
/// `FloatRange::new(1.0, 10.0, 0.2)` yields 46 values, the last one just
/// below 10. A non-positive step yields nothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatRange {
    next: f64,
    stop: f64,
    step: f64,
}

impl FloatRange {
    /// Range over `[start, stop)`.
    #[must_use]
    pub fn new(start: f64, stop: f64, step: f64) -> Self {
        Self {
            next: start,
            stop,
            step,
        }
    }
}

impl Iterator for FloatRange {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        let running = self.step > 0.0 && self.next < self.stop;
        if !running {
            return None;
        }
        let value = self.next;
        self.next += self.step;
        Some(value)
    }
}

/// One grid cell: four corners counter-clockwise from the anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionCell {
    /// `(x,y) (x+s,y) (x+s,y+s) (x,y+s)`
    pub coords: [Coord<f64>; 4],
    /// Cell size `s`
    pub step: f64,
}

impl RegionCell {
    /// Cell anchored at `(x, y)`.
    #[must_use]
    pub fn new(x: f64, y: f64, step: f64) -> Self {
        Self {
            coords: [
                Coord { x, y },
                Coord { x: x + step, y },
                Coord {
                    x: x + step,
                    y: y + step,
                },
                Coord { x, y: y + step },
            ],
            step,
        }
    }

    /// First corner.
    #[must_use]
    pub fn anchor(&self) -> Coord<f64> {
        self.coords[0]
    }

    /// Closed polygon for intersection tests.
    #[must_use]
    pub fn polygon(&self) -> Polygon<f64> {
        let mut ring = self.coords.to_vec();
        ring.push(self.coords[0]);
        Polygon::new(LineString::from(ring), vec![])
    }

    /// Raster filename derived from the anchor.
    #[must_use]
    pub fn filename(&self) -> String {
        generate_filename(self)
    }

    /// Corners as a JSON array of `[x, y]` pairs.
    #[must_use]
    pub fn region_json(&self) -> String {
        let pairs: Vec<[f64; 2]> = self.coords.iter().map(|c| [c.x, c.y]).collect();
        serde_json::to_string(&pairs).unwrap_or_default()
    }
}

/// Bounding box of `layer` as the ring `(minx,miny) (minx,maxy) (maxx,maxy)
/// (maxx,miny)`, each corner transformed to WGS84.
pub fn region_from_layer(layer: &VectorLayer) -> Result<Option<[Coord<f64>; 4]>, ChunkError> {
    let Some(bounds) = layer.bounds()? else {
        return Ok(None);
    };
    let (min, max) = (bounds.min(), bounds.max());
    let corners = [
        Coord { x: min.x, y: min.y },
        Coord { x: min.x, y: max.y },
        Coord { x: max.x, y: max.y },
        Coord { x: max.x, y: min.y },
    ];
    Ok(Some(corners.map(|c| layer.crs.to_wgs84(c))))
}

/// Tile the extent of `region` with `step`-sized cells, x-major then y,
/// both ascending.
pub fn chunks_from_region(region: &[Coord<f64>], step: f64) -> Result<Vec<RegionCell>, ChunkError> {
    validate_step(step)?;

    let min_x = region.iter().fold(180.0_f64, |acc, c| if acc < c.x { acc } else { c.x });
    let min_y = region.iter().fold(90.0_f64, |acc, c| if acc < c.y { acc } else { c.y });
    let max_x = region.iter().fold(-180.0_f64, |acc, c| if acc > c.x { acc } else { c.x });
    let max_y = region.iter().fold(-90.0_f64, |acc, c| if acc > c.y { acc } else { c.y });

    let cells = FloatRange::new(min_x, max_x, step)
        .flat_map(|x| FloatRange::new(min_y, max_y, step).map(move |y| RegionCell::new(x, y, step)))
        .collect();
    Ok(cells)
}

/// Keep the cells whose polygon intersects `boundary`. Touching counts.
#[must_use]
pub fn chunk_filter(cells: Vec<RegionCell>, boundary: &Geometry<f64>) -> Vec<RegionCell> {
    cells
        .into_iter()
        .filter(|cell| boundary.intersects(&cell.polygon()))
        .collect()
}

/// Chunk map layer: one polygon per cell carrying its raster filename.
#[must_use]
pub fn chunks_to_layer(cells: &[RegionCell]) -> VectorLayer {
    let mut layer = VectorLayer::new(Crs::Wgs84);
    for cell in cells {
        layer.push(feature_from_geometry(
            &Geometry::Polygon(cell.polygon()),
            [(RASTERFILE_PROPERTY, JsonValue::from(cell.filename()))],
        ));
    }
    layer
}

/// Cells of `boundary`'s extent that intersect its first feature.
///
/// A boundary without geometry yields no cells. When `chunk_map` is given
/// the surviving cells are also written there as a GeoJSON layer.
pub fn get_chunks(
    boundary: &Path,
    step: f64,
    chunk_map: Option<&Path>,
) -> Result<Vec<RegionCell>, ChunkError> {
    validate_step(step)?;
    let layer = VectorLayer::open(boundary)?;

    let cells = match (region_from_layer(&layer)?, layer.first_geometry()?) {
        (Some(region), Some(shape)) => {
            let candidates = chunks_from_region(&region, step)?;
            let total = candidates.len();
            let cells = chunk_filter(candidates, &shape);
            log::info!(
                "{} of {} cells intersect {}",
                cells.len(),
                total,
                boundary.display()
            );
            cells
        }
        _ => {
            log::warn!("Boundary {} has no geometry", boundary.display());
            Vec::new()
        }
    };

    if let Some(path) = chunk_map {
        chunks_to_layer(&cells).write(path)?;
        log::debug!("Chunk map written to {}", path.display());
    }
    Ok(cells)
}

fn validate_step(step: f64) -> Result<(), ChunkError> {
    if step.is_finite() && step > 0.0 {
        Ok(())
    } else {
        Err(ChunkError::InvalidStep(step))
    }
}

/// Shortest round-trip rendering with a signed, two-digit exponent
/// (`1e-05`, `2.5e+16`).
fn render_coordinate(value: f64) -> String {
    let rendered = format!("{value:?}");
    let Some((mantissa, exponent)) = rendered.split_once('e') else {
        return rendered;
    };
    match exponent.parse::<i32>() {
        Ok(exp) => {
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.unsigned_abs())
        }
        Err(_) => rendered,
    }
}

fn coordinate_token(value: f64, sign: &str) -> String {
    render_coordinate(value)
        .replace('-', sign)
        .chars()
        .take(TOKEN_LEN)
        .collect()
}

/// `EE_<x>_<y>.tif` from the anchor corner.
///
/// Each coordinate is rendered in shortest round-trip form, its minus signs
/// replaced by `w` (x) or `s` (y), and cut to eight characters. Values below
/// `1e-4` in magnitude use a two-digit exponent, so `0.00001` becomes `1ew05`.
/// Distinct cells can collide after truncation.
#[must_use]
pub fn generate_filename(cell: &RegionCell) -> String {
    let anchor = cell.anchor();
    format!(
        "EE_{}_{}.tif",
        coordinate_token(anchor.x, "w"),
        coordinate_token(anchor.y, "s")
    )
}

/// `path/<step with '.' replaced by '_'>`, created if missing.
pub fn generate_stitch_directory(path: &Path, step: f64) -> Result<PathBuf, FilesError> {
    let directory = path.join(step.to_string().replace('.', "_"));
    ensure_directory(&directory, false)?;
    Ok(directory)
}

/// Full raster path for `cell` under the stitch directory for `step`.
pub fn generate_path(path: &Path, cell: &RegionCell, step: f64) -> Result<PathBuf, FilesError> {
    Ok(generate_stitch_directory(path, step)?.join(generate_filename(cell)))
}
