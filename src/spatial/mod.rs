//! Coordinate reference systems and GeoJSON vector layers.

pub mod crs;
pub mod layer;

pub use crs::{Crs, CrsError};
pub use layer::{feature_from_geometry, feature_geometry, LayerError, VectorLayer};
