//! GeoJSON vector layers.
//!
//! A layer is an ordered list of features plus the coordinate reference
//! system named by the collection's `crs` member. Collections without one
//! are taken as WGS84.

use std::fs;
use std::path::{Path, PathBuf};

use geo::{BoundingRect, Geometry, Rect};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, JsonValue};

use super::crs::{Crs, CrsError};

/// Errors raised while reading or writing vector layers.
#[derive(thiserror::Error, Debug)]
pub enum LayerError {
    /// Reading or writing the file failed.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Layer path
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid GeoJSON.
    #[error("Failed to parse layer {path}: {source}")]
    Parse {
        /// Layer path
        path: PathBuf,
        /// The underlying parse error
        #[source]
        source: geojson::Error,
    },

    /// The layer's CRS is not supported.
    #[error(transparent)]
    Crs(#[from] CrsError),

    /// A feature geometry could not be converted.
    #[error("Invalid geometry: {0}")]
    Geometry(#[source] geojson::Error),

    /// Appending would mix coordinate systems.
    #[error("{path} is in {expected}, cannot append features in {found}")]
    CrsMismatch {
        /// Existing layer
        path: PathBuf,
        /// CRS of the existing layer
        expected: Crs,
        /// CRS of the new features
        found: Crs,
    },

    /// The layer has no usable geometry.
    #[error("Layer {0} has no geometry")]
    Empty(PathBuf),

    /// Serializing the layer failed.
    #[error("Failed to serialize layer {path}: {source}")]
    Serialize {
        /// Layer path
        path: PathBuf,
        /// The underlying serde error
        #[source]
        source: serde_json::Error,
    },
}

/// An in-memory vector layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorLayer {
    /// Coordinate reference system of all feature geometries.
    pub crs: Crs,
    /// Features in file order.
    pub features: Vec<Feature>,
}

impl VectorLayer {
    /// Create an empty layer in `crs`.
    #[must_use]
    pub fn new(crs: Crs) -> Self {
        Self {
            crs,
            features: Vec::new(),
        }
    }

    /// Read a GeoJSON file. A bare Feature or Geometry becomes a one-feature
    /// layer.
    pub fn open(path: &Path) -> Result<Self, LayerError> {
        let content = fs::read_to_string(path).map_err(|source| LayerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let geojson: GeoJson = content.parse().map_err(|source| LayerError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let layer = match geojson {
            GeoJson::FeatureCollection(collection) => {
                let crs = match collection
                    .foreign_members
                    .as_ref()
                    .and_then(crs_name)
                {
                    Some(name) => name.parse::<Crs>()?,
                    None => Crs::Wgs84,
                };
                Self {
                    crs,
                    features: collection.features,
                }
            }
            GeoJson::Feature(feature) => Self {
                crs: Crs::Wgs84,
                features: vec![feature],
            },
            GeoJson::Geometry(geometry) => Self {
                crs: Crs::Wgs84,
                features: vec![Feature::from(geometry)],
            },
        };

        log::debug!(
            "Opened {} ({} features, {})",
            path.display(),
            layer.features.len(),
            layer.crs
        );
        Ok(layer)
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the layer has no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Append a feature.
    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    /// Overall bounding box in the layer's own CRS.
    pub fn bounds(&self) -> Result<Option<Rect<f64>>, LayerError> {
        let mut bounds: Option<Rect<f64>> = None;
        for feature in &self.features {
            let Some(rect) = feature_geometry(feature)?.and_then(|g| g.bounding_rect()) else {
                continue;
            };
            bounds = Some(match bounds {
                None => rect,
                Some(acc) => Rect::new(
                    (acc.min().x.min(rect.min().x), acc.min().y.min(rect.min().y)),
                    (acc.max().x.max(rect.max().x), acc.max().y.max(rect.max().y)),
                ),
            });
        }
        Ok(bounds)
    }

    /// The first feature's geometry reprojected to WGS84.
    pub fn first_geometry(&self) -> Result<Option<Geometry<f64>>, LayerError> {
        let Some(feature) = self.features.first() else {
            return Ok(None);
        };
        Ok(feature_geometry(feature)?.map(|g| self.crs.geometry_to_wgs84(&g)))
    }

    /// Build the GeoJSON collection, naming the CRS in a `crs` member.
    #[must_use]
    pub fn to_collection(&self) -> FeatureCollection {
        let mut properties = JsonObject::new();
        properties.insert("name".to_string(), JsonValue::from(self.crs.urn()));
        let mut crs = JsonObject::new();
        crs.insert("type".to_string(), JsonValue::from("name"));
        crs.insert("properties".to_string(), JsonValue::Object(properties));

        let mut foreign_members = JsonObject::new();
        foreign_members.insert("crs".to_string(), JsonValue::Object(crs));

        FeatureCollection {
            bbox: None,
            features: self.features.clone(),
            foreign_members: Some(foreign_members),
        }
    }

    /// Write the layer as GeoJSON, replacing any existing file.
    pub fn write(&self, path: &Path) -> Result<(), LayerError> {
        let geojson = GeoJson::FeatureCollection(self.to_collection());
        let content =
            serde_json::to_string_pretty(&geojson).map_err(|source| LayerError::Serialize {
                path: path.to_path_buf(),
                source,
            })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LayerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, content).map_err(|source| LayerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Wrote {} features to {}", self.features.len(), path.display());
        Ok(())
    }
}

fn crs_name(members: &JsonObject) -> Option<&str> {
    members
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()
}

/// Convert a feature's geometry, if any.
pub fn feature_geometry(feature: &Feature) -> Result<Option<Geometry<f64>>, LayerError> {
    feature
        .geometry
        .clone()
        .map(Geometry::<f64>::try_from)
        .transpose()
        .map_err(LayerError::Geometry)
}

/// Build a feature from a geometry and its properties.
#[must_use]
pub fn feature_from_geometry<'a, I>(geometry: &Geometry<f64>, properties: I) -> Feature
where
    I: IntoIterator<Item = (&'a str, JsonValue)>,
{
    let properties: JsonObject = properties
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::from(geometry))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}
