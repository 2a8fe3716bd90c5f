//! Feature predicates for [`copy_layer`](super::copy_layer).

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use geo::{Geometry, Intersects};
use geojson::{Feature, JsonValue};

use crate::spatial::{feature_geometry, Crs, LayerError, VectorLayer};

/// Decides whether a feature is copied.
///
/// `crs` is the coordinate system of the feature's geometry. Any
/// `Fn(&Feature) -> bool` is a filter that ignores it.
pub trait FeatureFilter {
    /// Whether `feature` passes.
    fn keep(&self, feature: &Feature, crs: Crs) -> bool;
}

impl<F> FeatureFilter for F
where
    F: Fn(&Feature) -> bool,
{
    fn keep(&self, feature: &Feature, _crs: Crs) -> bool {
        self(feature)
    }
}

/// Filter that keeps everything.
#[must_use]
pub fn empty_filter(_feature: &Feature) -> bool {
    true
}

/// Comparison applied by [`record_filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CompareOp {
    /// Equal
    #[default]
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Less or equal
    Le,
    /// Greater than
    Gt,
    /// Greater or equal
    Ge,
}

impl CompareOp {
    fn accepts(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Self::Eq, Some(o)) => o == Ordering::Equal,
            (Self::Ne, Some(o)) => o != Ordering::Equal,
            (Self::Ne, None) => true,
            (Self::Lt, Some(o)) => o == Ordering::Less,
            (Self::Le, Some(o)) => o != Ordering::Greater,
            (Self::Gt, Some(o)) => o == Ordering::Greater,
            (Self::Ge, Some(o)) => o != Ordering::Less,
            (_, None) => false,
        }
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" | "=" | "==" => Ok(Self::Eq),
            "ne" | "!=" => Ok(Self::Ne),
            "lt" | "<" => Ok(Self::Lt),
            "le" | "<=" => Ok(Self::Le),
            "gt" | ">" => Ok(Self::Gt),
            "ge" | ">=" => Ok(Self::Ge),
            other => Err(format!("Unknown comparison: {other}")),
        }
    }
}

/// Order two property values: numbers numerically, strings lexically,
/// anything else only by equality.
fn compare_values(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

/// Keep features whose `attribute` compares to `value` under `op`.
///
/// A missing attribute only passes [`CompareOp::Ne`].
pub fn record_filter(
    attribute: impl Into<String>,
    value: JsonValue,
    op: CompareOp,
) -> impl Fn(&Feature) -> bool {
    let attribute = attribute.into();
    move |feature| {
        let ordering = feature
            .property(&attribute)
            .and_then(|actual| compare_values(actual, &value));
        op.accepts(ordering)
    }
}

/// Keep features whose integer `attribute` is in `ids`.
pub fn id_filter(attribute: impl Into<String>, ids: HashSet<i64>) -> impl Fn(&Feature) -> bool {
    let attribute = attribute.into();
    move |feature| {
        feature
            .property(&attribute)
            .and_then(JsonValue::as_i64)
            .is_some_and(|id| ids.contains(&id))
    }
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
        JsonValue::Null => false,
    }
}

/// Keep features that intersect a boundary shape.
///
/// Features flagged with a truthy `available` property pass without a
/// geometry test.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeFilter {
    shape: Geometry<f64>,
}

impl ShapeFilter {
    /// Filter against a WGS84 geometry.
    #[must_use]
    pub fn new(shape: Geometry<f64>) -> Self {
        Self { shape }
    }

    /// Filter against the first feature of the layer at `path`.
    pub fn from_layer(path: &Path) -> Result<Self, LayerError> {
        let layer = VectorLayer::open(path)?;
        let shape = layer
            .first_geometry()?
            .ok_or_else(|| LayerError::Empty(path.to_path_buf()))?;
        Ok(Self::new(shape))
    }
}

impl FeatureFilter for ShapeFilter {
    fn keep(&self, feature: &Feature, crs: Crs) -> bool {
        if feature.property("available").is_some_and(is_truthy) {
            return true;
        }
        match feature_geometry(feature) {
            Ok(Some(geometry)) => self.shape.intersects(&crs.geometry_to_wgs84(&geometry)),
            Ok(None) => false,
            Err(e) => {
                log::debug!("Skipping feature with invalid geometry: {e}");
                false
            }
        }
    }
}
