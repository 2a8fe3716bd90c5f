//! Copying, remapping, filtering and merging vector layers.

pub mod filters;

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use geojson::{Feature, JsonObject, JsonValue};
use regex::Regex;

use crate::progress::PercentDisplay;
use crate::spatial::{LayerError, VectorLayer};

pub use filters::{
    empty_filter, id_filter, record_filter, CompareOp, FeatureFilter, ShapeFilter,
};

/// Rewrites a feature before it is filtered and written.
pub type Remap = Box<dyn Fn(Feature) -> Feature>;

/// How [`copy_layer`] transforms the input.
#[derive(Default)]
pub struct CopyOptions {
    /// Append to an existing output instead of replacing it.
    pub append: bool,
    /// Keep only these properties; empty keeps all.
    pub fields: Vec<String>,
    /// Stop after this many input features.
    pub limit: Option<usize>,
    remap: Option<Remap>,
    filter: Option<Box<dyn FeatureFilter>>,
    progress: bool,
}

impl std::fmt::Debug for CopyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyOptions")
            .field("append", &self.append)
            .field("fields", &self.fields)
            .field("limit", &self.limit)
            .field("remap", &self.remap.as_ref().map(|_| "<remap>"))
            .field("filter", &self.filter.as_ref().map(|_| "<filter>"))
            .field("progress", &self.progress)
            .finish()
    }
}

impl CopyOptions {
    /// Append to the output.
    #[must_use]
    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Restrict the copied properties.
    #[must_use]
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Stop early.
    #[must_use]
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Rewrite features before filtering.
    #[must_use]
    pub fn with_remap(mut self, remap: impl Fn(Feature) -> Feature + 'static) -> Self {
        self.remap = Some(Box::new(remap));
        self
    }

    /// Only copy features the filter keeps.
    #[must_use]
    pub fn with_filter(mut self, filter: impl FeatureFilter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Draw a percentage counter while copying.
    #[must_use]
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

/// Feature counts of one copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Input features visited
    pub read: usize,
    /// Features written
    pub written: usize,
}

/// Copy `input` to `output`, remapping, selecting fields and filtering on
/// the way.
///
/// When appending to an existing output, both layers must share a CRS.
pub fn copy_layer(
    input: &Path,
    output: &Path,
    options: &CopyOptions,
) -> Result<CopyReport, LayerError> {
    log::info!("{} => {}", input.display(), output.display());
    let source = VectorLayer::open(input)?;

    let mut target = if options.append && output.is_file() {
        let existing = VectorLayer::open(output)?;
        if existing.crs != source.crs {
            return Err(LayerError::CrsMismatch {
                path: output.to_path_buf(),
                expected: existing.crs,
                found: source.crs,
            });
        }
        existing
    } else {
        VectorLayer::new(source.crs)
    };

    let mut display = if options.progress {
        PercentDisplay::new(source.len())
    } else {
        PercentDisplay::hidden(source.len())
    }
    .with_limit(options.limit);

    let mut report = CopyReport::default();
    for feature in &source.features {
        if display.inc().is_break() {
            log::debug!("Limit of {:?} features reached", options.limit);
            break;
        }
        report.read += 1;

        let feature = match &options.remap {
            Some(remap) => remap(feature.clone()),
            None => feature.clone(),
        };
        let feature = select_fields(feature, &options.fields);
        let keep = options
            .filter
            .as_ref()
            .map_or(true, |filter| filter.keep(&feature, source.crs));
        if keep {
            target.push(feature);
            report.written += 1;
        }
    }
    display.finish();

    target.write(output)?;
    log::info!(
        "{} generated ({} of {} features)",
        output.display(),
        report.written,
        report.read
    );
    Ok(report)
}

/// Copy every input into one output; the first replaces it, the rest append.
pub fn merge_layers<P: AsRef<Path>>(
    inputs: &[P],
    output: &Path,
    mut options: CopyOptions,
) -> Result<CopyReport, LayerError> {
    let mut total = CopyReport::default();
    for (index, input) in inputs.iter().enumerate() {
        options.append = index > 0;
        let report = copy_layer(input.as_ref(), output, &options)?;
        total.read += report.read;
        total.written += report.written;
    }
    Ok(total)
}

/// Property name [`create_variable`] writes unless told otherwise.
pub const DEFAULT_VARIABLE: &str = "available";

/// What [`create_variable`] writes and where it looks up ids.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableOptions {
    /// Property to set.
    pub variable: String,
    /// Value for features whose id is in the lookup.
    pub value: JsonValue,
    /// Value for every other feature; `None` leaves them untouched.
    pub default: Option<JsonValue>,
    /// Integer property holding the feature id.
    pub index: String,
    progress: bool,
}

impl Default for VariableOptions {
    fn default() -> Self {
        Self {
            variable: DEFAULT_VARIABLE.to_string(),
            value: JsonValue::from(1),
            default: None,
            index: "comid".to_string(),
            progress: false,
        }
    }
}

impl VariableOptions {
    /// Write `variable` instead of `available`.
    #[must_use]
    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = variable.into();
        self
    }

    /// Value written on matches.
    #[must_use]
    pub fn with_value(mut self, value: JsonValue) -> Self {
        self.value = value;
        self
    }

    /// Value written on misses.
    #[must_use]
    pub fn with_default(mut self, default: Option<JsonValue>) -> Self {
        self.default = default;
        self
    }

    /// Read ids from `index`.
    #[must_use]
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    /// Draw a percentage counter while writing.
    #[must_use]
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

/// Copy `input` to `output`, setting `options.variable` on every feature
/// whose `options.index` is one of `ids`.
///
/// Each listed id flags at most one feature; list an id twice to flag two
/// features sharing it. Features without an integer index count as misses.
/// Returns the number of flagged features.
pub fn create_variable<I>(
    input: &Path,
    output: &Path,
    ids: I,
    options: &VariableOptions,
) -> Result<usize, LayerError>
where
    I: IntoIterator<Item = i64>,
{
    let mut lookup: HashMap<i64, usize> = HashMap::new();
    for id in ids {
        *lookup.entry(id).or_default() += 1;
    }

    let source = VectorLayer::open(input)?;
    let mut target = VectorLayer::new(source.crs);
    let mut display = if options.progress {
        PercentDisplay::new(source.len())
    } else {
        PercentDisplay::hidden(source.len())
    };

    let mut flagged = 0;
    for mut feature in source.features {
        let _ = display.inc();
        let hit = feature
            .property(&options.index)
            .and_then(JsonValue::as_i64)
            .and_then(|id| lookup.get_mut(&id))
            .is_some_and(|remaining| {
                if *remaining == 0 {
                    return false;
                }
                *remaining -= 1;
                true
            });

        let value = if hit {
            flagged += 1;
            Some(options.value.clone())
        } else {
            options.default.clone()
        };
        if let Some(value) = value {
            feature.set_property(options.variable.clone(), value);
        }
        target.push(feature);
    }
    display.finish();

    target.write(output)?;
    log::info!(
        "{} generated ({} of {} features flagged {})",
        output.display(),
        flagged,
        target.len(),
        options.variable
    );
    Ok(flagged)
}

/// Drop every property not named in `fields`. Empty `fields` keeps all.
#[must_use]
pub fn select_fields(mut feature: Feature, fields: &[String]) -> Feature {
    if fields.is_empty() {
        return feature;
    }
    if let Some(properties) = feature.properties.as_mut() {
        properties.retain(|key, _| fields.iter().any(|f| f == key));
    }
    feature
}

/// Remap that lowercases property names and keeps those in `attributes`.
///
/// Gives layers with differently cased schemas a common one before
/// merging.
pub fn create_remap<I, S>(attributes: I) -> impl Fn(Feature) -> Feature
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let attributes: Vec<String> = attributes.into_iter().map(Into::into).collect();
    move |mut feature| {
        let properties = feature.properties.take().unwrap_or_default();
        let remapped: JsonObject = properties
            .into_iter()
            .map(|(key, value)| (key.to_lowercase(), value))
            .filter(|(key, _)| attributes.contains(key))
            .collect();
        feature.properties = Some(remapped);
        feature
    }
}

/// `camelCase` / `CamelCase` to `snake_case`.
#[must_use]
pub fn camel_to_snake(name: &str) -> String {
    static PATTERNS: OnceLock<Option<(Regex, Regex)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        Some((
            Regex::new(r"(.)([A-Z][a-z]+)").ok()?,
            Regex::new(r"([a-z0-9])([A-Z])").ok()?,
        ))
    });
    let Some((words, humps)) = patterns else {
        return name.to_lowercase();
    };
    let subbed = words.replace_all(name, "${1}_${2}");
    humps.replace_all(&subbed, "${1}_${2}").to_lowercase()
}
