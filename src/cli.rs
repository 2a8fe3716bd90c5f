//! Command-line interface definitions for geostage.
//!
//! This module defines all CLI arguments, subcommands, and options using the clap derive API.
//! Global options (verbosity, config file, error format) apply to every subcommand.
//!
//! # Example
//!
//! ```bash
//! # Download a file unless it is already present and its source unchanged
//! geostage ensure --source https://example.com/dem.zip --dest data/dem.zip --routine download
//!
//! # Materialize every asset of a manifest, in order
//! geostage batch assets.toml
//!
//! # List the chunk files covering a boundary
//! geostage chunks boundary.geojson --step 0.05 --map chunks.geojson
//!
//! # Copy river features longer than 10 km
//! geostage -v copy-layer rivers.geojson long.geojson --where "length>10"
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use geojson::JsonValue;

use crate::bootstrap::{ChangePolicy, RoutineKind};
use crate::layers::CompareOp;

/// Geoprocessing staging utilities.
///
/// geostage materializes derived files with content-hash change tracking,
/// splits boundaries into download chunks, and copies or filters GeoJSON layers.
#[derive(Debug, Parser)]
#[command(name = "geostage")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (defaults to config.toml in the platform config directory)
    #[arg(long, value_name = "PATH", global = true, env = "GEOSTAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Disable progress bars
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands for geostage.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a file if it is missing or its source changed
    Ensure(EnsureArgs),
    /// Materialize every asset listed in a TOML manifest
    Batch(BatchArgs),
    /// Report whether sources changed since the last check
    Changes(ChangesArgs),
    /// Print MD5 digests of files
    Hash(HashArgs),
    /// List the chunk cells covering a boundary
    Chunks(ChunksArgs),
    /// Download one archive per chunk cell
    Download(DownloadArgs),
    /// Bundle a shapefile's parts into a zip archive
    ZipShp(ZipShpArgs),
    /// Copy features between GeoJSON layers
    CopyLayer(CopyLayerArgs),
    /// Print the effective configuration as TOML
    Config,
}

/// Change-tracking options shared by the materializer commands.
#[derive(Debug, Args, Default)]
pub struct PolicyArgs {
    /// JSON file recording source digests
    #[arg(long, value_name = "PATH")]
    pub hash_store: Option<PathBuf>,

    /// Treat sources not yet recorded in the store as changed
    #[arg(long)]
    pub assume_changed_on_missing: bool,

    /// Report sources as changed when no hash store is configured
    #[arg(long)]
    pub changed_without_store: bool,
}

impl PolicyArgs {
    /// Apply these flags over `base`. Flags only ever switch options on.
    #[must_use]
    pub fn apply(&self, base: ChangePolicy) -> ChangePolicy {
        let mut policy = base;
        if let Some(store) = &self.hash_store {
            policy = policy.with_hash_store(store.clone());
        }
        if self.assume_changed_on_missing {
            policy = policy.with_assume_changed_on_missing(true);
        }
        if self.changed_without_store {
            policy = policy.with_changed_without_store(true);
        }
        policy
    }
}

/// Arguments for the ensure subcommand.
#[derive(Debug, Args)]
pub struct EnsureArgs {
    /// Source path or URL
    #[arg(short, long, value_name = "SOURCE")]
    pub source: String,

    /// Destination file
    #[arg(short, long, value_name = "PATH")]
    pub dest: PathBuf,

    /// Routine producing the destination
    #[arg(short, long, value_enum, default_value = "copy-tree")]
    pub routine: RoutineKind,

    /// Working directory to create before checking the asset
    #[arg(long, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Routine argument (can be specified multiple times)
    #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub args: Vec<(String, String)>,

    /// Download read size (e.g., 32KB, 1MiB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub chunk_size: Option<u64>,

    #[command(flatten)]
    pub policy: PolicyArgs,
}

/// Arguments for the batch subcommand.
#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Manifest with [[asset]] tables
    #[arg(value_name = "MANIFEST")]
    pub manifest: PathBuf,

    /// Download read size (e.g., 32KB, 1MiB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub chunk_size: Option<u64>,

    #[command(flatten)]
    pub policy: PolicyArgs,
}

/// Arguments for the changes subcommand.
#[derive(Debug, Args)]
pub struct ChangesArgs {
    /// Sources to check, in order
    #[arg(value_name = "SOURCE", required = true)]
    pub sources: Vec<String>,

    #[command(flatten)]
    pub policy: PolicyArgs,
}

/// Arguments for the hash subcommand.
#[derive(Debug, Args)]
pub struct HashArgs {
    /// Files to digest
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,
}

/// Arguments for the chunks subcommand.
#[derive(Debug, Args)]
pub struct ChunksArgs {
    /// Boundary layer (GeoJSON)
    #[arg(value_name = "BOUNDARY")]
    pub boundary: PathBuf,

    /// Cell size in degrees
    #[arg(long, value_name = "DEGREES")]
    pub step: Option<f64>,

    /// Write the surviving cells to this GeoJSON file
    #[arg(long, value_name = "PATH")]
    pub map: Option<PathBuf>,
}

/// Arguments for the download subcommand.
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Boundary layer (GeoJSON)
    #[arg(value_name = "BOUNDARY")]
    pub boundary: PathBuf,

    /// URL with {region}, {west}, {south}, {east}, {north} or {name} placeholders
    #[arg(short, long, value_name = "TEMPLATE")]
    pub url_template: String,

    /// Directory receiving the stitch folder and chunk map
    #[arg(short, long, value_name = "DIR")]
    pub dest: PathBuf,

    /// Cell size in degrees
    #[arg(long, value_name = "DEGREES")]
    pub step: Option<f64>,

    /// Download tiles again even when they already exist
    #[arg(long)]
    pub clean: bool,

    /// Download read size (e.g., 32KB, 1MiB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub chunk_size: Option<u64>,
}

/// Arguments for the zip-shp subcommand.
#[derive(Debug, Args)]
pub struct ZipShpArgs {
    /// Shapefile whose siblings are bundled
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// Arguments for the copy-layer subcommand.
#[derive(Debug, Args)]
pub struct CopyLayerArgs {
    /// Input layer (GeoJSON)
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output layer (GeoJSON)
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Append to an existing output instead of replacing it
    #[arg(short, long)]
    pub append: bool,

    /// Keep only these properties (can be specified multiple times)
    #[arg(short, long = "field", value_name = "NAME")]
    pub fields: Vec<String>,

    /// Stop after reading this many input features
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Keep features intersecting the first feature of this layer
    #[arg(long, value_name = "BOUNDARY", conflicts_with = "filter")]
    pub within: Option<PathBuf>,

    /// Keep features matching a comparison (e.g., ftype=StreamRiver, length>=10)
    #[arg(long = "where", value_name = "EXPR", value_parser = parse_where)]
    pub filter: Option<WhereClause>,

    /// Lowercase property names and keep only these (can be specified multiple times)
    #[arg(long, value_name = "NAME")]
    pub remap: Vec<String>,
}

/// A parsed `--where` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    /// Property name
    pub attribute: String,
    /// Comparison
    pub op: CompareOp,
    /// Right-hand side; numbers and booleans are typed, anything else is a string
    pub value: JsonValue,
}

const WHERE_OPERATORS: [&str; 7] = [">=", "<=", "!=", "==", "=", ">", "<"];

/// Parse `ATTR<op>VALUE`, where `<op>` is one of `= == != < <= > >=`.
///
/// The leftmost operator wins; at the same position the longer one does.
pub fn parse_where(s: &str) -> Result<WhereClause, String> {
    let (index, operator) = WHERE_OPERATORS
        .iter()
        .filter_map(|op| s.find(op).map(|index| (index, *op)))
        .min_by_key(|(index, op)| (*index, std::cmp::Reverse(op.len())))
        .ok_or_else(|| format!("Missing comparison in '{s}'"))?;

    let attribute = s[..index].trim();
    if attribute.is_empty() {
        return Err(format!("Missing attribute in '{s}'"));
    }
    let raw = s[index + operator.len()..].trim();
    let value = match serde_json::from_str::<JsonValue>(raw) {
        Ok(value @ (JsonValue::Number(_) | JsonValue::Bool(_) | JsonValue::String(_))) => value,
        _ => JsonValue::String(raw.to_string()),
    };

    Ok(WhereClause {
        attribute: attribute.to_string(),
        op: operator.parse()?,
        value,
    })
}

/// Parse a `KEY=VALUE` routine argument.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Expected KEY=VALUE, got '{s}'")),
    }
}

/// Parse a human-readable size string into bytes.
///
/// Supports the following suffixes (case-insensitive):
/// - No suffix or "B": bytes
/// - "KB" or "K": kilobytes (1000 bytes)
/// - "KiB": kibibytes (1024 bytes)
/// - "MB" or "M": megabytes (1,000,000 bytes)
/// - "MiB": mebibytes (1,048,576 bytes)
///
/// # Examples
///
/// ```
/// use geostage::cli::parse_size;
///
/// assert_eq!(parse_size("32000").unwrap(), 32_000);
/// assert_eq!(parse_size("32KB").unwrap(), 32_000);
/// assert_eq!(parse_size("1MiB").unwrap(), 1_048_576);
/// ```
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    let bytes = (num * multiplier as f64) as u64;
    if bytes == 0 {
        return Err("Size must be at least one byte".to_string());
    }
    Ok(bytes)
}
