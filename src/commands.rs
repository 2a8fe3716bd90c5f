//! Subcommand handlers behind [`run_app`](crate::run_app).
//!
//! Results go to stdout one line per item so they can be piped; decisions
//! and progress go through the logger.

use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::bootstrap::{
    check_source_changes, ensure_asset, ensure_assets, hash_file, Asset, Download, Manifest,
    Outcome, RoutineRegistry,
};
use crate::chunks::{download_parts, get_chunks, PartsOptions, UrlTemplateSource};
use crate::cli::{
    BatchArgs, ChangesArgs, ChunksArgs, CopyLayerArgs, DownloadArgs, EnsureArgs, HashArgs,
    ZipShpArgs,
};
use crate::config::Config;
use crate::error::ExitCode;
use crate::files;
use crate::layers::{self, create_remap, record_filter, CopyOptions, ShapeFilter};
use crate::progress::Progress;
use crate::signal::ShutdownHandler;

/// Shared state of one invocation.
pub struct Context {
    /// Configuration with CLI overrides applied.
    pub config: Config,
    shutdown: ShutdownHandler,
    progress: Option<Arc<Progress>>,
}

impl Context {
    /// Bundle the configuration with the process shutdown handler.
    #[must_use]
    pub fn new(config: Config, shutdown: ShutdownHandler) -> Self {
        let progress = config.progress.then(|| Arc::new(Progress::new(false)));
        Self {
            config,
            shutdown,
            progress,
        }
    }

    /// The download routine, wired to Ctrl+C and the progress bars.
    fn download(&self, chunk_size: Option<u64>) -> Download {
        let chunk_size = chunk_size
            .and_then(|size| usize::try_from(size).ok())
            .unwrap_or(self.config.download_chunk_size);
        let download = Download::default()
            .with_chunk_size(chunk_size)
            .with_shutdown_flag(self.shutdown.get_flag());
        match &self.progress {
            Some(progress) => download.with_progress_callback(progress.clone()),
            None => download,
        }
    }

    fn registry(&self, chunk_size: Option<u64>) -> RoutineRegistry {
        RoutineRegistry::builtin(self.download(chunk_size))
    }
}

/// `geostage ensure`
pub fn ensure(ctx: &Context, args: EnsureArgs) -> Result<ExitCode> {
    let registry = ctx.registry(args.chunk_size);
    let mut asset = Asset::new(
        args.source,
        args.dest.clone(),
        registry.resolve(args.routine),
    )
    .with_args(args.args.into_iter().collect());
    if let Some(directory) = args.directory {
        asset = asset.with_directory(directory);
    }

    let policy = args.policy.apply(ctx.config.change_policy());
    let outcome = ensure_asset(&asset, &policy)?;
    let label = match outcome {
        Outcome::Fresh => "fresh",
        Outcome::Created => "created",
    };
    println!("{label}\t{}", args.dest.display());
    Ok(ExitCode::Success)
}

/// `geostage batch`
pub fn batch(ctx: &Context, args: BatchArgs) -> Result<ExitCode> {
    let manifest = Manifest::load(&args.manifest)?;
    let registry = ctx.registry(args.chunk_size);
    let policy = args
        .policy
        .apply(manifest.policy(&ctx.config.change_policy()));

    let assets = manifest.assets(&registry);
    let report = ensure_assets(&assets, &policy)
        .with_context(|| format!("Batch {} failed", args.manifest.display()))?;
    println!(
        "{} assets: {} created, {} fresh",
        assets.len(),
        report.created,
        report.fresh
    );
    Ok(ExitCode::Success)
}

/// `geostage changes`
pub fn changes(ctx: &Context, args: ChangesArgs) -> Result<ExitCode> {
    let policy = args.policy.apply(ctx.config.change_policy());
    let changed = check_source_changes(&args.sources, &policy)?;
    println!("{}", if changed { "changed" } else { "unchanged" });
    Ok(ExitCode::Success)
}

/// `geostage hash`
pub fn hash(args: &HashArgs) -> Result<ExitCode> {
    files::check_sources(&args.files)?;
    for file in &args.files {
        let digest = hash_file(file)?;
        println!("{digest}  {}", file.display());
    }
    Ok(ExitCode::Success)
}

/// `geostage chunks`
pub fn chunks(ctx: &Context, args: &ChunksArgs) -> Result<ExitCode> {
    let step = args.step.unwrap_or(ctx.config.step);
    let cells = get_chunks(&args.boundary, step, args.map.as_deref())?;
    for cell in &cells {
        println!("{}\t{}", cell.filename(), cell.region_json());
    }
    Ok(ExitCode::Success)
}

/// `geostage download`
pub fn download(ctx: &Context, args: DownloadArgs) -> Result<ExitCode> {
    let step = args.step.unwrap_or(ctx.config.step);
    let source =
        UrlTemplateSource::new(args.url_template).with_download(ctx.download(args.chunk_size));

    let mut options = PartsOptions::new(args.dest)
        .with_step(step)
        .with_clean(args.clean)
        .with_shutdown_flag(ctx.shutdown.get_flag());
    if let Some(progress) = &ctx.progress {
        options = options.with_progress_callback(progress.clone());
    }

    let tiles = download_parts(&args.boundary, &source, &options)?;
    for tile in &tiles {
        println!("{}", tile.display());
    }
    Ok(ExitCode::Success)
}

/// `geostage zip-shp`
pub fn zip_shp(args: &ZipShpArgs) -> Result<ExitCode> {
    let archive = files::zip_shp(&args.file)?;
    println!("{}", archive.display());
    Ok(ExitCode::Success)
}

/// `geostage copy-layer`
pub fn copy_layer(ctx: &Context, args: CopyLayerArgs) -> Result<ExitCode> {
    let mut options = CopyOptions::default()
        .with_append(args.append)
        .with_fields(args.fields)
        .with_limit(args.limit)
        .with_progress(ctx.config.progress);
    if !args.remap.is_empty() {
        options = options.with_remap(create_remap(args.remap));
    }
    if let Some(boundary) = &args.within {
        options = options.with_filter(ShapeFilter::from_layer(boundary)?);
    }
    if let Some(clause) = args.filter {
        options = options.with_filter(record_filter(clause.attribute, clause.value, clause.op));
    }

    let report = layers::copy_layer(&args.input, &args.output, &options)?;
    println!(
        "{} of {} features written to {}",
        report.written,
        report.read,
        args.output.display()
    );
    Ok(ExitCode::Success)
}

/// `geostage config`
pub fn print_config(ctx: &Context) -> Result<ExitCode> {
    print!("{}", ctx.config.to_toml()?);
    Ok(ExitCode::Success)
}
