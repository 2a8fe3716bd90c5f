//! geostage - geoprocessing staging utilities
//!
//! Materializes derived files (copies, downloads, extracted archives) only when
//! they are missing or their source content changed, splits boundary layers into
//! a grid of download chunks, and copies, filters and merges GeoJSON layers.

pub mod bootstrap;
pub mod chunks;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod files;
pub mod layers;
pub mod logging;
pub mod progress;
pub mod signal;
pub mod spatial;

use anyhow::Result;

use cli::{Cli, Commands};
use config::Config;
use error::ExitCode;

/// Run the command selected on the command line.
///
/// Logging is initialised here, then the configuration is loaded and the
/// CLI flags are applied over it before dispatching.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let mut config = Config::load(cli.config.as_deref())?;
    if cli.quiet || cli.no_progress {
        config.progress = false;
    }
    log::debug!("Effective configuration: {config:?}");

    let shutdown = signal::install_handler()?;
    let context = commands::Context::new(config, shutdown);

    match cli.command {
        Commands::Ensure(args) => commands::ensure(&context, args),
        Commands::Batch(args) => commands::batch(&context, args),
        Commands::Changes(args) => commands::changes(&context, args),
        Commands::Hash(args) => commands::hash(&args),
        Commands::Chunks(args) => commands::chunks(&context, &args),
        Commands::Download(args) => commands::download(&context, args),
        Commands::ZipShp(args) => commands::zip_shp(&args),
        Commands::CopyLayer(args) => commands::copy_layer(&context, args),
        Commands::Config => commands::print_config(&context),
    }
}
