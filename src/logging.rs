//! Logging setup for the `geostage` binary.
//!
//! Library code only uses the `log` macros; the binary installs an
//! `env_logger` backend once. `RUST_LOG` wins over the CLI flags. Without
//! it, `-q` shows errors only, the default is info, `-v` is debug and `-vv`
//! trace. HTTP client internals stay at warn unless `-vv` is given.
//!
//! ```rust,no_run
//! use geostage::logging::init_logging;
//!
//! init_logging(1, false);
//! log::debug!("Checking hash store");
//! ```

use std::env;
use std::io::Write;

use env_logger::Builder;
use log::LevelFilter;

/// Crates whose debug output drowns out ours.
const NOISY_CRATES: &[&str] = &["reqwest", "hyper", "hyper_util", "rustls", "h2"];

/// Install the logger. Calling it twice is harmless.
///
/// # Arguments
///
/// * `verbose` - Verbosity count from CLI (0=info, 1=debug, 2+=trace)
/// * `quiet` - Errors only (overridden by `RUST_LOG`)
pub fn init_logging(verbose: u8, quiet: bool) {
    let from_env = env::var("RUST_LOG").is_ok();

    let mut builder = Builder::new();
    if from_env {
        builder.parse_default_env();
    } else {
        let level = determine_level(verbose, quiet);
        builder.filter_level(level);
        if verbose < 2 {
            for name in NOISY_CRATES {
                builder.filter_module(name, level.min(LevelFilter::Warn));
            }
        }
    }

    configure_format(&mut builder, verbose);

    if builder.try_init().is_ok() {
        log::debug!(
            "Logging initialized at level {}",
            if from_env { "RUST_LOG" } else { current_level_name() }
        );
    }
}

/// Log level for the CLI flags; quiet beats verbose.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Debug builds print timestamps (and module paths with `-v`); release
/// builds print level and message.
fn configure_format(builder: &mut Builder, verbose: u8) {
    #[cfg(debug_assertions)]
    {
        builder.format(move |buf, record| {
            let timestamp = buf.timestamp_seconds();
            let level = record.level();
            let style = buf.default_level_style(level);
            if verbose >= 1 {
                writeln!(
                    buf,
                    "{timestamp} {style}{level:<5}{style:#} [{}] {}",
                    record.module_path().unwrap_or("unknown"),
                    record.args()
                )
            } else {
                writeln!(buf, "{timestamp} {style}{level:<5}{style:#} {}", record.args())
            }
        });
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = verbose;
        builder.format(|buf, record| {
            let level = record.level();
            let style = buf.default_level_style(level);
            writeln!(buf, "{style}{level:<5}{style:#} {}", record.args())
        });
    }
}

/// Name of the active maximum level.
pub fn current_level_name() -> &'static str {
    match log::max_level() {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}
