//! `ferment`: replay, hydrate and simulate on top of `ferment_core`.

mod cli;
mod commands;
mod error_fmt;
#[cfg(feature = "hardware")]
mod relay_check;
mod simulate;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use eyre::Result;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use ferment_core::CoreConfig;

/// Invalid files are rejected here, before any core object is built.
fn load_config(path: Option<&Path>) -> Result<ferment_config::Config> {
    match path {
        Some(p) => ferment_config::load_file(p),
        None => {
            let cfg = ferment_config::Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }
}

/// Console logs go to stderr so stdout stays machine-readable; an optional
/// JSON file log is added from `[logging]`.
fn init_tracing(json: bool, level: &str, logging: &ferment_config::Logging) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).with_target(false).boxed()
    };

    let file = match logging.file.as_deref() {
        Some(path) => {
            let path = Path::new(path);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file {:?} has no file name", path))?;
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_writer(writer).boxed())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let file_cfg = load_config(cli.config.as_deref())?;
    let level = cli
        .log_level
        .as_deref()
        .or(file_cfg.logging.level.as_deref())
        .unwrap_or("info");
    init_tracing(cli.json, level, &file_cfg.logging)?;
    let core = CoreConfig::from(&file_cfg);

    match cli.cmd {
        Commands::Replay { csv, device } => commands::run_replay(Arc::new(core), &csv, &device, cli.json),
        Commands::Hydrate {
            csv,
            device,
            max_samples,
        } => commands::run_hydrate(Arc::new(core), &csv, &device, max_samples, cli.json),
        Commands::Simulate {
            target,
            ambient,
            initial,
            hours,
            relearn_hours,
            inject_faults,
        } => simulate::run_simulate(
            core,
            simulate::SimParams {
                target,
                ambient,
                initial,
                hours,
                relearn_hours,
                inject_faults,
            },
            cli.json,
        ),
        Commands::CheckConfig => commands::run_check_config(cli.config.as_deref(), &core, cli.json),
        #[cfg(feature = "hardware")]
        Commands::RelayCheck {
            heater_pin,
            cooler_pin,
            active_low,
            hold_ms,
        } => relay_check::run_relay_check(heater_pin, cooler_pin, active_low, hold_ms, cli.json),
    }
}

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporter: {e}");
    }
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(err) = run(cli) {
        tracing::error!(error = %err, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}
