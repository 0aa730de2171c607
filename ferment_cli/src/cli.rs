//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "ferment", version, about = "Fermentation monitor and temperature controller")]
pub struct Cli {
    /// Path to config TOML (built-in defaults when omitted)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Emit JSON lines instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides [logging].level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Feed readings from a CSV (timestamp_ms,gravity,temperature) through the pipeline
    Replay {
        /// History CSV with a strict header
        #[arg(value_name = "CSV")]
        csv: PathBuf,
        /// Device id to attribute the readings to
        #[arg(long, default_value = "replay")]
        device: String,
    },
    /// Rebuild a device from a history CSV and report what was loaded
    Hydrate {
        #[arg(value_name = "CSV")]
        csv: PathBuf,
        #[arg(long, default_value = "replay")]
        device: String,
        /// Replay at most this many of the newest records (default: [history].max_samples)
        #[arg(long, value_name = "N")]
        max_samples: Option<usize>,
    },
    /// Closed-loop control against a simulated vessel, in simulated time
    Simulate {
        /// Target wort temperature (°C)
        #[arg(long, default_value_t = 20.0)]
        target: f64,
        /// Ambient temperature (°C)
        #[arg(long, default_value_t = 12.0)]
        ambient: f64,
        /// Starting wort temperature (°C)
        #[arg(long, default_value_t = 18.0)]
        initial: f64,
        /// Simulated duration (hours)
        #[arg(long, default_value_t = 24.0)]
        hours: f64,
        /// Relearn the thermal model every N simulated hours (0 disables)
        #[arg(long, value_name = "HOURS", default_value_t = 6.0)]
        relearn_hours: f64,
        /// Fail this many relay commands at the start, to exercise recovery
        #[arg(long, value_name = "N", default_value_t = 0)]
        inject_faults: usize,
    },
    /// Load and validate the configuration, then exit
    CheckConfig,
    /// Pulse the heater and cooler relays once each through the safety layer
    #[cfg(feature = "hardware")]
    RelayCheck {
        /// BCM pin driving the heater relay
        #[arg(long, value_name = "PIN")]
        heater_pin: u8,
        /// BCM pin driving the cooler relay
        #[arg(long, value_name = "PIN")]
        cooler_pin: u8,
        /// Relay board switches on a low level
        #[arg(long, action = ArgAction::SetTrue)]
        active_low: bool,
        /// How long each relay is held on (ms)
        #[arg(long, value_name = "MS", default_value_t = 1000)]
        hold_ms: u64,
    },
}
