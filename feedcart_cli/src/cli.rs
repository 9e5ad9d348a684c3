//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

/// Config path tried when `--config` is not given; defaults apply if it is absent.
pub const DEFAULT_CONFIG: &str = "etc/feedcart.toml";

#[derive(Parser, Debug)]
#[command(name = "feedcart", version, about = "Feed cart scale CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Optional per-channel calibration CSV (strict header)
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Print results and logs as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG wins when set
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Skip hardware detection and run on the simulated cart
    #[arg(long, action = ArgAction::SetTrue)]
    pub simulate: bool,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read the total weight
    Read {
        /// Number of readings
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Pause between readings in ms
        #[arg(long, value_name = "MS", default_value_t = 500)]
        interval_ms: u64,
        /// Always go to the source instead of serving a fresh cached value
        #[arg(long, action = ArgAction::SetTrue)]
        no_cache: bool,
    },
    /// Read the four corner cells
    Cells,
    /// Zero the scale with the cart empty
    Tare {
        /// Skip the "press Enter" confirmation on wired cells
        #[arg(long, short = 'y', action = ArgAction::SetTrue)]
        yes: bool,
    },
    /// Rescale so the current load reads as the known weight
    Calibrate {
        /// Known load on the cart in kg
        #[arg(long, value_name = "KG", allow_negative_numbers = true)]
        known_kg: f64,
    },
    /// Change the simulated load and print the resulting weight after each step
    Simulate {
        /// Load deltas in kg, applied in order (negative removes load)
        #[arg(required = true, allow_negative_numbers = true, value_name = "DELTA_KG")]
        deltas: Vec<f64>,
    },
    /// Print the manager status snapshot
    Status,
    /// Look for the wireless scale node
    Discover {
        /// Probe even if a recent result is cached
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },
    /// Print every new weight until Ctrl-C
    Watch {
        /// Poll interval in ms
        #[arg(long, value_name = "MS", default_value_t = 500)]
        interval_ms: u64,
        /// Stop after this many updates
        #[arg(long, value_name = "N")]
        max_updates: Option<u64>,
    },
    /// Quick health check (hardware presence / sim ok)
    SelfCheck,
}
