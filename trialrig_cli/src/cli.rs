//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "trialrig", version, about = "Viscosity trial rig")]
pub struct Cli {
    /// Path to config TOML; defaults apply when the file does not exist
    #[arg(long, value_name = "FILE", default_value = "etc/trialrig.toml")]
    pub config: PathBuf,

    /// Offsets CSV to use instead of calibrating (strict header)
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Log and report as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Where channel readings come from.
#[derive(clap::Args, Debug, Clone, Copy, Default)]
pub struct SourceArgs {
    /// Use the synthetic bridge instead of hardware
    #[arg(long, action = ArgAction::SetTrue)]
    pub simulate: bool,
    /// Fall back to the synthetic bridge when no hardware channel attaches
    #[arg(long, action = ArgAction::SetTrue)]
    pub allow_simulation: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a session: calibrate, then take operator commands from stdin
    #[command(
        long_about = "Run a session: calibrate, then take operator commands from stdin.\n\nCommands, one per line: start, stop, pause, resume, toggle, select <label>, recalibrate, export, continue, end, status, wait <ms>, quit.\nEnd of input or Ctrl-C stops any running trial, saves it and exits."
    )]
    Run {
        /// Participant id; digits in it pick the condition order
        #[arg(long)]
        participant: String,
        #[command(flatten)]
        source: SourceArgs,
        /// Use the previous calibration file instead of calibrating
        /// (ignored when --calibration is given)
        #[arg(long, action = ArgAction::SetTrue)]
        skip_calibration: bool,
    },
    /// Measure zero offsets on every channel and save them
    Calibrate {
        #[arg(long)]
        participant: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Print the counterbalanced condition order for a participant
    Order {
        #[arg(long)]
        participant: String,
    },
    /// Check configuration and list available channels
    SelfCheck {
        #[command(flatten)]
        source: SourceArgs,
    },
}
