//! CLI definitions for mbe-runtime.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "mbe-runtime",
    version,
    about = "MBE process-control runtime",
    infer_subcommands = true,
    after_help = "Examples:\n  mbe-runtime serve --listen 127.0.0.1:9999\n  mbe-runtime --config mbe.toml ctl Get Manip.PV\n  mbe-runtime --config mbe.toml wait-temp Manip --target 650"
)]
pub struct Cli {
    /// Show debug progress output.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    /// Configuration file (mbe.toml).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the virtual controller server.
    Serve {
        /// Listen address override.
        #[arg(long)]
        listen: Option<String>,
        /// Password override.
        #[arg(long)]
        password: Option<String>,
        /// Chamber name override.
        #[arg(long)]
        chamber: Option<String>,
    },
    /// Send one raw command to the controller and print the reply.
    Ctl {
        /// Command words, joined with spaces.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Put the chamber into standby inside a recipe session.
    Standby,
    /// Report whether the chamber is within standby ranges.
    CheckStandby,
    /// Ramp a device and wait for its temperature to settle.
    WaitTemp {
        /// Device name (e.g. Manip, Ga, AsCracker).
        device: String,
        /// Target value; defaults to the current setpoint.
        #[arg(long)]
        target: Option<f64>,
        /// Convergence tolerance.
        #[arg(long)]
        tolerance: Option<f64>,
        /// Keep waiting past the soft timeout.
        #[arg(long)]
        no_timeout: bool,
    },
}
