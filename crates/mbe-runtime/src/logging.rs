//! Timestamped progress logging to stderr and, optionally, a log file.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::error::MbeError;

/// Install the global subscriber. `RUST_LOG` overrides `level`. The log file
/// is opened in append mode so successive runs of a recipe share one file.
pub fn init(level: &str, file: Option<&Path>) -> Result<(), MbeError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|err| MbeError::InvalidConfig(format!("log level '{level}': {err}").into()))?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let file_layer = match file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| {
                    MbeError::InvalidConfig(format!("log file {}: {err}", path.display()).into())
                })?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|err| MbeError::Logging(format!("subscriber already installed: {err}").into()))
}
