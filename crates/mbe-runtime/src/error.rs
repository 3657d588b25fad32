//! Controller, protocol and session errors.

#![allow(missing_docs)]

use smol_str::SmolStr;
use thiserror::Error;

/// Hard failures raised by the protocol, connection and recipe layers.
///
/// Soft outcomes (unknown parameter, rejected value, ramp timeout) are
/// reported as values by the components that produce them and never show up
/// here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MbeError {
    /// Transport could not be established or was lost.
    #[error("connection error '{0}'")]
    Connection(SmolStr),

    /// Controller rejected the password (`PWD` reply).
    #[error("password rejected by controller")]
    Authentication,

    /// Unexpected or error reply to a command; carries the raw reply text.
    #[error("protocol error '{0}'")]
    Protocol(SmolStr),

    /// Frame header announced more bytes than a frame may carry.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: u32, max: u32 },

    /// Set-then-readback did not match after exhausting retries.
    #[error("could not set {param} to {expected}, got {actual}")]
    Verification {
        param: SmolStr,
        expected: SmolStr,
        actual: SmolStr,
    },

    /// Another recipe holds the running-recipes counter.
    #[error("{0} recipe(s) already running")]
    RecipeAlreadyRunning(u32),

    /// Recipe counter did not move by exactly one.
    #[error("recipes-running counter went from {before} to {after}")]
    CounterMismatch { before: u32, after: u32 },

    /// Malformed command words or arguments.
    #[error("invalid command '{0}'")]
    InvalidCommand(SmolStr),

    /// Configuration error.
    #[error("invalid config '{0}'")]
    InvalidConfig(SmolStr),

    /// Global tracing subscriber could not be installed.
    #[error("logging setup error '{0}'")]
    Logging(SmolStr),

    /// Simulator log export failed.
    #[error("log export error '{0}'")]
    Export(SmolStr),

    /// Thread spawn error.
    #[error("thread spawn error '{0}'")]
    ThreadSpawn(SmolStr),
}

impl MbeError {
    pub(crate) fn connection(context: &str, err: &std::io::Error) -> Self {
        Self::Connection(format!("{context}: {err}").into())
    }

    /// True for failures of the transport itself rather than of one command.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Authentication | Self::FrameTooLarge { .. }
        )
    }
}
