//! `mbe-runtime` - process control and virtual controller for MBE growth recipes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Flux calibration collaborator.
pub mod calibration;
/// Wall-clock and manual clocks.
pub mod clock;
/// Length-prefixed frame codec and reserved replies.
pub mod codec;
/// `mbe.toml` configuration.
pub mod config;
/// Authenticated controller connection with keep-alive.
pub mod connection;
/// Controller, protocol and session errors.
pub mod error;
/// Subscriber setup for progress logging.
pub mod logging;
/// Parameter names, slots and values.
pub mod param;
/// Ramp-and-wait convergence engine.
pub mod ramp;
/// Parameter store over the wire protocol.
pub mod remote;
/// Recipe session with guaranteed cleanup.
pub mod session;
/// Virtual MBE controller and server.
pub mod simulator;
/// Standby tables.
pub mod standby;
mod stats;
/// Parameter store contract.
pub mod store;

pub use config::{Backend, MbeConfig};
pub use connection::{Connection, ConnectionConfig};
pub use error::MbeError;
pub use param::{ControlMode, ParamValue, ShutterState};
pub use ramp::{RampOutcome, RampSettings, RampTarget};
pub use session::{RecipeSession, SessionConfig, StartPolicy};
pub use simulator::{SharedSimulator, VirtualMbe, VirtualServer};
pub use store::ParameterStore;
