//! Parameter store backed by a controller connection.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;
use crate::connection::Connection;
use crate::error::MbeError;
use crate::param::{Button, ParamValue, ShutterState, RECIPES_RUNNING, TIME};
use crate::store::ParameterStore;

/// How waits and elapsed time are realised for a remote controller.
#[derive(Clone)]
pub enum Pacing {
    /// Real hardware: sleep locally.
    WallClock(Arc<dyn Clock>),
    /// Virtual controller: `Wait <s>` advances its clock, `Get time` reads it.
    Simulated,
}

impl std::fmt::Debug for Pacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WallClock(_) => f.write_str("WallClock"),
            Self::Simulated => f.write_str("Simulated"),
        }
    }
}

#[derive(Debug)]
pub struct RemoteController {
    conn: Connection,
    pacing: Pacing,
}

impl RemoteController {
    #[must_use]
    pub fn new(conn: Connection, pacing: Pacing) -> Self {
        Self { conn, pacing }
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run a command whose error reply means "rejected" rather than "broken".
    fn accepted(&self, cmd: &str) -> Result<bool, MbeError> {
        match self.conn.send_command(cmd) {
            Ok(_) => Ok(true),
            Err(MbeError::Protocol(reply)) => {
                debug!(cmd, %reply, "command rejected");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

impl ParameterStore for RemoteController {
    fn get_param(&self, name: &str) -> Result<Option<ParamValue>, MbeError> {
        match self.conn.send_command(&format!("Get {name}")) {
            Ok(reply) => Ok(Some(ParamValue::parse_reply(&reply))),
            Err(MbeError::Protocol(reply)) => {
                debug!(param = name, %reply, "get rejected");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn set_param(&self, name: &str, value: &str) -> Result<bool, MbeError> {
        self.accepted(&format!("Set {name} {value}"))
    }

    fn press(&self, button: Button) -> Result<bool, MbeError> {
        let name = match button {
            Button::BfmIn => "BFM.LT.IN",
            Button::BfmOut => "BFM.LT.OUT",
        };
        self.accepted(&format!("Set {name}"))
    }

    fn set_shutter(&self, shutter: &str, state: ShutterState) -> Result<bool, MbeError> {
        self.accepted(&format!("{} {shutter}", state.command_word()))
    }

    fn wait(&self, seconds: f64) -> Result<(), MbeError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(MbeError::InvalidCommand(
                format!("invalid wait duration {seconds}").into(),
            ));
        }
        if seconds == 0.0 {
            return Ok(());
        }
        match &self.pacing {
            Pacing::WallClock(clock) => {
                clock.sleep(Duration::from_secs_f64(seconds));
                Ok(())
            }
            Pacing::Simulated => self.conn.send_command(&format!("Wait {seconds}")).map(drop),
        }
    }

    fn elapsed(&self) -> Result<f64, MbeError> {
        match &self.pacing {
            Pacing::WallClock(clock) => Ok(clock.now().as_secs_f64()),
            Pacing::Simulated => {
                let reply = self.conn.send_command(&format!("Get {TIME}"))?;
                ParamValue::parse_reply(&reply)
                    .as_f64()
                    .ok_or_else(|| MbeError::Protocol(format!("non-numeric time '{reply}'").into()))
            }
        }
    }

    fn try_start_recipe(&self) -> Result<bool, MbeError> {
        self.accepted(&format!("Set {RECIPES_RUNNING} claim"))
    }

    fn close(&self) -> Result<(), MbeError> {
        self.conn.close()
    }

    fn export_log(&self, filename: Option<&str>) -> Result<(), MbeError> {
        let cmd = match filename {
            Some(name) => format!("#plot_log {name}"),
            None => "#plot_log".to_string(),
        };
        self.conn.send_command(&cmd).map(drop)
    }
}
