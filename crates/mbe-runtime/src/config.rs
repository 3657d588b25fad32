//! `mbe.toml` loading.
//!
//! Every key is optional; an empty file yields [`MbeConfig::default`].

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use smol_str::SmolStr;
use tracing::info;

use crate::clock::StdClock;
use crate::connection::{Connection, ConnectionConfig, DEFAULT_KEEPALIVE};
use crate::error::MbeError;
use crate::ramp::RampSettings;
use crate::remote::{Pacing, RemoteController};
use crate::session::{RecipeSession, SafetyLimits, SessionConfig, StartPolicy};
use crate::simulator::{SharedSimulator, VirtualMbe, DEFAULT_CHAMBER};
use crate::store::ParameterStore;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:9999";
pub const DEFAULT_CLIENT_NAME: &str = "recipe";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Real controller; waits are wall-clock sleeps.
    Remote,
    /// Virtual controller server; waits advance its simulated clock.
    #[default]
    Virtual,
    /// Simulator inside this process, no socket.
    InProcess,
}

impl Backend {
    pub fn parse(text: &str) -> Result<Self, MbeError> {
        match text.trim().to_ascii_lowercase().as_str() {
            "remote" | "hardware" => Ok(Self::Remote),
            "virtual" => Ok(Self::Virtual),
            "in_process" | "in-process" | "inprocess" => Ok(Self::InProcess),
            _ => Err(MbeError::InvalidConfig(
                format!("invalid controller.backend '{text}'").into(),
            )),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Virtual => "virtual",
            Self::InProcess => "in_process",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub backend: Backend,
    pub connection: ConnectionConfig,
    /// Send `#reset_virt_mbe` after connecting to a virtual controller.
    pub reset_virtual: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: SmolStr,
    /// Append progress lines here as well as to stderr.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorConfig {
    pub listen: SmolStr,
    pub password: SmolStr,
    pub chamber: SmolStr,
    pub export_dir: PathBuf,
}

impl SimulatorConfig {
    #[must_use]
    pub fn build(&self) -> VirtualMbe {
        VirtualMbe::new()
            .with_chamber(self.chamber.clone())
            .with_export_dir(self.export_dir.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MbeConfig {
    pub controller: ControllerConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
    pub simulator: SimulatorConfig,
}

impl Default for MbeConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig {
                backend: Backend::Virtual,
                connection: ConnectionConfig::new(DEFAULT_ADDRESS, "")
                    .with_client_name(DEFAULT_CLIENT_NAME),
                reset_virtual: true,
            },
            session: SessionConfig::default(),
            log: LogConfig {
                level: SmolStr::new_inline("info"),
                file: None,
            },
            simulator: SimulatorConfig {
                listen: SmolStr::new_inline(DEFAULT_ADDRESS),
                password: SmolStr::default(),
                chamber: SmolStr::new_inline(DEFAULT_CHAMBER),
                export_dir: PathBuf::from("."),
            },
        }
    }
}

impl MbeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MbeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            MbeError::InvalidConfig(format!("read {}: {err}", path.display()).into())
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, MbeError> {
        let raw: MbeToml = toml::from_str(text)
            .map_err(|err| MbeError::InvalidConfig(format!("mbe.toml: {err}").into()))?;
        raw.into_config()
    }

    /// Connect to (or build) the configured controller.
    pub fn open_store(&self) -> Result<Box<dyn ParameterStore>, MbeError> {
        let controller = &self.controller;
        info!(backend = controller.backend.as_str(), "opening controller");
        match controller.backend {
            Backend::Remote => {
                let conn = Connection::connect(&controller.connection)?;
                let pacing = Pacing::WallClock(Arc::new(StdClock::new()));
                Ok(Box::new(RemoteController::new(conn, pacing)))
            }
            Backend::Virtual => {
                let conn = Connection::connect(&controller.connection)?;
                if controller.reset_virtual {
                    conn.send_command("#reset_virt_mbe")?;
                }
                Ok(Box::new(RemoteController::new(conn, Pacing::Simulated)))
            }
            Backend::InProcess => Ok(Box::new(SharedSimulator::new(self.simulator.build()))),
        }
    }

    /// Open the controller and wrap it in a recipe session.
    pub fn open_session(&self) -> Result<RecipeSession<Box<dyn ParameterStore>>, MbeError> {
        let store = self.open_store()?;
        Ok(RecipeSession::new(store, self.session.clone()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MbeToml {
    controller: Option<ControllerSection>,
    session: Option<SessionSection>,
    ramp: Option<RampSection>,
    safety: Option<SafetySection>,
    simulator: Option<SimulatorSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControllerSection {
    backend: Option<String>,
    address: Option<String>,
    password: Option<String>,
    client_name: Option<String>,
    keepalive_ms: Option<u64>,
    timeout_ms: Option<u64>,
    reset_virtual: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionSection {
    standby_at_exit: Option<bool>,
    start_policy: Option<String>,
    verify_retries: Option<u32>,
    verify_delay_ms: Option<u64>,
    readback_delay_ms: Option<u64>,
    valve_settle_ms: Option<u64>,
    verify_tolerance: Option<f64>,
    log_file: Option<String>,
    log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RampSection {
    window: Option<usize>,
    tolerance: Option<f64>,
    margin_s: Option<f64>,
    timeout_factor: Option<f64>,
    min_timeout_s: Option<f64>,
    poll_s: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SafetySection {
    limits: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SimulatorSection {
    listen: Option<String>,
    password: Option<String>,
    chamber: Option<String>,
    export_dir: Option<String>,
}

impl MbeToml {
    fn into_config(self) -> Result<MbeConfig, MbeError> {
        let defaults = MbeConfig::default();
        let controller = self.controller.unwrap_or_default();
        let session = self.session.unwrap_or_default();
        let ramp = self.ramp.unwrap_or_default();
        let safety = self.safety.unwrap_or_default();
        let simulator = self.simulator.unwrap_or_default();

        let backend = match controller.backend.as_deref() {
            Some(text) => Backend::parse(text)?,
            None => defaults.controller.backend,
        };
        let keepalive = match controller.keepalive_ms {
            Some(0) => {
                return Err(MbeError::InvalidConfig(
                    "controller.keepalive_ms must be greater than zero".into(),
                ))
            }
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_KEEPALIVE,
        };
        let mut connection = ConnectionConfig::new(
            controller.address.unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            controller.password.unwrap_or_default(),
        )
        .with_client_name(
            controller
                .client_name
                .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string()),
        )
        .with_keepalive(keepalive);
        connection.timeout = controller
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let start_policy = match session.start_policy.as_deref() {
            Some(text) => StartPolicy::parse(text).ok_or_else(|| {
                MbeError::InvalidConfig(format!("invalid session.start_policy '{text}'").into())
            })?,
            None => defaults.session.start_policy,
        };
        let verify_tolerance = session
            .verify_tolerance
            .unwrap_or(defaults.session.verify_tolerance);
        if !(verify_tolerance.is_finite() && verify_tolerance >= 0.0) {
            return Err(MbeError::InvalidConfig(
                "session.verify_tolerance must be a non-negative number".into(),
            ));
        }

        let ramp = ramp.into_settings(&defaults.session.ramp)?;

        let mut limits = SafetyLimits::default();
        for (param, max) in safety.limits.unwrap_or_default() {
            if !max.is_finite() {
                return Err(MbeError::InvalidConfig(
                    format!("safety.limits.{param} must be finite").into(),
                ));
            }
            limits.insert(&param, max);
        }

        let session_config = SessionConfig {
            standby_at_exit: session
                .standby_at_exit
                .unwrap_or(defaults.session.standby_at_exit),
            start_policy,
            verify_retries: match session.verify_retries {
                Some(0) => {
                    return Err(MbeError::InvalidConfig(
                        "session.verify_retries must be at least 1".into(),
                    ))
                }
                Some(retries) => retries,
                None => defaults.session.verify_retries,
            },
            readback_delay: session
                .readback_delay_ms
                .map_or(defaults.session.readback_delay, Duration::from_millis),
            valve_settle: session
                .valve_settle_ms
                .map_or(defaults.session.valve_settle, Duration::from_millis),
            verify_backoff: session
                .verify_delay_ms
                .map_or(defaults.session.verify_backoff, Duration::from_millis),
            verify_tolerance,
            limits,
            ramp,
        };

        Ok(MbeConfig {
            controller: ControllerConfig {
                backend,
                connection,
                reset_virtual: controller
                    .reset_virtual
                    .unwrap_or(defaults.controller.reset_virtual),
            },
            session: session_config,
            log: LogConfig {
                level: session
                    .log_level
                    .map_or(defaults.log.level, SmolStr::new),
                file: session.log_file.map(PathBuf::from),
            },
            simulator: SimulatorConfig {
                listen: simulator
                    .listen
                    .map_or(defaults.simulator.listen, SmolStr::new),
                password: simulator
                    .password
                    .map_or(defaults.simulator.password, SmolStr::new),
                chamber: simulator
                    .chamber
                    .map_or(defaults.simulator.chamber, SmolStr::new),
                export_dir: simulator
                    .export_dir
                    .map_or(defaults.simulator.export_dir, PathBuf::from),
            },
        })
    }
}

impl RampSection {
    fn into_settings(self, defaults: &RampSettings) -> Result<RampSettings, MbeError> {
        let settings = RampSettings {
            window: self.window.unwrap_or(defaults.window),
            tolerance: self.tolerance.unwrap_or(defaults.tolerance),
            margin_s: self.margin_s.unwrap_or(defaults.margin_s),
            timeout_factor: self.timeout_factor.unwrap_or(defaults.timeout_factor),
            min_timeout_s: self.min_timeout_s.unwrap_or(defaults.min_timeout_s),
            poll_s: self.poll_s.unwrap_or(defaults.poll_s),
        };
        if settings.window == 0 {
            return Err(MbeError::InvalidConfig("ramp.window must be at least 1".into()));
        }
        if !(settings.tolerance.is_finite() && settings.tolerance > 0.0) {
            return Err(MbeError::InvalidConfig("ramp.tolerance must be positive".into()));
        }
        if !(settings.poll_s.is_finite() && settings.poll_s > 0.0) {
            return Err(MbeError::InvalidConfig("ramp.poll_s must be positive".into()));
        }
        for (key, value) in [
            ("margin_s", settings.margin_s),
            ("timeout_factor", settings.timeout_factor),
            ("min_timeout_s", settings.min_timeout_s),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(MbeError::InvalidConfig(
                    format!("ramp.{key} must be a non-negative number").into(),
                ));
            }
        }
        Ok(settings)
    }
}
