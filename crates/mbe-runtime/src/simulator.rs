//! Virtual MBE: a per-second time-stepped model of every ramped controller.
//!
//! All state lives in one `VirtualMbe`. When several clients share it, it is
//! wrapped in [`SharedSimulator`] and every command runs under one lock, so a
//! `Wait` or a multi-field read is never interleaved with another client.

#![allow(missing_docs)]

mod export;
mod handler;
mod transport;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use smol_str::SmolStr;
use tracing::{debug, info};

use crate::error::MbeError;
use crate::param::{
    canonical_name, Button, ControlMode, Param, ParamKind, ParamValue, ShutterState, PYROMETER_T,
    RECIPES_RUNNING, TIME,
};
use crate::store::ParameterStore;

pub use handler::{handle_command, Response};
pub use transport::VirtualServer;

pub const DEFAULT_CHAMBER: &str = "virtual";
pub const DEFAULT_LOG_STEM: &str = "virtual_log_file";
/// Pyrometer reads roughly this much below the manipulator thermocouple.
const PYROMETER_OFFSET: f64 = 110.0;
/// Longest single `wait`, one week of simulated time.
pub const MAX_WAIT_S: f64 = 7.0 * 24.0 * 3600.0;

struct DeviceDefaults {
    name: &'static str,
    pv: f64,
    pv_rate: f64,
    op: f64,
    op_rate: f64,
    mode: ControlMode,
}

const fn pid(name: &'static str, pv: f64, pv_rate: f64) -> DeviceDefaults {
    DeviceDefaults {
        name,
        pv,
        pv_rate,
        op: 0.0,
        op_rate: 0.0,
        mode: ControlMode::Auto,
    }
}

const fn manual(name: &'static str, op: f64, op_rate: f64) -> DeviceDefaults {
    DeviceDefaults {
        name,
        pv: 0.0,
        pv_rate: 0.0,
        op,
        op_rate,
        mode: ControlMode::Manual,
    }
}

const DEVICES: &[DeviceDefaults] = &[
    pid("manip", 200.0, 0.0),
    pid("in", 515.0, 0.0),
    pid("ga", 550.0, 0.0),
    pid("as", 375.0, 0.0),
    pid("sb", 250.0, 0.0),
    pid("al", 750.0, 0.0),
    pid("ascracker", 600.0, 2.0),
    pid("sbcracker", 800.0, 10.0),
    pid("sbcond", 800.0, 10.0),
    manual("suko", 10.0, 0.5),
    manual("susi", 10.0, 0.5),
];

pub const SHUTTERS: &[&str] = &[
    "in",
    "ga",
    "as",
    "al",
    "sb",
    "susi",
    "suko",
    "pyrometer",
    "viewport",
];

const EXTRA_FLOATS: &[(&str, f64)] = &[
    ("manip.rs.rpm", 0.0),
    ("ascracker.valve.op", 0.0),
    ("sbcracker.valve.op", 0.0),
    ("mbe.p", 1.0e-7),
    ("bfm.p", 1.0e-9),
    ("bfm.lt", 0.0),
];

/// Slot indices of one controller inside the parameter map.
#[derive(Debug, Clone, Copy)]
struct RampSlots {
    mode: usize,
    pv: [usize; 3],
    op: [usize; 3],
}

/// All parameter values captured after one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub time: u64,
    pub values: Vec<Param>,
}

#[derive(Debug)]
pub struct VirtualMbe {
    params: IndexMap<SmolStr, Param>,
    ramps: Vec<RampSlots>,
    ticks: u64,
    log: Vec<Snapshot>,
    chamber: SmolStr,
    export_dir: PathBuf,
}

impl Default for VirtualMbe {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMbe {
    #[must_use]
    pub fn new() -> Self {
        let mut params = IndexMap::new();
        let mut ramps = Vec::with_capacity(DEVICES.len());
        for device in DEVICES {
            let mut slot = |suffix: &str, param: Param| {
                let (index, _) = params.insert_full(SmolStr::new(format!("{}.{suffix}", device.name)), param);
                index
            };
            let pv = [
                slot("pv", Param::Float(device.pv)),
                slot("pv.rate", Param::Float(device.pv_rate)),
                slot("pv.tsp", Param::Float(device.pv)),
            ];
            let op = [
                slot("op", Param::Float(device.op)),
                slot("op.rate", Param::Float(device.op_rate)),
                slot("op.tsp", Param::Float(device.op)),
            ];
            let mode = slot("mode", Param::Mode(device.mode));
            ramps.push(RampSlots { mode, pv, op });
        }
        for (name, value) in EXTRA_FLOATS {
            params.insert(SmolStr::new(name), Param::Float(*value));
        }
        for shutter in SHUTTERS {
            params.insert(
                SmolStr::new(format!("shutter.{shutter}")),
                Param::Shutter(ShutterState::Closed),
            );
        }
        params.insert(SmolStr::new(RECIPES_RUNNING), Param::Counter(0));

        Self {
            params,
            ramps,
            ticks: 0,
            log: Vec::new(),
            chamber: SmolStr::new_inline(DEFAULT_CHAMBER),
            export_dir: PathBuf::from("."),
        }
    }

    #[must_use]
    pub fn with_chamber(mut self, chamber: impl Into<SmolStr>) -> Self {
        self.chamber = chamber.into();
        self
    }

    /// Directory that `#plot_log` writes into.
    #[must_use]
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    /// Restore the power-on state. Chamber name and export directory survive.
    pub fn reset(&mut self) {
        let chamber = std::mem::take(&mut self.chamber);
        let export_dir = std::mem::take(&mut self.export_dir);
        *self = Self::new().with_chamber(chamber).with_export_dir(export_dir);
        info!("virtual controller reset");
    }

    #[must_use]
    pub fn chamber(&self) -> &str {
        &self.chamber
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    #[must_use]
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.log
    }

    /// Stored parameter names in snapshot column order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(SmolStr::as_str)
    }

    /// Newline-separated `name:kind` list of every readable parameter.
    #[must_use]
    pub fn description(&self) -> String {
        let mut lines = Vec::with_capacity(self.params.len() + 2);
        lines.push(format!("{TIME}:{}", ParamKind::Counter.as_str()));
        lines.extend(
            self.params
                .iter()
                .map(|(name, param)| format!("{name}:{}", param.kind().as_str())),
        );
        lines.push(format!("{PYROMETER_T}:{}", ParamKind::Float.as_str()));
        lines.join("\n")
    }

    #[must_use]
    pub fn get_param(&self, name: &str) -> Option<ParamValue> {
        let name = canonical_name(name);
        match name.as_str() {
            TIME => Some(ParamValue::Float(ticks_as_f64(self.ticks))),
            PYROMETER_T => self
                .params
                .get("manip.pv")
                .and_then(Param::as_f64)
                .map(|pv| ParamValue::Float(pv - PYROMETER_OFFSET)),
            other => self.params.get(other).map(Param::value),
        }
    }

    /// Write `value` to `name`. Buttons take no value; every other
    /// parameter requires one. Never panics on malformed input.
    pub fn set_param(&mut self, name: &str, value: Option<&str>) -> bool {
        if let Some(button) = Button::parse(name) {
            let (target, position) = button.target();
            if let Some(Param::Float(slot)) = self.params.get_mut(target) {
                *slot = position;
            }
            debug!(?button, position, "button pressed");
            return true;
        }
        let Some(value) = value else {
            return false;
        };
        let name = canonical_name(name);
        let Some(slot) = self.params.get_mut(name.as_str()) else {
            debug!(param = %name, "unknown parameter");
            return false;
        };
        let applied = slot.apply(value);
        if applied {
            debug!(param = %name, value, "parameter set");
        } else {
            debug!(param = %name, value, "value rejected");
        }
        applied
    }

    /// Advance every controller by one simulated second, then the clock.
    pub fn do_timestep(&mut self) {
        for slots in &self.ramps {
            let [value, rate, target] = match self.params.get_index(slots.mode) {
                Some((_, Param::Mode(ControlMode::Manual))) => slots.op,
                _ => slots.pv,
            };
            let (Some(current), Some(rate), Some(target)) = (
                self.float_at(value),
                self.float_at(rate),
                self.float_at(target),
            ) else {
                continue;
            };
            let next = ramp_step(current, target, rate, 1.0);
            if let Some((_, Param::Float(slot))) = self.params.get_index_mut(value) {
                *slot = next;
            }
        }
        self.ticks += 1;
        self.log.push(Snapshot {
            time: self.ticks,
            values: self.params.values().copied().collect(),
        });
    }

    /// Run whole timesteps; fractions are truncated. Rejects negative,
    /// non-finite and longer than [`MAX_WAIT_S`] durations.
    pub fn wait(&mut self, seconds: f64) -> bool {
        if !(0.0..=MAX_WAIT_S).contains(&seconds) {
            return false;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let steps = seconds.trunc() as u64;
        for _ in 0..steps {
            self.do_timestep();
        }
        true
    }

    /// Write the tick log as CSV into the export directory, named after the
    /// stem of `filename`.
    pub fn export_log(&self, filename: Option<&str>) -> Result<PathBuf, MbeError> {
        let stem = filename
            .and_then(|name| Path::new(name).file_name())
            .and_then(|name| name.to_str())
            .and_then(|name| name.split('.').next())
            .filter(|stem| !stem.is_empty())
            .unwrap_or(DEFAULT_LOG_STEM);
        let path = self.export_dir.join(format!("{stem}.csv"));
        self.export_log_to(&path)?;
        Ok(path)
    }

    pub fn export_log_to(&self, path: &Path) -> Result<(), MbeError> {
        let columns: Vec<&str> = self.names().collect();
        export::write_csv(path, &columns, &self.log)?;
        info!(path = %path.display(), rows = self.log.len(), "tick log exported");
        Ok(())
    }

    fn float_at(&self, index: usize) -> Option<f64> {
        self.params.get_index(index).and_then(|(_, param)| param.as_f64())
    }
}

/// One ramp step: move toward `target` by at most `rate` per minute.
#[must_use]
pub fn ramp_step(current: f64, target: f64, rate: f64, dt: f64) -> f64 {
    let difference = target - current;
    if difference == 0.0 {
        return current;
    }
    let step = rate.max(0.0) / 60.0 * dt;
    if step < difference.abs() {
        current + step.copysign(difference)
    } else {
        target
    }
}

#[allow(clippy::cast_precision_loss)]
fn ticks_as_f64(ticks: u64) -> f64 {
    ticks as f64
}

/// Simulator shared between threads. Each operation takes the lock once.
#[derive(Debug, Clone, Default)]
pub struct SharedSimulator {
    inner: Arc<Mutex<VirtualMbe>>,
}

impl SharedSimulator {
    #[must_use]
    pub fn new(mbe: VirtualMbe) -> Self {
        Self {
            inner: Arc::new(Mutex::new(mbe)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, VirtualMbe> {
        self.inner.lock()
    }
}

impl ParameterStore for SharedSimulator {
    fn get_param(&self, name: &str) -> Result<Option<ParamValue>, MbeError> {
        Ok(self.lock().get_param(name))
    }

    fn set_param(&self, name: &str, value: &str) -> Result<bool, MbeError> {
        Ok(self.lock().set_param(name, Some(value)))
    }

    fn press(&self, button: Button) -> Result<bool, MbeError> {
        let name = match button {
            Button::BfmIn => "bfm.lt.in",
            Button::BfmOut => "bfm.lt.out",
        };
        Ok(self.lock().set_param(name, None))
    }

    fn set_shutter(&self, shutter: &str, state: ShutterState) -> Result<bool, MbeError> {
        Ok(self
            .lock()
            .set_param(&format!("shutter.{shutter}"), Some(state.as_str())))
    }

    fn wait(&self, seconds: f64) -> Result<(), MbeError> {
        if self.lock().wait(seconds) {
            Ok(())
        } else {
            Err(MbeError::InvalidCommand(format!("invalid wait duration {seconds}").into()))
        }
    }

    fn elapsed(&self) -> Result<f64, MbeError> {
        Ok(ticks_as_f64(self.lock().ticks()))
    }

    fn try_start_recipe(&self) -> Result<bool, MbeError> {
        Ok(self.lock().set_param(RECIPES_RUNNING, Some("claim")))
    }

    fn export_log(&self, filename: Option<&str>) -> Result<(), MbeError> {
        self.lock().export_log(filename).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_step_never_overshoots() {
        assert_eq!(ramp_step(200.0, 300.0, 60.0, 1.0), 201.0);
        assert_eq!(ramp_step(650.0, 550.0, 60.0, 1.0), 649.0);
        assert_eq!(ramp_step(299.5, 300.0, 60.0, 1.0), 300.0);
        assert_eq!(ramp_step(200.0, 300.0, 0.0, 1.0), 200.0);
        assert_eq!(ramp_step(200.0, 300.0, -10.0, 1.0), 200.0);
    }

    #[test]
    fn initial_state_matches_lab_defaults() {
        let mbe = VirtualMbe::new();
        assert_eq!(mbe.get_param("Manip.PV"), Some(ParamValue::Float(200.0)));
        assert_eq!(mbe.get_param("Pyrometer.T"), Some(ParamValue::Float(90.0)));
        assert_eq!(mbe.get_param("Manip.Mode"), Some("auto".into()));
        assert_eq!(mbe.get_param("SUKO.Mode"), Some("manual".into()));
        for shutter in SHUTTERS {
            assert_eq!(
                mbe.get_param(&format!("Shutter.{shutter}")),
                Some("closed".into())
            );
        }
        assert_eq!(mbe.get_param(TIME), Some(ParamValue::Float(0.0)));
    }

    #[test]
    fn derived_and_clock_parameters_are_read_only() {
        let mut mbe = VirtualMbe::new();
        assert!(!mbe.set_param("time", Some("100")));
        assert!(!mbe.set_param("Pyrometer.T", Some("100")));
        assert!(!mbe.set_param("Manip.PV", None));
    }

    #[test]
    fn reset_keeps_identity_but_clears_state() {
        let mut mbe = VirtualMbe::new()
            .with_chamber("D1")
            .with_export_dir("/tmp");
        assert!(mbe.set_param("Ga.PV.TSP", Some("600")));
        assert!(mbe.wait(3.0));
        mbe.reset();
        assert_eq!(mbe.ticks(), 0);
        assert!(mbe.snapshots().is_empty());
        assert_eq!(mbe.get_param("ga.pv.tsp"), Some(ParamValue::Float(550.0)));
        assert_eq!(mbe.chamber(), "D1");
    }

    #[test]
    fn each_tick_appends_one_snapshot() {
        let mut mbe = VirtualMbe::new();
        assert!(mbe.wait(2.9));
        assert_eq!(mbe.ticks(), 2);
        let times: Vec<u64> = mbe.snapshots().iter().map(|snap| snap.time).collect();
        assert_eq!(times, vec![1, 2]);
        assert_eq!(mbe.snapshots()[0].values.len(), mbe.names().count());
        assert!(!mbe.wait(-1.0));
        assert!(!mbe.wait(f64::NAN));
    }
}
