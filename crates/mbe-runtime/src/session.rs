//! Recipe session: single-flight recipe lock with guaranteed cleanup.
//!
//! Once [`RecipeSession::start_recipe`] succeeds the session owns one unit of
//! the controller's running-recipes counter. Leaving the session, by
//! [`RecipeSession::finish`] or by drop during unwinding, drives the chamber
//! to standby, gives the counter back and closes the store. Each of those
//! steps runs even if an earlier one failed.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::{debug, error, info, warn};

use crate::calibration::Calibration;
use crate::clock::{Clock, StdClock};
use crate::error::MbeError;
use crate::param::{
    canonical_name, Button, ControlMode, ParamValue, ShutterState, BFM_POSITION, RECIPES_RUNNING,
};
use crate::ramp::{self, RampOutcome, RampSettings, RampTarget};
use crate::standby::{
    CHECKED_SHUTTERS, MANUAL_STANDBY, PID_STANDBY, STANDBY_CHECKS, STANDBY_SHUTTERS, ZERO_OUTPUTS,
};
use crate::stats::SlidingWindow;
use crate::store::ParameterStore;

/// Position at or above which the beam flux monitor counts as inserted.
const BFM_INSERTED_MIN: f64 = 122.0;
const BFM_TRAVEL_S: f64 = 30.0;
const PYRO_INTERVAL_S: f64 = 1.5;
/// Settle time after each pyrometer-steered manipulator setpoint.
pub const MANIP_SETTLE_S: f64 = 60.0;

/// How the running-recipes counter is claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPolicy {
    /// Server-side compare-and-increment (`Set this.recipesrunning claim`).
    #[default]
    Atomic,
    /// Read, require zero, `inc`, verify. Racy; for controllers without `claim`.
    CheckThenIncrement,
}

impl StartPolicy {
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "atomic" | "claim" => Some(Self::Atomic),
            "check_then_increment" | "check-then-increment" | "legacy" => {
                Some(Self::CheckThenIncrement)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Atomic => "atomic",
            Self::CheckThenIncrement => "check_then_increment",
        }
    }
}

/// Hard ceilings for heater setpoints. Values above are silently capped.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyLimits {
    ceilings: IndexMap<SmolStr, f64>,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        let mut ceilings = IndexMap::new();
        for (param, max) in [
            ("manip.pv.tsp", 850.0),
            ("in.pv.tsp", 830.0),
            ("ga.pv.tsp", 1020.0),
            ("al.pv.tsp", 1120.0),
        ] {
            ceilings.insert(SmolStr::new(param), max);
        }
        Self { ceilings }
    }
}

impl SafetyLimits {
    /// No ceilings at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            ceilings: IndexMap::new(),
        }
    }

    /// Add or replace the ceiling for `param`.
    pub fn insert(&mut self, param: &str, max: f64) {
        self.ceilings.insert(canonical_name(param), max);
    }

    #[must_use]
    pub fn ceiling(&self, param: &str) -> Option<f64> {
        self.ceilings.get(canonical_name(param).as_str()).copied()
    }

    /// `value` capped at the ceiling of `param`, if it has one.
    #[must_use]
    pub fn clamp(&self, param: &str, value: f64) -> f64 {
        match self.ceiling(param) {
            Some(max) if value > max => max,
            _ => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub standby_at_exit: bool,
    pub start_policy: StartPolicy,
    pub verify_retries: u32,
    /// Pause between a set and its readback.
    pub readback_delay: Duration,
    /// Extra settle time for cracker valves before reading back.
    pub valve_settle: Duration,
    /// Backoff between verification attempts.
    pub verify_backoff: Duration,
    pub verify_tolerance: f64,
    pub limits: SafetyLimits,
    pub ramp: RampSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            standby_at_exit: true,
            start_policy: StartPolicy::Atomic,
            verify_retries: 10,
            readback_delay: Duration::from_millis(100),
            valve_settle: Duration::from_secs(1),
            verify_backoff: Duration::from_secs(1),
            verify_tolerance: 0.1,
            limits: SafetyLimits::default(),
            ramp: RampSettings::default(),
        }
    }
}

/// Sampling plan for [`RecipeSession::read_pressures`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureSampling {
    pub samples: usize,
    pub delay_s: f64,
    /// Required relative standard deviation of the BFM reading.
    pub rel_error: f64,
    pub max_t_s: f64,
}

impl Default for PressureSampling {
    fn default() -> Self {
        Self {
            samples: 20,
            delay_s: 1.0,
            rel_error: 0.02,
            max_t_s: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureReading {
    pub bfm: f64,
    pub bfm_std: f64,
    pub mbe: f64,
    pub mbe_std: f64,
    /// Precision was not reached within the time budget.
    pub timed_out: bool,
}

pub struct RecipeSession<S: ParameterStore> {
    store: S,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    started: bool,
    finished: bool,
    timer_origin: f64,
}

impl<S: ParameterStore> std::fmt::Debug for RecipeSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipeSession")
            .field("config", &self.config)
            .field("started", &self.started)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<S: ParameterStore> RecipeSession<S> {
    pub fn new(store: S, config: SessionConfig) -> Self {
        Self::with_clock(store, config, Arc::new(StdClock::new()))
    }

    /// `clock` paces readback delays and verification backoff.
    pub fn with_clock(store: S, config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            started: false,
            finished: false,
            timer_origin: 0.0,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Claim the running-recipes counter according to the start policy.
    pub fn start_recipe(&mut self) -> Result<(), MbeError> {
        if self.started {
            warn!("recipe already started in this session");
            return Ok(());
        }
        match self.config.start_policy {
            StartPolicy::Atomic => {
                if !self.store.try_start_recipe()? {
                    let running = self.recipes_running().unwrap_or(1);
                    warn!(running, "recipe start refused");
                    return Err(MbeError::RecipeAlreadyRunning(running));
                }
                self.started = true;
            }
            StartPolicy::CheckThenIncrement => {
                let before = self.recipes_running()?;
                if before != 0 {
                    warn!(running = before, "recipe start refused");
                    return Err(MbeError::RecipeAlreadyRunning(before));
                }
                if !self.store.set_param(RECIPES_RUNNING, "inc")? {
                    return Err(MbeError::Protocol("recipe counter increment rejected".into()));
                }
                // The increment landed, so the exit path must give it back
                // even if the readback below disagrees.
                self.started = true;
                let after = self.recipes_running()?;
                if after != before + 1 {
                    return Err(MbeError::CounterMismatch { before, after });
                }
            }
        }
        info!(policy = self.config.start_policy.as_str(), "recipe started");
        Ok(())
    }

    /// Value of the shared running-recipes counter.
    pub fn recipes_running(&self) -> Result<u32, MbeError> {
        let value = self
            .store
            .get_f64(RECIPES_RUNNING)?
            .ok_or_else(|| MbeError::Protocol("recipe counter unavailable".into()))?;
        if !(0.0..=f64::from(u32::MAX)).contains(&value) {
            return Err(MbeError::Protocol(format!("recipe counter out of range: {value}").into()));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(value.round() as u32)
    }

    pub fn get_param(&self, name: &str) -> Result<Option<ParamValue>, MbeError> {
        let value = self.store.get_param(name)?;
        debug!(param = name, value = ?value, "get");
        Ok(value)
    }

    /// Set `name`, then read it back until it matches. Numeric setpoints with
    /// a ceiling are capped first; numeric text counts as numeric. A value
    /// that never reads back is a hard failure.
    pub fn set_param(&self, name: &str, value: impl Into<ParamValue>) -> Result<(), MbeError> {
        let mut expected = match value.into() {
            ParamValue::Text(text) => ParamValue::parse_reply(&text),
            other => other,
        };
        if let ParamValue::Float(requested) = expected {
            let capped = self.config.limits.clamp(name, requested);
            if capped < requested {
                warn!(param = name, requested, max = capped, "setpoint above maximum, capped");
                expected = ParamValue::Float(capped);
            }
        }
        let text = expected.to_string();
        let (readback, settle) = readback_name(name);
        let attempts = self.config.verify_retries.max(1);
        let mut actual = SmolStr::default();
        for attempt in 1..=attempts {
            let accepted = self.store.set_param(name, &text)?;
            if !accepted {
                debug!(param = name, value = %text, attempt, "set rejected");
            }
            self.clock.sleep(self.config.readback_delay);
            if settle {
                self.clock.sleep(self.config.valve_settle);
            }
            match self.store.get_param(readback)? {
                Some(current) if current.matches(&expected, self.config.verify_tolerance) => {
                    info!(param = name, value = %text, "parameter set");
                    return Ok(());
                }
                Some(current) => actual = SmolStr::new(current.to_string()),
                None => {
                    actual = SmolStr::new_inline("unknown parameter");
                    break;
                }
            }
            if attempt < attempts {
                self.clock.sleep(self.config.verify_backoff);
            }
        }
        error!(param = name, expected = %text, %actual, "could not set parameter");
        Err(MbeError::Verification {
            param: SmolStr::new(name),
            expected: SmolStr::new(text),
            actual,
        })
    }

    /// Drive each shutter and confirm its new state. `open[i]` applies to
    /// `names[i]`.
    pub fn shutter(&self, names: &[&str], open: &[bool]) -> Result<(), MbeError> {
        if names.len() != open.len() {
            return Err(MbeError::InvalidCommand(
                format!("{} shutters but {} states", names.len(), open.len()).into(),
            ));
        }
        for (name, open) in names.iter().zip(open) {
            let state = ShutterState::from_open(*open);
            self.store.set_shutter(name, state)?;
            self.clock.sleep(self.config.readback_delay);
            let current = self.store.get_param(&format!("Shutter.{name}"))?;
            let expected = ParamValue::from(state.as_str());
            match current {
                Some(current) if current.matches(&expected, 0.0) => {
                    info!(shutter = name, state = state.as_str(), "shutter moved");
                }
                other => {
                    let actual = other.map_or_else(|| "unknown shutter".to_string(), |v| v.to_string());
                    error!(shutter = name, state = state.as_str(), %actual, "shutter did not move");
                    return Err(MbeError::Verification {
                        param: SmolStr::new(format!("Shutter.{name}")),
                        expected: SmolStr::new(state.as_str()),
                        actual: SmolStr::new(actual),
                    });
                }
            }
        }
        Ok(())
    }

    /// Let `seconds` pass on the store's time base.
    pub fn waiting(&self, seconds: f64) -> Result<(), MbeError> {
        info!(seconds, "waiting");
        self.store.wait(seconds)
    }

    /// Record the origin for [`Self::timer_wait`].
    pub fn timer_start(&mut self) -> Result<(), MbeError> {
        self.timer_origin = self.store.elapsed()?;
        info!("starting timer");
        Ok(())
    }

    /// Wait until `seconds` have passed since [`Self::timer_start`],
    /// regardless of how long the work in between took.
    pub fn timer_wait(&self, seconds: f64) -> Result<(), MbeError> {
        let now = self.store.elapsed()?;
        let elapsed = now - self.timer_origin;
        info!(seconds, elapsed, "waiting for timer");
        let remaining = seconds - elapsed;
        if remaining > 0.0 {
            self.store.wait(remaining)?;
        }
        info!("timer is up");
        Ok(())
    }

    /// Wait for `device` to reach `target` (its own setpoint if `None`).
    pub fn wait_to_reach_temp(
        &self,
        device: &str,
        target: Option<f64>,
        tolerance: Option<f64>,
        timeout_on: bool,
    ) -> Result<RampOutcome, MbeError> {
        let mut request = RampTarget::new(device);
        if let Some(target) = target {
            request = request.target(target);
        }
        if let Some(tolerance) = tolerance {
            request = request.tolerance(tolerance);
        }
        if !timeout_on {
            request = request.without_timeout();
        }
        ramp::wait_to_reach(&self.store, &request, &self.config.ramp)
    }

    /// Sample `BFM.P` and `MBE.P` until the BFM reading is precise enough or
    /// the time budget runs out.
    pub fn read_pressures(&self, sampling: PressureSampling) -> Result<PressureReading, MbeError> {
        let started = self.store.elapsed()?;
        let mut bfm = SlidingWindow::new(sampling.samples);
        let mut mbe = SlidingWindow::new(sampling.samples);
        let mut timed_out = false;
        loop {
            bfm.push(self.read_number("BFM.P")?);
            mbe.push(self.read_number("MBE.P")?);
            if bfm.is_full() {
                let mean = bfm.mean().unwrap_or_default();
                let std_dev = bfm.std_dev().unwrap_or_default();
                let relative = relative_error(mean, std_dev);
                if relative < sampling.rel_error {
                    info!(error_pct = relative * 100.0, "pressure precision reached");
                    break;
                }
                if self.store.elapsed()? > started + sampling.max_t_s {
                    warn!(error_pct = relative * 100.0, "pressure reading timed out");
                    timed_out = true;
                    break;
                }
            }
            self.store.wait(sampling.delay_s)?;
        }
        let reading = PressureReading {
            bfm: bfm.mean().unwrap_or_default(),
            bfm_std: bfm.std_dev().unwrap_or_default(),
            mbe: mbe.mean().unwrap_or_default(),
            mbe_std: mbe.std_dev().unwrap_or_default(),
            timed_out,
        };
        info!(
            bfm = reading.bfm,
            bfm_std = reading.bfm_std,
            mbe = reading.mbe,
            mbe_std = reading.mbe_std,
            "pressures"
        );
        Ok(reading)
    }

    /// Insert or retract the beam flux monitor and confirm its end position.
    pub fn bfm(&self, insert: bool) -> Result<(), MbeError> {
        let position = self.read_number(BFM_POSITION)?;
        if bfm_in_place(position, insert) {
            return Ok(());
        }
        let button = if insert { Button::BfmIn } else { Button::BfmOut };
        info!(insert, "moving BFM");
        self.store.press(button)?;
        self.waiting(BFM_TRAVEL_S)?;
        let position = self.read_number(BFM_POSITION)?;
        if !bfm_in_place(position, insert) {
            let expected = if insert { "inserted" } else { "retracted" };
            error!(position, expected, "BFM did not move");
            return Err(MbeError::Verification {
                param: SmolStr::new_inline("BFM.LT"),
                expected: SmolStr::new_inline(expected),
                actual: SmolStr::new(position.to_string()),
            });
        }
        info!(insert, "BFM in position");
        Ok(())
    }

    /// Average pyrometer reading over `samples` points, with its variance.
    pub fn take_pyro_reading(&self, samples: usize) -> Result<(f64, f64), MbeError> {
        self.shutter(&["Pyrometer"], &[true])?;
        let mut window = SlidingWindow::new(samples);
        let sampled = (0..samples.max(1)).try_for_each(|_| {
            self.store.wait(PYRO_INTERVAL_S)?;
            window.push(self.read_number("Pyrometer.T")?);
            Ok::<_, MbeError>(())
        });
        let closed = self.shutter(&["Pyrometer"], &[false]);
        sampled?;
        closed?;
        let mean = window.mean().unwrap_or_default();
        let std_dev = window.std_dev().unwrap_or_default();
        info!(mean, variance = std_dev * std_dev, "pyrometer reading");
        Ok((mean, std_dev * std_dev))
    }

    /// Manipulator thermocouple minus the averaged pyrometer reading.
    pub fn manip_offset(&self, samples: usize) -> Result<f64, MbeError> {
        let (pyro, _) = self.take_pyro_reading(samples)?;
        let offset = self.read_number("Manip.PV")? - pyro;
        info!(pyro, offset, "manipulator offset");
        Ok(offset)
    }

    /// Steer the manipulator until the pyrometer reads `desired`, re-measuring
    /// the offset each round and settling [`MANIP_SETTLE_S`] after each new
    /// setpoint. Returns the last setpoint.
    pub fn converge_to_temp(
        &self,
        desired: f64,
        iterations: usize,
        samples: usize,
    ) -> Result<f64, MbeError> {
        info!(desired, "converging with pyrometer");
        let mut setpoint = self.read_number("Manip.PV.TSP")?;
        for _ in 0..iterations {
            setpoint = desired + self.manip_offset(samples)?;
            info!(setpoint, "manipulator setpoint adjusted");
            self.set_param("Manip.PV.TSP", setpoint)?;
            self.waiting(MANIP_SETTLE_S)?;
        }
        Ok(setpoint)
    }

    /// Have a virtual controller save its tick log under `filename`.
    pub fn plot_log(&self, filename: Option<&str>) -> Result<(), MbeError> {
        info!(file = filename.unwrap_or("default"), "exporting controller log");
        self.store.export_log(filename)
    }

    /// Set `param` to the setpoint `calibration` gives for `flux`.
    pub fn set_from_calibration(
        &self,
        param: &str,
        calibration: &dyn Calibration,
        flux: f64,
    ) -> Result<f64, MbeError> {
        let setpoint = calibration.calc_setpoint(flux);
        info!(param, flux, setpoint, "setpoint from calibration");
        self.set_param(param, setpoint)?;
        Ok(setpoint)
    }

    /// Iteratively trim `param` until the BFM reads `desired`, correcting the
    /// calibration by the measured pressure error each round. Returns the
    /// final setpoint.
    pub fn converge_with_bfm(
        &self,
        param: &str,
        calibration: &dyn Calibration,
        desired: f64,
        iterations: usize,
        sampling: PressureSampling,
        withdraw: bool,
    ) -> Result<f64, MbeError> {
        info!(param, desired, "converging with BFM");
        self.bfm(true)?;
        let mut offset = 0.0;
        let mut setpoint = self.set_from_calibration(param, calibration, desired)?;
        for _ in 0..iterations {
            self.waiting(BFM_TRAVEL_S)?;
            let reading = self.read_pressures(sampling)?;
            offset += desired - reading.bfm;
            setpoint = self.set_from_calibration(param, calibration, desired + offset)?;
            info!(correction = desired - reading.bfm, setpoint, "calibration adjusted");
        }
        if withdraw {
            self.bfm(false)?;
        }
        Ok(setpoint)
    }

    /// Close all shutters, zero valves and rotation, ramp hot cells down and
    /// retract the BFM. Every step is attempted; the first failure is
    /// returned.
    pub fn set_standby(&self) -> Result<(), MbeError> {
        info!("setting chamber to standby");
        let mut first_error = None;
        let mut record = |result: Result<(), MbeError>| {
            if let Err(err) = result {
                error!(%err, "standby step failed");
                first_error.get_or_insert(err);
            }
        };

        for shutter in STANDBY_SHUTTERS {
            record(self.shutter(&[*shutter], &[false]));
        }
        for output in ZERO_OUTPUTS {
            match self.set_param(output.param, 0.0) {
                Err(err) if !output.required => warn!(param = output.param, %err, "could not zero output"),
                result => record(result),
            }
        }
        for cell in PID_STANDBY {
            record(self.standby_pid_cell(cell.device, cell.tsp, cell.rate));
        }
        for cell in MANUAL_STANDBY {
            record(
                self.set_param(&format!("{}.Mode", cell.device), ControlMode::Manual)
                    .and_then(|()| self.set_param(&format!("{}.OP.Rate", cell.device), cell.op_rate))
                    .and_then(|()| self.set_param(&format!("{}.OP.TSP", cell.device), cell.op_tsp)),
            );
        }
        record(self.bfm(false));

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn standby_pid_cell(&self, device: &str, tsp: f64, rate: f64) -> Result<(), MbeError> {
        let pv = self.read_number(&format!("{device}.PV"))?;
        if pv <= tsp {
            debug!(device, pv, tsp, "cell below standby, left alone");
            return Ok(());
        }
        self.set_param(&format!("{device}.Mode"), ControlMode::Auto)?;
        self.set_param(&format!("{device}.PV.Rate"), rate)?;
        self.set_param(&format!("{device}.PV.TSP"), tsp)
    }

    /// `true` when every cell reads inside its idle band and every growth
    /// shutter is closed. Each violation is logged.
    pub fn check_standby(&self) -> Result<bool, MbeError> {
        let mut idle = true;
        for check in STANDBY_CHECKS {
            let value = self.read_number(check.param)?;
            if !check.contains(value) {
                warn!(param = check.param, value, min = check.min, max = check.max, "standby check failed");
                idle = false;
            }
        }
        let closed = ParamValue::from(ShutterState::Closed.as_str());
        for shutter in CHECKED_SHUTTERS {
            let state = self.store.get_param(&format!("Shutter.{shutter}"))?;
            if !state.is_some_and(|state| state.matches(&closed, 0.0)) {
                warn!(shutter, "standby check failed: shutter open");
                idle = false;
            }
        }
        Ok(idle)
    }

    /// Run the exit sequence now and report the first failure.
    pub fn finish(mut self) -> Result<(), MbeError> {
        self.cleanup()
    }

    fn cleanup(&mut self) -> Result<(), MbeError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let mut first_error = None;
        if self.started {
            info!("exiting cleanly");
            if self.config.standby_at_exit {
                if let Err(err) = self.set_standby() {
                    first_error.get_or_insert(err);
                }
            }
            match self.store.set_param(RECIPES_RUNNING, "dec") {
                Ok(true) => {
                    self.started = false;
                    info!("recipe counter released");
                }
                Ok(false) => {
                    error!("recipe counter decrement rejected");
                    first_error.get_or_insert(MbeError::Protocol(
                        "recipe counter decrement rejected".into(),
                    ));
                }
                Err(err) => {
                    error!(%err, "recipe counter decrement failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Err(err) = self.store.close() {
            warn!(%err, "closing store");
            first_error.get_or_insert(err);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn read_number(&self, name: &str) -> Result<f64, MbeError> {
        match self.store.get_param(name)? {
            Some(ParamValue::Float(value)) => Ok(value),
            other => Err(MbeError::Verification {
                param: SmolStr::new(name),
                expected: SmolStr::new_inline("a number"),
                actual: SmolStr::new(
                    other.map_or_else(|| "unknown parameter".to_string(), |v| v.to_string()),
                ),
            }),
        }
    }
}

impl<S: ParameterStore> Drop for RecipeSession<S> {
    fn drop(&mut self) {
        if let Err(err) = self.cleanup() {
            error!(%err, "recipe session cleanup failed");
        }
    }
}

/// Parameter to read back after setting `name`, and whether it needs the
/// valve settle time.
fn readback_name(name: &str) -> (&str, bool) {
    match canonical_name(name).as_str() {
        "manip.rs.rpm" => ("Manip.RS", false),
        "ascracker.valve.op" => ("AsCracker.Valve", true),
        "sbcracker.valve.op" => ("SbCracker.Valve", true),
        _ => (name, false),
    }
}

fn bfm_in_place(position: f64, insert: bool) -> bool {
    if insert {
        position >= BFM_INSERTED_MIN
    } else {
        position == 0.0
    }
}

fn relative_error(mean: f64, std_dev: f64) -> f64 {
    if std_dev == 0.0 {
        0.0
    } else if mean == 0.0 {
        f64::INFINITY
    } else {
        (std_dev / mean).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_policy_parses_config_spellings() {
        assert_eq!(StartPolicy::parse("Atomic"), Some(StartPolicy::Atomic));
        assert_eq!(
            StartPolicy::parse("check_then_increment"),
            Some(StartPolicy::CheckThenIncrement)
        );
        assert_eq!(StartPolicy::parse("sometimes"), None);
    }

    #[test]
    fn limits_cap_only_listed_setpoints() {
        let mut limits = SafetyLimits::default();
        assert_eq!(limits.clamp("Manip.PV.TSP", 900.0), 850.0);
        assert_eq!(limits.clamp("manip.pv.tsp", 500.0), 500.0);
        assert_eq!(limits.clamp("Sb.PV.TSP", 2000.0), 2000.0);
        limits.insert("Sb.PV.TSP", 600.0);
        assert_eq!(limits.clamp("sb.pv.tsp", 2000.0), 600.0);
        assert_eq!(SafetyLimits::none().clamp("manip.pv.tsp", 900.0), 900.0);
    }

    #[test]
    fn readback_uses_short_aliases() {
        assert_eq!(readback_name("Manip.RS.RPM"), ("Manip.RS", false));
        assert_eq!(readback_name("AsCracker.Valve.OP"), ("AsCracker.Valve", true));
        assert_eq!(readback_name("Ga.PV.TSP"), ("Ga.PV.TSP", false));
    }

    #[test]
    fn relative_error_handles_flat_and_zero_readings() {
        assert_eq!(relative_error(1.0e-7, 0.0), 0.0);
        assert!(relative_error(0.0, 1.0).is_infinite());
        assert!((relative_error(2.0, 0.02) - 0.01).abs() < 1e-12);
    }
}
