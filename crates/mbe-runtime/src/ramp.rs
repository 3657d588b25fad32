//! Ramp-and-wait: block until a ramped controller settles at a target.
//!
//! Convergence is advisory. A stuck or slow ramp ends in
//! [`RampOutcome::TimedOut`], which is logged and returned, never raised.
//! Only transport failures surface as `Err`.

#![allow(missing_docs)]

use smol_str::SmolStr;
use tracing::{info, warn};

use crate::error::MbeError;
use crate::stats::SlidingWindow;
use crate::store::ParameterStore;

#[derive(Debug, Clone, PartialEq)]
pub struct RampSettings {
    /// Samples in the convergence window.
    pub window: usize,
    /// Default tolerance when the request does not carry one.
    pub tolerance: f64,
    /// Seconds subtracted from the coarse estimate.
    pub margin_s: f64,
    /// Timeout budget as a multiple of the coarse estimate.
    pub timeout_factor: f64,
    /// Lower bound of the timeout budget.
    pub min_timeout_s: f64,
    /// Polling cadence of the fine phase.
    pub poll_s: f64,
}

impl Default for RampSettings {
    fn default() -> Self {
        Self {
            window: 10,
            tolerance: 1.0,
            margin_s: 3.0,
            timeout_factor: 10.0,
            min_timeout_s: 60.0,
            poll_s: 1.0,
        }
    }
}

/// A convergence request for one controller.
#[derive(Debug, Clone, PartialEq)]
pub struct RampTarget {
    device: SmolStr,
    target: Option<f64>,
    tolerance: Option<f64>,
    timeout_on: bool,
}

impl RampTarget {
    pub fn new(device: impl Into<SmolStr>) -> Self {
        Self {
            device: device.into(),
            target: None,
            tolerance: None,
            timeout_on: true,
        }
    }

    /// Without a target the device's own `PV.TSP` is used.
    #[must_use]
    pub fn target(mut self, value: f64) -> Self {
        self.target = Some(value);
        self
    }

    #[must_use]
    pub fn tolerance(mut self, value: f64) -> Self {
        self.tolerance = Some(value);
        self
    }

    /// Wait without a timeout, for controllers that settle asymptotically.
    #[must_use]
    pub fn without_timeout(mut self) -> Self {
        self.timeout_on = false;
        self
    }

    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    fn param(&self, suffix: &str) -> String {
        format!("{}.{suffix}", self.device)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RampOutcome {
    /// The value was already at or past the target when the wait began.
    AlreadyReached { value: f64 },
    Converged { mean: f64, std_dev: f64 },
    TimedOut { mean: f64, std_dev: f64 },
    /// A required parameter could not be read as a number.
    Unavailable { param: SmolStr },
}

impl RampOutcome {
    #[must_use]
    pub fn is_reached(&self) -> bool {
        matches!(self, Self::AlreadyReached { .. } | Self::Converged { .. })
    }
}

/// Coarse time to target in seconds, never negative.
#[must_use]
pub fn estimate_seconds(current: f64, target: f64, rate_per_min: f64, margin_s: f64) -> f64 {
    if !(rate_per_min.is_finite() && rate_per_min > 0.0) {
        return 0.0;
    }
    ((current - target).abs() / rate_per_min * 60.0 - margin_s).max(0.0)
}

/// `true` when `current` sits at `target` or has moved beyond it in the
/// ramp direction implied by `setpoint`.
#[must_use]
pub fn already_reached(current: f64, setpoint: f64, target: f64, tolerance: f64) -> bool {
    let direction = (setpoint - current).signum();
    if setpoint == current {
        return (current - target).abs() < tolerance;
    }
    (target - current) * direction <= 0.0
}

pub fn wait_to_reach<S>(
    store: &S,
    request: &RampTarget,
    settings: &RampSettings,
) -> Result<RampOutcome, MbeError>
where
    S: ParameterStore + ?Sized,
{
    let started = store.elapsed()?;
    let tolerance = request.tolerance.unwrap_or(settings.tolerance);
    let pv_name = request.param("pv");
    let tsp_name = request.param("pv.tsp");

    // One snapshot defines both the target and the ramp direction.
    let Some(setpoint) = store.get_f64(&tsp_name)? else {
        return Ok(unavailable(&tsp_name));
    };
    let Some(current) = store.get_f64(&pv_name)? else {
        return Ok(unavailable(&pv_name));
    };
    let target = request.target.unwrap_or(setpoint);
    info!(device = request.device(), target, tolerance, "waiting to reach temperature");
    if !request.timeout_on {
        info!(device = request.device(), "timeout disabled");
    }

    if already_reached(current, setpoint, target, tolerance) {
        info!(device = request.device(), value = current, "temperature reached");
        return Ok(RampOutcome::AlreadyReached { value: current });
    }

    let rate = store.get_f64(&request.param("pv.rate"))?.unwrap_or(0.0);
    let estimate = estimate_seconds(current, target, rate, settings.margin_s);
    store.wait(estimate.floor())?;
    let budget = (estimate * settings.timeout_factor).max(settings.min_timeout_s);

    let mut window = SlidingWindow::new(settings.window);
    loop {
        store.wait(settings.poll_s)?;
        let Some(sample) = store.get_f64(&pv_name)? else {
            return Ok(unavailable(&pv_name));
        };
        window.push(sample);
        if !window.is_full() {
            continue;
        }
        let (Some(mean), Some(std_dev)) = (window.mean(), window.std_dev()) else {
            continue;
        };
        if (mean - target).abs() < tolerance && std_dev < tolerance / 2.0 {
            info!(device = request.device(), mean, std_dev, "temperature reached");
            return Ok(RampOutcome::Converged { mean, std_dev });
        }
        if request.timeout_on && store.elapsed()? > started + budget {
            warn!(device = request.device(), target, mean, std_dev, "timeout reached");
            return Ok(RampOutcome::TimedOut { mean, std_dev });
        }
    }
}

fn unavailable(param: &str) -> RampOutcome {
    warn!(param, "cannot read parameter, giving up wait");
    RampOutcome::Unavailable {
        param: SmolStr::new(param),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_subtracts_margin_and_clamps() {
        assert_eq!(estimate_seconds(600.0, 950.0, 10.0, 3.0), 2097.0);
        assert_eq!(estimate_seconds(600.0, 600.5, 10.0, 3.0), 0.0);
        assert_eq!(estimate_seconds(600.0, 950.0, 0.0, 3.0), 0.0);
    }

    #[test]
    fn early_exit_follows_snapshot_direction() {
        // Heating toward 300, target 250 already passed.
        assert!(already_reached(260.0, 300.0, 250.0, 1.0));
        assert!(!already_reached(240.0, 300.0, 250.0, 1.0));
        // Cooling toward 500, target 600 already passed.
        assert!(already_reached(590.0, 500.0, 600.0, 1.0));
        // Idle at setpoint: only reached when sitting on the target.
        assert!(already_reached(950.0, 950.0, 950.2, 1.0));
        assert!(!already_reached(600.0, 600.0, 950.0, 1.0));
    }
}
