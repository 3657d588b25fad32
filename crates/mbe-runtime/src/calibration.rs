//! Flux calibration collaborator.
//!
//! Curve fitting lives outside this crate; recipes only hand in something
//! that turns a desired flux into a controller setpoint.

/// Maps a desired flux (beam-equivalent pressure) to a setpoint.
pub trait Calibration {
    /// Setpoint that should produce `flux`.
    fn calc_setpoint(&self, flux: f64) -> f64;
}

impl<F> Calibration for F
where
    F: Fn(f64) -> f64,
{
    fn calc_setpoint(&self, flux: f64) -> f64 {
        self(flux)
    }
}
