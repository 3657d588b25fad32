//! Parameter store contract shared by the hardware proxy and the simulator.

use crate::error::MbeError;
use crate::param::{Button, ParamValue, ShutterState};

/// Named-parameter access plus time control for one controller.
///
/// Unknown names and rejected values are soft: `get_param` yields `None` and
/// the setters yield `false`. `Err` is reserved for transport and protocol
/// failures that should unwind the recipe.
pub trait ParameterStore: Send + Sync {
    /// Current value of `name`, or `None` for an unknown parameter.
    fn get_param(&self, name: &str) -> Result<Option<ParamValue>, MbeError>;

    /// Write raw command text to `name`.
    fn set_param(&self, name: &str, value: &str) -> Result<bool, MbeError>;

    /// Trigger a value-less button parameter.
    fn press(&self, button: Button) -> Result<bool, MbeError>;

    /// Drive one shutter, named without the `Shutter.` prefix.
    fn set_shutter(&self, shutter: &str, state: ShutterState) -> Result<bool, MbeError>;

    /// Let `seconds` pass on the controller's time base.
    fn wait(&self, seconds: f64) -> Result<(), MbeError>;

    /// Seconds since the store's time origin.
    fn elapsed(&self) -> Result<f64, MbeError>;

    /// Atomically increment the running-recipes counter if it is zero.
    fn try_start_recipe(&self) -> Result<bool, MbeError>;

    /// Release the underlying transport.
    fn close(&self) -> Result<(), MbeError> {
        Ok(())
    }

    /// Ask the controller to write its tick log, named after `filename`.
    /// Only virtual controllers keep one.
    fn export_log(&self, filename: Option<&str>) -> Result<(), MbeError> {
        Err(MbeError::InvalidCommand(
            format!("log export unsupported ({})", filename.unwrap_or("default")).into(),
        ))
    }

    /// Numeric value of `name`, `None` when unknown or not numeric.
    fn get_f64(&self, name: &str) -> Result<Option<f64>, MbeError> {
        Ok(self.get_param(name)?.and_then(|value| value.as_f64()))
    }
}

impl<T: ParameterStore + ?Sized> ParameterStore for Box<T> {
    fn get_param(&self, name: &str) -> Result<Option<ParamValue>, MbeError> {
        (**self).get_param(name)
    }

    fn set_param(&self, name: &str, value: &str) -> Result<bool, MbeError> {
        (**self).set_param(name, value)
    }

    fn press(&self, button: Button) -> Result<bool, MbeError> {
        (**self).press(button)
    }

    fn set_shutter(&self, shutter: &str, state: ShutterState) -> Result<bool, MbeError> {
        (**self).set_shutter(shutter, state)
    }

    fn wait(&self, seconds: f64) -> Result<(), MbeError> {
        (**self).wait(seconds)
    }

    fn elapsed(&self) -> Result<f64, MbeError> {
        (**self).elapsed()
    }

    fn try_start_recipe(&self) -> Result<bool, MbeError> {
        (**self).try_start_recipe()
    }

    fn close(&self) -> Result<(), MbeError> {
        (**self).close()
    }

    fn export_log(&self, filename: Option<&str>) -> Result<(), MbeError> {
        (**self).export_log(filename)
    }
}
