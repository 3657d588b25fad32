//! Recipe-session commands.

use mbe_runtime::{MbeConfig, RampOutcome};

pub fn run_standby(config: &MbeConfig) -> anyhow::Result<()> {
    let mut session = config.open_session()?;
    session.start_recipe()?;
    session.set_standby()?;
    session.finish()?;
    println!("standby applied");
    Ok(())
}

pub fn run_check_standby(config: &MbeConfig) -> anyhow::Result<()> {
    let session = config.open_session()?;
    let ok = session.check_standby()?;
    session.finish()?;
    if ok {
        println!("chamber is in standby");
        Ok(())
    } else {
        anyhow::bail!("chamber is not in standby")
    }
}

pub fn run_wait_temp(
    config: &MbeConfig,
    device: &str,
    target: Option<f64>,
    tolerance: Option<f64>,
    timeout_on: bool,
) -> anyhow::Result<()> {
    let mut session = config.open_session()?;
    session.start_recipe()?;
    let outcome = session.wait_to_reach_temp(device, target, tolerance, timeout_on)?;
    session.finish()?;
    match outcome {
        RampOutcome::AlreadyReached { value } => println!("{device} already at {value}"),
        RampOutcome::Converged { mean, std_dev } => {
            println!("{device} settled at {mean:.2} (std {std_dev:.3})");
        }
        RampOutcome::TimedOut { mean, std_dev } => {
            println!("{device} timed out near {mean:.2} (std {std_dev:.3})");
        }
        RampOutcome::Unavailable { param } => anyhow::bail!("{param} unavailable"),
    }
    Ok(())
}
