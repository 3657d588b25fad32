//! CLI entrypoint for the MBE runtime.

#[path = "mbe-runtime/cli.rs"]
mod cli;
#[path = "mbe-runtime/ctl.rs"]
mod ctl;
#[path = "mbe-runtime/recipe.rs"]
mod recipe;
#[path = "mbe-runtime/serve.rs"]
mod serve;

use clap::Parser;

use cli::{Cli, Command};
use mbe_runtime::{MbeConfig, MbeError};

/// Exit code when the controller cannot be reached or refuses the login.
const EXIT_TRANSPORT: i32 = 2;

fn main() -> anyhow::Result<()> {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        let exit_code = match err.downcast_ref::<MbeError>() {
            Some(err) if err.is_transport() => EXIT_TRANSPORT,
            _ => 1,
        };
        std::process::exit(exit_code);
    }
    Ok(())
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => MbeConfig::load(path)?,
        None => MbeConfig::default(),
    };
    let level = if cli.verbose {
        "debug"
    } else {
        config.log.level.as_str()
    };
    mbe_runtime::logging::init(level, config.log.file.as_deref())?;

    match cli.command {
        Command::Serve {
            listen,
            password,
            chamber,
        } => serve::run_server(&config, listen, password, chamber),
        Command::Ctl { command } => ctl::run_control(&config, &command.join(" ")),
        Command::Standby => recipe::run_standby(&config),
        Command::CheckStandby => recipe::run_check_standby(&config),
        Command::WaitTemp {
            device,
            target,
            tolerance,
            no_timeout,
        } => recipe::run_wait_temp(&config, &device, target, tolerance, !no_timeout),
    }
}
