//! Raw controller command helper.

use mbe_runtime::{Connection, MbeConfig};

pub fn run_control(config: &MbeConfig, command: &str) -> anyhow::Result<()> {
    let conn = Connection::connect(&config.controller.connection)?;
    let reply = conn.send_command(command);
    conn.close()?;
    println!("{}", reply?);
    Ok(())
}
