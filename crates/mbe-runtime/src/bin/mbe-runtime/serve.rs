//! Virtual controller server command.

use mbe_runtime::{MbeConfig, SharedSimulator, VirtualServer};

pub fn run_server(
    config: &MbeConfig,
    listen: Option<String>,
    password: Option<String>,
    chamber: Option<String>,
) -> anyhow::Result<()> {
    let mut settings = config.simulator.clone();
    if let Some(listen) = listen {
        settings.listen = listen.into();
    }
    if let Some(password) = password {
        settings.password = password.into();
    }
    if let Some(chamber) = chamber {
        settings.chamber = chamber.into();
    }
    let simulator = SharedSimulator::new(settings.build());
    let server = VirtualServer::bind(&settings.listen, simulator, settings.password.clone())?;
    println!("virtual controller '{}' on {}", settings.chamber, server.local_addr());
    server.join();
    Ok(())
}
