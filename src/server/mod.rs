// src/server/mod.rs

use anyhow::Result;

use crate::config::Config;

pub mod connection_loop;
pub mod context;
pub mod initialization;
pub mod spawner;
pub mod udp_loop;

pub use context::ServerContext;

/// The main host startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Open the state store, bind both sockets, announce readiness.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn the background tasks (timer tick, UDP receiver).
    spawner::spawn_all(&mut server_context);

    // 3. Accept connections until a stop is requested, then drain.
    connection_loop::run(server_context).await;

    Ok(())
}
