mod debug_builders;
mod logging;
mod net;
mod physics;
mod spawn;
mod state;
mod suspension_contact;
mod vehicle;

use std::sync::Arc;

use anyhow::Result;
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio::time::{Duration, MissedTickBehavior, interval};

use crate::net::start_websocket_server;
use crate::physics::PhysicsWorld;
use crate::state::SharedGameState;

const TICK_RATE: f32 = 60.0; // Hz
const DEFAULT_BIND: &str = "0.0.0.0:9001";
const DEFAULT_TERRAIN_SEED: u64 = 0x7A4C_2024;

#[tokio::main]
async fn main() -> Result<()> {
    if logging::try_init().is_err() {
        eprintln!("logger already initialised");
    }
    info!("starting track physics server");

    let bind = std::env::var("TRACK_SIM_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let vehicle_file = std::env::var("TRACK_SIM_VEHICLE").ok();
    let seed = match std::env::var("TRACK_SIM_SEED").map(|s| s.parse::<u64>()) {
        Ok(Ok(seed)) => seed,
        Ok(Err(e)) => {
            warn!("ignoring TRACK_SIM_SEED: {e}");
            DEFAULT_TERRAIN_SEED
        }
        Err(_) => DEFAULT_TERRAIN_SEED,
    };

    let physics = Arc::new(Mutex::new(PhysicsWorld::with_config_file(vehicle_file.as_deref(), seed)?));
    let state = Arc::new(Mutex::new(SharedGameState::new()));

    // WebSocket server
    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = start_websocket_server(bind, server_state).await {
            error!("websocket server stopped: {e:#}");
        }
    });

    // Fixed timestep
    let dt = 1.0 / TICK_RATE;
    let mut ticker = interval(Duration::from_secs_f32(dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let mut phys = physics.lock().await;
        let mut game = state.lock().await;

        game.sync_into(&mut phys);
        phys.step(dt);

        game.tick += 1;
        game.broadcast_snapshot(&phys);
    }
}
