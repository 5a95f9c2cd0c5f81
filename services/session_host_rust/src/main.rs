//! Session Host Service (Rust)
//!
//! Responsibilities:
//! - Own the authoritative session engine for one party-game room
//! - Drive the market (1 s), order (500 ms), and event timers
//! - Broadcast per-tick deltas for the transport collaborator
//! - Persist stocks and player records fire-and-forget

mod config;
mod host;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenv::dotenv;
use log::{debug, info, warn};

use wheelhouse_rust_core::config::{SessionConfig, WheelConfig};
use wheelhouse_rust_core::engine::SessionEngine;

use crate::config::Config;
use crate::host::{HostEvent, SessionHost};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::default();
    let state_path = config.state_path.clone();
    let wheel_id = config.wheel_id.clone();
    let auto_spin_secs = config.auto_spin_secs;
    info!(
        "starting session host: wheel '{}' with {} entries",
        wheel_id,
        config.wheel_entries.len()
    );

    let wheel = WheelConfig::new(config.wheel_entries.clone());
    let session = SessionConfig::single_wheel(&wheel_id, wheel);

    let mut engine = SessionEngine::new(session);
    engine.load(Path::new(&state_path));

    let host = SessionHost::new(engine, config);
    host.start();

    // Drain the broadcast channel the way a transport collaborator would.
    {
        let mut rx = host.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                match &event {
                    HostEvent::MarketDelta(delta) => {
                        debug!("market delta: {} stocks", delta.prices.len())
                    }
                    HostEvent::OrderUpdates(updates) => {
                        debug!("order updates: {}", updates.len())
                    }
                    HostEvent::EventFired(e) => info!("event fired: {}", e.headline),
                    HostEvent::SpinStarted(s) => info!("spin started on {}", s.wheel_id),
                    HostEvent::SpinResolved(r) => info!("spin resolved: {}", r.winner_name),
                }
            }
        });
    }

    // Optional standalone mode: the host spins on its own cadence.
    if auto_spin_secs > 0 {
        let spinner = host.clone();
        let wheel = wheel_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(auto_spin_secs)).await;
                if let Err(e) = spinner.run_spin_round(&wheel, "server").await {
                    warn!("auto spin failed: {}", e);
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down, saving state to {}", state_path);
    host.engine()
        .lock()
        .save(Path::new(&state_path))
        .context("final state save")?;
    Ok(())
}
