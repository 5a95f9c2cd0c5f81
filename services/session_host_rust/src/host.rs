//! Timer-driven host around the session engine.
//!
//! The engine lives behind a `parking_lot::Mutex`; every timer callback
//! locks, mutates, and releases before anything awaits, so callbacks are
//! serialized exactly as the core's cooperative model requires. Observable
//! deltas fan out on a broadcast channel that a transport collaborator
//! subscribes to; persistence is serialized under the lock and written
//! fire-and-forget off the tick path.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use wheelhouse_rust_core::engine::{
    SessionEngine, SpinRequestResult, SpinResolution, SpinStartInfo,
};
use wheelhouse_rust_core::events::MarketEvent;
use wheelhouse_rust_core::orders::OrderUpdate;
use wheelhouse_rust_core::MarketSnapshot;

use crate::config::Config;

/// Broadcast capacity; a slow transport drops old deltas rather than
/// stalling ticks.
const CHANNEL_CAPACITY: usize = 256;

/// Messages the transport collaborator fans out to clients.
///
/// `OrderUpdates` entries carry the owning player; scoping them to that
/// player is the transport's job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum HostEvent {
    MarketDelta(MarketSnapshot),
    OrderUpdates(Vec<OrderUpdate>),
    EventFired(MarketEvent),
    SpinStarted(SpinStartInfo),
    SpinResolved(SpinResolution),
}

/// Owns the engine and its timers.
#[derive(Clone)]
pub struct SessionHost {
    engine: Arc<Mutex<SessionEngine>>,
    config: Config,
    events_tx: broadcast::Sender<HostEvent>,
}

impl SessionHost {
    pub fn new(engine: SessionEngine, config: Config) -> Self {
        let (events_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            engine: Arc::new(Mutex::new(engine)),
            config,
            events_tx,
        }
    }

    pub fn engine(&self) -> Arc<Mutex<SessionEngine>> {
        self.engine.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events_tx.subscribe()
    }

    /// Publish to whoever is listening; no subscribers is not an error.
    fn publish(tx: &broadcast::Sender<HostEvent>, event: HostEvent) {
        let _ = tx.send(event);
    }

    /// Spawn the market, order, event, and persistence loops.
    pub fn start(&self) {
        info!(
            "starting session host (market {} ms, orders {} ms)",
            self.config.market_tick_ms, self.config.order_tick_ms
        );

        // Market tick: 1 s.
        {
            let engine = self.engine.clone();
            let tx = self.events_tx.clone();
            let period = Duration::from_millis(self.config.market_tick_ms);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    let snapshot = {
                        let mut engine = engine.lock();
                        engine.tick_market().then(|| engine.snapshot())
                    };
                    if let Some(snapshot) = snapshot {
                        Self::publish(&tx, HostEvent::MarketDelta(snapshot));
                    }
                }
            });
        }

        // Order tick: 500 ms.
        {
            let engine = self.engine.clone();
            let tx = self.events_tx.clone();
            let period = Duration::from_millis(self.config.order_tick_ms);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    let updates = engine.lock().tick_orders();
                    if !updates.is_empty() {
                        debug!("{} order update(s)", updates.len());
                        Self::publish(&tx, HostEvent::OrderUpdates(updates));
                    }
                }
            });
        }

        // Event scheduler: self-rescheduling randomized interval.
        {
            let engine = self.engine.clone();
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                loop {
                    let delay = engine.lock().next_event_delay();
                    tokio::time::sleep(delay).await;
                    let fired = engine.lock().tick_events();
                    if let Some(event) = fired {
                        Self::publish(&tx, HostEvent::EventFired(event));
                    }
                }
            });
        }

        // Fire-and-forget persistence.
        {
            let engine = self.engine.clone();
            let path = self.config.state_path.clone();
            let period = Duration::from_secs(self.config.save_interval_secs);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    // Serialize under the lock, write off the tick path.
                    let json = {
                        let engine = engine.lock();
                        serde_json::to_string_pretty(&engine.persisted_state())
                    };
                    let json = match json {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("state serialization failed: {}", e);
                            continue;
                        }
                    };
                    let path = path.clone();
                    tokio::task::spawn_blocking(move || {
                        if let Err(e) = std::fs::write(&path, json) {
                            error!("state save failed: {}", e);
                        }
                    });
                }
            });
        }
    }

    /// Run one full spin round: open the ready phase, wait out the
    /// countdown, spin, wait out the animation, resolve. Chained sub-wheel
    /// spins are scheduled automatically.
    pub async fn run_spin_round(&self, wheel_id: &str, initiator: &str) -> anyhow::Result<()> {
        use wheelhouse_rust_core::SpinRequestResult;

        let result = self
            .engine
            .lock()
            .request_spin(wheel_id, initiator, Vec::new(), false)?;

        let start = match result {
            SpinRequestResult::Started(start) => start,
            SpinRequestResult::ReadyPhaseOpened => {
                info!(
                    "ready phase: betting open for {} s",
                    self.config.ready_countdown_secs
                );
                tokio::time::sleep(Duration::from_secs(self.config.ready_countdown_secs)).await;
                self.engine.lock().close_ready_phase()?
            }
        };
        self.finish_spin(start).await
    }

    async fn finish_spin(&self, start: SpinStartInfo) -> anyhow::Result<()> {
        Self::publish(&self.events_tx, HostEvent::SpinStarted(start.clone()));
        tokio::time::sleep(Duration::from_millis(start.duration_ms)).await;

        let resolution = self.engine.lock().resolve_spin();
        let Some(resolution) = resolution else {
            return Ok(());
        };
        info!("winner: {}", resolution.winner_name);
        let next = resolution.next_action.clone();
        Self::publish(&self.events_tx, HostEvent::SpinResolved(resolution));

        // Sub-wheel chains and spin-again skip the ready phase after a
        // short pause so the result stays visible.
        if let Some(action) = next {
            use wheelhouse_rust_core::NextAction;
            let (target, chain) = match action {
                NextAction::SubWheel {
                    target_wheel_id,
                    visited_chain,
                } => (target_wheel_id, visited_chain),
                NextAction::SpinAgain { wheel_id } => (wheel_id, Vec::new()),
                // Entry add/remove flows go back to the host UI collaborator.
                _ => return Ok(()),
            };
            tokio::time::sleep(Duration::from_secs(2)).await;
            let chained = {
                let mut engine = self.engine.lock();
                match engine.request_spin(&target, "server", chain, true) {
                    Ok(SpinRequestResult::Started(start)) => Some(start),
                    Ok(SpinRequestResult::ReadyPhaseOpened) => None,
                    Err(e) => {
                        warn!("chained spin rejected: {}", e);
                        None
                    }
                }
            };
            if let Some(start) = chained {
                Box::pin(self.finish_spin(start)).await?;
            }
        }
        Ok(())
    }
}
