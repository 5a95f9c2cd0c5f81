//! Wheelhouse Core - Authoritative simulation for a shared party-game session.
//!
//! This module provides:
//! - Weighted outcome selection with hidden drift, fatigue, and boosts
//! - Per-observer wheel geometry and mid-spin angular boosts
//! - A fictitious stock market tied to observed win probabilities
//! - Timed sentiment events perturbing development and momentum
//! - A synthetic liquidity pool and incremental order fills
//! - Player portfolios with average-cost accounting
//! - One owned `SessionEngine` aggregate driven by host timers

mod types;

pub mod config;
pub mod engine;
pub mod events;
pub mod liquidity;
pub mod market;
pub mod orders;
pub mod portfolio;
pub mod selector;
pub mod utils;
pub mod weights;

pub use engine::{
    MarketSnapshot, OrderRequestKind, PersistedState, SessionEngine, SpinPhase,
    SpinRequestResult, SpinResolution, SpinStartInfo, COOLDOWN_TICKS,
};
pub use types::*;
