//! Synthetic counterparty depth.
//!
//! Player orders never match each other; they consume a per-entry pool of
//! synthetic buy/sell volume. The pool regenerates on every market tick,
//! skewed toward the side that would push price back to fair value, and
//! halves on every order-processing tick so depth cannot pile up unbounded.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Base volume added to each side per market tick.
pub const REPLENISH_BASE: f64 = 3.0;
/// Extra volume per unit of relative price/real-value deviation.
pub const DEVIATION_SKEW: f64 = 8.0;
/// Extra volume per unit of event strength on the sentiment side.
pub const EVENT_BONUS: f64 = 2.0;
/// Fraction of volume surviving each order-processing tick.
pub const DECAY_FACTOR: f64 = 0.5;
/// Volumes below this are zeroed.
pub const DUST_FLOOR: f64 = 0.1;

/// Depth available to fill player orders on one entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LiquidityState {
    /// Synthetic bids: what player *sell* orders fill against.
    pub buy_volume: f64,
    /// Synthetic asks: what player *buy* orders fill against.
    pub sell_volume: f64,
}

/// Per-entry liquidity, keyed by entry name.
#[derive(Debug, Clone, Default)]
pub struct LiquidityPool {
    depth: FxHashMap<String, LiquidityState>,
}

impl LiquidityPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> LiquidityState {
        self.depth.get(name).copied().unwrap_or_default()
    }

    pub fn entry(&mut self, name: &str) -> &mut LiquidityState {
        self.depth.entry(name.to_string()).or_default()
    }

    pub fn remove(&mut self, name: &str) {
        self.depth.remove(name);
    }

    /// Replenish one entry's depth for a market tick.
    ///
    /// `deviation` is `(price - real_value) / real_value`. Overvalued stocks
    /// grow synthetic sell pressure (holders eager to unload), undervalued
    /// ones grow buy pressure; `event_bias` is Σ sentiment×strength over the
    /// entry's live events.
    pub fn replenish(&mut self, name: &str, deviation: f64, event_bias: f64) {
        let state = self.entry(name);
        state.buy_volume += REPLENISH_BASE;
        state.sell_volume += REPLENISH_BASE;

        let skew = deviation.abs() * DEVIATION_SKEW;
        if deviation > 0.0 {
            state.sell_volume += skew;
        } else if deviation < 0.0 {
            state.buy_volume += skew;
        }

        if event_bias > 0.0 {
            state.buy_volume += event_bias * EVENT_BONUS;
        } else if event_bias < 0.0 {
            state.sell_volume += -event_bias * EVENT_BONUS;
        }
    }

    /// Halve all depth; called once per order-processing tick.
    pub fn decay(&mut self) {
        for state in self.depth.values_mut() {
            state.buy_volume *= DECAY_FACTOR;
            state.sell_volume *= DECAY_FACTOR;
            if state.buy_volume < DUST_FLOOR {
                state.buy_volume = 0.0;
            }
            if state.sell_volume < DUST_FLOOR {
                state.sell_volume = 0.0;
            }
        }
    }

    /// Consume up to `wanted` shares of sell-side depth (for buy fills);
    /// returns the shares actually taken.
    pub fn take_sell_volume(&mut self, name: &str, wanted: f64) -> f64 {
        let state = self.entry(name);
        let taken = wanted.min(state.sell_volume).max(0.0);
        state.sell_volume -= taken;
        taken
    }

    /// Consume up to `wanted` shares of buy-side depth (for sell fills).
    pub fn take_buy_volume(&mut self, name: &str, wanted: f64) -> f64 {
        let state = self.entry(name);
        let taken = wanted.min(state.buy_volume).max(0.0);
        state.buy_volume -= taken;
        taken
    }
}
