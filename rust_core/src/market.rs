//! Market simulation: per-entry stock state and the tick that advances it.
//!
//! Each tradable entry carries an observable `price` chasing a derived
//! `real_value`. Real value is recomputed every tick from the entry's current
//! win probability relative to a uniform baseline, scaled by `development`
//! (a slow-moving quality score nudged by spin wins and sentiment events).
//! Price then moves under three forces: gravity toward real value outside a
//! dead zone, short-term momentum capped by available liquidity, and a small
//! multiplicative noise term.

use std::collections::VecDeque;

use log::debug;
use rand::Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::events::MarketEvent;
use crate::liquidity::LiquidityPool;
use crate::types::OrderSide;
use crate::utils::money::round_to_cents;

/// Price of a stock whose entry wins exactly as often as uniform chance
/// predicts, at development 1.0.
pub const BASE_VALUE: f64 = 100.0;
/// Observable prices never fall below one cent.
pub const PRICE_FLOOR: f64 = 0.01;
/// Bounded price history per stock.
pub const HISTORY_CAP: usize = 50;

/// Mean-reversion rate toward real value.
pub const GRAVITY_RATE: f64 = 0.08;
/// Relative deviations inside this band are left uncorrected.
pub const GRAVITY_DEAD_ZONE: f64 = 0.10;

/// Geometric momentum decay per tick.
pub const MOMENTUM_DECAY: f64 = 0.95;
/// Momentum below this magnitude is zeroed.
pub const MOMENTUM_EPSILON: f64 = 1e-3;
/// Momentum damping per unit of relative distance from real value.
pub const MOMENTUM_DISTANCE_DAMPING: f64 = 4.0;
/// Dollars of price movement per unit momentum per tick (before damping).
pub const MOMENTUM_PRICE_RATE: f64 = 0.02;
/// Liquidity consumed per dollar of momentum-driven movement.
pub const MOMENTUM_SHARES_PER_DOLLAR: f64 = 2.0;

/// Maximum multiplicative noise per tick (±0.3%).
pub const NOISE_MAX: f64 = 0.003;

/// Development change when an entry wins a spin.
pub const WIN_DEVELOPMENT_BONUS: f64 = 0.05;
/// Development change for the entry diametrically opposite the winner.
pub const OPPOSITE_DEVELOPMENT_PENALTY: f64 = 0.02;
/// Momentum kick for the winning entry.
pub const WIN_MOMENTUM_BUMP: f64 = 0.4;
/// Momentum per √share of filled player volume.
pub const TRADE_MOMENTUM_COEF: f64 = 0.05;
/// Per-tick development drift per unit of event sentiment×strength.
pub const EVENT_DEVELOPMENT_RATE: f64 = 0.002;
/// Per-tick momentum drift per unit of event sentiment×strength.
pub const EVENT_MOMENTUM_RATE: f64 = 0.03;

/// Development stays inside these bounds so real value stays positive and
/// finite.
pub const DEVELOPMENT_MIN: f64 = 0.1;
pub const DEVELOPMENT_MAX: f64 = 10.0;

/// Win probability of one entry name, aggregated across duplicate indices.
#[derive(Debug, Clone, Copy)]
pub struct WinProbability {
    /// Share of total effective weight held by this name.
    pub observed: f64,
    /// occurrences / entry count.
    pub uniform: f64,
}

/// Tradable state for one entry name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stock {
    pub price: f64,
    pub prev_price: f64,
    pub real_value: f64,
    pub development: f64,
    pub momentum: f64,
    pub history: VecDeque<f64>,
}

impl Default for Stock {
    fn default() -> Self {
        Self {
            price: BASE_VALUE,
            prev_price: BASE_VALUE,
            real_value: BASE_VALUE,
            development: 1.0,
            momentum: 0.0,
            history: VecDeque::new(),
        }
    }
}

impl Stock {
    /// Relative deviation of price from real value.
    pub fn deviation(&self) -> f64 {
        if self.real_value <= 0.0 {
            return 0.0;
        }
        (self.price - self.real_value) / self.real_value
    }
}

/// Gravity contribution for one tick: zero inside the dead zone, otherwise a
/// fixed fraction of the gap back toward real value.
pub fn gravity_delta(price: f64, real_value: f64) -> f64 {
    if real_value <= 0.0 {
        return 0.0;
    }
    let deviation = (price - real_value) / real_value;
    if deviation.abs() <= GRAVITY_DEAD_ZONE {
        return 0.0;
    }
    (real_value - price) * GRAVITY_RATE
}

/// Momentum-driven price movement before the liquidity cap: proportional to
/// price and momentum, shrinking as price strays from real value.
pub fn damped_push(price: f64, deviation: f64, momentum: f64) -> f64 {
    let damping = 1.0 / (1.0 + MOMENTUM_DISTANCE_DAMPING * deviation.abs());
    price * momentum * MOMENTUM_PRICE_RATE * damping
}

/// All stocks, keyed by entry name.
#[derive(Debug, Clone, Default)]
pub struct MarketBook {
    stocks: FxHashMap<String, Stock>,
}

impl MarketBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stocks(stocks: FxHashMap<String, Stock>) -> Self {
        Self { stocks }
    }

    pub fn stocks(&self) -> &FxHashMap<String, Stock> {
        &self.stocks
    }

    pub fn get(&self, name: &str) -> Option<&Stock> {
        self.stocks.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Stock> {
        self.stocks.get_mut(name)
    }

    pub fn price_of(&self, name: &str) -> Option<f64> {
        self.stocks.get(name).map(|s| s.price)
    }

    pub fn len(&self) -> usize {
        self.stocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stocks.is_empty()
    }

    /// Align the stock table with the active entry names: unseen names get a
    /// fresh stock, names no longer present are removed and returned so the
    /// engine can liquidate positions against their last price.
    pub fn sync_names<'a, I: IntoIterator<Item = &'a String>>(
        &mut self,
        names: I,
    ) -> Vec<(String, f64)> {
        let wanted: Vec<&String> = names.into_iter().collect();
        for name in &wanted {
            self.stocks.entry((*name).clone()).or_default();
        }
        let removed: Vec<String> = self
            .stocks
            .keys()
            .filter(|k| !wanted.iter().any(|n| n == k))
            .cloned()
            .collect();
        removed
            .into_iter()
            .map(|name| {
                let stock = self.stocks.remove(&name).unwrap_or_default();
                (name, stock.price)
            })
            .collect()
    }

    /// Spin-win feedback: the winner's quality improves and gets a momentum
    /// kick, the diametrically opposite entry takes a smaller quality hit.
    pub fn record_win(&mut self, winner: &str, opposite: Option<&str>) {
        if let Some(stock) = self.stocks.get_mut(winner) {
            stock.development =
                (stock.development + WIN_DEVELOPMENT_BONUS).clamp(DEVELOPMENT_MIN, DEVELOPMENT_MAX);
            stock.momentum += WIN_MOMENTUM_BUMP;
        }
        if let Some(name) = opposite {
            if name != winner {
                if let Some(stock) = self.stocks.get_mut(name) {
                    stock.development = (stock.development - OPPOSITE_DEVELOPMENT_PENALTY)
                        .clamp(DEVELOPMENT_MIN, DEVELOPMENT_MAX);
                }
            }
        }
    }

    /// Momentum feedback from a filled player order: ±0.05·√shares.
    pub fn apply_trade_impulse(&mut self, name: &str, side: OrderSide, filled_shares: u32) {
        if filled_shares == 0 {
            return;
        }
        if let Some(stock) = self.stocks.get_mut(name) {
            let impulse = TRADE_MOMENTUM_COEF * (filled_shares as f64).sqrt();
            match side {
                OrderSide::Buy => stock.momentum += impulse,
                OrderSide::Sell => stock.momentum -= impulse,
            }
        }
    }

    /// Advance every stock by one market tick.
    ///
    /// Returns whether anything changed (used by the host to decide whether
    /// to broadcast).
    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        probs: &FxHashMap<String, WinProbability>,
        pool: &mut LiquidityPool,
        events: &[MarketEvent],
        rng: &mut R,
    ) -> bool {
        let mut changed = false;

        for (name, stock) in self.stocks.iter_mut() {
            // Live events drift quality and pressure before valuation.
            for event in events.iter().filter(|e| e.affects(name)) {
                let signed = event.sentiment as f64 * event.strength;
                stock.development = (stock.development + signed * EVENT_DEVELOPMENT_RATE)
                    .clamp(DEVELOPMENT_MIN, DEVELOPMENT_MAX);
                stock.momentum += signed * EVENT_MOMENTUM_RATE;
            }

            // Real value from the current win-probability distribution.
            if let Some(p) = probs.get(name) {
                if p.uniform > 0.0 {
                    stock.real_value =
                        round_to_cents(BASE_VALUE * (p.observed / p.uniform) * stock.development);
                }
            }

            let gravity = gravity_delta(stock.price, stock.real_value);

            // Momentum push, capacity-limited by the pool side it eats into.
            let desired = damped_push(stock.price, stock.deviation(), stock.momentum);
            let push = if desired > 0.0 {
                let taken =
                    pool.take_sell_volume(name, desired * MOMENTUM_SHARES_PER_DOLLAR);
                taken / MOMENTUM_SHARES_PER_DOLLAR
            } else if desired < 0.0 {
                let taken =
                    pool.take_buy_volume(name, -desired * MOMENTUM_SHARES_PER_DOLLAR);
                -(taken / MOMENTUM_SHARES_PER_DOLLAR)
            } else {
                0.0
            };

            stock.momentum *= MOMENTUM_DECAY;
            if stock.momentum.abs() < MOMENTUM_EPSILON {
                stock.momentum = 0.0;
            }

            let mut next = stock.price + gravity + push;
            next *= 1.0 + rng.gen_range(-NOISE_MAX..=NOISE_MAX);
            next = round_to_cents(next.max(PRICE_FLOOR)).max(PRICE_FLOOR);

            stock.prev_price = stock.price;
            stock.price = next;
            stock.history.push_back(next);
            while stock.history.len() > HISTORY_CAP {
                stock.history.pop_front();
            }
            changed = true;

            if gravity != 0.0 || push != 0.0 {
                debug!(
                    "tick {}: price {:.2} rv {:.2} gravity {:+.3} push {:+.3}",
                    name, stock.price, stock.real_value, gravity, push
                );
            }
        }

        changed
    }
}
