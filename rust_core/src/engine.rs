//! The session engine: one owned aggregate of all simulation state.
//!
//! Every external callback (spin requests, bets, orders, the three timer
//! ticks) mutates state through `&mut self` on this one struct, so ordering
//! between callbacks is exactly the order the host invokes them in — no
//! locking inside the core, no mutation outside a handler.
//!
//! The spin lifecycle is an explicit state machine:
//!
//! ```text
//! Idle -> Ready -> Spinning -> (resolve) -> Cooldown -> Idle
//! ```
//!
//! driven by the host's timers (ready countdown, animation duration) and by
//! explicit events (`close_ready_phase`, `resolve_spin`). Chained sub-wheel
//! spins skip Ready and may start during Cooldown.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{SessionConfig, TriggerAction, WheelConfig};
use crate::events::{EventScheduler, MarketEvent};
use crate::liquidity::LiquidityPool;
use crate::market::{MarketBook, Stock, WinProbability};
use crate::orders::{Order, OrderBook, OrderUpdate};
use crate::portfolio::{CostBasis, InventoryItem, PlayerAccount, BASE_INCOME};
use crate::selector::{self, winner_at_angle};
use crate::types::{
    BetError, BetResult, EntryRef, NextAction, OrderError, OrderKind, OrderSide, SpinError,
    SpinOutcome,
};
use crate::utils::money::{from_cents, to_cents, Money};
use crate::weights::{WeightBook, BOOST_WEIGHT_PER_DOLLAR};

/// Market ticks between spin resolution and the next normal spin request.
pub const COOLDOWN_TICKS: u32 = 3;

/// Requested execution rule at the order boundary; a limit request without a
/// price is rejected before an `Order` ever exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderRequestKind {
    Market,
    Limit,
}

/// Ready-phase bookkeeping (the countdown clock itself lives in the host).
#[derive(Debug, Clone)]
pub struct ReadyState {
    pub wheel_id: String,
    pub initiator: String,
    pub visited_chain: Vec<String>,
}

/// A spin in flight.
#[derive(Debug, Clone)]
pub struct ActiveSpin {
    pub wheel_id: String,
    pub initiator: String,
    pub visited_chain: Vec<String>,
    pub outcome: SpinOutcome,
    /// Accumulated angular offset from consumed boost items.
    pub angle_offset: f64,
}

/// The explicit spin lifecycle.
#[derive(Debug, Clone)]
pub enum SpinPhase {
    Idle,
    Ready(ReadyState),
    Spinning(ActiveSpin),
    Cooldown { ticks_remaining: u32 },
}

impl SpinPhase {
    pub fn is_spinning(&self) -> bool {
        matches!(self, SpinPhase::Spinning(_))
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SpinPhase::Idle)
    }
}

/// Public information broadcast when a spin starts (the winner stays
/// server-side until resolution).
#[derive(Debug, Clone, Serialize)]
pub struct SpinStartInfo {
    pub wheel_id: String,
    pub initiator: String,
    pub duration_ms: u64,
    pub min_spins: u32,
    pub visited_chain: Vec<String>,
}

/// Outcome of `request_spin`.
#[derive(Debug, Clone)]
pub enum SpinRequestResult {
    /// A ready/betting phase was opened; the host runs the countdown.
    ReadyPhaseOpened,
    /// The spin started immediately (chained spins skip the ready phase).
    Started(SpinStartInfo),
}

/// Everything produced by resolving one spin.
#[derive(Debug, Clone, Serialize)]
pub struct SpinResolution {
    pub wheel_id: String,
    pub winner_index: usize,
    pub winner_name: String,
    pub bet_results: Vec<BetResult>,
    pub next_action: Option<NextAction>,
    pub expired_events: Vec<MarketEvent>,
}

/// Per-tick observable delta for the transport collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub prices: HashMap<String, Stock>,
    pub portfolios: HashMap<String, HashMap<String, u32>>,
    pub cost_bases: HashMap<String, HashMap<String, CostBasis>>,
    pub active_events: Vec<MarketEvent>,
}

/// State shape owned by the core and persisted verbatim by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub stocks: FxHashMap<String, Stock>,
    pub players: HashMap<String, PlayerAccount>,
}

/// The authoritative simulation core for one session.
pub struct SessionEngine {
    config: SessionConfig,
    /// Bumped on every config swap; per-index state is only valid within one
    /// generation.
    generation: u64,
    players: HashMap<String, PlayerAccount>,
    /// Weight-modifier state per wheel id.
    weights: HashMap<String, WeightBook>,
    market: MarketBook,
    liquidity: LiquidityPool,
    orders: OrderBook,
    events: EventScheduler,
    /// player -> entry index -> staked cents (active wheel, current round).
    bets: HashMap<String, HashMap<usize, i64>>,
    betting_open: bool,
    phase: SpinPhase,
    rng: StdRng,
}

impl SessionEngine {
    /// Build an engine with an OS-entropy RNG.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Build with a caller-supplied RNG (seeded in tests).
    pub fn with_rng(config: SessionConfig, rng: StdRng) -> Self {
        let events = EventScheduler::new(config.event_templates.clone());
        let mut engine = Self {
            config: SessionConfig::default(),
            generation: 0,
            players: HashMap::new(),
            weights: HashMap::new(),
            market: MarketBook::new(),
            liquidity: LiquidityPool::new(),
            orders: OrderBook::new(),
            events,
            bets: HashMap::new(),
            betting_open: false,
            phase: SpinPhase::Idle,
            rng,
        };
        engine.apply_config(config);
        engine
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn phase(&self) -> &SpinPhase {
        &self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn player(&self, name: &str) -> Option<&PlayerAccount> {
        self.players.get(name)
    }

    pub fn market(&self) -> &MarketBook {
        &self.market
    }

    pub fn active_events(&self) -> &[MarketEvent] {
        self.events.active()
    }

    pub fn order(&self, id: Uuid) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn orders_for(&self, player: &str) -> Vec<&Order> {
        self.orders.orders_for(player)
    }

    fn active_wheel(&self) -> Option<&WheelConfig> {
        self.config.active_wheel()
    }

    fn active_entry_names(&self) -> Vec<String> {
        let mut unique: Vec<String> = Vec::new();
        if let Some(wheel) = self.active_wheel() {
            for e in &wheel.entries {
                if !unique.contains(e) {
                    unique.push(e.clone());
                }
            }
        }
        unique
    }

    // ========================================================================
    // Players
    // ========================================================================

    /// Register or reconnect a player.
    pub fn join(&mut self, name: &str) {
        let account = self
            .players
            .entry(name.to_string())
            .or_insert_with(|| PlayerAccount::new(name));
        account.connected = true;
        info!("player joined: {}", name);
    }

    pub fn disconnect(&mut self, name: &str) {
        if let Some(p) = self.players.get_mut(name) {
            p.connected = false;
        }
    }

    /// Host-initiated funds adjustment (positive or negative).
    pub fn adjust_funds(&mut self, name: &str, delta: Money) -> Option<Money> {
        let player = self.players.get_mut(name)?;
        player.funds += delta;
        Some(player.funds)
    }

    /// Hand a consumable boost item to a player (shop collaborator calls in).
    pub fn grant_item(&mut self, name: &str, item: InventoryItem) -> bool {
        match self.players.get_mut(name) {
            Some(p) => {
                p.inventory.push(item);
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Spin lifecycle
    // ========================================================================

    /// Ask for a spin on a wheel.
    ///
    /// Normal requests open a ready/betting phase; chained requests
    /// (`skip_ready`) start immediately and may interrupt a cooldown.
    pub fn request_spin(
        &mut self,
        wheel_id: &str,
        initiator: &str,
        visited_chain: Vec<String>,
        skip_ready: bool,
    ) -> Result<SpinRequestResult, SpinError> {
        if self.phase.is_spinning() {
            return Err(SpinError::AlreadySpinning);
        }
        if matches!(self.phase, SpinPhase::Ready(_)) {
            return Err(SpinError::AlreadyInReadyPhase);
        }
        if matches!(self.phase, SpinPhase::Cooldown { .. }) && !skip_ready {
            return Err(SpinError::CoolingDown);
        }

        let wheel = self
            .config
            .wheels
            .get(wheel_id)
            .ok_or_else(|| SpinError::WheelNotFound(wheel_id.to_string()))?;
        if wheel.len() < 2 {
            return Err(SpinError::NotEnoughEntries);
        }

        if skip_ready {
            let info = self.start_spin(wheel_id, initiator, visited_chain)?;
            return Ok(SpinRequestResult::Started(info));
        }

        self.phase = SpinPhase::Ready(ReadyState {
            wheel_id: wheel_id.to_string(),
            initiator: initiator.to_string(),
            visited_chain,
        });
        self.betting_open = true;
        info!("ready phase opened on {} by {}", wheel_id, initiator);
        Ok(SpinRequestResult::ReadyPhaseOpened)
    }

    /// The host's ready countdown expired: close betting and launch the spin.
    pub fn close_ready_phase(&mut self) -> Result<SpinStartInfo, SpinError> {
        let SpinPhase::Ready(ready) = std::mem::replace(&mut self.phase, SpinPhase::Idle) else {
            return Err(SpinError::AlreadySpinning);
        };
        self.betting_open = false;
        self.start_spin(&ready.wheel_id, &ready.initiator, ready.visited_chain)
    }

    fn start_spin(
        &mut self,
        wheel_id: &str,
        initiator: &str,
        visited_chain: Vec<String>,
    ) -> Result<SpinStartInfo, SpinError> {
        self.betting_open = false;
        // The wheel may have changed while a ready phase was open.
        let wheel = self
            .config
            .wheels
            .get(wheel_id)
            .cloned()
            .ok_or_else(|| SpinError::WheelNotFound(wheel_id.to_string()))?;
        if wheel.len() < 2 {
            return Err(SpinError::NotEnoughEntries);
        }

        if let Some(player) = self.players.get_mut(initiator) {
            player.stats.total_spins += 1;
        }

        let book = self
            .weights
            .entry(wheel_id.to_string())
            .or_insert_with(|| WeightBook::new(wheel.len()));

        // Hidden weights drift on every draw, before the draw reads them.
        book.drift_hidden(&mut self.rng);
        let effective = book.effective_weights(&wheel, None);

        let outcome = selector::draw(&wheel, effective, &mut self.rng)
            .ok_or(SpinError::NotEnoughEntries)?;
        info!(
            "spin started on {} by {} (predetermined: {})",
            wheel_id, initiator, outcome.winner_name
        );

        let start = SpinStartInfo {
            wheel_id: wheel_id.to_string(),
            initiator: initiator.to_string(),
            duration_ms: outcome.duration_ms,
            min_spins: outcome.min_spins,
            visited_chain: visited_chain.clone(),
        };

        self.phase = SpinPhase::Spinning(ActiveSpin {
            wheel_id: wheel_id.to_string(),
            initiator: initiator.to_string(),
            visited_chain,
            outcome,
            angle_offset: 0.0,
        });
        Ok(start)
    }

    /// The landing angle one observer should animate toward, inside that
    /// observer's own weight view of the winning segment.
    pub fn observer_angle(&mut self, observer: &str) -> Option<f64> {
        let (view, winner) = {
            let SpinPhase::Spinning(spin) = &self.phase else {
                return None;
            };
            let wheel = self.config.wheels.get(&spin.wheel_id)?;
            let book = self.weights.get(&spin.wheel_id)?;
            (
                book.effective_weights(wheel, Some(observer)),
                spin.outcome.winner_index,
            )
        };
        Some(selector::landing_angle(&view, winner, &mut self.rng))
    }

    /// Consume one boost item from a player's inventory mid-spin, shifting
    /// the landing angle. Returns the angular offset applied.
    pub fn use_boost_item(&mut self, player_name: &str, item_id: &str) -> Result<f64, BetError> {
        if !self.phase.is_spinning() {
            return Err(BetError::NoSpinInProgress);
        }
        let player = self
            .players
            .get_mut(player_name)
            .ok_or_else(|| BetError::UnknownPlayer(player_name.to_string()))?;
        let idx = player
            .inventory
            .iter()
            .position(|i| i.id == item_id)
            .ok_or(BetError::ItemNotFound)?;
        let item = player.inventory.remove(idx);

        let average = {
            let SpinPhase::Spinning(spin) = &self.phase else {
                return Err(BetError::NoSpinInProgress);
            };
            self.config
                .wheels
                .get(&spin.wheel_id)
                .map(|w| w.average_base_weight())
                .unwrap_or(1.0)
        };
        let offset = selector::item_boost_offset(&mut self.rng, average);

        let SpinPhase::Spinning(spin) = &mut self.phase else {
            return Err(BetError::NoSpinInProgress);
        };
        spin.angle_offset += offset;
        info!(
            "{} used {} (+{:.2} rad, total offset {:.2})",
            player_name, item.name, offset, spin.angle_offset
        );
        Ok(offset)
    }

    /// Finalize the active spin. Idempotent: returns `None` when no spin is
    /// in flight.
    ///
    /// Winner determination honors the accumulated angular offset: the
    /// segment containing the shifted angle overrides the predetermined
    /// winner.
    pub fn resolve_spin(&mut self) -> Option<SpinResolution> {
        if !self.phase.is_spinning() {
            return None;
        }
        let SpinPhase::Spinning(spin) = std::mem::replace(
            &mut self.phase,
            SpinPhase::Cooldown {
                ticks_remaining: COOLDOWN_TICKS,
            },
        ) else {
            unreachable!("checked is_spinning above");
        };

        let Some(wheel) = self.config.wheels.get(&spin.wheel_id).cloned() else {
            warn!("resolving spin on vanished wheel {}", spin.wheel_id);
            return None;
        };

        let winner_index = if spin.angle_offset != 0.0 {
            let final_angle = spin.outcome.target_angle + spin.angle_offset;
            winner_at_angle(&spin.outcome.effective_weights, final_angle)
        } else {
            spin.outcome.winner_index
        };
        let winner_name = wheel.entries[winner_index].clone();
        info!("spin resolved: {} on {}", winner_name, spin.wheel_id);

        // Bets settle against pre-decay boost-inclusive base weights.
        let bet_results = self.settle_bets(&wheel, &spin.wheel_id, winner_index);

        // Fatigue floor for the winner, recovery for everyone else, boost
        // decay for the whole wheel.
        if let Some(book) = self.weights.get_mut(&spin.wheel_id) {
            book.record_win(winner_index);
            book.decay_boosts();
        }

        // Market feedback: winner gains quality, the diametric opposite
        // loses a little.
        let opposite_name = {
            let opposite = (winner_index + wheel.len() / 2) % wheel.len();
            Some(wheel.entries[opposite].clone())
        };
        self.market
            .record_win(&winner_name, opposite_name.as_deref());

        // Win stat when the entry names a player.
        if let Some(player) = self.players.get_mut(&winner_name) {
            player.stats.total_wins += 1;
        }

        // Base income for everyone connected.
        for player in self.players.values_mut() {
            if player.connected {
                player.funds += BASE_INCOME;
            }
        }

        let expired_events = self.events.on_spin_complete();

        let next_action = self.next_action_for(&wheel, &winner_name, &spin);

        Some(SpinResolution {
            wheel_id: spin.wheel_id,
            winner_index,
            winner_name,
            bet_results,
            next_action,
            expired_events,
        })
    }

    fn next_action_for(
        &self,
        wheel: &WheelConfig,
        winner: &str,
        spin: &ActiveSpin,
    ) -> Option<NextAction> {
        match wheel.trigger_for(winner)? {
            TriggerAction::None => None,
            TriggerAction::AddEntry => Some(NextAction::AddEntry {
                wheel_id: spin.wheel_id.clone(),
            }),
            TriggerAction::RemoveEntry => Some(NextAction::RemoveEntry {
                wheel_id: spin.wheel_id.clone(),
            }),
            TriggerAction::SpinAgain => Some(NextAction::SpinAgain {
                wheel_id: self.config.active_wheel_id.clone(),
            }),
            TriggerAction::SubWheel(target) => {
                if spin.visited_chain.contains(target) || !self.config.wheels.contains_key(target) {
                    return None;
                }
                let mut chain = spin.visited_chain.clone();
                chain.push(spin.wheel_id.clone());
                Some(NextAction::SubWheel {
                    target_wheel_id: target.clone(),
                    visited_chain: chain,
                })
            }
        }
    }

    // ========================================================================
    // Bets and boosts
    // ========================================================================

    /// Stake (or unstake, with a negative delta) funds on an entry during the
    /// ready phase. Returns the player's resulting total bet on that entry.
    pub fn place_bet(
        &mut self,
        player_name: &str,
        entry: &EntryRef,
        delta: Money,
    ) -> Result<Money, BetError> {
        let SpinPhase::Ready(ready) = &self.phase else {
            return Err(BetError::BettingClosed);
        };
        if !self.betting_open {
            return Err(BetError::BettingClosed);
        }
        let wheel = self
            .config
            .wheels
            .get(&ready.wheel_id)
            .ok_or_else(|| BetError::EntryNotFound(entry.to_string()))?;
        let index = wheel
            .resolve(entry)
            .ok_or_else(|| BetError::EntryNotFound(entry.to_string()))?;

        let current = self
            .bets
            .get(player_name)
            .and_then(|m| m.get(&index))
            .copied()
            .unwrap_or(0);
        if delta.is_zero() {
            return Ok(Money::from_cents(current));
        }

        let player = self
            .players
            .get_mut(player_name)
            .ok_or_else(|| BetError::UnknownPlayer(player_name.to_string()))?;

        let wanted = (current + delta.cents()).max(0);
        let change = wanted - current;

        let new_total = if change > 0 {
            // Cap the increase by what the player can afford.
            let affordable = change.min(player.funds.cents().max(0));
            if affordable <= 0 {
                return Err(BetError::NotEnoughFunds);
            }
            player.funds -= Money::from_cents(affordable);
            current + affordable
        } else {
            // Refund; change is negative or zero here.
            player.funds += Money::from_cents(-change);
            wanted
        };

        if new_total == 0 {
            if let Some(map) = self.bets.get_mut(player_name) {
                map.remove(&index);
                if map.is_empty() {
                    self.bets.remove(player_name);
                }
            }
        } else {
            self.bets
                .entry(player_name.to_string())
                .or_default()
                .insert(index, new_total);
        }
        info!(
            "bet: {} on {} -> {}",
            player_name,
            entry,
            Money::from_cents(new_total)
        );
        Ok(Money::from_cents(new_total))
    }

    /// Convert funds into additive wheel weight on an entry (0.1 weight per
    /// dollar). Allowed whenever no spin is in flight.
    pub fn place_boost(
        &mut self,
        player_name: &str,
        wheel_id: &str,
        entry: &EntryRef,
        amount: Money,
    ) -> Result<f64, BetError> {
        if self.phase.is_spinning() {
            return Err(BetError::NoSpinInProgress);
        }
        let wheel = self
            .config
            .wheels
            .get(wheel_id)
            .ok_or_else(|| BetError::EntryNotFound(entry.to_string()))?;
        let index = wheel
            .resolve(entry)
            .ok_or_else(|| BetError::EntryNotFound(entry.to_string()))?;
        let wheel_len = wheel.len();

        let player = self
            .players
            .get_mut(player_name)
            .ok_or_else(|| BetError::UnknownPlayer(player_name.to_string()))?;
        let cost = amount.cents().clamp(0, player.funds.cents().max(0));
        if cost <= 0 {
            return Err(BetError::NotEnoughFunds);
        }
        player.funds -= Money::from_cents(cost);

        let added_weight = from_cents(cost) * BOOST_WEIGHT_PER_DOLLAR;
        self.weights
            .entry(wheel_id.to_string())
            .or_insert_with(|| WeightBook::new(wheel_len))
            .add_boost(player_name, index, added_weight);
        info!(
            "boost: {} +{:.1} weight on {} for {}",
            player_name,
            added_weight,
            entry,
            Money::from_cents(cost)
        );
        Ok(added_weight)
    }

    fn settle_bets(
        &mut self,
        wheel: &WheelConfig,
        wheel_id: &str,
        winner_index: usize,
    ) -> Vec<BetResult> {
        if self.bets.is_empty() {
            return Vec::new();
        }
        let weights = match self.weights.get(wheel_id) {
            Some(book) => book.base_plus_boosts(wheel),
            None => wheel.entries.iter().map(|e| wheel.base_weight(e)).collect(),
        };
        let total: f64 = weights.iter().sum();

        let mut results = Vec::new();
        for (player_name, stakes) in std::mem::take(&mut self.bets) {
            let Some(player) = self.players.get_mut(&player_name) else {
                continue;
            };
            for (index, amount_cents) in stakes {
                let entry = wheel
                    .entries
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| format!("#{}", index));
                let weight = weights.get(index).copied().unwrap_or(1.0).max(f64::EPSILON);
                // Boosting an entry shortens its payout: odds follow the
                // boost-inclusive weights, floored at even money.
                let odds = (total / weight).max(1.0);
                let won = index == winner_index;
                let payout_cents = if won {
                    (odds * amount_cents as f64).floor() as i64
                } else {
                    0
                };
                if won {
                    player.funds += Money::from_cents(payout_cents);
                }
                results.push(BetResult {
                    player: player_name.clone(),
                    entry,
                    amount_cents,
                    won,
                    payout_cents,
                });
            }
        }
        results
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Admit a player order against the active stock table.
    pub fn place_order(
        &mut self,
        player_name: &str,
        entry: &EntryRef,
        shares: u32,
        side: OrderSide,
        kind: OrderRequestKind,
        limit_price: Option<f64>,
    ) -> Result<Order, OrderError> {
        if shares == 0 {
            return Err(OrderError::InvalidShares);
        }
        let order_kind = match (kind, limit_price) {
            (OrderRequestKind::Market, _) => OrderKind::Market,
            (OrderRequestKind::Limit, Some(price)) if price > 0.0 => OrderKind::Limit(price),
            (OrderRequestKind::Limit, _) => return Err(OrderError::LimitPriceRequired),
        };

        let name = self
            .resolve_stock_name(entry)
            .ok_or_else(|| OrderError::StockNotFound(entry.to_string()))?;
        let price = self
            .market
            .price_of(&name)
            .ok_or_else(|| OrderError::StockNotFound(entry.to_string()))?;

        let player = self
            .players
            .get(player_name)
            .ok_or_else(|| OrderError::UnknownPlayer(player_name.to_string()))?;

        match side {
            OrderSide::Buy => {
                let cost = Money::from_cents(to_cents(price) * shares as i64);
                if player.funds < cost {
                    return Err(OrderError::InsufficientFunds);
                }
            }
            OrderSide::Sell => {
                if player.portfolio.shares_of(&name) < shares {
                    return Err(OrderError::InsufficientShares);
                }
            }
        }

        let order = Order::new(player_name, &name, side, order_kind, shares);
        let snapshot = order.clone();
        self.orders.push(order);
        Ok(snapshot)
    }

    pub fn cancel_order(&mut self, id: Uuid, player: &str) -> Result<OrderUpdate, OrderError> {
        self.orders.cancel(id, player)
    }

    /// Resolve an entry reference to a stock name: indices go through the
    /// active wheel, names must exist in the stock table.
    fn resolve_stock_name(&self, entry: &EntryRef) -> Option<String> {
        match entry {
            EntryRef::ByIndex(_) => {
                let wheel = self.active_wheel()?;
                let index = wheel.resolve(entry)?;
                let name = wheel.entries.get(index)?;
                self.market.get(name).map(|_| name.clone())
            }
            EntryRef::ByName(name) => self.market.get(name).map(|_| name.clone()),
        }
    }

    // ========================================================================
    // Ticks
    // ========================================================================

    /// 1 s market tick: replenish liquidity, then advance every stock.
    /// Skipped entirely while a spin animation is in flight.
    pub fn tick_market(&mut self) -> bool {
        match &mut self.phase {
            SpinPhase::Spinning(_) => return false,
            SpinPhase::Cooldown { ticks_remaining } => {
                *ticks_remaining = ticks_remaining.saturating_sub(1);
                if *ticks_remaining == 0 {
                    self.phase = SpinPhase::Idle;
                }
            }
            _ => {}
        }

        let probs = self.win_probabilities();
        let names: Vec<String> = self.market.stocks().keys().cloned().collect();
        for name in &names {
            let deviation = self.market.get(name).map(|s| s.deviation()).unwrap_or(0.0);
            let bias = self.events.bias_for(name);
            self.liquidity.replenish(name, deviation, bias);
        }

        self.market.tick(
            &probs,
            &mut self.liquidity,
            self.events.active(),
            &mut self.rng,
        )
    }

    /// 500 ms order tick: decay the pool, then advance pending orders.
    pub fn tick_orders(&mut self) -> Vec<OrderUpdate> {
        self.liquidity.decay();
        self.orders
            .process_tick(&mut self.players, &mut self.market, &mut self.liquidity)
    }

    /// One event-scheduler firing; the host reschedules with
    /// `next_event_delay`.
    pub fn tick_events(&mut self) -> Option<MarketEvent> {
        let names: Vec<String> = self.market.stocks().keys().cloned().collect();
        self.events.fire(&names, &mut self.rng)
    }

    pub fn next_event_delay(&mut self) -> Duration {
        self.events.next_delay(&mut self.rng)
    }

    /// Win probability per unique entry name on the active wheel, against
    /// the uniform baseline.
    fn win_probabilities(&self) -> FxHashMap<String, WinProbability> {
        let mut probs: FxHashMap<String, WinProbability> = FxHashMap::default();
        let Some(wheel) = self.active_wheel() else {
            return probs;
        };
        let n = wheel.len();
        if n == 0 {
            return probs;
        }

        let effective = match self.weights.get(&self.config.active_wheel_id) {
            Some(book) => book.effective_weights(wheel, None),
            None => wheel.entries.iter().map(|e| wheel.base_weight(e)).collect(),
        };
        let total: f64 = effective.iter().sum();
        if total <= 0.0 {
            return probs;
        }

        for (i, name) in wheel.entries.iter().enumerate() {
            let slot = probs.entry(name.clone()).or_insert(WinProbability {
                observed: 0.0,
                uniform: 0.0,
            });
            slot.observed += effective[i] / total;
            slot.uniform += 1.0 / n as f64;
        }
        probs
    }

    // ========================================================================
    // Configuration swaps
    // ========================================================================

    /// Install a new configuration snapshot.
    ///
    /// Per-index weight state is re-validated per wheel; stocks for entries
    /// that vanished are liquidated at their last price (holders credited,
    /// open orders cancelled), and open bets are refunded.
    pub fn apply_config(&mut self, config: SessionConfig) -> Vec<OrderUpdate> {
        self.generation += 1;

        // Re-validate weight books wheel by wheel.
        let mut books = std::mem::take(&mut self.weights);
        for (id, wheel) in &config.wheels {
            let book = match books.remove(id) {
                Some(mut book) => {
                    let old = self
                        .config
                        .wheels
                        .get(id)
                        .map(|w| w.entries.clone())
                        .unwrap_or_default();
                    book.sync_entries(&old, &wheel.entries);
                    book
                }
                None => WeightBook::new(wheel.len()),
            };
            self.weights.insert(id.clone(), book);
        }

        // Refund open bets; their indices belong to the old generation.
        for (player_name, stakes) in std::mem::take(&mut self.bets) {
            if let Some(player) = self.players.get_mut(&player_name) {
                let refund: i64 = stakes.values().sum();
                player.funds += Money::from_cents(refund);
            }
        }

        self.config = config;

        // Align the stock table with the active wheel and liquidate the rest.
        let names = self.active_entry_names();
        let removed = self.market.sync_names(names.iter());
        let mut updates = Vec::new();
        for (name, last_price) in removed {
            info!("entry removed, liquidating {} at {:.2}", name, last_price);
            let price_cents = to_cents(last_price);
            for player in self.players.values_mut() {
                let shares = player.portfolio.drop_entry(&name);
                if shares > 0 {
                    player.funds += Money::from_cents(price_cents * shares as i64);
                }
            }
            updates.extend(self.orders.cancel_for_entry(&name));
            self.liquidity.remove(&name);
            self.events.drop_entry(&name);
        }
        updates
    }

    // ========================================================================
    // Observability & persistence
    // ========================================================================

    /// Everything the collaborator needs to broadcast after a tick.
    pub fn snapshot(&self) -> MarketSnapshot {
        let prices = self
            .market
            .stocks()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut portfolios = HashMap::new();
        let mut cost_bases = HashMap::new();
        for (name, player) in &self.players {
            if !player.portfolio.is_empty() {
                portfolios.insert(name.clone(), player.portfolio.holdings().clone());
                cost_bases.insert(name.clone(), player.portfolio.cost_bases().clone());
            }
        }
        MarketSnapshot {
            prices,
            portfolios,
            cost_bases,
            active_events: self.events.active().to_vec(),
        }
    }

    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            stocks: self.market.stocks().clone(),
            players: self.players.clone(),
        }
    }

    /// Restore persisted stocks/players, then re-align with the active wheel.
    pub fn restore(&mut self, state: PersistedState) {
        self.players = state.players;
        self.market = MarketBook::from_stocks(state.stocks);
        let names = self.active_entry_names();
        self.market.sync_names(names.iter());
    }

    /// Write the persisted state as JSON. The host calls this
    /// fire-and-forget; failures are logged, never fatal.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(&self.persisted_state())?;
        fs::write(path, content)
    }

    /// Load persisted state from JSON, tolerating a missing or corrupt file.
    pub fn load(&mut self, path: &Path) {
        if !path.exists() {
            return;
        }
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<PersistedState>(&content) {
                Ok(state) => self.restore(state),
                Err(e) => warn!("ignoring corrupt state file {:?}: {}", path, e),
            },
            Err(e) => warn!("could not read state file {:?}: {}", path, e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WheelConfig;
    use crate::portfolio::STARTING_FUNDS;

    const WHEEL: &str = "main";

    fn engine_with(entries: &[&str]) -> SessionEngine {
        let wheel = WheelConfig::new(entries.iter().map(|s| s.to_string()).collect());
        let config = SessionConfig::single_wheel(WHEEL, wheel);
        SessionEngine::with_rng(config, StdRng::seed_from_u64(1234))
    }

    fn run_spin(engine: &mut SessionEngine, initiator: &str) -> SpinResolution {
        engine
            .request_spin(WHEEL, initiator, Vec::new(), true)
            .expect("spin starts");
        engine.resolve_spin().expect("spin resolves")
    }

    #[test]
    fn test_spin_lifecycle_phases() {
        let mut engine = engine_with(&["A", "B", "C"]);
        engine.join("alice");

        // Ready phase opens and blocks a second request
        let result = engine
            .request_spin(WHEEL, "alice", Vec::new(), false)
            .unwrap();
        assert!(matches!(result, SpinRequestResult::ReadyPhaseOpened));
        assert_eq!(
            engine
                .request_spin(WHEEL, "bob", Vec::new(), false)
                .unwrap_err(),
            SpinError::AlreadyInReadyPhase
        );

        // Countdown expiry launches the spin
        let start = engine.close_ready_phase().unwrap();
        assert_eq!(start.wheel_id, WHEEL);
        assert!(engine.phase().is_spinning());
        assert_eq!(
            engine
                .request_spin(WHEEL, "bob", Vec::new(), false)
                .unwrap_err(),
            SpinError::AlreadySpinning
        );
        // Market ticks are suppressed mid-spin
        assert!(!engine.tick_market());

        // Resolution enters cooldown
        let resolution = engine.resolve_spin().unwrap();
        assert!(["A", "B", "C"].contains(&resolution.winner_name.as_str()));
        assert!(matches!(engine.phase(), SpinPhase::Cooldown { .. }));
        assert_eq!(
            engine
                .request_spin(WHEEL, "bob", Vec::new(), false)
                .unwrap_err(),
            SpinError::CoolingDown
        );

        // Cooldown drains through market ticks back to idle
        for _ in 0..COOLDOWN_TICKS {
            engine.tick_market();
        }
        assert!(engine.phase().is_idle());
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut engine = engine_with(&["A", "B"]);
        engine.join("alice");
        run_spin(&mut engine, "alice");
        assert!(engine.resolve_spin().is_none());
        assert!(engine.resolve_spin().is_none());
    }

    #[test]
    fn test_spin_rejections() {
        let mut engine = engine_with(&["A", "B"]);
        assert_eq!(
            engine
                .request_spin("nope", "alice", Vec::new(), false)
                .unwrap_err(),
            SpinError::WheelNotFound("nope".to_string())
        );

        let mut tiny = engine_with(&["only"]);
        assert_eq!(
            tiny.request_spin(WHEEL, "alice", Vec::new(), false)
                .unwrap_err(),
            SpinError::NotEnoughEntries
        );
    }

    #[test]
    fn test_base_income_and_stats() {
        let mut engine = engine_with(&["A", "B"]);
        engine.join("alice");
        engine.join("bob");
        engine.disconnect("bob");

        run_spin(&mut engine, "alice");

        // Initiator's spin stat ticked; connected players earned $15
        let alice = engine.player("alice").unwrap();
        assert_eq!(alice.stats.total_spins, 1);
        assert_eq!(alice.funds, STARTING_FUNDS + BASE_INCOME);
        // Disconnected players earn nothing
        let bob = engine.player("bob").unwrap();
        assert_eq!(bob.funds, STARTING_FUNDS);
    }

    #[test]
    fn test_bets_pay_weighted_odds() {
        let mut engine = engine_with(&["A", "B"]);
        engine.join("alice");
        engine.join("bob");

        engine
            .request_spin(WHEEL, "alice", Vec::new(), false)
            .unwrap();
        // Both stake $100: exactly one of them wins at 2x
        engine
            .place_bet("alice", &EntryRef::ByIndex(0), Money::from_dollars(100.0))
            .unwrap();
        engine
            .place_bet("bob", &EntryRef::ByIndex(1), Money::from_dollars(100.0))
            .unwrap();
        assert_eq!(
            engine.player("alice").unwrap().funds,
            STARTING_FUNDS - Money::from_dollars(100.0)
        );

        engine.close_ready_phase().unwrap();
        let resolution = engine.resolve_spin().unwrap();
        assert_eq!(resolution.bet_results.len(), 2);

        let won: Vec<_> = resolution.bet_results.iter().filter(|b| b.won).collect();
        assert_eq!(won.len(), 1);
        // Equal weights on a 2-entry wheel: odds = 2 / 1 = 2x
        assert_eq!(won[0].payout_cents, 2 * 100_00);

        let winner_funds = engine.player(&won[0].player).unwrap().funds;
        assert_eq!(
            winner_funds,
            STARTING_FUNDS - Money::from_dollars(100.0)
                + Money::from_cents(2 * 100_00)
                + BASE_INCOME
        );
    }

    #[test]
    fn test_bet_delta_and_refund_semantics() {
        let mut engine = engine_with(&["A", "B"]);
        engine.join("alice");
        engine
            .request_spin(WHEEL, "alice", Vec::new(), false)
            .unwrap();

        let entry = EntryRef::ByIndex(0);
        let total = engine
            .place_bet("alice", &entry, Money::from_dollars(60.0))
            .unwrap();
        assert_eq!(total, Money::from_dollars(60.0));

        // Removing more than staked clamps to zero and refunds the stake
        let total = engine
            .place_bet("alice", &entry, Money::from_dollars(-100.0))
            .unwrap();
        assert_eq!(total, Money::zero());
        assert_eq!(engine.player("alice").unwrap().funds, STARTING_FUNDS);

        // An increase beyond available funds is capped at the wallet
        engine.adjust_funds("alice", Money::from_dollars(-950.0));
        let total = engine
            .place_bet("alice", &entry, Money::from_dollars(100.0))
            .unwrap();
        assert_eq!(total, Money::from_dollars(50.0));
        assert!(engine.player("alice").unwrap().funds.is_zero());

        // Broke players cannot raise further
        assert_eq!(
            engine
                .place_bet("alice", &entry, Money::from_dollars(10.0))
                .unwrap_err(),
            BetError::NotEnoughFunds
        );
    }

    #[test]
    fn test_betting_closed_outside_ready_phase() {
        let mut engine = engine_with(&["A", "B"]);
        engine.join("alice");
        assert_eq!(
            engine
                .place_bet("alice", &EntryRef::ByIndex(0), Money::from_dollars(5.0))
                .unwrap_err(),
            BetError::BettingClosed
        );
    }

    #[test]
    fn test_cash_boost_decays_after_spin() {
        let mut engine = engine_with(&["A", "B"]);
        engine.join("alice");

        // $100 buys 10.0 weight
        let added = engine
            .place_boost("alice", WHEEL, &EntryRef::ByIndex(0), Money::from_dollars(100.0))
            .unwrap();
        assert!((added - 10.0).abs() < 1e-9);
        assert_eq!(
            engine.player("alice").unwrap().funds,
            STARTING_FUNDS - Money::from_dollars(100.0)
        );

        let before = engine.weights[WHEEL].base_plus_boosts(
            engine.config.wheels.get(WHEEL).unwrap(),
        );
        assert!((before[0] - 11.0).abs() < 1e-9);

        run_spin(&mut engine, "alice");

        // One spin later the boost decayed to 70%
        let after = engine.weights[WHEEL]
            .base_plus_boosts(engine.config.wheels.get(WHEEL).unwrap());
        assert!((after[0] - 8.0).abs() < 1e-9); // 1 + 10*0.7
    }

    #[test]
    fn test_boost_item_offset_shifts_winner() {
        let mut engine = engine_with(&["A", "B", "C", "D"]);
        engine.join("alice");
        engine.grant_item(
            "alice",
            InventoryItem {
                id: "item-1".to_string(),
                name: "Nudge".to_string(),
            },
        );

        // Items only work mid-spin
        assert_eq!(
            engine.use_boost_item("alice", "item-1").unwrap_err(),
            BetError::NoSpinInProgress
        );

        engine
            .request_spin(WHEEL, "alice", Vec::new(), true)
            .unwrap();
        let (predetermined, weights, angle) = {
            let SpinPhase::Spinning(spin) = engine.phase() else {
                panic!("should be spinning");
            };
            (
                spin.outcome.winner_index,
                spin.outcome.effective_weights.clone(),
                spin.outcome.target_angle,
            )
        };

        let offset = engine.use_boost_item("alice", "item-1").unwrap();
        assert!(offset > 0.0);
        assert!(engine.player("alice").unwrap().inventory.is_empty());
        // Item consumed: a second use fails
        assert_eq!(
            engine.use_boost_item("alice", "item-1").unwrap_err(),
            BetError::ItemNotFound
        );

        let resolution = engine.resolve_spin().unwrap();
        let expected = winner_at_angle(&weights, angle + offset);
        assert_eq!(resolution.winner_index, expected);
        // The shifted winner may or may not equal the predetermined one;
        // both must agree with the angle math.
        let _ = predetermined;
    }

    #[test]
    fn test_observer_angle_lands_in_own_view() {
        let mut engine = engine_with(&["A", "B", "C"]);
        engine.join("alice");
        engine
            .place_boost("alice", WHEEL, &EntryRef::ByIndex(0), Money::from_dollars(50.0))
            .unwrap();

        engine
            .request_spin(WHEEL, "alice", Vec::new(), true)
            .unwrap();
        let winner = {
            let SpinPhase::Spinning(spin) = engine.phase() else {
                panic!("spinning");
            };
            spin.outcome.winner_index
        };

        let angle = engine.observer_angle("alice").unwrap();
        let wheel = engine.config().wheels.get(WHEEL).unwrap().clone();
        let view = engine.weights[WHEEL].effective_weights(&wheel, Some("alice"));
        assert_eq!(winner_at_angle(&view, angle), winner);
    }

    #[test]
    fn test_order_validation() {
        let mut engine = engine_with(&["A", "B"]);
        engine.join("alice");

        assert_eq!(
            engine
                .place_order(
                    "alice",
                    &EntryRef::ByName("A".into()),
                    0,
                    OrderSide::Buy,
                    OrderRequestKind::Market,
                    None,
                )
                .unwrap_err(),
            OrderError::InvalidShares
        );
        assert_eq!(
            engine
                .place_order(
                    "alice",
                    &EntryRef::ByName("Z".into()),
                    5,
                    OrderSide::Buy,
                    OrderRequestKind::Market,
                    None,
                )
                .unwrap_err(),
            OrderError::StockNotFound("Z".to_string())
        );
        assert_eq!(
            engine
                .place_order(
                    "alice",
                    &EntryRef::ByName("A".into()),
                    5,
                    OrderSide::Buy,
                    OrderRequestKind::Limit,
                    None,
                )
                .unwrap_err(),
            OrderError::LimitPriceRequired
        );
        assert_eq!(
            engine
                .place_order(
                    "alice",
                    &EntryRef::ByName("A".into()),
                    5,
                    OrderSide::Sell,
                    OrderRequestKind::Market,
                    None,
                )
                .unwrap_err(),
            OrderError::InsufficientShares
        );
        // $1,000 wallet cannot cover 11 shares at the $100 base price
        assert_eq!(
            engine
                .place_order(
                    "alice",
                    &EntryRef::ByName("A".into()),
                    11,
                    OrderSide::Buy,
                    OrderRequestKind::Market,
                    None,
                )
                .unwrap_err(),
            OrderError::InsufficientFunds
        );
    }

    #[test]
    fn test_order_fills_through_ticks() {
        let mut engine = engine_with(&["A", "B"]);
        engine.join("alice");

        let order = engine
            .place_order(
                "alice",
                &EntryRef::ByName("A".into()),
                4,
                OrderSide::Buy,
                OrderRequestKind::Market,
                None,
            )
            .unwrap();

        // Build liquidity, then drain the order over order ticks
        let mut filled = false;
        for _ in 0..40 {
            engine.tick_market();
            let updates = engine.tick_orders();
            if updates
                .iter()
                .any(|u| u.order_id == order.id && u.status == crate::types::OrderStatus::Filled)
            {
                filled = true;
                break;
            }
        }
        assert!(filled, "order should complete within 40 ticks");
        assert_eq!(engine.player("alice").unwrap().portfolio.shares_of("A"), 4);

        // Cost basis shares track the portfolio
        let basis = engine
            .player("alice")
            .unwrap()
            .portfolio
            .cost_basis_of("A")
            .unwrap();
        assert_eq!(basis.shares, 4);
        assert!(basis.total_cost_cents > 0);
    }

    #[test]
    fn test_config_swap_liquidates_removed_entries() {
        let mut engine = engine_with(&["A", "B"]);
        engine.join("alice");

        // Alice acquires 3 shares of B at $50 through a direct fill
        engine
            .players
            .get_mut("alice")
            .unwrap()
            .portfolio
            .apply_buy("B", 3, 50_00);
        engine.market.get_mut("B").unwrap().price = 80.0;

        let open = engine
            .place_order(
                "alice",
                &EntryRef::ByName("B".into()),
                1,
                OrderSide::Sell,
                OrderRequestKind::Market,
                None,
            )
            .unwrap();

        // New config drops B entirely
        let wheel = WheelConfig::new(vec!["A".to_string(), "C".to_string()]);
        let updates = engine.apply_config(SessionConfig::single_wheel(WHEEL, wheel));

        // Shares liquidated at the last price: 3 x $80 credited
        assert_eq!(
            engine.player("alice").unwrap().funds,
            STARTING_FUNDS + Money::from_dollars(240.0)
        );
        assert_eq!(engine.player("alice").unwrap().portfolio.shares_of("B"), 0);

        // The open order on B was cancelled with a not-found reason
        let cancelled = updates.iter().find(|u| u.order_id == open.id).unwrap();
        assert_eq!(cancelled.status, crate::types::OrderStatus::Cancelled);

        // Stock table follows the new entry list
        assert!(engine.market().get("B").is_none());
        assert!(engine.market().get("C").is_some());
        assert_eq!(engine.generation(), 2);
    }

    #[test]
    fn test_subwheel_chain_respects_visited() {
        let mut engine = {
            let mut main = WheelConfig::new(vec!["win".to_string(), "lose".to_string()]);
            main.triggers
                .insert("win".to_string(), TriggerAction::SubWheel("bonus".to_string()));
            main.triggers
                .insert("lose".to_string(), TriggerAction::SubWheel("bonus".to_string()));
            let bonus = WheelConfig::new(vec!["x".to_string(), "y".to_string()]);
            let mut config = SessionConfig::single_wheel(WHEEL, main);
            config.wheels.insert("bonus".to_string(), bonus);
            SessionEngine::with_rng(config, StdRng::seed_from_u64(7))
        };
        engine.join("alice");

        engine
            .request_spin(WHEEL, "alice", Vec::new(), true)
            .unwrap();
        let resolution = engine.resolve_spin().unwrap();
        let Some(NextAction::SubWheel {
            target_wheel_id,
            visited_chain,
        }) = resolution.next_action
        else {
            panic!("expected a sub-wheel chain");
        };
        assert_eq!(target_wheel_id, "bonus");
        assert_eq!(visited_chain, vec![WHEEL.to_string()]);

        // A wheel already in the chain is never revisited
        engine
            .request_spin(WHEEL, "alice", vec!["bonus".to_string()], true)
            .unwrap();
        let resolution = engine.resolve_spin().unwrap();
        assert!(resolution.next_action.is_none());
    }

    #[test]
    fn test_event_lifetime_spans_spins() {
        let mut engine = engine_with(&["A", "B"]);
        engine.join("alice");

        // Force events until one lands (capacity allows up to 4)
        let mut fired = None;
        for _ in 0..10 {
            if let Some(e) = engine.tick_events() {
                fired = Some(e);
                break;
            }
        }
        let fired = fired.expect("an event should fire");
        let lifetime = fired.spins_remaining;

        for _ in 0..lifetime {
            assert!(engine
                .active_events()
                .iter()
                .any(|e| e.id == fired.id));
            run_spin(&mut engine, "alice");
        }
        assert!(!engine.active_events().iter().any(|e| e.id == fired.id));
    }

    #[test]
    fn test_snapshot_shape() {
        let mut engine = engine_with(&["A", "B"]);
        engine.join("alice");
        engine
            .players
            .get_mut("alice")
            .unwrap()
            .portfolio
            .apply_buy("A", 2, 100_00);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.prices.len(), 2);
        assert_eq!(snapshot.portfolios["alice"]["A"], 2);
        assert_eq!(snapshot.cost_bases["alice"]["A"].shares, 2);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let mut engine = engine_with(&["A", "B"]);
        engine.join("alice");
        engine.market.get_mut("A").unwrap().price = 123.45;
        engine
            .players
            .get_mut("alice")
            .unwrap()
            .portfolio
            .apply_buy("A", 5, 100_00);

        let state = engine.persisted_state();
        let json = serde_json::to_string(&state).unwrap();
        let back: PersistedState = serde_json::from_str(&json).unwrap();

        let mut fresh = engine_with(&["A", "B"]);
        fresh.restore(back);
        assert_eq!(fresh.market().price_of("A"), Some(123.45));
        assert_eq!(fresh.player("alice").unwrap().portfolio.shares_of("A"), 5);
    }
}
