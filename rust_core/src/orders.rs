//! Player orders and the incremental fill loop.
//!
//! Orders never execute instantly: each order-processing tick fills at most
//! max(1, ⌈30% of remaining⌉) shares, further capped by same-side synthetic
//! liquidity and, for sells, by shares actually owned. Large orders walk the
//! book over several ticks, and every fill feeds momentum back into the
//! market. Completed orders are retained briefly for client history, then
//! purged.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::liquidity::LiquidityPool;
use crate::market::MarketBook;
use crate::portfolio::PlayerAccount;
use crate::types::{OrderError, OrderKind, OrderSide, OrderStatus};
use crate::utils::money::{to_cents, Money};

/// Fraction of remaining shares attempted per tick.
pub const PARTIAL_FILL_FRACTION: f64 = 0.3;
/// Order ticks a completed order stays visible (60 × 500 ms = 30 s).
pub const RETENTION_TICKS: u64 = 60;

/// One partial execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fill {
    pub shares: u32,
    pub price: f64,
    /// Order-tick index at which the fill happened.
    pub tick: u64,
}

/// A player order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub player: String,
    pub entry: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub total_shares: u32,
    pub filled_shares: u32,
    pub status: OrderStatus,
    pub fills: Vec<Fill>,
    pub created_at: DateTime<Utc>,
    /// Order-tick index at which the order reached a terminal status.
    pub completed_at_tick: Option<u64>,
    /// Why the order was cancelled, if it was.
    pub cancel_reason: Option<OrderError>,
}

impl Order {
    pub fn new(
        player: &str,
        entry: &str,
        side: OrderSide,
        kind: OrderKind,
        total_shares: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            player: player.to_string(),
            entry: entry.to_string(),
            side,
            kind,
            total_shares,
            filled_shares: 0,
            status: OrderStatus::Pending,
            fills: Vec::new(),
            created_at: Utc::now(),
            completed_at_tick: None,
            cancel_reason: None,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.total_shares - self.filled_shares
    }

    /// Does the current price satisfy a limit order's condition?
    fn limit_satisfied(&self, price: f64) -> bool {
        match (self.kind, self.side) {
            (OrderKind::Market, _) => true,
            (OrderKind::Limit(limit), OrderSide::Buy) => price <= limit,
            (OrderKind::Limit(limit), OrderSide::Sell) => price >= limit,
        }
    }
}

/// Shares to attempt this tick for a given remainder.
pub fn desired_fill(remaining: u32) -> u32 {
    ((remaining as f64 * PARTIAL_FILL_FRACTION).ceil() as u32).max(1)
}

/// Owner-scoped order notification produced by the fill loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: Uuid,
    pub player: String,
    pub entry: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub filled_shares: u32,
    pub total_shares: u32,
    pub last_fill: Option<Fill>,
    pub cancel_reason: Option<OrderError>,
}

impl OrderUpdate {
    fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            player: order.player.clone(),
            entry: order.entry.clone(),
            side: order.side,
            status: order.status,
            filled_shares: order.filled_shares,
            total_shares: order.total_shares,
            last_fill: order.fills.last().copied(),
            cancel_reason: order.cancel_reason.clone(),
        }
    }
}

/// All orders, in placement order, plus the order-tick counter.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    orders: Vec<Order>,
    tick: u64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, order: Order) -> Uuid {
        let id = order.id;
        info!(
            "order {}: {} {} x{} {}",
            id, order.player, order.side, order.total_shares, order.entry
        );
        self.orders.push(order);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == id)
    }

    /// Orders visible to one player (their own, including recently completed).
    pub fn orders_for(&self, player: &str) -> Vec<&Order> {
        self.orders.iter().filter(|o| o.player == player).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.orders
            .iter()
            .filter(|o| !o.status.is_terminal())
            .count()
    }

    /// Player-initiated cancellation.
    pub fn cancel(&mut self, id: Uuid, player: &str) -> Result<OrderUpdate, OrderError> {
        let tick = self.tick;
        let order = self
            .orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(OrderError::NotFound)?;
        if order.player != player {
            return Err(OrderError::NotOwner);
        }
        if order.status.is_terminal() {
            return Err(OrderError::AlreadyCompleted);
        }
        order.status = OrderStatus::Cancelled;
        order.completed_at_tick = Some(tick);
        Ok(OrderUpdate::from_order(order))
    }

    /// Cancel every open order on a removed entry.
    pub fn cancel_for_entry(&mut self, entry: &str) -> Vec<OrderUpdate> {
        let tick = self.tick;
        self.orders
            .iter_mut()
            .filter(|o| o.entry == entry && !o.status.is_terminal())
            .map(|order| {
                order.status = OrderStatus::Cancelled;
                order.cancel_reason = Some(OrderError::StockNotFound(entry.to_string()));
                order.completed_at_tick = Some(tick);
                OrderUpdate::from_order(order)
            })
            .collect()
    }

    /// One order-processing tick: advance every open order, then purge
    /// completed orders past their retention window.
    pub fn process_tick(
        &mut self,
        players: &mut HashMap<String, PlayerAccount>,
        market: &mut MarketBook,
        pool: &mut LiquidityPool,
    ) -> Vec<OrderUpdate> {
        self.tick += 1;
        let tick = self.tick;
        let mut updates = Vec::new();

        for order in self.orders.iter_mut() {
            if order.status.is_terminal() {
                continue;
            }

            let Some(price) = market.price_of(&order.entry) else {
                order.status = OrderStatus::Cancelled;
                order.cancel_reason = Some(OrderError::StockNotFound(order.entry.clone()));
                order.completed_at_tick = Some(tick);
                updates.push(OrderUpdate::from_order(order));
                continue;
            };

            // Limit orders wait (not cancelled) until price crosses.
            if !order.limit_satisfied(price) {
                continue;
            }

            let Some(player) = players.get_mut(&order.player) else {
                order.status = OrderStatus::Cancelled;
                order.cancel_reason = Some(OrderError::UnknownPlayer(order.player.clone()));
                order.completed_at_tick = Some(tick);
                updates.push(OrderUpdate::from_order(order));
                continue;
            };

            let mut shares = desired_fill(order.remaining());

            // Same-side liquidity cap; a dry pool defers, it does not cancel.
            let available = match order.side {
                OrderSide::Buy => pool.get(&order.entry).sell_volume,
                OrderSide::Sell => pool.get(&order.entry).buy_volume,
            };
            shares = shares.min(available.floor() as u32);
            if shares == 0 {
                continue;
            }

            let price_cents = to_cents(price);
            match order.side {
                OrderSide::Buy => {
                    let cost = Money::from_cents(price_cents * shares as i64);
                    if player.funds < cost {
                        order.status = OrderStatus::Cancelled;
                        order.cancel_reason = Some(OrderError::InsufficientFunds);
                        order.completed_at_tick = Some(tick);
                        updates.push(OrderUpdate::from_order(order));
                        continue;
                    }
                    player.funds -= cost;
                    player.portfolio.apply_buy(&order.entry, shares, price_cents);
                    pool.take_sell_volume(&order.entry, shares as f64);
                }
                OrderSide::Sell => {
                    let owned = player.portfolio.shares_of(&order.entry);
                    if owned == 0 {
                        order.status = OrderStatus::Cancelled;
                        order.cancel_reason = Some(OrderError::InsufficientShares);
                        order.completed_at_tick = Some(tick);
                        updates.push(OrderUpdate::from_order(order));
                        continue;
                    }
                    shares = shares.min(owned);
                    let sold = player.portfolio.apply_sell(&order.entry, shares);
                    player.funds += Money::from_cents(price_cents * sold as i64);
                    pool.take_buy_volume(&order.entry, sold as f64);
                    shares = sold;
                }
            }

            market.apply_trade_impulse(&order.entry, order.side, shares);

            order.filled_shares += shares;
            order.fills.push(Fill {
                shares,
                price,
                tick,
            });
            if order.filled_shares >= order.total_shares {
                order.status = OrderStatus::Filled;
                order.completed_at_tick = Some(tick);
            } else {
                order.status = OrderStatus::Partial;
            }
            debug!(
                "fill {}: {} x{} @ {:.2} ({}/{})",
                order.id, order.entry, shares, price, order.filled_shares, order.total_shares
            );
            updates.push(OrderUpdate::from_order(order));
        }

        self.orders.retain(|o| match o.completed_at_tick {
            Some(done) => tick.saturating_sub(done) < RETENTION_TICKS,
            None => true,
        });

        updates
    }
}
