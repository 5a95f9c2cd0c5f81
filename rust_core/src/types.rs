//! Shared vocabulary for the Wheelhouse simulation core.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference to a wheel entry, either positional or by label.
///
/// Entry labels may repeat across indices, so positional references are the
/// canonical form; name references are resolved to the first matching index
/// at the request boundary and rejected if the active wheel no longer
/// contains the label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum EntryRef {
    ByIndex(u32),
    ByName(String),
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryRef::ByIndex(i) => write!(f, "#{}", i),
            EntryRef::ByName(n) => write!(f, "{}", n),
        }
    }
}

/// Which side of the market an order is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Execution rule for an order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "limit_price")]
pub enum OrderKind {
    /// Fill at whatever the observable price is each tick.
    Market,
    /// Fill only while the observable price satisfies the limit.
    Limit(f64),
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Partial,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// Terminal states are retained briefly for history, then purged.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

/// The immutable result of a spin draw.
///
/// Created once per spin request; only the angular offset tracked by the
/// engine may shift the landing angle (and therefore the final winner)
/// before resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpinOutcome {
    pub winner_index: usize,
    pub winner_name: String,
    /// Authoritative effective weights (all boosts visible) at draw time.
    pub effective_weights: Vec<f64>,
    pub total_weight: f64,
    /// Landing angle in radians within the authoritative layout.
    pub target_angle: f64,
    /// Animation duration in milliseconds (cosmetic, 9–12 s).
    pub duration_ms: u64,
    /// Minimum full rotations before settling (cosmetic, 6–10).
    pub min_spins: u32,
}

/// Follow-up action triggered by the winning entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum NextAction {
    AddEntry { wheel_id: String },
    RemoveEntry { wheel_id: String },
    SpinAgain { wheel_id: String },
    SubWheel { target_wheel_id: String, visited_chain: Vec<String> },
}

/// Result of one resolved bet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetResult {
    pub player: String,
    pub entry: String,
    /// Stake in cents.
    pub amount_cents: i64,
    pub won: bool,
    /// Payout in cents (zero when lost).
    pub payout_cents: i64,
}

// ============================================================================
// Rejection reasons
// ============================================================================

/// Synchronous spin-request rejections.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpinError {
    #[error("a spin is already in progress")]
    AlreadySpinning,
    #[error("a ready phase is already open")]
    AlreadyInReadyPhase,
    #[error("spin is still cooling down")]
    CoolingDown,
    #[error("wheel not found: {0}")]
    WheelNotFound(String),
    #[error("wheel needs at least two entries")]
    NotEnoughEntries,
}

/// Synchronous order rejections.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderError {
    #[error("share count must be a positive integer")]
    InvalidShares,
    #[error("no stock for entry: {0}")]
    StockNotFound(String),
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("insufficient shares")]
    InsufficientShares,
    #[error("limit orders require a limit price")]
    LimitPriceRequired,
    #[error("unknown player: {0}")]
    UnknownPlayer(String),
    #[error("order not found")]
    NotFound,
    #[error("order belongs to another player")]
    NotOwner,
    #[error("order already completed")]
    AlreadyCompleted,
}

/// Synchronous bet/boost rejections.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetError {
    #[error("betting is closed")]
    BettingClosed,
    #[error("unknown player: {0}")]
    UnknownPlayer(String),
    #[error("entry not found: {0}")]
    EntryNotFound(String),
    #[error("not enough funds")]
    NotEnoughFunds,
    #[error("no spin in progress")]
    NoSpinInProgress,
    #[error("no such item in inventory")]
    ItemNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_ref_display() {
        assert_eq!(EntryRef::ByIndex(3).to_string(), "#3");
        assert_eq!(EntryRef::ByName("Pizza".into()).to_string(), "Pizza");
    }

    #[test]
    fn test_order_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_terminal_status() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
    }

    #[test]
    fn test_error_serialization() {
        let e = OrderError::InsufficientFunds;
        assert_eq!(serde_json::to_string(&e).unwrap(), "\"insufficient_funds\"");
    }
}
