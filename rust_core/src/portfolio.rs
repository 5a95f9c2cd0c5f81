//! Player holdings, cost basis, and account records.
//!
//! Portfolios are mutated only by order fills and liquidations, never by
//! price ticks. Cost basis is average-cost: buys accumulate cost, sells
//! remove cost proportionally to the shares sold.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::utils::money::Money;

/// Funds a brand-new player starts with ($1,000).
pub const STARTING_FUNDS: Money = Money::from_cents(100_000);
/// Credited to every connected player when a spin resolves ($15).
pub const BASE_INCOME: Money = Money::from_cents(1_500);

/// Average-cost accounting for one entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CostBasis {
    /// Total cost in cents of the shares currently held.
    pub total_cost_cents: i64,
    pub shares: u32,
}

impl CostBasis {
    /// Record a buy at `price_cents` per share.
    pub fn add(&mut self, shares: u32, price_cents: i64) {
        self.total_cost_cents += price_cents * shares as i64;
        self.shares += shares;
    }

    /// Record a sell; cost is removed proportionally to the shares sold.
    /// Returns the cost removed (in cents).
    pub fn reduce(&mut self, shares: u32) -> i64 {
        let sold = shares.min(self.shares);
        if sold == 0 || self.shares == 0 {
            return 0;
        }
        let removed = if sold == self.shares {
            self.total_cost_cents
        } else {
            // Round to nearest cent; the final sell sweeps any remainder
            (self.total_cost_cents as f64 * sold as f64 / self.shares as f64).round() as i64
        };
        self.total_cost_cents -= removed;
        self.shares -= sold;
        removed
    }

    pub fn average_cost_cents(&self) -> i64 {
        if self.shares == 0 {
            0
        } else {
            self.total_cost_cents / self.shares as i64
        }
    }
}

/// Shares owned per entry, with matching cost basis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Portfolio {
    holdings: HashMap<String, u32>,
    cost_basis: HashMap<String, CostBasis>,
}

impl Portfolio {
    pub fn shares_of(&self, entry: &str) -> u32 {
        self.holdings.get(entry).copied().unwrap_or(0)
    }

    pub fn cost_basis_of(&self, entry: &str) -> Option<&CostBasis> {
        self.cost_basis.get(entry)
    }

    pub fn holdings(&self) -> &HashMap<String, u32> {
        &self.holdings
    }

    pub fn cost_bases(&self) -> &HashMap<String, CostBasis> {
        &self.cost_basis
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    /// Record a filled buy.
    pub fn apply_buy(&mut self, entry: &str, shares: u32, price_cents: i64) {
        if shares == 0 {
            return;
        }
        *self.holdings.entry(entry.to_string()).or_insert(0) += shares;
        self.cost_basis
            .entry(entry.to_string())
            .or_default()
            .add(shares, price_cents);
    }

    /// Record a filled sell; returns the shares actually removed.
    pub fn apply_sell(&mut self, entry: &str, shares: u32) -> u32 {
        let owned = self.shares_of(entry);
        let sold = shares.min(owned);
        if sold == 0 {
            return 0;
        }
        if let Some(basis) = self.cost_basis.get_mut(entry) {
            basis.reduce(sold);
        }
        if owned == sold {
            self.holdings.remove(entry);
            self.cost_basis.remove(entry);
        } else {
            self.holdings.insert(entry.to_string(), owned - sold);
        }
        sold
    }

    /// Drop a removed entry entirely; returns the shares that were held so
    /// the caller can liquidate them.
    pub fn drop_entry(&mut self, entry: &str) -> u32 {
        self.cost_basis.remove(entry);
        self.holdings.remove(entry).unwrap_or(0)
    }
}

/// Lifetime spin statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PlayerStats {
    pub total_spins: u32,
    pub total_wins: u32,
}

/// A consumable item held by a player (boost items are the only kind the
/// core executes; other kinds stay host-side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
}

/// One player's account as owned by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerAccount {
    pub name: String,
    pub funds: Money,
    #[serde(default)]
    pub stats: PlayerStats,
    #[serde(default)]
    pub inventory: Vec<InventoryItem>,
    #[serde(default)]
    pub portfolio: Portfolio,
    #[serde(default)]
    pub connected: bool,
}

impl PlayerAccount {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            funds: STARTING_FUNDS,
            stats: PlayerStats::default(),
            inventory: Vec::new(),
            portfolio: Portfolio::default(),
            connected: true,
        }
    }
}
