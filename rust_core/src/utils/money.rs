//! Financial precision utilities for accurate money calculations.
//!
//! # Design Philosophy
//!
//! - Player funds, bets, payouts, and fill costs use i64 cents
//! - Observable stock prices stay f64 dollars, rounded to cents once per tick
//! - Conversion between the two happens only at explicit boundaries

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Money value stored as cents (i64) for precision.
///
/// This type prevents floating-point precision errors in wallet arithmetic
/// by using integer arithmetic internally.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money {
    /// Value in cents (1/100 of a dollar)
    cents: i64,
}

impl Money {
    /// Create from cents directly (no conversion)
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Create from dollars (rounds to nearest cent)
    #[inline]
    pub fn from_dollars(dollars: f64) -> Self {
        Self {
            cents: (dollars * 100.0).round() as i64,
        }
    }

    /// Create zero value
    #[inline]
    pub const fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Get value in cents
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.cents
    }

    /// Get value as dollars (for display/API)
    #[inline]
    pub fn as_dollars(&self) -> f64 {
        self.cents as f64 / 100.0
    }

    /// Check if value is zero
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.cents == 0
    }

    /// Check if value is negative
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Saturating subtraction floored at zero
    #[inline]
    pub fn saturating_sub_floor_zero(self, other: Self) -> Self {
        Self {
            cents: (self.cents - other.cents).max(0),
        }
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            cents: self.cents + other.cents,
        }
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.cents += other.cents;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Self {
            cents: self.cents - other.cents,
        }
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.cents -= other.cents;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self { cents: -self.cents }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cents < 0 {
            write!(f, "-${:.2}", (-self.cents) as f64 / 100.0)
        } else {
            write!(f, "${:.2}", self.cents as f64 / 100.0)
        }
    }
}

// ============================================================================
// Standalone conversion functions
// ============================================================================

/// Convert dollars to cents (rounds to nearest cent)
#[inline]
pub fn to_cents(dollars: f64) -> i64 {
    (dollars * 100.0).round() as i64
}

/// Convert cents to dollars
#[inline]
pub fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Round a dollar amount to the nearest cent
#[inline]
pub fn round_to_cents(dollars: f64) -> f64 {
    (dollars * 100.0).round() / 100.0
}

/// Round a dollar amount down to the nearest cent (floor)
#[inline]
pub fn floor_to_cents(dollars: f64) -> f64 {
    (dollars * 100.0).floor() / 100.0
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_from_dollars() {
        assert_eq!(Money::from_dollars(1.23).cents(), 123);
        assert_eq!(Money::from_dollars(0.01).cents(), 1);
        assert_eq!(Money::from_dollars(-5.50).cents(), -550);
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::from_cents(100);
        let b = Money::from_cents(35);

        assert_eq!((a + b).cents(), 135);
        assert_eq!((a - b).cents(), 65);
        assert_eq!((-a).cents(), -100);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(123).to_string(), "$1.23");
        assert_eq!(Money::from_cents(-456).to_string(), "-$4.56");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
    }

    #[test]
    fn test_round_to_cents() {
        assert_eq!(round_to_cents(1.234), 1.23);
        assert_eq!(round_to_cents(1.235), 1.24);
        assert_eq!(round_to_cents(1.999), 2.00);
    }

    #[test]
    fn test_saturating_sub_floor_zero() {
        let a = Money::from_cents(50);
        let b = Money::from_cents(80);
        assert_eq!(a.saturating_sub_floor_zero(b), Money::zero());
        assert_eq!(b.saturating_sub_floor_zero(a).cents(), 30);
    }

    #[test]
    fn test_precision_no_accumulation() {
        // This would fail with f64 due to floating-point errors
        let mut total = Money::zero();
        for _ in 0..1000 {
            total += Money::from_cents(1);
        }
        assert_eq!(total.cents(), 1000);
        assert_eq!(total.as_dollars(), 10.0);
    }
}
