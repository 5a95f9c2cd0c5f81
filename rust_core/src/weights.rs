//! Hidden drift, fatigue, and boost state behind the wheel's visible weights.
//!
//! This module provides:
//! - Per-entry hidden multipliers that drift randomly each spin
//! - Fatigue floors for recent winners with linear recovery
//! - Per-player additive boosts with multiplicative post-spin decay
//! - Effective-weight computation, including per-observer views

use rand::Rng;
use rustc_hash::FxHashMap;

use crate::config::WheelConfig;

/// Hidden multiplier bounds.
pub const HIDDEN_MIN: f64 = 0.5;
pub const HIDDEN_MAX: f64 = 2.0;
/// Maximum hidden drift per spin (±).
pub const HIDDEN_DRIFT: f64 = 0.15;

/// Fatigue floor applied to the entry that just won.
pub const FATIGUE_FLOOR: f64 = 0.3;
/// Fatigue recovery per spin for entries that did not win.
pub const FATIGUE_RECOVERY: f64 = 0.12;

/// Multiplicative boost decay applied after each spin.
pub const BOOST_DECAY: f64 = 0.7;
/// Boosts below this are deleted.
pub const BOOST_EPSILON: f64 = 0.01;

/// Effective weights never fall below this.
pub const MIN_EFFECTIVE_WEIGHT: f64 = 0.01;

/// Cash-to-weight conversion for purchased boosts ($1 = 0.1 weight).
pub const BOOST_WEIGHT_PER_DOLLAR: f64 = 0.1;

/// All weight-modifier state for one wheel.
///
/// Indices refer to the active configuration snapshot; `sync_entries` must be
/// called whenever the entry list changes.
#[derive(Debug, Clone, Default)]
pub struct WeightBook {
    /// Hidden multiplier per entry index, drifting in [HIDDEN_MIN, HIDDEN_MAX].
    hidden: Vec<f64>,
    /// Fatigue per entry index; absent means 1.0 (no effect).
    fatigue: FxHashMap<usize, f64>,
    /// player -> entry index -> additive weight.
    boosts: FxHashMap<String, FxHashMap<usize, f64>>,
}

impl WeightBook {
    pub fn new(entry_count: usize) -> Self {
        Self {
            hidden: vec![1.0; entry_count],
            fatigue: FxHashMap::default(),
            boosts: FxHashMap::default(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.hidden.len()
    }

    /// Re-validate per-index state against a new entry list: indices whose
    /// label is unchanged keep their state, everything else is dropped.
    pub fn sync_entries(&mut self, old_entries: &[String], new_entries: &[String]) {
        let keep = |i: &usize| {
            *i < new_entries.len()
                && old_entries.get(*i).is_some_and(|old| *old == new_entries[*i])
        };

        let mut hidden = vec![1.0; new_entries.len()];
        for (i, slot) in hidden.iter_mut().enumerate() {
            if keep(&i) {
                *slot = self.hidden[i];
            }
        }
        self.hidden = hidden;

        self.fatigue.retain(|i, _| keep(i));
        for per_player in self.boosts.values_mut() {
            per_player.retain(|i, _| keep(i));
        }
        self.boosts.retain(|_, m| !m.is_empty());
    }

    /// Random walk of every hidden multiplier; called once per draw.
    pub fn drift_hidden<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for h in &mut self.hidden {
            let step = rng.gen_range(-HIDDEN_DRIFT..=HIDDEN_DRIFT);
            *h = (*h + step).clamp(HIDDEN_MIN, HIDDEN_MAX);
        }
    }

    /// Post-spin fatigue update: floor the winner, recover everyone else.
    /// A fully recovered entry is removed from the map (implicit 1.0).
    pub fn record_win(&mut self, winner_index: usize) {
        let mut recovered = Vec::new();
        for (&i, f) in self.fatigue.iter_mut() {
            if i == winner_index {
                continue;
            }
            *f += FATIGUE_RECOVERY;
            if *f >= 1.0 {
                recovered.push(i);
            }
        }
        for i in recovered {
            self.fatigue.remove(&i);
        }
        self.fatigue.insert(winner_index, FATIGUE_FLOOR);
    }

    /// Post-spin boost decay; boosts shrinking below the threshold vanish.
    pub fn decay_boosts(&mut self) {
        for per_player in self.boosts.values_mut() {
            for v in per_player.values_mut() {
                *v *= BOOST_DECAY;
            }
            per_player.retain(|_, v| *v >= BOOST_EPSILON);
        }
        self.boosts.retain(|_, m| !m.is_empty());
    }

    /// Add purchased weight for a player on an entry index.
    pub fn add_boost(&mut self, player: &str, entry_index: usize, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        *self
            .boosts
            .entry(player.to_string())
            .or_default()
            .entry(entry_index)
            .or_insert(0.0) += weight;
    }

    pub fn fatigue_of(&self, entry_index: usize) -> f64 {
        self.fatigue.get(&entry_index).copied().unwrap_or(1.0)
    }

    pub fn hidden_of(&self, entry_index: usize) -> f64 {
        self.hidden.get(entry_index).copied().unwrap_or(1.0)
    }

    fn boost_sum(&self, entry_index: usize, observer: Option<&str>) -> f64 {
        match observer {
            // Private view: only the observer's own boosts are visible.
            Some(player) => self
                .boosts
                .get(player)
                .and_then(|m| m.get(&entry_index))
                .copied()
                .unwrap_or(0.0),
            // Authoritative view: everything counts.
            None => self
                .boosts
                .values()
                .filter_map(|m| m.get(&entry_index))
                .sum(),
        }
    }

    /// Effective weight vector against a wheel.
    ///
    /// `observer = None` is the authoritative view used for the draw;
    /// `Some(player)` is what that player's client renders, where only their
    /// own boosts show.
    pub fn effective_weights(&self, wheel: &WheelConfig, observer: Option<&str>) -> Vec<f64> {
        wheel
            .entries
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let base = wheel.base_weight(name) + self.boost_sum(i, observer);
                (self.hidden_of(i) * base * self.fatigue_of(i)).max(MIN_EFFECTIVE_WEIGHT)
            })
            .collect()
    }

    /// Base weights plus purchased boosts, with hidden/fatigue excluded.
    ///
    /// Bet odds use this vector so a player who boosts an entry pays for the
    /// shortened odds instead of collecting on the unboosted ones.
    pub fn base_plus_boosts(&self, wheel: &WheelConfig) -> Vec<f64> {
        wheel
            .entries
            .iter()
            .enumerate()
            .map(|(i, name)| (wheel.base_weight(name) + self.boost_sum(i, None)).max(0.0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn wheel(entries: &[&str]) -> WheelConfig {
        WheelConfig::new(entries.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_fatigue_floor_and_recovery() {
        let mut book = WeightBook::new(3);
        book.record_win(0);
        assert!((book.fatigue_of(0) - FATIGUE_FLOOR).abs() < 1e-12);

        // Entry 1 wins the next four spins; entry 0 recovers by +0.12 each
        for k in 1..=4u32 {
            book.record_win(1);
            let expected = (FATIGUE_FLOOR + FATIGUE_RECOVERY * k as f64).min(1.0);
            assert!(
                (book.fatigue_of(0) - expected).abs() < 1e-9,
                "after {} spins: {}",
                k,
                book.fatigue_of(0)
            );
        }

        // Two more recoveries pass 1.0: 0.3 + 6*0.12 = 1.02 -> removed
        book.record_win(1);
        book.record_win(1);
        assert_eq!(book.fatigue_of(0), 1.0);
        assert!(!book.fatigue.contains_key(&0));
    }

    #[test]
    fn test_boost_decay_and_eviction() {
        let mut book = WeightBook::new(2);
        book.add_boost("alice", 0, 1.0);
        book.decay_boosts();
        assert!((book.boost_sum(0, None) - 0.7).abs() < 1e-12);

        // 0.7^11 ≈ 0.0198, 0.7^12 ≈ 0.0138, 0.7^13 ≈ 0.0097 < 0.01 -> gone
        for _ in 0..12 {
            book.decay_boosts();
        }
        assert_eq!(book.boost_sum(0, None), 0.0);
        assert!(book.boosts.is_empty());
    }

    #[test]
    fn test_hidden_stays_clamped() {
        let mut book = WeightBook::new(4);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            book.drift_hidden(&mut rng);
        }
        for i in 0..4 {
            let h = book.hidden_of(i);
            assert!((HIDDEN_MIN..=HIDDEN_MAX).contains(&h), "hidden {} out of range", h);
        }
    }

    #[test]
    fn test_effective_weight_floor() {
        let mut w = wheel(&["A", "B"]);
        w.entry_weights.insert("A".into(), 0.0);
        let book = WeightBook::new(2);
        let weights = book.effective_weights(&w, None);
        assert_eq!(weights[0], MIN_EFFECTIVE_WEIGHT);
        assert_eq!(weights[1], 1.0);
    }

    #[test]
    fn test_observer_sees_only_own_boosts() {
        let w = wheel(&["A", "B"]);
        let mut book = WeightBook::new(2);
        book.add_boost("alice", 0, 2.0);
        book.add_boost("bob", 0, 1.0);

        let authoritative = book.effective_weights(&w, None);
        let alice = book.effective_weights(&w, Some("alice"));
        let carol = book.effective_weights(&w, Some("carol"));

        assert!((authoritative[0] - 4.0).abs() < 1e-12); // 1 + 2 + 1
        assert!((alice[0] - 3.0).abs() < 1e-12); // 1 + 2
        assert!((carol[0] - 1.0).abs() < 1e-12); // base only
    }

    #[test]
    fn test_sync_entries_keeps_matching_prefix() {
        let mut book = WeightBook::new(3);
        book.record_win(2);
        book.add_boost("alice", 1, 0.5);
        book.add_boost("alice", 2, 0.5);

        let old = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let new = vec!["A".to_string(), "B".to_string(), "X".to_string()];
        book.sync_entries(&old, &new);

        // Index 2 changed label: fatigue and boost dropped
        assert_eq!(book.fatigue_of(2), 1.0);
        assert_eq!(book.boost_sum(2, None), 0.0);
        // Index 1 unchanged: boost survives
        assert!((book.boost_sum(1, None) - 0.5).abs() < 1e-12);
    }
}
