//! Weighted outcome selection and wheel geometry.
//!
//! The draw is two-phase: a single uniform `r` against the cumulative
//! effective-weight distribution predetermines the winner, and an angular
//! landing point inside the winning segment is generated per observer (each
//! client sees its own private-boost layout). Consumable in-round boosts may
//! later shift the landing angle, and the segment containing the shifted
//! angle overrides the predetermined winner at resolution.

use std::f64::consts::TAU;

use rand::Rng;

use crate::config::WheelConfig;
use crate::types::SpinOutcome;

/// Fraction of a segment's arc kept clear on each side when picking the
/// landing angle, so the pointer never sits on a boundary.
pub const SEGMENT_PADDING: f64 = 0.1;

/// Angular kick of one consumed boost item, before weight scaling (radians).
pub const ITEM_BOOST_MIN_RAD: f64 = 0.3;
pub const ITEM_BOOST_MAX_RAD: f64 = 0.8;

/// Pick a winner index for a uniform draw `r ∈ [0, 1)` against a weight
/// vector. The last entry is the fallback if floating-point rounding leaves
/// no cumulative bucket reaching `r`.
pub fn pick_index(weights: &[f64], r: f64) -> usize {
    debug_assert!(!weights.is_empty());
    let total: f64 = weights.iter().sum();
    let threshold = r * total;
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if threshold < cumulative {
            return i;
        }
    }
    weights.len() - 1
}

/// Arc occupied by a segment in the layout defined by `weights`, as
/// `[start, end)` radians from the wheel origin.
pub fn segment_bounds(weights: &[f64], index: usize) -> (f64, f64) {
    let total: f64 = weights.iter().sum();
    let before: f64 = weights[..index].iter().sum();
    let start = before / total * TAU;
    let end = (before + weights[index]) / total * TAU;
    (start, end)
}

/// Segment containing an angle (normalized into [0, TAU)).
pub fn winner_at_angle(weights: &[f64], angle: f64) -> usize {
    let total: f64 = weights.iter().sum();
    let normalized = angle.rem_euclid(TAU);
    let threshold = normalized / TAU * total;
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if threshold < cumulative {
            return i;
        }
    }
    weights.len() - 1
}

/// Landing angle for a winner inside the layout defined by `weights`, with
/// padding on both boundaries.
///
/// Every observer gets their own call with their own weight view, so the
/// pointer lands inside the winning segment no matter which private boosts
/// the observer can see.
pub fn landing_angle<R: Rng + ?Sized>(weights: &[f64], winner: usize, rng: &mut R) -> f64 {
    let (start, end) = segment_bounds(weights, winner);
    let arc = end - start;
    let pad = arc * SEGMENT_PADDING;
    start + pad + rng.gen::<f64>() * (arc - 2.0 * pad)
}

/// Angular offset contributed by one consumed boost item.
///
/// Scaled by `1 / averageBaseWeight` so the kick moves the pointer a
/// proportional number of segments on heavy and light wheels alike.
pub fn item_boost_offset<R: Rng + ?Sized>(rng: &mut R, average_base_weight: f64) -> f64 {
    let base = rng.gen_range(ITEM_BOOST_MIN_RAD..=ITEM_BOOST_MAX_RAD);
    base / average_base_weight.max(f64::EPSILON)
}

/// Perform the authoritative draw for a wheel.
///
/// Returns `None` for wheels with fewer than two entries — no spin occurs.
pub fn draw<R: Rng + ?Sized>(
    wheel: &WheelConfig,
    effective_weights: Vec<f64>,
    rng: &mut R,
) -> Option<SpinOutcome> {
    if wheel.entries.len() < 2 {
        return None;
    }
    debug_assert_eq!(effective_weights.len(), wheel.entries.len());

    let r: f64 = rng.gen();
    let winner_index = pick_index(&effective_weights, r);
    let target_angle = landing_angle(&effective_weights, winner_index, rng);
    let total_weight = effective_weights.iter().sum();

    Some(SpinOutcome {
        winner_index,
        winner_name: wheel.entries[winner_index].clone(),
        effective_weights,
        total_weight,
        target_angle,
        duration_ms: 9_000 + (rng.gen::<f64>() * 3_000.0) as u64,
        min_spins: 6 + rng.gen_range(0..5),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_two_entry_split() {
        // Equal weights: r just under the midpoint lands on the first entry,
        // just over lands on the second.
        let weights = [1.0, 1.0];
        assert_eq!(pick_index(&weights, 0.49), 0);
        assert_eq!(pick_index(&weights, 0.51), 1);
    }

    #[test]
    fn test_fallback_is_last_index() {
        let weights = [1.0, 1.0, 1.0];
        // r = 1.0 never occurs from a [0,1) draw, but rounding can push the
        // threshold past every bucket; the last index must absorb it.
        assert_eq!(pick_index(&weights, 1.0), 2);
    }

    #[test]
    fn test_distribution_converges() {
        // χ² goodness-of-fit over 100k draws against weights 1:2:3:4.
        let weights = [1.0, 2.0, 3.0, 4.0];
        let mut rng = StdRng::seed_from_u64(42);
        let n = 100_000;
        let mut counts = [0u32; 4];
        for _ in 0..n {
            counts[pick_index(&weights, rng.gen())] += 1;
        }

        let total: f64 = weights.iter().sum();
        let chi2: f64 = weights
            .iter()
            .zip(counts.iter())
            .map(|(w, &c)| {
                let expected = n as f64 * w / total;
                let d = c as f64 - expected;
                d * d / expected
            })
            .sum();

        // df = 3, p = 0.001 critical value is 16.27
        assert!(chi2 < 16.27, "chi2 = {}", chi2);
    }

    #[test]
    fn test_landing_angle_inside_padded_segment() {
        let weights = [1.0, 2.0, 1.0];
        let mut rng = StdRng::seed_from_u64(9);
        for winner in 0..3 {
            let (start, end) = segment_bounds(&weights, winner);
            let pad = (end - start) * SEGMENT_PADDING;
            for _ in 0..200 {
                let a = landing_angle(&weights, winner, &mut rng);
                assert!(a >= start + pad && a <= end - pad, "angle {} outside", a);
                assert_eq!(winner_at_angle(&weights, a), winner);
            }
        }
    }

    #[test]
    fn test_winner_at_angle_wraps() {
        let weights = [1.0, 1.0];
        assert_eq!(winner_at_angle(&weights, 0.1), 0);
        assert_eq!(winner_at_angle(&weights, TAU / 2.0 + 0.1), 1);
        // A full extra revolution lands in the same segment
        assert_eq!(winner_at_angle(&weights, TAU + 0.1), 0);
    }

    #[test]
    fn test_item_boost_scaling() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let unit = item_boost_offset(&mut rng, 1.0);
            assert!((ITEM_BOOST_MIN_RAD..=ITEM_BOOST_MAX_RAD).contains(&unit));
            // A wheel with average base weight 2 gets half the kick
            let heavy = item_boost_offset(&mut rng, 2.0);
            assert!(heavy <= ITEM_BOOST_MAX_RAD / 2.0);
        }
    }

    #[test]
    fn test_draw_requires_two_entries() {
        let wheel = WheelConfig::new(vec!["only".to_string()]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(draw(&wheel, vec![1.0], &mut rng).is_none());
    }

    #[test]
    fn test_draw_outcome_shape() {
        let wheel = WheelConfig::new(vec!["A".to_string(), "B".to_string(), "C".to_string()]);
        let mut rng = StdRng::seed_from_u64(11);
        let outcome = draw(&wheel, vec![1.0, 1.0, 1.0], &mut rng).unwrap();

        assert_eq!(outcome.winner_name, wheel.entries[outcome.winner_index]);
        assert!((outcome.total_weight - 3.0).abs() < 1e-12);
        assert!(outcome.duration_ms >= 9_000 && outcome.duration_ms < 12_000);
        assert!((6..=10).contains(&outcome.min_spins));
        assert_eq!(
            winner_at_angle(&outcome.effective_weights, outcome.target_angle),
            outcome.winner_index
        );
    }
}
