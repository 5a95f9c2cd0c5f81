//! Timed sentiment events perturbing the market.
//!
//! A self-rescheduling timer (owned by the host) calls into the scheduler at
//! a randomized interval. Each firing emits either a world event built from
//! a template list (defaults merged with host configuration) or a
//! single-entry event with a generated headline. Events live for a fixed
//! number of spins and are applied to their stocks on every market tick
//! while alive.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EventTemplate;

/// Maximum concurrently active events; firings at capacity are skipped.
pub const MAX_ACTIVE_EVENTS: usize = 4;

/// Bounds of the randomized scheduler interval.
pub const MIN_INTERVAL_SECS: u64 = 20;
pub const MAX_INTERVAL_SECS: u64 = 75;

/// Single-entry event strength range.
pub const SINGLE_STRENGTH_MIN: f64 = 0.5;
pub const SINGLE_STRENGTH_MAX: f64 = 2.0;
/// Single-entry event lifetime range in spins.
pub const SINGLE_SPINS_MIN: u32 = 2;
pub const SINGLE_SPINS_MAX: u32 = 4;

const BULLISH_HEADLINES: &[&str] = &[
    "{name} lands a sponsorship deal",
    "Analysts turn bullish on {name}",
    "{name} is trending in the group chat",
    "Insider hype builds around {name}",
];

const BEARISH_HEADLINES: &[&str] = &[
    "{name} hit by scandal rumors",
    "Analysts sour on {name}",
    "{name} fans jump ship",
    "Supply problems weigh on {name}",
];

/// Built-in world-event templates; host templates are merged on top.
pub fn default_world_templates() -> Vec<EventTemplate> {
    vec![
        EventTemplate {
            headline: "Bull run: the whole wheel rallies".to_string(),
            sentiment: 1,
            strength: 1.0,
            spins: 3,
            affected: None,
        },
        EventTemplate {
            headline: "Market-wide selloff".to_string(),
            sentiment: -1,
            strength: 1.0,
            spins: 3,
            affected: None,
        },
        EventTemplate {
            headline: "Stimulus wave lifts every entry".to_string(),
            sentiment: 1,
            strength: 1.5,
            spins: 2,
            affected: None,
        },
        EventTemplate {
            headline: "Regulatory scare rattles the wheel".to_string(),
            sentiment: -1,
            strength: 1.5,
            spins: 2,
            affected: None,
        },
    ]
}

/// A live sentiment event.
///
/// `affected` always enumerates the concrete entry names the event touches;
/// world events list every name at creation time so entry removals can be
/// applied uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEvent {
    pub id: Uuid,
    pub headline: String,
    /// +1 bullish, -1 bearish.
    pub sentiment: i8,
    pub strength: f64,
    pub spins_remaining: u32,
    pub affected: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl MarketEvent {
    pub fn affects(&self, name: &str) -> bool {
        self.affected.iter().any(|n| n == name)
    }
}

/// Generates and tracks live events.
#[derive(Debug, Clone)]
pub struct EventScheduler {
    active: Vec<MarketEvent>,
    world_templates: Vec<EventTemplate>,
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl EventScheduler {
    /// Build with the default world templates plus host-configured extras.
    pub fn new(extra_templates: Vec<EventTemplate>) -> Self {
        let mut world_templates = default_world_templates();
        world_templates.extend(extra_templates);
        Self {
            active: Vec::new(),
            world_templates,
        }
    }

    pub fn active(&self) -> &[MarketEvent] {
        &self.active
    }

    /// Random delay until the next firing.
    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_secs(rng.gen_range(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS))
    }

    /// Σ sentiment×strength over live events touching an entry; feeds the
    /// liquidity replenishment bias.
    pub fn bias_for(&self, name: &str) -> f64 {
        self.active
            .iter()
            .filter(|e| e.affects(name))
            .map(|e| e.sentiment as f64 * e.strength)
            .sum()
    }

    /// One scheduler firing: emit a world or single-entry event, unless at
    /// capacity (skipped, the host simply reschedules).
    pub fn fire<R: Rng + ?Sized>(
        &mut self,
        entry_names: &[String],
        rng: &mut R,
    ) -> Option<MarketEvent> {
        if self.active.len() >= MAX_ACTIVE_EVENTS {
            debug!("event skipped: {} already active", self.active.len());
            return None;
        }
        if entry_names.is_empty() {
            return None;
        }

        let event = if rng.gen_bool(0.5) && !self.world_templates.is_empty() {
            self.world_event(entry_names, rng)
        } else {
            self.single_entry_event(entry_names, rng)
        };

        info!(
            "event: {:?} ({} spins, {} entries)",
            event.headline,
            event.spins_remaining,
            event.affected.len()
        );
        self.active.push(event.clone());
        Some(event)
    }

    fn world_event<R: Rng + ?Sized>(&self, entry_names: &[String], rng: &mut R) -> MarketEvent {
        let template = &self.world_templates[rng.gen_range(0..self.world_templates.len())];
        let affected = match &template.affected {
            Some(subset) => subset
                .iter()
                .filter(|n| entry_names.contains(n))
                .cloned()
                .collect(),
            None => entry_names.to_vec(),
        };
        MarketEvent {
            id: Uuid::new_v4(),
            headline: template.headline.clone(),
            sentiment: if template.sentiment >= 0 { 1 } else { -1 },
            strength: template.strength.max(f64::EPSILON),
            spins_remaining: template.spins.max(1),
            affected,
            created_at: Utc::now(),
        }
    }

    fn single_entry_event<R: Rng + ?Sized>(
        &self,
        entry_names: &[String],
        rng: &mut R,
    ) -> MarketEvent {
        let name = &entry_names[rng.gen_range(0..entry_names.len())];
        let bullish = rng.gen_bool(0.5);
        let headlines = if bullish {
            BULLISH_HEADLINES
        } else {
            BEARISH_HEADLINES
        };
        let headline = headlines[rng.gen_range(0..headlines.len())].replace("{name}", name);

        MarketEvent {
            id: Uuid::new_v4(),
            headline,
            sentiment: if bullish { 1 } else { -1 },
            strength: rng.gen_range(SINGLE_STRENGTH_MIN..=SINGLE_STRENGTH_MAX),
            spins_remaining: rng.gen_range(SINGLE_SPINS_MIN..=SINGLE_SPINS_MAX),
            affected: vec![name.clone()],
            created_at: Utc::now(),
        }
    }

    /// Burn one spin of lifetime off every event; expired events are removed
    /// and returned.
    pub fn on_spin_complete(&mut self) -> Vec<MarketEvent> {
        for event in &mut self.active {
            event.spins_remaining = event.spins_remaining.saturating_sub(1);
        }
        let (expired, alive): (Vec<_>, Vec<_>) = self
            .active
            .drain(..)
            .partition(|e| e.spins_remaining == 0);
        self.active = alive;
        for e in &expired {
            debug!("event expired: {:?}", e.headline);
        }
        expired
    }

    /// An entry disappeared from the wheel: scrub it from every event and
    /// drop events left with nothing to affect.
    pub fn drop_entry(&mut self, name: &str) {
        for event in &mut self.active {
            event.affected.retain(|n| n != name);
        }
        self.active.retain(|e| !e.affected.is_empty());
    }

    #[cfg(test)]
    pub fn push_active(&mut self, event: MarketEvent) {
        self.active.push(event);
    }
}
