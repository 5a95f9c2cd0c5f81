//! Session and wheel configuration.
//!
//! The host owns the configuration document; the core owns an *active
//! snapshot* of it. Per-index state (hidden weights, fatigue, index-keyed
//! boosts) is only meaningful against one snapshot, so every swap bumps a
//! generation counter and the engine revalidates or drops stale state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::EntryRef;

/// Follow-up behavior attached to a wheel entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "target")]
pub enum TriggerAction {
    /// Explicitly suppress the wheel's default trigger for this entry.
    None,
    AddEntry,
    RemoveEntry,
    SpinAgain,
    SubWheel(String),
}

/// One wheel: an ordered, duplicate-permitting entry list plus weights and
/// triggers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WheelConfig {
    /// Ordered entry labels; duplicates allowed.
    pub entries: Vec<String>,
    /// Base weight per label; absent means 1.0.
    #[serde(default)]
    pub entry_weights: HashMap<String, f64>,
    /// Per-entry trigger overrides, keyed by label.
    #[serde(default)]
    pub triggers: HashMap<String, TriggerAction>,
    /// Fallback trigger when an entry has no override.
    #[serde(default)]
    pub default_trigger: Option<TriggerAction>,
}

impl WheelConfig {
    pub fn new(entries: Vec<String>) -> Self {
        Self {
            entries,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Base config weight for an entry label (1.0 when unspecified).
    pub fn base_weight(&self, name: &str) -> f64 {
        self.entry_weights.get(name).copied().unwrap_or(1.0)
    }

    /// Mean base weight across the wheel; used to scale angular boosts so
    /// their effect is proportional rather than absolute.
    pub fn average_base_weight(&self) -> f64 {
        if self.entries.is_empty() {
            return 1.0;
        }
        let sum: f64 = self.entries.iter().map(|e| self.base_weight(e)).sum();
        sum / self.entries.len() as f64
    }

    /// Resolve an entry reference to a canonical index against this wheel.
    ///
    /// Name references resolve to the first matching index.
    pub fn resolve(&self, entry: &EntryRef) -> Option<usize> {
        match entry {
            EntryRef::ByIndex(i) => {
                let i = *i as usize;
                (i < self.entries.len()).then_some(i)
            }
            EntryRef::ByName(name) => self.entries.iter().position(|e| e == name),
        }
    }

    /// Effective trigger for a winning entry: a per-entry override beats the
    /// default; an explicit `None` override suppresses the default.
    pub fn trigger_for(&self, winner: &str) -> Option<&TriggerAction> {
        match self.triggers.get(winner) {
            Some(TriggerAction::None) => None,
            Some(t) => Some(t),
            None => match &self.default_trigger {
                Some(TriggerAction::None) | None => None,
                Some(t) => Some(t),
            },
        }
    }
}

/// Template for a scheduled market event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTemplate {
    /// Headline; `{name}` is substituted for single-entry events.
    pub headline: String,
    /// +1 bullish, -1 bearish.
    pub sentiment: i8,
    pub strength: f64,
    /// Lifetime in spins.
    pub spins: u32,
    /// Affected labels for world events; `None` means every entry.
    #[serde(default)]
    pub affected: Option<Vec<String>>,
}

/// The whole session configuration owned by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    pub wheels: HashMap<String, WheelConfig>,
    pub active_wheel_id: String,
    /// Extra world-event templates merged with the built-in defaults.
    #[serde(default)]
    pub event_templates: Vec<EventTemplate>,
}

impl SessionConfig {
    pub fn single_wheel(id: &str, wheel: WheelConfig) -> Self {
        let mut wheels = HashMap::new();
        wheels.insert(id.to_string(), wheel);
        Self {
            wheels,
            active_wheel_id: id.to_string(),
            event_templates: Vec::new(),
        }
    }

    pub fn active_wheel(&self) -> Option<&WheelConfig> {
        self.wheels.get(&self.active_wheel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wheel(entries: &[&str]) -> WheelConfig {
        WheelConfig::new(entries.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_resolve_by_index_and_name() {
        let w = wheel(&["A", "B", "A"]);
        assert_eq!(w.resolve(&EntryRef::ByIndex(2)), Some(2));
        assert_eq!(w.resolve(&EntryRef::ByIndex(3)), None);
        // Name resolves to the first matching index
        assert_eq!(w.resolve(&EntryRef::ByName("A".into())), Some(0));
        assert_eq!(w.resolve(&EntryRef::ByName("C".into())), None);
    }

    #[test]
    fn test_base_weight_default() {
        let mut w = wheel(&["A", "B"]);
        w.entry_weights.insert("A".into(), 3.0);
        assert_eq!(w.base_weight("A"), 3.0);
        assert_eq!(w.base_weight("B"), 1.0);
        assert!((w.average_base_weight() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_trigger_resolution() {
        let mut w = wheel(&["A", "B", "C"]);
        w.default_trigger = Some(TriggerAction::SpinAgain);
        w.triggers.insert("A".into(), TriggerAction::SubWheel("bonus".into()));
        w.triggers.insert("B".into(), TriggerAction::None);

        assert_eq!(
            w.trigger_for("A"),
            Some(&TriggerAction::SubWheel("bonus".into()))
        );
        // Explicit None suppresses the default
        assert_eq!(w.trigger_for("B"), None);
        // Fallback to the default
        assert_eq!(w.trigger_for("C"), Some(&TriggerAction::SpinAgain));
    }
}
