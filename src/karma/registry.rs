use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use super::action::ActionKind;

/// Point value of every action kind this deployment scores.
///
/// Built once at startup and handed to [`super::KarmaManager`]. A kind that was never registered
/// can't be saved, and reads as zero everywhere else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionRegistry {
    points: BTreeMap<ActionKind, i64>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in ActionKind::ALL {
            registry.register(kind, kind.default_points());
        }
        registry
    }

    /// Adds `kind`, or replaces its point value if it's already registered.
    pub fn register(&mut self, kind: ActionKind, points: i64) -> &mut Self {
        self.points.insert(kind, points);
        self
    }

    pub fn points(&self, kind: ActionKind) -> Option<i64> {
        self.points.get(&kind).copied()
    }

    pub fn is_registered(&self, kind: ActionKind) -> bool {
        self.points.contains_key(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ActionKind> + '_ {
        self.points.keys().copied()
    }

    /// Applies `KARMA_POINTS_<KIND>` overrides, keyed by the suffix after the prefix.
    ///
    /// Unknown suffixes are logged and skipped.
    pub fn apply_overrides(&mut self, overrides: &HashMap<String, i64>) -> &mut Self {
        for (name, points) in overrides {
            match ActionKind::from_env_name(name) {
                Some(kind) => {
                    tracing::debug!(%kind, points, "overriding karma point value");
                    self.register(kind, *points);
                }
                None => warn!(name = %name, "ignoring points override for unknown action kind"),
            }
        }
        self
    }
}
