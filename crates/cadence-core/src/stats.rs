//! Transition counters.
//!
//! Tallies initializations and the three transition kinds per model name
//! and in total, plus the number of completed steps. Read-only from the
//! outside; the kernel records as it dispatches.

use crate::id::Name;
use crate::observer::Transition;
use serde::Serialize;
use std::collections::BTreeMap;

/// Counters for one model (or the whole simulation).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransitionCounts {
    pub init: u64,
    pub internal: u64,
    pub external: u64,
    pub confluent: u64,
}

impl TransitionCounts {
    /// Transitions excluding initialization.
    pub fn transitions(&self) -> u64 {
        self.internal + self.external + self.confluent
    }

    fn bump(&mut self, transition: Transition) {
        match transition {
            Transition::Init => self.init += 1,
            Transition::Internal => self.internal += 1,
            Transition::External => self.external += 1,
            Transition::Confluent => self.confluent += 1,
        }
    }
}

/// Per-model and aggregate transition statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransitionStats {
    pub per_model: BTreeMap<Name, TransitionCounts>,
    pub total: TransitionCounts,
    /// Completed simulation steps.
    pub steps: u64,
}

impl TransitionStats {
    pub(crate) fn record(&mut self, model: &Name, transition: Transition) {
        self.per_model
            .entry(model.clone())
            .or_default()
            .bump(transition);
        self.total.bump(transition);
    }

    /// Counters for one model, zero if it never transitioned.
    pub fn for_model(&self, model: &str) -> TransitionCounts {
        self.per_model
            .iter()
            .find(|(n, _)| *n == model)
            .map(|(_, c)| *c)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tallies_per_model_and_total() {
        let mut stats = TransitionStats::default();
        let r#gen = Name::from("gen");
        let recv = Name::from("recv");

        stats.record(&r#gen, Transition::Init);
        stats.record(&r#gen, Transition::Internal);
        stats.record(&r#gen, Transition::Internal);
        stats.record(&recv, Transition::External);

        assert_eq!(stats.for_model("gen").internal, 2);
        assert_eq!(stats.for_model("recv").external, 1);
        assert_eq!(stats.for_model("recv").internal, 0);
        assert_eq!(stats.for_model("absent"), TransitionCounts::default());
        assert_eq!(stats.total.transitions(), 3);
        assert_eq!(stats.total.init, 1);
    }
}
