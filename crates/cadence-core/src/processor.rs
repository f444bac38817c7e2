//! Processor state: the runtime shadow of the model tree.
//!
//! Every model gets a [`ProcState`] row (SoA, keyed by `ModelId`): last
//! transition time `tl`, next transition time `tn` (`None` meaning never),
//! and the child rank used as the deterministic tie-break in event sets.
//! Coupled models additionally own one event set over their children; a
//! coordinator's `tn` is always its event set's minimum.

use crate::hierarchy::ModelTree;
use crate::id::ModelId;
use crate::schedule::EventSet;
use crate::time::TimePoint;
use slotmap::SecondaryMap;

/// Runtime fields of one processor.
#[derive(Debug, Clone)]
pub struct ProcState {
    /// Time of the last transition.
    pub tl: TimePoint,
    /// Time of the next transition; `None` when passive.
    pub tn: Option<TimePoint>,
    /// Rank among the parent's children; event-set tie-break.
    pub ord: u32,
}

impl ProcState {
    pub(crate) fn new(ord: u32) -> ProcState {
        ProcState {
            tl: TimePoint::zero(),
            tn: None,
            ord,
        }
    }
}

/// Pop every processor whose `tn` equals `t`, descending through nested
/// coordinators. Imminent atomics are appended in hierarchy order: a
/// coordinator's imminent children expand in place, so the result follows
/// depth-first child-insertion order.
///
/// Popped entries are *not* re-inserted here; the transition wave re-adds
/// every affected processor through its coordinator's upsert.
pub(crate) fn collect_imminent(
    tree: &ModelTree,
    schedules: &mut SecondaryMap<ModelId, Box<dyn EventSet>>,
    coordinator: ModelId,
    t: &TimePoint,
    out: &mut Vec<ModelId>,
) {
    let popped = match schedules.get_mut(coordinator) {
        Some(set) if set.peek_min() == Some(t) => set.pop_imminent(),
        _ => Vec::new(),
    };
    for model in popped {
        if tree.is_atomic(model) {
            out.push(model);
        } else {
            collect_imminent(tree, schedules, model, t, out);
        }
    }
}
