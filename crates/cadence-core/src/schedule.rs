//! The event set: a priority queue of processors keyed by next-event time.
//!
//! Coordinators keep one event set over their children. Entries carry the
//! child's insertion rank (`ord`) as the tie-break, so simultaneous events
//! always come back in child-declaration order, the deterministic order
//! the kernel's simultaneity semantics are built on.
//!
//! An infinite next-event time is represented by absence: passive models
//! are simply not members. `adjust` is an upsert (and a removal when the
//! new time is `None`), which lets the kernel re-schedule a processor
//! without tracking whether an earlier pop removed it.
//!
//! Four disciplines are provided; see [`ScheduleKind`]. A ladder queue was
//! considered and left out; the calendar queue already covers the narrow
//! distributions it targets at this scale.

use crate::binary_heap::BinaryHeapSchedule;
use crate::calendar_queue::CalendarQueueSchedule;
use crate::fibonacci_heap::FibonacciHeapSchedule;
use crate::heap_set::HeapSetSchedule;
use crate::id::ModelId;
use crate::time::TimePoint;

/// A priority queue mapping processors to their next-event time.
pub trait EventSet: std::fmt::Debug {
    /// Add a member. Inserting an existing member behaves like `adjust`.
    fn insert(&mut self, model: ModelId, ord: u32, tn: TimePoint);

    /// Upsert a member's time; `None` removes it (the model passivated).
    fn adjust(&mut self, model: ModelId, ord: u32, tn: Option<TimePoint>);

    /// Remove a member if present.
    fn delete(&mut self, model: ModelId);

    /// The minimum time over all members.
    fn peek_min(&self) -> Option<&TimePoint>;

    /// Remove and return every member tied at the minimum time, ordered by
    /// insertion rank.
    fn pop_imminent(&mut self) -> Vec<ModelId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Available event-set disciplines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleKind {
    /// Array-backed min-heap with a position map. The default.
    BinaryHeap,
    /// CLRS Fibonacci heap; amortized O(1) insert and decrease-key.
    FibonacciHeap,
    /// Ordered time buckets; groups simultaneous events under one key.
    HeapSet,
    /// Single-tier bucket calendar with dynamic resizing; for narrow
    /// next-time distributions.
    CalendarQueue,
}

impl Default for ScheduleKind {
    fn default() -> Self {
        ScheduleKind::BinaryHeap
    }
}

impl ScheduleKind {
    /// Build an empty event set of this discipline.
    pub fn make(self) -> Box<dyn EventSet> {
        match self {
            ScheduleKind::BinaryHeap => Box::new(BinaryHeapSchedule::new()),
            ScheduleKind::FibonacciHeap => Box::new(FibonacciHeapSchedule::new()),
            ScheduleKind::HeapSet => Box::new(HeapSetSchedule::new()),
            ScheduleKind::CalendarQueue => Box::new(CalendarQueueSchedule::new()),
        }
    }

    /// Every available discipline, for conformance tests and benchmarks.
    pub fn all() -> [ScheduleKind; 4] {
        [
            ScheduleKind::BinaryHeap,
            ScheduleKind::FibonacciHeap,
            ScheduleKind::HeapSet,
            ScheduleKind::CalendarQueue,
        ]
    }
}

// ===========================================================================
// Conformance tests, run against every discipline
// ===========================================================================
