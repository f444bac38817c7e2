//! Array-backed min-heap event set.
//!
//! Entries are keyed by `(tn, ord)` and a `SecondaryMap` tracks each
//! member's slot, giving O(log n) adjust and delete by swap-remove. This is
//! the default discipline.

use crate::id::ModelId;
use crate::schedule::EventSet;
use crate::time::TimePoint;
use slotmap::SecondaryMap;

#[derive(Debug, Clone)]
struct Entry {
    tn: TimePoint,
    ord: u32,
    model: ModelId,
}

impl Entry {
    #[inline]
    fn key_lt(&self, other: &Entry) -> bool {
        match self.tn.cmp(&other.tn) {
            std::cmp::Ordering::Equal => self.ord < other.ord,
            ordering => ordering == std::cmp::Ordering::Less,
        }
    }
}

/// The default event set.
#[derive(Debug, Default)]
pub struct BinaryHeapSchedule {
    heap: Vec<Entry>,
    pos: SecondaryMap<ModelId, usize>,
}

impl BinaryHeapSchedule {
    pub fn new() -> BinaryHeapSchedule {
        BinaryHeapSchedule::default()
    }

    fn swap(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        self.heap.swap(i, j);
        self.pos.insert(self.heap[i].model, i);
        self.pos.insert(self.heap[j].model, j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[i].key_lt(&self.heap[parent]) {
                self.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut smallest = i;
            if left < self.heap.len() && self.heap[left].key_lt(&self.heap[smallest]) {
                smallest = left;
            }
            if right < self.heap.len() && self.heap[right].key_lt(&self.heap[smallest]) {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }

    /// Remove the entry at slot `i` by swapping the tail in, then restore
    /// the heap property in whichever direction it was violated.
    fn remove_at(&mut self, i: usize) -> Entry {
        let last = self.heap.len() - 1;
        self.swap(i, last);
        let entry = match self.heap.pop() {
            Some(e) => e,
            None => unreachable!("remove_at called on an empty heap"),
        };
        self.pos.remove(entry.model);
        if i < self.heap.len() {
            self.sift_down(i);
            self.sift_up(i);
        }
        entry
    }
}

impl EventSet for BinaryHeapSchedule {
    fn insert(&mut self, model: ModelId, ord: u32, tn: TimePoint) {
        if self.pos.contains_key(model) {
            self.adjust(model, ord, Some(tn));
            return;
        }
        self.heap.push(Entry { tn, ord, model });
        let i = self.heap.len() - 1;
        self.pos.insert(model, i);
        self.sift_up(i);
    }

    fn adjust(&mut self, model: ModelId, ord: u32, tn: Option<TimePoint>) {
        match (self.pos.get(model).copied(), tn) {
            (Some(i), Some(tn)) => {
                self.heap[i].tn = tn;
                self.heap[i].ord = ord;
                self.sift_down(i);
                self.sift_up(i);
            }
            (Some(i), None) => {
                self.remove_at(i);
            }
            (None, Some(tn)) => self.insert(model, ord, tn),
            (None, None) => {}
        }
    }

    fn delete(&mut self, model: ModelId) {
        if let Some(i) = self.pos.get(model).copied() {
            self.remove_at(i);
        }
    }

    fn peek_min(&self) -> Option<&TimePoint> {
        self.heap.first().map(|e| &e.tn)
    }

    fn pop_imminent(&mut self) -> Vec<ModelId> {
        let Some(min_tn) = self.heap.first().map(|e| e.tn.clone()) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Some(head) = self.heap.first() {
            if head.tn != min_tn {
                break;
            }
            out.push(self.remove_at(0).model);
        }
        out
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::Duration;
    use crate::scale::Scale;
    use slotmap::SlotMap;

    fn at(s: f64) -> TimePoint {
        TimePoint::zero().advance(&Duration::new(s, Scale::BASE))
    }

    #[test]
    fn heap_property_survives_interior_removal() {
        let mut arena: SlotMap<ModelId, ()> = SlotMap::with_key();
        let ids: Vec<ModelId> = (0..8).map(|_| arena.insert(())).collect();

        let mut set = BinaryHeapSchedule::new();
        for (i, &id) in ids.iter().enumerate() {
            set.insert(id, i as u32, at((8 - i) as f64));
        }
        set.delete(ids[4]);
        set.delete(ids[7]);

        let mut drained = Vec::new();
        while let Some(t) = set.peek_min().cloned() {
            for m in set.pop_imminent() {
                drained.push((t.clone(), m));
            }
        }
        // Remaining entries come out in strictly increasing time order.
        for pair in drained.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
        assert_eq!(drained.len(), 6);
    }

    #[test]
    fn reinsert_after_pop() {
        let mut arena: SlotMap<ModelId, ()> = SlotMap::with_key();
        let a = arena.insert(());
        let mut set = BinaryHeapSchedule::new();
        set.insert(a, 0, at(1.0));
        assert_eq!(set.pop_imminent(), vec![a]);
        // Upsert through adjust puts it back.
        set.adjust(a, 0, Some(at(2.0)));
        assert_eq!(set.peek_min(), Some(&at(2.0)));
        assert_eq!(set.len(), 1);
    }
}
