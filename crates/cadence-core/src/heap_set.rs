//! Bucketed event set: one ordered key per distinct time.
//!
//! Members sharing a next-event time live in a single bucket under one
//! `BTreeMap` key, so workloads with heavy simultaneity pay one key
//! comparison per distinct time instead of one per member. Popping the
//! imminent set is a single bucket removal.

use crate::id::ModelId;
use crate::schedule::EventSet;
use crate::time::TimePoint;
use slotmap::SecondaryMap;
use std::collections::BTreeMap;

/// Event set grouping simultaneous members under one time key.
#[derive(Debug, Default)]
pub struct HeapSetSchedule {
    buckets: BTreeMap<TimePoint, Vec<(u32, ModelId)>>,
    index: SecondaryMap<ModelId, TimePoint>,
    len: usize,
}

impl HeapSetSchedule {
    pub fn new() -> HeapSetSchedule {
        HeapSetSchedule::default()
    }

    fn remove_member(&mut self, model: ModelId) -> bool {
        let Some(tn) = self.index.remove(model) else {
            return false;
        };
        if let Some(bucket) = self.buckets.get_mut(&tn) {
            if let Some(i) = bucket.iter().position(|&(_, m)| m == model) {
                bucket.remove(i);
                self.len -= 1;
            }
            if bucket.is_empty() {
                self.buckets.remove(&tn);
            }
        }
        true
    }
}

impl EventSet for HeapSetSchedule {
    fn insert(&mut self, model: ModelId, ord: u32, tn: TimePoint) {
        self.remove_member(model);
        self.index.insert(model, tn.clone());
        self.buckets.entry(tn).or_default().push((ord, model));
        self.len += 1;
    }

    fn adjust(&mut self, model: ModelId, ord: u32, tn: Option<TimePoint>) {
        match tn {
            Some(tn) => self.insert(model, ord, tn),
            None => {
                self.remove_member(model);
            }
        }
    }

    fn delete(&mut self, model: ModelId) {
        self.remove_member(model);
    }

    fn peek_min(&self) -> Option<&TimePoint> {
        self.buckets.keys().next()
    }

    fn pop_imminent(&mut self) -> Vec<ModelId> {
        let Some((_, mut bucket)) = self.buckets.pop_first() else {
            return Vec::new();
        };
        bucket.sort_by_key(|&(ord, _)| ord);
        self.len -= bucket.len();
        bucket
            .into_iter()
            .map(|(_, model)| {
                self.index.remove(model);
                model
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.len
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
    fn simultaneous_members_share_one_bucket() {
        let mut arena: SlotMap<ModelId, ()> = SlotMap::with_key();
        let ids: Vec<ModelId> = (0..6).map(|_| arena.insert(())).collect();

        let mut set = HeapSetSchedule::new();
        for (i, &id) in ids.iter().enumerate() {
            set.insert(id, i as u32, at(if i % 2 == 0 { 3.0 } else { 7.0 }));
        }
        assert_eq!(set.buckets.len(), 2);
        assert_eq!(set.len(), 6);

        assert_eq!(set.pop_imminent(), vec![ids[0], ids[2], ids[4]]);
        assert_eq!(set.pop_imminent(), vec![ids[1], ids[3], ids[5]]);
    }

    #[test]
    fn moving_the_last_member_drops_the_bucket() {
        let mut arena: SlotMap<ModelId, ()> = SlotMap::with_key();
        let a = arena.insert(());
        let mut set = HeapSetSchedule::new();
        set.insert(a, 0, at(4.0));
        set.adjust(a, 0, Some(at(9.0)));
        assert_eq!(set.buckets.len(), 1);
        assert_eq!(set.peek_min(), Some(&at(9.0)));
    }
}
