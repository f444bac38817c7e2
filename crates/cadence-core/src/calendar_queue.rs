//! Bucket-calendar event set.
//!
//! Hashes members into an array of day buckets by their base-unit time
//! value. When the population doubles past the bucket count the calendar
//! grows and recomputes its day width from the occupied span; it shrinks
//! symmetrically. Suited to workloads whose next-event times cluster in a
//! narrow band; degenerate distributions fall back to linear scans of a
//! small bucket array.

use crate::id::ModelId;
use crate::schedule::EventSet;
use crate::time::TimePoint;
use slotmap::SecondaryMap;

const INITIAL_BUCKETS: usize = 8;
const MIN_WIDTH: f64 = 1e-12;

#[derive(Debug, Clone)]
struct Entry {
    tn: TimePoint,
    key: f64,
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

/// Event set hashing members into time-width day buckets.
#[derive(Debug)]
pub struct CalendarQueueSchedule {
    buckets: Vec<Vec<Entry>>,
    width: f64,
    len: usize,
    index: SecondaryMap<ModelId, usize>,
}

impl Default for CalendarQueueSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl CalendarQueueSchedule {
    pub fn new() -> CalendarQueueSchedule {
        CalendarQueueSchedule {
            buckets: vec![Vec::new(); INITIAL_BUCKETS],
            width: 1.0,
            len: 0,
            index: SecondaryMap::new(),
        }
    }

    fn bucket_of(&self, key: f64) -> usize {
        let day = (key / self.width).floor().max(0.0);
        let day = if day >= u64::MAX as f64 {
            u64::MAX
        } else {
            day as u64
        };
        (day % self.buckets.len() as u64) as usize
    }

    /// Position of the minimum entry, as `(bucket, slot)`.
    fn min_position(&self) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for (b, bucket) in self.buckets.iter().enumerate() {
            for (s, entry) in bucket.iter().enumerate() {
                let better = match best {
                    None => true,
                    Some((bb, bs)) => entry.key_lt(&self.buckets[bb][bs]),
                };
                if better {
                    best = Some((b, s));
                }
            }
        }
        best
    }

    fn place(&mut self, entry: Entry) {
        let b = self.bucket_of(entry.key);
        self.index.insert(entry.model, b);
        self.buckets[b].push(entry);
        self.len += 1;
    }

    fn take_member(&mut self, model: ModelId) -> Option<Entry> {
        let b = self.index.remove(model)?;
        let bucket = &mut self.buckets[b];
        let i = bucket.iter().position(|e| e.model == model)?;
        self.len -= 1;
        Some(bucket.remove(i))
    }

    /// Rebuild with a new bucket count; the day width is recomputed from
    /// the occupied key span so the population spreads over one "year".
    fn resize(&mut self, bucket_count: usize) {
        let entries: Vec<Entry> = self.buckets.iter_mut().flat_map(std::mem::take).collect();
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for e in &entries {
            lo = lo.min(e.key);
            hi = hi.max(e.key);
        }
        let span = if entries.is_empty() || hi <= lo {
            0.0
        } else {
            hi - lo
        };
        self.width = (span / bucket_count as f64).max(MIN_WIDTH);
        self.buckets = vec![Vec::new(); bucket_count];
        self.index.clear();
        self.len = 0;
        for e in entries {
            self.place(e);
        }
    }

    fn maybe_grow(&mut self) {
        if self.len > 2 * self.buckets.len() {
            let n = self.buckets.len() * 2;
            self.resize(n);
        }
    }

    fn maybe_shrink(&mut self) {
        if self.buckets.len() > INITIAL_BUCKETS && self.len < self.buckets.len() / 2 {
            let n = self.buckets.len() / 2;
            self.resize(n);
        }
    }
}

impl EventSet for CalendarQueueSchedule {
    fn insert(&mut self, model: ModelId, ord: u32, tn: TimePoint) {
        self.take_member(model);
        let key = tn.as_base();
        self.place(Entry {
            tn,
            key,
            ord,
            model,
        });
        self.maybe_grow();
    }

    fn adjust(&mut self, model: ModelId, ord: u32, tn: Option<TimePoint>) {
        match tn {
            Some(tn) => self.insert(model, ord, tn),
            None => {
                self.take_member(model);
                self.maybe_shrink();
            }
        }
    }

    fn delete(&mut self, model: ModelId) {
        self.take_member(model);
        self.maybe_shrink();
    }

    fn peek_min(&self) -> Option<&TimePoint> {
        self.min_position().map(|(b, s)| &self.buckets[b][s].tn)
    }

    fn pop_imminent(&mut self) -> Vec<ModelId> {
        let Some((b, s)) = self.min_position() else {
            return Vec::new();
        };
        let min_tn = self.buckets[b][s].tn.clone();
        // Equal times share a key, hence a bucket: drain it there.
        let bucket = &mut self.buckets[b];
        let mut popped: Vec<(u32, ModelId)> = Vec::new();
        let mut i = 0;
        while i < bucket.len() {
            if bucket[i].tn == min_tn {
                let e = bucket.remove(i);
                popped.push((e.ord, e.model));
            } else {
                i += 1;
            }
        }
        self.len -= popped.len();
        popped.sort_by_key(|&(ord, _)| ord);
        let out: Vec<ModelId> = popped
            .into_iter()
            .map(|(_, model)| {
                self.index.remove(model);
                model
            })
            .collect();
        self.maybe_shrink();
        out
    }

    fn len(&self) -> usize {
        self.len
    }
}
