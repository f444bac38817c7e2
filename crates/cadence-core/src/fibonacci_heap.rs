//! Fibonacci heap event set.
//!
//! The classic CLRS structure (circular doubly linked root and child
//! rings, lazy consolidation on extract-min, decrease-key with cascading
//! cuts) laid out over a `Vec` arena with a free list instead of owned
//! pointers. `adjust` decrease-keys when the key shrinks and falls back to
//! delete-plus-insert when it grows.

use crate::id::ModelId;
use crate::schedule::EventSet;
use crate::time::TimePoint;
use slotmap::SecondaryMap;

#[derive(Debug, Clone)]
struct Node {
    tn: TimePoint,
    ord: u32,
    model: ModelId,
    parent: Option<usize>,
    child: Option<usize>,
    left: usize,
    right: usize,
    degree: u32,
    mark: bool,
}

/// Event set with amortized O(1) insert and decrease-key.
#[derive(Debug, Default)]
pub struct FibonacciHeapSchedule {
    nodes: Vec<Node>,
    free: Vec<usize>,
    index: SecondaryMap<ModelId, usize>,
    min: Option<usize>,
    len: usize,
}

impl FibonacciHeapSchedule {
    pub fn new() -> FibonacciHeapSchedule {
        FibonacciHeapSchedule::default()
    }

    #[inline]
    fn key_lt(&self, a: usize, b: usize) -> bool {
        match self.nodes[a].tn.cmp(&self.nodes[b].tn) {
            std::cmp::Ordering::Equal => self.nodes[a].ord < self.nodes[b].ord,
            ordering => ordering == std::cmp::Ordering::Less,
        }
    }

    fn alloc(&mut self, tn: TimePoint, ord: u32, model: ModelId) -> usize {
        let node = Node {
            tn,
            ord,
            model,
            parent: None,
            child: None,
            left: 0,
            right: 0,
            degree: 0,
            mark: false,
        };
        if let Some(i) = self.free.pop() {
            self.nodes[i] = node;
            i
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    /// Walk a circular ring starting at `start`, collecting every member.
    fn collect_ring(&self, start: usize) -> Vec<usize> {
        let mut out = vec![start];
        let mut cur = self.nodes[start].right;
        while cur != start {
            out.push(cur);
            cur = self.nodes[cur].right;
        }
        out
    }

    /// Splice `x` into the root ring and update the minimum.
    fn insert_root(&mut self, x: usize) {
        self.nodes[x].parent = None;
        match self.min {
            None => {
                self.nodes[x].left = x;
                self.nodes[x].right = x;
                self.min = Some(x);
            }
            Some(m) => {
                let r = self.nodes[m].right;
                self.nodes[x].left = m;
                self.nodes[x].right = r;
                self.nodes[m].right = x;
                self.nodes[r].left = x;
                if self.key_lt(x, m) {
                    self.min = Some(x);
                }
            }
        }
    }

    fn remove_from_ring(&mut self, x: usize) {
        let l = self.nodes[x].left;
        let r = self.nodes[x].right;
        self.nodes[l].right = r;
        self.nodes[r].left = l;
    }

    /// Make `child` a child of `parent`.
    fn add_child(&mut self, child: usize, parent: usize) {
        self.nodes[child].parent = Some(parent);
        self.nodes[child].mark = false;
        match self.nodes[parent].child {
            None => {
                self.nodes[child].left = child;
                self.nodes[child].right = child;
                self.nodes[parent].child = Some(child);
            }
            Some(c) => {
                let r = self.nodes[c].right;
                self.nodes[child].left = c;
                self.nodes[child].right = r;
                self.nodes[c].right = child;
                self.nodes[r].left = child;
            }
        }
        self.nodes[parent].degree += 1;
    }

    /// Detach `x` from its parent `p` and return it to the root ring.
    fn cut(&mut self, x: usize, p: usize) {
        if self.nodes[x].right == x {
            self.nodes[p].child = None;
        } else {
            if self.nodes[p].child == Some(x) {
                let r = self.nodes[x].right;
                self.nodes[p].child = Some(r);
            }
            self.remove_from_ring(x);
        }
        self.nodes[p].degree -= 1;
        self.nodes[x].mark = false;
        self.insert_root(x);
    }

    fn cascading_cut(&mut self, mut p: usize) {
        while let Some(pp) = self.nodes[p].parent {
            if !self.nodes[p].mark {
                self.nodes[p].mark = true;
                break;
            }
            self.cut(p, pp);
            p = pp;
        }
    }

    /// Merge equal-degree roots until every root degree is unique, then
    /// rebuild the root ring and minimum from the degree table.
    fn consolidate(&mut self) {
        let Some(start) = self.min else {
            return;
        };
        let roots = self.collect_ring(start);
        let mut table: Vec<Option<usize>> = vec![None; 64];
        for w in roots {
            let mut x = w;
            let mut d = self.nodes[x].degree as usize;
            loop {
                if d >= table.len() {
                    table.resize(d + 1, None);
                }
                let Some(y) = table[d] else {
                    break;
                };
                table[d] = None;
                let (small, big) = if self.key_lt(y, x) { (y, x) } else { (x, y) };
                self.add_child(big, small);
                x = small;
                d = self.nodes[x].degree as usize;
            }
            table[d] = Some(x);
        }
        self.min = None;
        for x in table.into_iter().flatten() {
            self.insert_root(x);
        }
    }

    /// Promote `x`'s children to the root ring, next to `x`.
    fn promote_children(&mut self, x: usize) {
        if let Some(first) = self.nodes[x].child {
            for ch in self.collect_ring(first) {
                self.nodes[ch].parent = None;
                self.nodes[ch].mark = false;
                let r = self.nodes[x].right;
                self.nodes[ch].left = x;
                self.nodes[ch].right = r;
                self.nodes[x].right = ch;
                self.nodes[r].left = ch;
            }
            self.nodes[x].child = None;
            self.nodes[x].degree = 0;
        }
    }

    fn extract_min(&mut self) -> Option<ModelId> {
        let z = self.min?;
        self.promote_children(z);
        let zr = self.nodes[z].right;
        self.remove_from_ring(z);
        if zr == z {
            self.min = None;
        } else {
            self.min = Some(zr);
            self.consolidate();
        }
        let model = self.nodes[z].model;
        self.index.remove(model);
        self.free.push(z);
        self.len -= 1;
        Some(model)
    }

    fn decrease(&mut self, x: usize, tn: TimePoint, ord: u32) {
        self.nodes[x].tn = tn;
        self.nodes[x].ord = ord;
        if let Some(p) = self.nodes[x].parent
            && self.key_lt(x, p)
        {
            self.cut(x, p);
            self.cascading_cut(p);
        }
        if let Some(m) = self.min
            && self.key_lt(x, m)
        {
            self.min = Some(x);
        }
    }

    /// Remove an arbitrary node, wherever it sits in the forest.
    fn remove_node(&mut self, x: usize) {
        if let Some(p) = self.nodes[x].parent {
            self.cut(x, p);
            self.cascading_cut(p);
        }
        self.promote_children(x);
        let xr = self.nodes[x].right;
        self.remove_from_ring(x);
        if self.min == Some(x) {
            if xr == x {
                self.min = None;
            } else {
                let mut best = xr;
                for r in self.collect_ring(xr) {
                    if self.key_lt(r, best) {
                        best = r;
                    }
                }
                self.min = Some(best);
            }
        }
        let model = self.nodes[x].model;
        self.index.remove(model);
        self.free.push(x);
        self.len -= 1;
    }
}

impl EventSet for FibonacciHeapSchedule {
    fn insert(&mut self, model: ModelId, ord: u32, tn: TimePoint) {
        if self.index.contains_key(model) {
            self.adjust(model, ord, Some(tn));
            return;
        }
        let x = self.alloc(tn, ord, model);
        self.insert_root(x);
        self.index.insert(model, x);
        self.len += 1;
    }

    fn adjust(&mut self, model: ModelId, ord: u32, tn: Option<TimePoint>) {
        match (self.index.get(model).copied(), tn) {
            (Some(x), Some(new_tn)) => {
                let (same, decreasing) = {
                    let n = &self.nodes[x];
                    let same = new_tn == n.tn && ord == n.ord;
                    let decreasing =
                        new_tn < n.tn || (new_tn == n.tn && ord < n.ord);
                    (same, decreasing)
                };
                if same {
                    return;
                }
                if decreasing {
                    self.decrease(x, new_tn, ord);
                } else {
                    self.remove_node(x);
                    self.insert(model, ord, new_tn);
                }
            }
            (Some(x), None) => self.remove_node(x),
            (None, Some(new_tn)) => self.insert(model, ord, new_tn),
            (None, None) => {}
        }
    }

    fn delete(&mut self, model: ModelId) {
        if let Some(x) = self.index.get(model).copied() {
            self.remove_node(x);
        }
    }

    fn peek_min(&self) -> Option<&TimePoint> {
        self.min.map(|i| &self.nodes[i].tn)
    }

    fn pop_imminent(&mut self) -> Vec<ModelId> {
        let Some(m) = self.min else {
            return Vec::new();
        };
        let min_tn = self.nodes[m].tn.clone();
        let mut out = Vec::new();
        while let Some(mm) = self.min {
            if self.nodes[mm].tn != min_tn {
                break;
            }
            match self.extract_min() {
                Some(model) => out.push(model),
                None => break,
            }
        }
        out
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

    fn mint(n: usize) -> Vec<ModelId> {
        let mut arena: SlotMap<ModelId, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn consolidation_across_extracts() {
        let ids = mint(32);
        let mut set = FibonacciHeapSchedule::new();
        for (i, &id) in ids.iter().enumerate() {
            set.insert(id, i as u32, at((32 - i) as f64));
        }
        // Extract everything; times must come out ascending.
        let mut previous = None;
        while let Some(t) = set.peek_min().cloned() {
            if let Some(p) = &previous {
                assert!(*p < t);
            }
            set.pop_imminent();
            previous = Some(t);
        }
        assert!(set.is_empty());
    }

    #[test]
    fn decrease_key_cuts_into_roots() {
        let ids = mint(16);
        let mut set = FibonacciHeapSchedule::new();
        for (i, &id) in ids.iter().enumerate() {
            set.insert(id, i as u32, at((i + 10) as f64));
        }
        // Force consolidation so some nodes become children.
        assert_eq!(set.pop_imminent(), vec![ids[0]]);
        // Now decrease a late entry below everything else.
        set.adjust(ids[15], 15, Some(at(1.0)));
        assert_eq!(set.peek_min(), Some(&at(1.0)));
        assert_eq!(set.pop_imminent(), vec![ids[15]]);
        // Remaining order is still correct.
        assert_eq!(set.pop_imminent(), vec![ids[1]]);
    }

    #[test]
    fn delete_inside_tree_structure() {
        let ids = mint(12);
        let mut set = FibonacciHeapSchedule::new();
        for (i, &id) in ids.iter().enumerate() {
            set.insert(id, i as u32, at((i + 2) as f64));
        }
        set.pop_imminent(); // consolidate
        set.delete(ids[5]);
        set.delete(ids[11]);
        assert_eq!(set.len(), 9);

        let mut drained = 0;
        let mut previous = None;
        while let Some(t) = set.peek_min().cloned() {
            if let Some(p) = &previous {
                assert!(*p < t);
            }
            drained += set.pop_imminent().len();
            previous = Some(t);
        }
        assert_eq!(drained, 9);
    }
}
