//! Deadline index: an ordered map from absolute deadline to the group of
//! requests sharing it, with O(1) access to the earliest deadline.

use crate::request::{RequestHandle, RqData};
use std::collections::BTreeMap;
use std::collections::VecDeque;

/// All requests that share one absolute deadline, in insertion (FIFO) order.
#[derive(Debug, Default)]
pub struct DeadlineGroup {
    requests: VecDeque<RqData>,
}

impl DeadlineGroup {
    #[inline]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RqData> {
        self.requests.iter()
    }
}

/// `BTreeMap<deadline, DeadlineGroup>` keyed by absolute deadline in
/// nanoseconds; `BTreeMap::first_key_value` gives O(log n) access to the
/// earliest deadline, which a balanced tree can't beat without a separate
/// cached-min field — kept here as a single `Option<u64>` alongside the map
/// so repeated `earliest_deadline` calls during a refill burst don't
/// re-walk the tree.
#[derive(Default)]
pub struct DeadlineIndex {
    groups: BTreeMap<u64, DeadlineGroup>,
    cached_min: Option<u64>,
}

impl DeadlineIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.groups.values().map(DeadlineGroup::len).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Inserts a request under its deadline, creating the group if needed.
    pub fn insert(&mut self, rq: RqData) {
        self.groups.entry(rq.deadline).or_default().requests.push_back(rq);
        self.cached_min = Some(match self.cached_min {
            Some(m) => m.min(rq.deadline),
            None => rq.deadline,
        });
    }

    /// Earliest deadline currently present, if any (O(1) via the cached min).
    #[inline]
    pub fn earliest_deadline(&self) -> Option<u64> {
        self.cached_min
    }

    /// Returns the first `RqData` of the leftmost group, without removing
    /// it.
    pub fn peek(&self) -> Option<&RqData> {
        let (_, group) = self.groups.first_key_value()?;
        group.requests.front()
    }

    /// Removes and returns the front request of the leftmost group,
    /// erasing the group once its list empties. This is the single
    /// primitive the refill loop drives one item at a time.
    pub fn pop_front(&mut self) -> Option<RqData> {
        let (&deadline, _) = self.groups.first_key_value()?;
        let group = self.groups.get_mut(&deadline)?;
        let rq = group.requests.pop_front();
        if group.is_empty() {
            self.groups.remove(&deadline);
        }
        self.recompute_cached_min();
        rq
    }

    /// Removes every request in the earliest-deadline group at once,
    /// dropping the now-empty group entry.
    pub fn pop_earliest_group(&mut self) -> Option<Vec<RqData>> {
        let (&deadline, _) = self.groups.first_key_value()?;
        let group = self.groups.remove(&deadline)?;
        self.recompute_cached_min();
        Some(group.requests.into_iter().collect())
    }

    /// Detaches a specific request, known by the deadline it was inserted
    /// under, from its group. Erases the group if it empties. Used by merge
    /// and finish paths where the request being removed isn't necessarily
    /// the leftmost one.
    pub fn remove(&mut self, handle: RequestHandle, deadline: u64) -> Option<RqData> {
        let group = self.groups.get_mut(&deadline)?;
        let pos = group.requests.iter().position(|r| r.handle == handle)?;
        let rq = group.requests.remove(pos);
        if group.is_empty() {
            self.groups.remove(&deadline);
            self.recompute_cached_min();
        }
        rq
    }

    fn recompute_cached_min(&mut self) {
        self.cached_min = self.groups.keys().next().copied();
    }
}
