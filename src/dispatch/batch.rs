//! Double-buffered batch queue: two pages, one active for dispatch while
//! the other is refilled from the deadline index.

use crate::index::DeadlineIndex;
use crate::knobs::Knobs;
use crate::model::LatencyModels;
use crate::request::{OpType, RqData};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// One page: a per-op FIFO list plus its count, mirrored (the count is
/// redundant with `list.len()`, but keeping both in lockstep is how the
/// high-water-mark bookkeeping below wants to read it).
struct Page {
    lists: [VecDeque<RqData>; OpType::COUNT],
}

impl Default for Page {
    fn default() -> Self {
        Self {
            lists: std::array::from_fn(|_| VecDeque::new()),
        }
    }
}

impl Page {
    fn count(&self, op: OpType) -> u32 {
        self.lists[op.index()].len() as u32
    }

    fn clear(&mut self) {
        for l in &mut self.lists {
            l.clear();
        }
    }
}

/// Observed per-op maximum batch counts (the `batch_actual_max` RO knob).
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchHighWaterMarks {
    pub read: u32,
    pub write: u32,
    pub discard: u32,
    pub other: u32,
}

impl BatchHighWaterMarks {
    fn record(&mut self, op: OpType, count: u32) {
        let slot = match op {
            OpType::Read => &mut self.read,
            OpType::Write => &mut self.write,
            OpType::Discard => &mut self.discard,
            OpType::Other => &mut self.other,
        };
        if count > *slot {
            *slot = count;
        }
    }

    pub fn total(&self) -> u32 {
        self.read + self.write + self.discard + self.other
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl std::fmt::Display for BatchHighWaterMarks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total : {}\ndiscard: {}\nread   : {}\nwrite  : {}\n",
            self.total(),
            self.discard,
            self.read,
            self.write
        )
    }
}

struct State {
    pages: [Page; 2],
    active_page: usize,
    more_ready: bool,
    total_pred_lat: u64,
    high_water: BatchHighWaterMarks,
}

impl Default for State {
    fn default() -> Self {
        Self {
            pages: [Page::default(), Page::default()],
            active_page: 0,
            more_ready: false,
            total_pred_lat: 0,
            high_water: BatchHighWaterMarks::default(),
        }
    }
}

pub struct BatchBuffer {
    state: Mutex<State>,
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_pred_lat(&self) -> u64 {
        self.state.lock().total_pred_lat
    }

    /// Total number of requests physically held across both pages, counted
    /// independently of `total_pred_lat` — a cold op's requests carry a
    /// `pred_lat` of 0 and must still count as occupying the buffer.
    pub fn item_count(&self) -> u32 {
        let state = self.state.lock();
        state
            .pages
            .iter()
            .map(|p| p.lists.iter().map(|l| l.len() as u32).sum::<u32>())
            .sum()
    }

    /// Detaches a specific request by handle from whichever page/op list it
    /// currently sits in, subtracting its `pred_lat` from the running total.
    /// Used by merge/finish paths absorbing a request that has already been
    /// moved out of the index and into a batch page. Returns `true` iff a
    /// matching request was found and removed.
    pub fn remove(&self, handle: crate::request::RequestHandle) -> bool {
        let mut state = self.state.lock();
        for page in state.pages.iter_mut() {
            for list in page.lists.iter_mut() {
                if let Some(pos) = list.iter().position(|r| r.handle == handle) {
                    let rq = list.remove(pos).expect("position found above");
                    state.total_pred_lat = state.total_pred_lat.saturating_sub(rq.pred_lat);
                    return true;
                }
            }
        }
        false
    }

    pub fn high_water_marks(&self) -> BatchHighWaterMarks {
        self.state.lock().high_water
    }

    pub fn reset_stats(&self) {
        self.state.lock().high_water.reset();
    }

    /// Refill the inactive page from the deadline index. The
    /// `&mut DeadlineIndex` borrow stands in for "caller already holds the
    /// index lock": the type system enforces exclusive access instead of a
    /// runtime lock, and this buffer's own lock is taken only inside, after
    /// the index borrow is established — preserving the lock-ordering
    /// discipline the design relies on. Returns `true` iff at least one
    /// request was moved.
    pub fn refill(&self, index: &mut DeadlineIndex, models: &LatencyModels, knobs: &Knobs) -> bool {
        let mut state = self.state.lock();
        let other = state.active_page ^ 1;
        state.pages[other].clear();

        let window = knobs.global_latency_window_ns();
        let mut current = state.total_pred_lat;
        let mut taken = 0u32;

        loop {
            let Some(peeked) = index.peek() else { break };
            let op = peeked.op;
            let candidate = current + peeked.pred_lat;

            if taken > 0 {
                let stop = models.get(op).is_cold()
                    || state.pages[other].count(op) >= knobs.batch_limit(op)
                    || candidate > window;
                if stop {
                    break;
                }
            }

            let rq = index.pop_front().expect("peek succeeded above");
            let count = {
                state.pages[other].lists[op.index()].push_back(rq);
                state.pages[other].count(op)
            };
            state.high_water.record(op, count);
            current = candidate;
            taken += 1;
        }

        if taken > 0 {
            state.total_pred_lat = current;
            state.more_ready = true;
        }
        taken > 0
    }

    /// Subtracts a completed request's predicted latency from the running
    /// total.
    pub fn complete(&self, pred_lat: u64) {
        let mut state = self.state.lock();
        state.total_pred_lat = state.total_pred_lat.saturating_sub(pred_lat);
    }

    /// Peeks the request `dispatch()` would return next, without
    /// consuming it (backs `former_request`).
    pub fn peek_active(&self) -> Option<crate::request::RequestHandle> {
        let state = self.state.lock();
        let active = state.active_page;
        for op in OpType::DISPATCH_ORDER {
            if let Some(rq) = state.pages[active].lists[op.index()].front() {
                return Some(rq.handle);
            }
        }
        None
    }

    pub fn needs_refill(&self, knobs: &Knobs) -> bool {
        let state = self.state.lock();
        if state.more_ready {
            return false;
        }
        state.total_pred_lat == 0 || state.total_pred_lat < knobs.refill_trigger_ns()
    }

    /// Pops the next request from the active page in fixed op order
    /// (`READ, WRITE, DISCARD, OTHER`), flipping pages once and retrying if
    /// the active page is drained but another is ready.
    pub fn dispatch(&self) -> Option<RqData> {
        let mut state = self.state.lock();
        if let Some(rq) = Self::pop_from_active(&mut state) {
            return Some(rq);
        }
        if state.more_ready {
            state.active_page ^= 1;
            state.more_ready = false;
            return Self::pop_from_active(&mut state);
        }
        None
    }

    fn pop_from_active(state: &mut State) -> Option<RqData> {
        let active = state.active_page;
        for op in OpType::DISPATCH_ORDER {
            if let Some(rq) = state.pages[active].lists[op.index()].pop_front() {
                return Some(rq);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::OpType;

    fn rq(handle: u64, op: OpType, deadline: u64, pred_lat: u64) -> RqData {
        let mut r = RqData::new(handle, op, 4096);
        r.deadline = deadline;
        r.pred_lat = pred_lat;
        r
    }

    fn ready_models() -> LatencyModels {
        let models = LatencyModels::new();
        for op in OpType::DISPATCH_ORDER {
            models.get(op).input(4096, 1, 0);
            models.get(op).update(0);
        }
        models
    }

    #[test]
    fn refill_moves_available_requests_and_sets_more_ready() {
        let mut index = DeadlineIndex::new();
        index.insert(rq(1, OpType::Read, 100, 10));
        index.insert(rq(2, OpType::Read, 200, 10));
        let models = ready_models();
        let knobs = Knobs::new();

        let bq = BatchBuffer::new();
        assert!(bq.refill(&mut index, &models, &knobs));
        assert_eq!(bq.total_pred_lat(), 20);
        assert!(bq.dispatch().is_some());
        assert!(bq.dispatch().is_some());
        assert!(index.is_empty());
    }

    #[test]
    fn refill_respects_per_op_batch_limit() {
        let mut index = DeadlineIndex::new();
        for i in 0..20u64 {
            index.insert(rq(i, OpType::Discard, i, 1));
        }
        let models = ready_models();
        let knobs = Knobs::new();
        assert_eq!(knobs.batch_limit(OpType::Discard), 1);

        let bq = BatchBuffer::new();
        bq.refill(&mut index, &models, &knobs);
        assert_eq!(index.len(), 19);
        assert_eq!(bq.high_water_marks().discard, 1);
    }

    #[test]
    fn refill_always_takes_at_least_one_even_over_window() {
        let mut index = DeadlineIndex::new();
        index.insert(rq(1, OpType::Write, 1, 1_000_000_000));
        index.insert(rq(2, OpType::Write, 2, 1));
        let models = ready_models();
        let knobs = Knobs::new();

        let bq = BatchBuffer::new();
        assert!(bq.refill(&mut index, &models, &knobs));
        // first one always taken despite exceeding the window; the second
        // must then be rejected since current already exceeds the window.
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn refill_skips_op_whose_model_is_cold() {
        let mut index = DeadlineIndex::new();
        index.insert(rq(1, OpType::Read, 1, 5));
        index.insert(rq(2, OpType::Write, 2, 5));
        let models = LatencyModels::new();
        models.get(OpType::Read).input(4096, 1, 0);
        models.get(OpType::Read).update(0);
        // Write model left cold.
        let knobs = Knobs::new();

        let bq = BatchBuffer::new();
        bq.refill(&mut index, &models, &knobs);
        assert_eq!(index.len(), 1);
        assert_eq!(index.peek().unwrap().handle, 2);
    }

    #[test]
    fn dispatch_orders_reads_before_writes_within_a_page() {
        let mut index = DeadlineIndex::new();
        index.insert(rq(1, OpType::Write, 1, 1));
        index.insert(rq(2, OpType::Read, 2, 1));
        let models = ready_models();
        let knobs = Knobs::new();

        let bq = BatchBuffer::new();
        bq.refill(&mut index, &models, &knobs);
        assert_eq!(bq.dispatch().unwrap().handle, 2);
        assert_eq!(bq.dispatch().unwrap().handle, 1);
    }

    #[test]
    fn dispatch_flips_pages_when_active_drained_and_more_ready() {
        let mut index = DeadlineIndex::new();
        for i in 0..3u64 {
            index.insert(rq(i, OpType::Read, i, 1));
        }
        let models = ready_models();
        let knobs = Knobs::new();
        knobs.set_batch_limit(OpType::Read, 1).unwrap();

        let bq = BatchBuffer::new();
        bq.refill(&mut index, &models, &knobs);
        let first = bq.dispatch().unwrap();
        assert!(bq.dispatch().is_none());
        bq.refill(&mut index, &models, &knobs);
        let second = bq.dispatch();
        assert!(second.is_some());
        assert_ne!(first.handle, second.unwrap().handle);
    }

    #[test]
    fn item_count_reflects_occupancy_even_when_pred_lat_is_zero() {
        let mut index = DeadlineIndex::new();
        index.insert(rq(1, OpType::Read, 1, 0));
        let models = ready_models();
        let knobs = Knobs::new();

        let bq = BatchBuffer::new();
        bq.refill(&mut index, &models, &knobs);
        assert_eq!(bq.total_pred_lat(), 0);
        assert_eq!(bq.item_count(), 1);
    }

    #[test]
    fn remove_detaches_a_held_request_and_subtracts_its_pred_lat() {
        let mut index = DeadlineIndex::new();
        index.insert(rq(1, OpType::Read, 1, 50));
        index.insert(rq(2, OpType::Write, 2, 30));
        let models = ready_models();
        let knobs = Knobs::new();

        let bq = BatchBuffer::new();
        bq.refill(&mut index, &models, &knobs);
        assert_eq!(bq.total_pred_lat(), 80);
        assert!(bq.remove(1));
        assert_eq!(bq.total_pred_lat(), 30);
        assert_eq!(bq.item_count(), 1);
        assert!(!bq.remove(1));
        assert_eq!(bq.dispatch().unwrap().handle, 2);
    }

    #[test]
    fn complete_subtracts_from_total_pred_lat() {
        let bq = BatchBuffer::new();
        let mut index = DeadlineIndex::new();
        index.insert(rq(1, OpType::Read, 1, 50));
        let models = ready_models();
        let knobs = Knobs::new();
        bq.refill(&mut index, &models, &knobs);
        assert_eq!(bq.total_pred_lat(), 50);
        bq.complete(50);
        assert_eq!(bq.total_pred_lat(), 0);
    }
}
