//! Request lifecycle hooks and the `IoScheduler` facade that wires
//! [`crate::model`], [`crate::index`], and [`crate::dispatch`] together
//! behind one hook surface.
//!
//! Hook names are `snake_case` translations of a mq-deadline-style
//! `elevator_mq_ops` vtable: `next_request` → [`IoScheduler::dispatch_request`],
//! `former_request`/`request_merged`/`requests_merged`/`bio_merge`/
//! `insert_requests`/`prepare_request`/`completed_request`/`finish_request`/
//! `has_work`/`init_hctx`/`init_sched`/`exit_sched` all have a like-named
//! method below.

use crate::dispatch::{BatchBuffer, BatchHighWaterMarks, Dispatcher, PriorityQueue};
use crate::error::{Result, SchedError};
use crate::index::DeadlineIndex;
use crate::knobs::Knobs;
use crate::model::{LatencyModels, ModelSnapshot};
use crate::request::{OpType, RequestHandle, RequestMeta, RqData};
use crate::timer::UpdateTimer;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Merge kind passed to [`IoScheduler::request_merged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    Front,
    Back,
}

/// A handful of distinct host-contract-violation assertions, each logged at
/// most once per process. `Once` doesn't fit here since the same call site
/// fires repeatedly under normal operation whenever the condition
/// reproduces; a flag per kind suppresses the repeat without needing the
/// call site to remember anything.
#[derive(Debug)]
struct WarnOnce {
    unprepared_request: AtomicBool,
    double_insert: AtomicBool,
    missing_timestamp: AtomicBool,
}

impl Default for WarnOnce {
    fn default() -> Self {
        Self {
            unprepared_request: AtomicBool::new(false),
            double_insert: AtomicBool::new(false),
            missing_timestamp: AtomicBool::new(false),
        }
    }
}

impl WarnOnce {
    fn fire(flag: &AtomicBool, msg: &str) {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            warn!("{msg}");
        }
    }
}

/// Per-request bookkeeping the core keeps on the host's behalf: the
/// `RequestMeta` the host contract describes plus, once indexed, the
/// scheduler's own `RqData`. Stands in for the host's private pointer slot
/// as a pool entry keyed by handle rather than a two-way owning reference.
struct Slot {
    meta: RequestMeta,
    location: Location,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Location {
    /// Prepared but not yet inserted anywhere.
    Detached,
    PriorityQueue,
    Index { deadline: u64 },
    /// In a batch buffer page; the core no longer needs to track which —
    /// `complete`/`finish` only need `pred_lat`, carried alongside.
    Batched { pred_lat: u64 },
}

/// Depth limiter: caps async/write allocations to a fraction of the host's
/// request pool, leaving synchronous reads unthrottled.
struct DepthLimiter {
    nr_requests: AtomicU32,
}

impl Default for DepthLimiter {
    fn default() -> Self {
        Self {
            nr_requests: AtomicU32::new(0),
        }
    }
}

impl DepthLimiter {
    /// `depth_updated()`: host informs the core of the hw queue's total
    /// request-pool size.
    fn depth_updated(&self, nr_requests: u32) {
        self.nr_requests.store(nr_requests, Ordering::Relaxed);
    }

    /// `limit_depth()`: synchronous reads get the full pool; everything
    /// else (async reads, writes, discards) is capped to half, reserving
    /// the remainder for synchronous reads the way the async depth shift
    /// does in the host this models.
    fn limit_depth(&self, op: OpType, is_sync: bool) -> u32 {
        let total = self.nr_requests.load(Ordering::Relaxed);
        if is_sync && op == OpType::Read {
            total
        } else {
            total / 2
        }
    }
}

/// Ties every core subsystem together. One instance per scheduled queue,
/// matching `init_hctx`/`init_sched`/`exit_sched`'s granularity.
pub struct IoScheduler {
    pool: Mutex<HashMap<RequestHandle, Slot>>,
    index: Mutex<DeadlineIndex>,
    bq: BatchBuffer,
    pq: PriorityQueue,
    models: Arc<LatencyModels>,
    pub knobs: Knobs,
    timer: Arc<UpdateTimer>,
    depth: DepthLimiter,
    warn_once: WarnOnce,
}

impl IoScheduler {
    /// `init_sched()`.
    pub fn init_sched() -> Result<Arc<Self>> {
        let models = Arc::new(LatencyModels::new());
        let timer = UpdateTimer::new(Arc::clone(&models));
        Ok(Arc::new(Self {
            pool: Mutex::new(HashMap::new()),
            index: Mutex::new(DeadlineIndex::new()),
            bq: BatchBuffer::new(),
            pq: PriorityQueue::new(),
            models,
            knobs: Knobs::new(),
            timer,
            depth: DepthLimiter::default(),
            warn_once: WarnOnce::default(),
        }))
    }

    /// `init_hctx()`: per-hardware-queue init. Nothing hardware-queue-local
    /// to allocate once the model/index/bq/pq above are already process-wide,
    /// so this is a no-op retained for the hook surface's sake.
    pub fn init_hctx(&self) {}

    /// `exit_sched()`: cancels the update timer and asserts the priority
    /// queue is empty before the caller frees pools.
    pub fn exit_sched(&self) {
        self.timer.cancel();
        if !self.pq.is_empty() {
            WarnOnce::fire(
                &self.warn_once.double_insert,
                "exit_sched: priority queue not empty at shutdown",
            );
        }
    }

    pub fn depth_updated(&self, nr_requests: u32) {
        self.depth.depth_updated(nr_requests);
    }

    pub fn limit_depth(&self, op: OpType, is_sync: bool) -> u32 {
        self.depth.limit_depth(op, is_sync)
    }

    /// `prepare_request(rq)`: allocate RqData zeroed, attach to the host's
    /// private slot. On failure the hook warns and leaves the slot null;
    /// subsequent hooks on an unprepared handle must no-op gracefully
    /// rather than panic.
    pub fn prepare_request(&self, handle: RequestHandle, meta: RequestMeta) -> Result<()> {
        let mut pool = self.pool.lock();
        pool.insert(
            handle,
            Slot {
                meta,
                location: Location::Detached,
            },
        );
        Ok(())
    }

    /// `insert_requests(rq, at_head)`. `try_merge` models the host's
    /// external merge primitive; it runs under the index lock, and
    /// returning `true` means the request was absorbed elsewhere and should
    /// not be indexed.
    pub fn insert_request(
        &self,
        handle: RequestHandle,
        at_head: bool,
        try_merge: impl FnOnce() -> bool,
    ) {
        if at_head {
            let Some(meta) = self.pool.lock().get(&handle).map(|s| s.meta) else {
                WarnOnce::fire(
                    &self.warn_once.unprepared_request,
                    "insert_request: handle was never prepared",
                );
                return;
            };
            let rq = RqData::new(handle, meta.op, meta.total_bytes);
            self.pq.push_head(rq);
            if let Some(slot) = self.pool.lock().get_mut(&handle) {
                slot.location = Location::PriorityQueue;
            }
            return;
        }

        let mut index = self.index.lock();
        if try_merge() {
            return;
        }

        let Some(meta) = self.pool.lock().get(&handle).map(|s| s.meta) else {
            WarnOnce::fire(
                &self.warn_once.unprepared_request,
                "insert_request: handle was never prepared",
            );
            return;
        };
        let rq = self.build_rqdata(handle, &meta);
        let deadline = rq.deadline;
        index.insert(rq);
        if let Some(slot) = self.pool.lock().get_mut(&handle) {
            slot.location = Location::Index { deadline };
        }
    }

    fn build_rqdata(&self, handle: RequestHandle, meta: &RequestMeta) -> RqData {
        let pred_lat = self.models.get(meta.op).predict(meta.total_bytes);
        let deadline = meta
            .start_time_ns
            .saturating_add(self.knobs.lat_target_ns(meta.op))
            .saturating_add(pred_lat);
        RqData {
            handle,
            op: meta.op,
            deadline,
            pred_lat,
            block_size: meta.total_bytes,
        }
    }

    /// `request_merged(rq, kind)`: a front merge changes start time/length,
    /// so the deadline must be recomputed; back merges need no action.
    pub fn request_merged(&self, handle: RequestHandle, kind: MergeKind, new_meta: RequestMeta) {
        if kind != MergeKind::Front {
            if let Some(slot) = self.pool.lock().get_mut(&handle) {
                slot.meta = new_meta;
            }
            return;
        }

        let deadline = {
            let mut pool = self.pool.lock();
            let Some(slot) = pool.get_mut(&handle) else {
                return;
            };
            slot.meta = new_meta;
            match slot.location {
                Location::Index { deadline } => Some(deadline),
                _ => None,
            }
        };
        let Some(deadline) = deadline else { return };

        let mut index = self.index.lock();
        if index.remove(handle, deadline).is_none() {
            return;
        }
        let meta = self.pool.lock().get(&handle).map(|s| s.meta);
        let Some(meta) = meta else { return };
        let rq = self.build_rqdata(handle, &meta);
        let new_deadline = rq.deadline;
        index.insert(rq);
        if let Some(slot) = self.pool.lock().get_mut(&handle) {
            slot.location = Location::Index {
                deadline: new_deadline,
            };
        }
    }

    /// Detaches `handle` from whichever core structure it currently sits in
    /// — index, priority queue, or a batch page — without touching the pool
    /// slot. Shared by `merged_requests` and `bio_merge`, both of which
    /// absorb a request the host has already decided is redundant and must
    /// free it from every structure, not merely the pool.
    ///
    /// The recorded `Location` is a hint, not authoritative: a refill moves
    /// many requests from the index into a batch page at once but only
    /// updates `Location` for the single request `dispatch_request` actually
    /// hands back, so a request can read `Index { .. }` while it has
    /// already physically moved into a batch page. When the index doesn't
    /// actually hold it, fall back to the batch buffer rather than leaving
    /// a stale entry behind there.
    fn detach_from_core_structures(&self, handle: RequestHandle) {
        let location = self.pool.lock().get(&handle).map(|s| s.location);
        match location {
            Some(Location::Index { deadline }) => {
                if self.index.lock().remove(handle, deadline).is_none() {
                    self.bq.remove(handle);
                }
            }
            Some(Location::PriorityQueue) => {
                self.pq.remove(handle);
            }
            Some(Location::Batched { .. }) => {
                self.bq.remove(handle);
            }
            Some(Location::Detached) | None => {}
        }
    }

    /// `requests_merged(rq, next)`: `next` is absorbed into `rq`; remove
    /// `next` from every core structure and free it.
    pub fn merged_requests(&self, next: RequestHandle) {
        self.detach_from_core_structures(next);
        self.finish_request(next);
    }

    /// `bio_merge(q, bio)`: calls into the host merge primitive under the
    /// index lock, freeing any request the host reports as now-redundant.
    pub fn bio_merge(&self, try_merge: impl FnOnce() -> Option<RequestHandle>) {
        let redundant = {
            let _index = self.index.lock();
            try_merge()
        };
        if let Some(handle) = redundant {
            self.detach_from_core_structures(handle);
            self.finish_request(handle);
        }
    }

    /// `next_request()` / `dispatch_request()`.
    pub fn dispatch_request(&self) -> Option<RequestHandle> {
        let rq = Dispatcher::dispatch(&self.pq, &self.bq, &self.index, &self.models, &self.knobs)?;
        if let Some(slot) = self.pool.lock().get_mut(&rq.handle) {
            slot.location = Location::Batched {
                pred_lat: rq.pred_lat,
            };
        }
        Some(rq.handle)
    }

    /// `former_request()`: peeks what `dispatch_request` would return next
    /// without consuming it. The priority queue and active batch page are
    /// both simple FIFOs, so peeking is just reading the front.
    pub fn former_request(&self) -> Option<RequestHandle> {
        self.pq.peek_front().or_else(|| self.bq.peek_active())
    }

    pub fn has_work(&self) -> bool {
        Dispatcher::has_work(&self.pq, &self.bq, &self.index)
    }

    /// `completed_request(rq, now)`: feeds the latency model and arms the
    /// update timer. Returns `true` iff the sample was fed into the model,
    /// `false` when feedback was skipped (missing timestamp) or the model
    /// silently dropped it (large path, no base or predicted latency yet)
    /// — callers may count the latter for observability.
    pub fn completed_request(&self, handle: RequestHandle, now_ns: u64) -> bool {
        let meta = {
            let mut pool = self.pool.lock();
            let Some(slot) = pool.get_mut(&handle) else {
                WarnOnce::fire(
                    &self.warn_once.unprepared_request,
                    "completed_request: handle was never prepared",
                );
                return false;
            };
            let pred_lat = match slot.location {
                Location::Batched { pred_lat } => pred_lat,
                _ => 0,
            };
            self.bq.complete(pred_lat);
            (slot.meta, pred_lat)
        };
        let (meta, pred_lat) = meta;

        match meta.io_start_time_ns {
            Some(io_start) if meta.total_bytes > 0 => {
                let latency = now_ns.saturating_sub(io_start);
                let fed = self.models.get(meta.op).input(meta.total_bytes, latency, pred_lat);
                self.timer.arm(now_ns / 1_000_000);
                fed
            }
            _ => {
                WarnOnce::fire(
                    &self.warn_once.missing_timestamp,
                    "completed_request: missing io_start_time_ns, skipping model feedback",
                );
                false
            }
        }
    }

    /// `finish_request(rq)`: free RqData and clear the private slot.
    pub fn finish_request(&self, handle: RequestHandle) {
        let mut pool = self.pool.lock();
        pool.remove(&handle);
    }

    /// Host-side bookkeeping helper: records dispatch time for a request
    /// just handed to `dispatch_request`'s caller, so `completed_request`
    /// can later compute `now - io_start_time_ns`. Not a hook itself — a
    /// real host sets this field directly on its own request object; this
    /// crate has no such struct to reach into, so the pool stands in for it.
    pub fn mark_io_start(&self, handle: RequestHandle, io_start_ns: u64) {
        if let Some(slot) = self.pool.lock().get_mut(&handle) {
            slot.meta.io_start_time_ns = Some(io_start_ns);
        }
    }

    /// Read-only access to the underlying per-op models, for diagnostics
    /// and for driving cold-start bootstrap directly in tests.
    pub fn models(&self) -> &LatencyModels {
        &self.models
    }

    pub fn meta_of(&self, handle: RequestHandle) -> Option<RequestMeta> {
        self.pool.lock().get(&handle).map(|s| s.meta)
    }

    pub fn lat_model_snapshot(&self, op: OpType) -> ModelSnapshot {
        self.models.get(op).snapshot()
    }

    pub fn batch_high_water_marks(&self) -> BatchHighWaterMarks {
        self.bq.high_water_marks()
    }

    pub fn reset_bq_stats(&self) {
        self.bq.reset_stats();
    }

    pub fn reset_lat_model(&self) {
        self.models.reset_all();
    }

    /// Writing `lat_target_*` resets that op's learned `base` to 0.
    pub fn set_lat_target_ns(&self, op: OpType, ns: u64) -> std::result::Result<(), SchedError> {
        self.knobs.set_lat_target_ns(op, ns)?;
        self.models.get(op).reset_base();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(op: OpType, start: u64, bytes: u32) -> RequestMeta {
        RequestMeta::new(op, start, bytes)
    }

    #[test]
    fn prepare_then_insert_then_dispatch_round_trip() {
        let sched = IoScheduler::init_sched().unwrap();
        sched.prepare_request(1, meta(OpType::Read, 100, 4096)).unwrap();
        sched.insert_request(1, false, || false);
        assert!(sched.has_work());
        // model cold: refill won't move anything for READ until it has a
        // base; bootstrap it directly first.
        sched.models.get(OpType::Read).input(4096, 500, 0);
        sched.models.get(OpType::Read).update(0);
        let dispatched = sched.dispatch_request();
        assert_eq!(dispatched, Some(1));
    }

    #[test]
    fn head_insert_bypasses_the_index_and_dispatches_first() {
        let sched = IoScheduler::init_sched().unwrap();
        sched.prepare_request(1, meta(OpType::Read, 100, 4096)).unwrap();
        sched.insert_request(1, false, || false);
        sched.prepare_request(2, meta(OpType::Write, 0, 4096)).unwrap();
        sched.insert_request(2, true, || false);

        assert_eq!(sched.dispatch_request(), Some(2));
    }

    #[test]
    fn completed_request_without_timestamp_is_a_silent_skip() {
        let sched = IoScheduler::init_sched().unwrap();
        sched.prepare_request(1, meta(OpType::Read, 100, 4096)).unwrap();
        sched.insert_request(1, true, || false);
        sched.dispatch_request();
        // io_start_time_ns was never set — should not panic.
        sched.completed_request(1, 1000);
        assert!(sched.models.get(OpType::Read).is_cold());
    }

    #[test]
    fn unprepared_handle_is_a_graceful_no_op() {
        let sched = IoScheduler::init_sched().unwrap();
        sched.insert_request(42, false, || false);
        assert!(!sched.has_work());
        sched.completed_request(42, 0);
        sched.finish_request(42);
    }

    #[test]
    fn merged_requests_frees_the_absorbed_handle() {
        let sched = IoScheduler::init_sched().unwrap();
        sched.prepare_request(1, meta(OpType::Write, 0, 4096)).unwrap();
        sched.insert_request(1, false, || false);
        sched.prepare_request(2, meta(OpType::Write, 0, 4096)).unwrap();
        sched.insert_request(2, false, || false);
        assert_eq!(sched.index.lock().len(), 2);

        sched.merged_requests(2);

        assert!(sched.pool.lock().get(&2).is_none());
        // The absorbed request must be gone from the index too, not just
        // the pool, or it would later be refilled and dispatched to a host
        // that has no pool slot for it anymore.
        assert_eq!(sched.index.lock().len(), 1);
    }

    #[test]
    fn merged_requests_detaches_a_head_inserted_request_from_the_priority_queue() {
        let sched = IoScheduler::init_sched().unwrap();
        sched.prepare_request(1, meta(OpType::Write, 0, 4096)).unwrap();
        sched.insert_request(1, true, || false);
        assert!(!sched.pq.is_empty());

        sched.merged_requests(1);

        assert!(sched.pq.is_empty());
        assert!(sched.pool.lock().get(&1).is_none());
    }

    #[test]
    fn merged_requests_detaches_a_request_a_bulk_refill_already_batched() {
        let sched = IoScheduler::init_sched().unwrap();
        sched.models.get(OpType::Read).input(4096, 1000, 0);
        sched.models.get(OpType::Read).update(0);
        for h in [1u64, 2, 3] {
            sched.prepare_request(h, meta(OpType::Read, h, 4096)).unwrap();
            sched.insert_request(h, false, || false);
        }
        // One refill moves all three into a batch page; dispatching once
        // only updates handle 1's recorded Location to `Batched`, leaving
        // 2 and 3 reading stale `Index { .. }` locations even though the
        // index itself is now empty.
        assert_eq!(sched.dispatch_request(), Some(1));
        assert!(sched.index.lock().is_empty());
        assert_eq!(sched.bq.item_count(), 2);

        sched.merged_requests(2);

        assert_eq!(sched.bq.item_count(), 1);
        assert!(sched.pool.lock().get(&2).is_none());
        assert_eq!(sched.dispatch_request(), Some(3));
    }

    #[test]
    fn bio_merge_detaches_the_reported_redundant_request_from_the_index() {
        let sched = IoScheduler::init_sched().unwrap();
        sched.prepare_request(1, meta(OpType::Write, 0, 4096)).unwrap();
        sched.insert_request(1, false, || false);
        sched.prepare_request(2, meta(OpType::Write, 0, 4096)).unwrap();
        sched.insert_request(2, false, || false);
        assert_eq!(sched.index.lock().len(), 2);

        sched.bio_merge(|| Some(2));

        assert!(sched.pool.lock().get(&2).is_none());
        assert_eq!(sched.index.lock().len(), 1);
    }

    #[test]
    fn set_lat_target_resets_base() {
        let sched = IoScheduler::init_sched().unwrap();
        sched.models.get(OpType::Read).input(4096, 1000, 0);
        sched.models.get(OpType::Read).update(0);
        assert!(!sched.models.get(OpType::Read).is_cold());
        sched.set_lat_target_ns(OpType::Read, 3_000_000).unwrap();
        assert!(sched.models.get(OpType::Read).is_cold());
    }

    #[test]
    fn depth_limiter_never_throttles_synchronous_reads() {
        let sched = IoScheduler::init_sched().unwrap();
        sched.depth_updated(128);
        assert_eq!(sched.limit_depth(OpType::Read, true), 128);
        assert_eq!(sched.limit_depth(OpType::Write, true), 64);
        assert_eq!(sched.limit_depth(OpType::Read, false), 64);
    }
}
