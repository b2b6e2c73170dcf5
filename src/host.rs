//! Host I/O framework stand-in.
//!
//! The real host (bio layer, hardware queue, request-merge hash, block
//! device) is out of scope: this module exists only to exercise
//! [`crate::lifecycle::IoScheduler`] end-to-end for the `simulate` CLI
//! command and the integration tests, driving a synthetic workload
//! generator and simulated device against the scheduler the way a real
//! host would drive worker threads against a real block device. It has no
//! bearing on the core's own correctness and the core has zero dependency
//! back on it.

use crate::lifecycle::IoScheduler;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::request::{OpType, RequestMeta};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

/// Offset-generation pattern for synthetic workload submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadPattern {
    Sequential,
    Random,
    Mixed,
}

impl std::str::FromStr for WorkloadPattern {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" | "seq" => Ok(WorkloadPattern::Sequential),
            "random" | "rand" => Ok(WorkloadPattern::Random),
            "mixed" => Ok(WorkloadPattern::Mixed),
            _ => Err(anyhow::anyhow!("invalid workload pattern: {s}")),
        }
    }
}

/// A monotonic nanosecond counter the simulation advances explicitly,
/// standing in for the host's monotonic submission-timestamp clock
/// without coupling the simulation to wall-clock time.
#[derive(Default)]
pub struct SimClock {
    now_ns: AtomicU64,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.now_ns.load(Ordering::Relaxed)
    }

    /// Advances the clock by `delta_ns` and returns the new value.
    pub fn advance(&self, delta_ns: u64) -> u64 {
        self.now_ns.fetch_add(delta_ns, Ordering::Relaxed) + delta_ns
    }
}

/// Offset/op generator for synthetic submission: sequential wraps at
/// device size, random is uniform, mixed is 70/30 sequential/random.
pub struct WorkloadGenerator {
    pattern: WorkloadPattern,
    block_size: u32,
    device_size_bytes: u64,
    read_percent: u8,
    rng: Mutex<StdRng>,
}

impl WorkloadGenerator {
    pub fn new(pattern: WorkloadPattern, block_size: u32, device_size_bytes: u64, read_percent: u8, seed: u64) -> Self {
        Self {
            pattern,
            block_size,
            device_size_bytes,
            read_percent,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn next_offset(&self, current: u64) -> u64 {
        let bs = self.block_size as u64;
        match self.pattern {
            WorkloadPattern::Sequential => {
                let next = current + bs;
                if next + bs > self.device_size_bytes { 0 } else { next }
            }
            WorkloadPattern::Random => self.random_offset(),
            WorkloadPattern::Mixed => {
                let mut rng = self.rng.lock().expect("workload rng mutex poisoned");
                if rng.gen_bool(0.7) {
                    drop(rng);
                    let next = current + bs;
                    if next + bs > self.device_size_bytes { 0 } else { next }
                } else {
                    let max_offset = self.device_size_bytes.saturating_sub(bs);
                    rng.gen_range(0..=max_offset.max(1))
                }
            }
        }
    }

    fn random_offset(&self) -> u64 {
        let bs = self.block_size as u64;
        let max_offset = self.device_size_bytes.saturating_sub(bs);
        self.rng
            .lock()
            .expect("workload rng mutex poisoned")
            .gen_range(0..=max_offset.max(1))
    }

    /// Picks `Read` or `Write` by `read_percent`; a small fixed slice of
    /// writes are reclassified as `Discard` to exercise all four
    /// dispatch-order slots without a dedicated discard-rate knob.
    pub fn next_op(&self) -> OpType {
        let mut rng = self.rng.lock().expect("workload rng mutex poisoned");
        let roll: u8 = rng.gen_range(0..100);
        if roll < self.read_percent {
            OpType::Read
        } else if roll < self.read_percent.saturating_add(3).min(100) {
            OpType::Discard
        } else {
            OpType::Write
        }
    }
}

/// Fixed per-op service-time model, deliberately separate from (and not
/// read by) [`crate::model::LatencyModel`] — the simulated device is the
/// ground truth the model is trying to learn, so the two must never share
/// state.
pub struct SimulatedDevice {
    pub read_base_ns: u64,
    pub read_slope_ns_per_kib: u64,
    pub write_base_ns: u64,
    pub write_slope_ns_per_kib: u64,
    pub discard_latency_ns: u64,
    pub jitter_percent: u8,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self {
            read_base_ns: 80_000,
            read_slope_ns_per_kib: 1_200,
            write_base_ns: 150_000,
            write_slope_ns_per_kib: 2_500,
            discard_latency_ns: 500_000,
            jitter_percent: 10,
        }
    }
}

impl SimulatedDevice {
    pub fn service_time(&self, op: OpType, block_size: u32, rng: &mut StdRng) -> u64 {
        let base = match op {
            OpType::Read => self.service_time_read(block_size),
            OpType::Write => self.service_time_write(block_size),
            OpType::Discard => self.discard_latency_ns,
            OpType::Other => self.read_base_ns,
        };
        self.jitter(base, rng)
    }

    fn service_time_read(&self, block_size: u32) -> u64 {
        linear(self.read_base_ns, self.read_slope_ns_per_kib, block_size)
    }

    fn service_time_write(&self, block_size: u32) -> u64 {
        linear(self.write_base_ns, self.write_slope_ns_per_kib, block_size)
    }

    fn jitter(&self, base: u64, rng: &mut StdRng) -> u64 {
        if self.jitter_percent == 0 {
            return base;
        }
        let span = base * self.jitter_percent as u64 / 100;
        if span == 0 {
            return base;
        }
        let delta = rng.gen_range(0..=2 * span) as i64 - span as i64;
        (base as i64 + delta).max(1) as u64
    }
}

fn linear(base: u64, slope: u64, block_size: u32) -> u64 {
    const THRESHOLD: u32 = crate::request::SMALL_REQUEST_THRESHOLD;
    if block_size <= THRESHOLD {
        return base;
    }
    let kib = ((block_size - THRESHOLD) as u64 + 1023) / 1024;
    base + slope * kib
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub pattern: WorkloadPattern,
    pub block_size: u32,
    pub device_size_bytes: u64,
    pub read_percent: u8,
    pub num_requests: u64,
    /// Every Nth submission is head-inserted instead of going through the
    /// deadline index, exercising the priority-queue bypass path. `0`
    /// disables head-insertion entirely.
    pub head_insert_every: u64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            pattern: WorkloadPattern::Mixed,
            block_size: 65_536,
            device_size_bytes: 64 * 1024 * 1024 * 1024,
            read_percent: 70,
            num_requests: 10_000,
            head_insert_every: 0,
            seed: 1,
        }
    }
}

/// Drives `cfg.num_requests` synthetic requests through `sched`,
/// submitting, dispatching, and completing each synchronously against
/// `device`'s simulated service time. Single-threaded and deterministic
/// given `cfg.seed` — the concurrency the core is built for is exercised
/// structurally (lock hierarchy, ownership-checked invariants), not by
/// actually racing threads here.
pub fn run_simulation(
    sched: &IoScheduler,
    metrics: &Metrics,
    device: &SimulatedDevice,
    clock: &SimClock,
    cfg: &SimulationConfig,
) -> MetricsSnapshot {
    let gen = WorkloadGenerator::new(
        cfg.pattern,
        cfg.block_size,
        cfg.device_size_bytes,
        cfg.read_percent,
        cfg.seed,
    );
    let mut device_rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(1));
    let mut offset = 0u64;
    let mut next_handle = 1u64;

    info!(num_requests = cfg.num_requests, pattern = ?cfg.pattern, "starting simulation");

    for i in 0..cfg.num_requests {
        offset = gen.next_offset(offset);
        let op = gen.next_op();
        let start = clock.now();
        let handle = next_handle;
        next_handle += 1;

        let meta = RequestMeta::new(op, start, cfg.block_size);
        if sched.prepare_request(handle, meta).is_err() {
            continue;
        }
        metrics.record_submit();

        let at_head = cfg.head_insert_every != 0 && i % cfg.head_insert_every == 0;
        sched.insert_request(handle, at_head, || false);
        if at_head {
            metrics.record_head_insert();
        }

        drain_ready(sched, metrics, device, clock, &mut device_rng);
    }

    // Drain whatever is still queued once submission stops.
    loop {
        let before = metrics.snapshot().dispatched;
        drain_ready(sched, metrics, device, clock, &mut device_rng);
        if metrics.snapshot().dispatched == before {
            break;
        }
    }

    metrics.snapshot()
}

fn drain_ready(
    sched: &IoScheduler,
    metrics: &Metrics,
    device: &SimulatedDevice,
    clock: &SimClock,
    device_rng: &mut StdRng,
) {
    while let Some(handle) = sched.dispatch_request() {
        metrics.record_dispatch();
        let io_start = clock.now();
        sched.mark_io_start(handle, io_start);

        let Some(meta) = sched.meta_of(handle) else {
            sched.finish_request(handle);
            continue;
        };
        let latency = device.service_time(meta.op, meta.total_bytes, device_rng);
        let completion_time = clock.advance(latency);
        if !sched.completed_request(handle, completion_time) {
            metrics.record_drop();
        }
        metrics.record_completion(latency);
        sched.finish_request(handle);
    }
}
