//! Per-operation-type latency model.
//!
//! Learns two coefficients from observed completion latencies: a fixed
//! `base` overhead and a per-KiB `slope`, using bucketed, outlier-trimmed
//! accumulation.

use crate::request::SMALL_REQUEST_THRESHOLD;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

const BUCKET_COUNT: usize = 64;
const UPDATE_INTERVAL_MS: u64 = 1_500;
const SMALL_FORCE_UPDATE_COUNT: u64 = 1_024;
const LARGE_FORCE_UPDATE_COUNT: u64 = 1_024;
const SMALL_SHRINK_THRESHOLD: u64 = 10_000_000;
const LARGE_SHRINK_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024 * 1024; // 100 GiB

/// `(count, sum_latency, sum_block_size)` accumulation triple.
/// `sum_block_size` is unused by the small-bucket array but kept uniform so
/// both arrays share one type.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyBucket {
    pub count: u64,
    pub sum_latency: u64,
    pub sum_block_size: u64,
}

struct Buckets {
    small: [LatencyBucket; BUCKET_COUNT],
    large: [LatencyBucket; BUCKET_COUNT],
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            small: [LatencyBucket::default(); BUCKET_COUNT],
            large: [LatencyBucket::default(); BUCKET_COUNT],
        }
    }
}

/// Aggregates guarded by the coarse parameter lock. `base`/`slope`
/// themselves live outside this lock as plain atomics — every hot-path
/// reader (`predict`, `input`'s binning) needs them without risking a
/// lock-order violation against the bucket lock taken a frame up the
/// stack, and the kernel scheduler this is modeled on reads them
/// unlocked for the same reason (see DESIGN.md).
struct Params {
    small_sum_delay: u64,
    small_count: u64,
    large_sum_delay: u64,
    large_sum_bsize: u64,
    last_update_ms: u64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            small_sum_delay: 0,
            small_count: 0,
            large_sum_delay: 0,
            large_sum_bsize: 0,
            last_update_ms: 0,
        }
    }
}

/// A point-in-time read of the learned parameters, for the `lat_model_*`
/// RO knob and the CLI's `inspect` command.
#[derive(Debug, Clone, Copy)]
pub struct ModelSnapshot {
    pub base_ns: u64,
    pub slope_ns_per_kib: u64,
}

impl std::fmt::Display for ModelSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "base : {} ns\nslope: {} ns/KiB\n",
            self.base_ns, self.slope_ns_per_kib
        )
    }
}

pub struct LatencyModel {
    base_ns: AtomicU64,
    slope_ns_per_kib: AtomicU64,
    params: Mutex<Params>,
    buckets: Mutex<Buckets>,
}

impl Default for LatencyModel {
    fn default() -> Self {
        Self {
            base_ns: AtomicU64::new(0),
            slope_ns_per_kib: AtomicU64::new(0),
            params: Mutex::new(Params::default()),
            buckets: Mutex::new(Buckets::default()),
        }
    }
}

impl LatencyModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            base_ns: self.base_ns.load(Ordering::Relaxed),
            slope_ns_per_kib: self.slope_ns_per_kib.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub fn is_cold(&self) -> bool {
        self.base_ns.load(Ordering::Relaxed) == 0
    }

    /// Structurally non-decreasing in `block_size`, since the `ceil` term
    /// is monotone and `slope` never goes negative.
    pub fn predict(&self, block_size: u32) -> u64 {
        let base = self.base_ns.load(Ordering::Relaxed);
        if block_size <= SMALL_REQUEST_THRESHOLD {
            return base;
        }
        let slope = self.slope_ns_per_kib.load(Ordering::Relaxed);
        let over = (block_size - SMALL_REQUEST_THRESHOLD) as u64;
        let kib = ceil_div(over, 1024);
        base.saturating_add(slope.saturating_mul(kib))
    }

    /// Resets `base` to 0, as writing a `lat_target_*` knob does.
    /// Does not touch the aggregates — the next `update()` still has the
    /// accumulated history to relearn from, only the published parameter
    /// is forced cold again.
    pub fn reset_base(&self) {
        self.base_ns.store(0, Ordering::Relaxed);
    }

    /// Zeros every aggregate and parameter (`reset_lat_model` knob).
    pub fn reset(&self) {
        self.base_ns.store(0, Ordering::Relaxed);
        self.slope_ns_per_kib.store(0, Ordering::Relaxed);
        *self.params.lock() = Params::default();
        *self.buckets.lock() = Buckets::default();
    }

    /// Feeds one completion observation into the appropriate bucket array.
    /// Returns `false` when the large-path sample was silently dropped so
    /// callers can count it; always `true` on the small path, which never
    /// drops.
    pub fn input(&self, block_size: u32, measured_latency: u64, pred_lat: u64) -> bool {
        if block_size <= SMALL_REQUEST_THRESHOLD {
            let base = self.base_ns.load(Ordering::Relaxed).max(1);
            let idx = bucket_index(measured_latency, base);
            let bootstrap = {
                let mut buckets = self.buckets.lock();
                let b = &mut buckets.small[idx];
                b.count += 1;
                b.sum_latency += measured_latency;
                self.base_ns.load(Ordering::Relaxed) == 0
            };
            if bootstrap {
                self.update(now_ms_unspecified());
            }
            true
        } else {
            if self.base_ns.load(Ordering::Relaxed) == 0 || pred_lat == 0 {
                // Cannot bin without a base overhead or a denominator;
                // intentionally dropped rather than guessed.
                return false;
            }
            let idx = bucket_index(measured_latency, pred_lat);
            let mut buckets = self.buckets.lock();
            let b = &mut buckets.large[idx];
            b.count += 1;
            b.sum_latency += measured_latency;
            b.sum_block_size += block_size as u64;
            true
        }
    }

    /// Recomputes `base`/`slope` from the accumulated buckets. `now_ms` is
    /// the caller's coarse monotonic tick (kernel `jiffies` stand-in);
    /// passing it explicitly keeps the model deterministic and testable
    /// instead of reaching for a wall clock itself.
    pub fn update(&self, now_ms: u64) {
        let base_is_zero = self.base_ns.load(Ordering::Relaxed) == 0;
        let mut params = self.params.lock();
        let time_elapsed = base_is_zero || now_ms >= params.last_update_ms + UPDATE_INTERVAL_MS;

        let mut buckets = self.buckets.lock();

        let small_n: u64 = buckets.small.iter().map(|b| b.count).sum();
        let large_n: u64 = buckets.large.iter().map(|b| b.count).sum();

        let mut small_processed = false;
        if small_n > 0 && (time_elapsed || small_n >= SMALL_FORCE_UPDATE_COUNT || base_is_zero) {
            let percentile = if base_is_zero { 100 } else { 99 };
            let (count, sum_latency) = trim_small(&mut buckets.small, small_n, percentile);

            if params.small_count >= SMALL_SHRINK_THRESHOLD {
                shrink(&mut params.small_sum_delay);
                shrink(&mut params.small_count);
            }
            params.small_sum_delay += sum_latency;
            params.small_count += count;
            small_processed = true;
        }

        let slope_is_zero = self.slope_ns_per_kib.load(Ordering::Relaxed) == 0;
        let mut large_processed = false;
        if large_n > 0 && (time_elapsed || large_n >= LARGE_FORCE_UPDATE_COUNT || slope_is_zero) {
            let percentile = if slope_is_zero { 100 } else { 99 };
            let base_for_intercept = self.base_ns.load(Ordering::Relaxed);
            let (count, sum_latency, sum_bsize) =
                trim_large(&mut buckets.large, large_n, percentile, base_for_intercept);

            if params.large_sum_bsize >= LARGE_SHRINK_THRESHOLD_BYTES {
                shrink(&mut params.large_sum_delay);
                shrink(&mut params.large_sum_bsize);
            }
            params.large_sum_delay += sum_latency;
            params.large_sum_bsize += sum_bsize;
            large_processed = true;
        }

        drop(buckets);

        if small_processed && params.small_count > 0 {
            self.base_ns
                .store(params.small_sum_delay / params.small_count, Ordering::Relaxed);
        }
        if large_processed && params.large_sum_bsize > 0 {
            let kib = ceil_div(params.large_sum_bsize, 1024);
            self.slope_ns_per_kib
                .store(params.large_sum_delay / kib, Ordering::Relaxed);
        }
        if time_elapsed {
            params.last_update_ms = now_ms;
        }

        trace!(
            small_processed,
            large_processed,
            base = self.base_ns.load(Ordering::Relaxed),
            slope = self.slope_ns_per_kib.load(Ordering::Relaxed),
            "latency model updated"
        );
    }
}

/// Placeholder tick for the cold-start bootstrap call inside `input()`,
/// which must invoke `update()` immediately rather than wait for the next
/// timer fire. `now_ms` only gates the periodic-recompute path
/// (`time_elapsed`); the bootstrap path is already forced by `base == 0`,
/// so any concrete value works here — 0 is deliberately never greater
/// than a real `last_update_ms`, so it cannot spuriously suppress a later
/// genuine periodic update.
#[inline]
fn now_ms_unspecified() -> u64 {
    0
}

#[inline]
fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

#[inline]
fn shrink(x: &mut u64) {
    *x -= *x / 4;
}

/// Maps a `(measured, predicted)` pair to one of `BUCKET_COUNT` buckets.
/// Three linear regions stretching resolution near `m ≈ p` and
/// compressing the tail; clamped to `[0, 63]`.
pub fn bucket_index(m: u64, p: u64) -> usize {
    let p = p.max(1) as u128;
    let m = m as u128;
    let idx = if m < 2 * p {
        (20 * m) / p
    } else if m < 5 * p {
        (10 * m) / p + 20
    } else {
        (3 * m) / p + 40
    };
    idx.min(63) as usize
}

/// Shared percentile-cutoff scan: returns `(cutoff_bucket, cumulative_before_cutoff, threshold)`.
fn percentile_cutoff(counts: &[u64; BUCKET_COUNT], n: u64, percentile: u64) -> (usize, u64, u64) {
    let threshold = n * percentile / 100;
    let mut cumulative = 0u64;
    for (i, &c) in counts.iter().enumerate() {
        let next = cumulative + c;
        if next >= threshold || i == BUCKET_COUNT - 1 {
            return (i, cumulative, threshold);
        }
        cumulative = next;
    }
    (BUCKET_COUNT - 1, cumulative, threshold)
}

/// Trims the small-bucket array, returning `(count, sum_latency)` of the
/// kept (sub-percentile) mass.
fn trim_small(buckets: &mut [LatencyBucket; BUCKET_COUNT], n: u64, percentile: u64) -> (u64, u64) {
    let counts: [u64; BUCKET_COUNT] = std::array::from_fn(|i| buckets[i].count);
    let (cutoff, cumulative_before, threshold) = percentile_cutoff(&counts, n, percentile);

    let mut count = 0u64;
    let mut sum_latency = 0u64;
    for b in buckets.iter().take(cutoff) {
        count += b.count;
        sum_latency += b.sum_latency;
    }

    let partial = threshold.saturating_sub(cumulative_before);
    let bt = &buckets[cutoff];
    if bt.count > 0 && partial > 0 {
        let take = partial.min(bt.count);
        count += take;
        sum_latency += (bt.sum_latency as u128 * take as u128 / bt.count as u128) as u64;
    }

    for b in buckets.iter_mut() {
        *b = LatencyBucket::default();
    }

    (count, sum_latency)
}

/// Trims the large-bucket array, returning `(count, sum_latency, sum_block_size)`
/// with the fixed-overhead intercept already subtracted from `sum_latency`
/// ("intercept removal": each kept sample's `base` is subtracted before
/// summing, isolating the per-byte slope component). Uses the threshold
/// derived from the pre-trim count rather than the post-trim kept count,
/// deliberately kept on the conservative side of the percentile cut.
fn trim_large(
    buckets: &mut [LatencyBucket; BUCKET_COUNT],
    n: u64,
    percentile: u64,
    base: u64,
) -> (u64, u64, u64) {
    let counts: [u64; BUCKET_COUNT] = std::array::from_fn(|i| buckets[i].count);
    let (cutoff, cumulative_before, threshold) = percentile_cutoff(&counts, n, percentile);

    let mut count = 0u64;
    let mut sum_latency = 0u64;
    let mut sum_bsize = 0u64;
    for b in buckets.iter().take(cutoff) {
        count += b.count;
        sum_latency += b.sum_latency;
        sum_bsize += b.sum_block_size;
    }

    let partial = threshold.saturating_sub(cumulative_before);
    let bt = &buckets[cutoff];
    if bt.count > 0 && partial > 0 {
        let take = partial.min(bt.count);
        count += take;
        sum_latency += (bt.sum_latency as u128 * take as u128 / bt.count as u128) as u64;
        sum_bsize += (bt.sum_block_size as u128 * take as u128 / bt.count as u128) as u64;
    }

    for b in buckets.iter_mut() {
        *b = LatencyBucket::default();
    }

    let intercept = base.saturating_mul(count);
    let sum_latency = sum_latency.saturating_sub(intercept);

    (count, sum_latency, sum_bsize)
}
