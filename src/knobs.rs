//! Runtime-tunable knob surface.
//!
//! In the original kernel module these are sysfs files; here they are a
//! plain struct of atomics a CLI or test harness can read/write directly.
//! `global_latency_window` and `bq_refill_below_ratio` are read without
//! any lock on every refill — tearing is tolerable for a tunable that's
//! read far more often than it's written — so they are bare atomics
//! rather than anything `parking_lot`-guarded.

use crate::error::SchedError;
use crate::request::OpType;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

pub const ADIOS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default knob values.
pub mod defaults {
    pub const GLOBAL_LATENCY_WINDOW_NS: u64 = 16_000_000;
    pub const BQ_REFILL_BELOW_RATIO: u8 = 50;

    pub const LAT_TARGET_READ_NS: u64 = 2_000_000;
    pub const LAT_TARGET_WRITE_NS: u64 = 750_000_000;
    pub const LAT_TARGET_DISCARD_NS: u64 = 5_000_000_000;

    pub const BATCH_LIMIT_READ: u32 = 16;
    pub const BATCH_LIMIT_WRITE: u32 = 8;
    pub const BATCH_LIMIT_DISCARD: u32 = 1;
    /// Not a tunable knob — `OTHER` has no per-op latency target worth
    /// exposing — but every per-op array is sized for all four `OpType`s,
    /// so `Other` uses this fixed value.
    pub const BATCH_LIMIT_OTHER: u32 = 1;
}

/// The live, process-wide tunable surface. Cheap to read concurrently from
/// every submit/dispatch/refill path; cheap to clone a snapshot for
/// display.
pub struct Knobs {
    global_latency_window_ns: AtomicU64,
    bq_refill_below_ratio: AtomicU8,
    lat_target_ns: [AtomicU64; OpType::COUNT],
    batch_limit: [AtomicU32; OpType::COUNT],
}

impl Default for Knobs {
    fn default() -> Self {
        Self {
            global_latency_window_ns: AtomicU64::new(defaults::GLOBAL_LATENCY_WINDOW_NS),
            bq_refill_below_ratio: AtomicU8::new(defaults::BQ_REFILL_BELOW_RATIO),
            lat_target_ns: [
                AtomicU64::new(defaults::LAT_TARGET_READ_NS),
                AtomicU64::new(defaults::LAT_TARGET_WRITE_NS),
                AtomicU64::new(defaults::LAT_TARGET_DISCARD_NS),
                AtomicU64::new(0),
            ],
            batch_limit: [
                AtomicU32::new(defaults::BATCH_LIMIT_READ),
                AtomicU32::new(defaults::BATCH_LIMIT_WRITE),
                AtomicU32::new(defaults::BATCH_LIMIT_DISCARD),
                AtomicU32::new(defaults::BATCH_LIMIT_OTHER),
            ],
        }
    }
}

impl Knobs {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn global_latency_window_ns(&self) -> u64 {
        self.global_latency_window_ns.load(Ordering::Relaxed)
    }

    pub fn set_global_latency_window_ns(&self, ns: u64) -> Result<(), SchedError> {
        if ns == 0 {
            return Err(SchedError::InvalidKnobValue {
                knob: "global_latency_window",
                reason: "must be > 0".into(),
            });
        }
        self.global_latency_window_ns.store(ns, Ordering::Relaxed);
        Ok(())
    }

    #[inline]
    pub fn bq_refill_below_ratio(&self) -> u8 {
        self.bq_refill_below_ratio.load(Ordering::Relaxed)
    }

    pub fn set_bq_refill_below_ratio(&self, ratio: u8) -> Result<(), SchedError> {
        if ratio > 100 {
            return Err(SchedError::InvalidKnobValue {
                knob: "bq_refill_below_ratio",
                reason: "must be 0..=100".into(),
            });
        }
        self.bq_refill_below_ratio.store(ratio, Ordering::Relaxed);
        Ok(())
    }

    /// Refill trigger threshold: `window * ratio / 100`.
    #[inline]
    pub fn refill_trigger_ns(&self) -> u64 {
        self.global_latency_window_ns() * self.bq_refill_below_ratio() as u64 / 100
    }

    #[inline]
    pub fn lat_target_ns(&self, op: OpType) -> u64 {
        self.lat_target_ns[op.index()].load(Ordering::Relaxed)
    }

    /// Sets a per-op latency target. Callers (the scheduler facade) are
    /// responsible for also resetting that op's learned `base` to 0.
    pub fn set_lat_target_ns(&self, op: OpType, ns: u64) -> Result<(), SchedError> {
        if matches!(op, OpType::Other) {
            return Err(SchedError::InvalidKnobValue {
                knob: "lat_target",
                reason: "OTHER has no tunable latency target".into(),
            });
        }
        self.lat_target_ns[op.index()].store(ns, Ordering::Relaxed);
        Ok(())
    }

    #[inline]
    pub fn batch_limit(&self, op: OpType) -> u32 {
        self.batch_limit[op.index()].load(Ordering::Relaxed)
    }

    pub fn set_batch_limit(&self, op: OpType, limit: u32) -> Result<(), SchedError> {
        if limit == 0 {
            return Err(SchedError::InvalidKnobValue {
                knob: "batch_limit",
                reason: "must be > 0".into(),
            });
        }
        if matches!(op, OpType::Other) {
            return Err(SchedError::InvalidKnobValue {
                knob: "batch_limit",
                reason: "OTHER has a fixed batch limit of 1".into(),
            });
        }
        self.batch_limit[op.index()].store(limit, Ordering::Relaxed);
        Ok(())
    }
}

/// Parses a knob write the way sysfs would: ASCII integer, or the literal
/// `"1"` for the write-only trigger knobs.
pub fn parse_ascii_u64(knob: &'static str, s: &str) -> Result<u64, SchedError> {
    s.trim()
        .parse::<u64>()
        .map_err(|e| SchedError::InvalidKnobValue {
            knob,
            reason: e.to_string(),
        })
}

pub fn parse_trigger(knob: &'static str, s: &str) -> Result<(), SchedError> {
    if s.trim() == "1" {
        Ok(())
    } else {
        Err(SchedError::InvalidKnobValue {
            knob,
            reason: "only accepts the literal value `1`".into(),
        })
    }
}
