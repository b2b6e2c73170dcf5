//! On-disk knob configuration, loaded once at startup and applied to a
//! fresh [`crate::knobs::Knobs`]: a plain serde struct the CLI parses from
//! a JSON file or builds from flags.

use crate::error::SchedError;
use crate::knobs::{defaults, Knobs};
use crate::request::OpType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnobConfig {
    #[serde(default = "defaults_window")]
    pub global_latency_window_ns: u64,
    #[serde(default = "defaults_ratio")]
    pub bq_refill_below_ratio: u8,
    #[serde(default = "defaults_read_target")]
    pub lat_target_read_ns: u64,
    #[serde(default = "defaults_write_target")]
    pub lat_target_write_ns: u64,
    #[serde(default = "defaults_discard_target")]
    pub lat_target_discard_ns: u64,
    #[serde(default = "defaults_read_batch")]
    pub batch_limit_read: u32,
    #[serde(default = "defaults_write_batch")]
    pub batch_limit_write: u32,
    #[serde(default = "defaults_discard_batch")]
    pub batch_limit_discard: u32,
}

fn defaults_window() -> u64 {
    defaults::GLOBAL_LATENCY_WINDOW_NS
}
fn defaults_ratio() -> u8 {
    defaults::BQ_REFILL_BELOW_RATIO
}
fn defaults_read_target() -> u64 {
    defaults::LAT_TARGET_READ_NS
}
fn defaults_write_target() -> u64 {
    defaults::LAT_TARGET_WRITE_NS
}
fn defaults_discard_target() -> u64 {
    defaults::LAT_TARGET_DISCARD_NS
}
fn defaults_read_batch() -> u32 {
    defaults::BATCH_LIMIT_READ
}
fn defaults_write_batch() -> u32 {
    defaults::BATCH_LIMIT_WRITE
}
fn defaults_discard_batch() -> u32 {
    defaults::BATCH_LIMIT_DISCARD
}

impl Default for KnobConfig {
    fn default() -> Self {
        Self {
            global_latency_window_ns: defaults_window(),
            bq_refill_below_ratio: defaults_ratio(),
            lat_target_read_ns: defaults_read_target(),
            lat_target_write_ns: defaults_write_target(),
            lat_target_discard_ns: defaults_discard_target(),
            batch_limit_read: defaults_read_batch(),
            batch_limit_write: defaults_write_batch(),
            batch_limit_discard: defaults_discard_batch(),
        }
    }
}

impl KnobConfig {
    pub fn from_json_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Applies every field to a fresh `Knobs`, surfacing the first
    /// validation failure as an invalid-knob-value error.
    pub fn apply(&self, knobs: &Knobs) -> Result<(), SchedError> {
        knobs.set_global_latency_window_ns(self.global_latency_window_ns)?;
        knobs.set_bq_refill_below_ratio(self.bq_refill_below_ratio)?;
        knobs.set_lat_target_ns(OpType::Read, self.lat_target_read_ns)?;
        knobs.set_lat_target_ns(OpType::Write, self.lat_target_write_ns)?;
        knobs.set_lat_target_ns(OpType::Discard, self.lat_target_discard_ns)?;
        knobs.set_batch_limit(OpType::Read, self.batch_limit_read)?;
        knobs.set_batch_limit(OpType::Write, self.batch_limit_write)?;
        knobs.set_batch_limit(OpType::Discard, self.batch_limit_discard)?;
        Ok(())
    }
}
