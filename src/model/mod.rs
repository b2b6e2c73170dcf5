mod latency;

pub use latency::{LatencyBucket, LatencyModel, ModelSnapshot};

use crate::request::OpType;

/// One [`LatencyModel`] per [`OpType`], indexed by `OpType::index()`.
pub struct LatencyModels {
    models: [LatencyModel; OpType::COUNT],
}

impl Default for LatencyModels {
    fn default() -> Self {
        Self {
            models: [
                LatencyModel::new(),
                LatencyModel::new(),
                LatencyModel::new(),
                LatencyModel::new(),
            ],
        }
    }
}

impl LatencyModels {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, op: OpType) -> &LatencyModel {
        &self.models[op.index()]
    }

    /// Drives [`LatencyModel::update`] for all four models; the sole job
    /// of the update timer.
    pub fn update_all(&self, now_ms: u64) {
        for m in &self.models {
            m.update(now_ms);
        }
    }

    pub fn reset_all(&self) {
        for m in &self.models {
            m.reset();
        }
    }
}
