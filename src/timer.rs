//! Update timer: a single coalescing trigger for periodic
//! `LatencyModel::update()` calls under light load, where sample counts
//! alone wouldn't otherwise fire an update.

use crate::model::LatencyModels;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Completion paths arm this for 100ms out; repeated arming before it fires
/// is a no-op coalesce rather than a new timer.
const COALESCE_DELAY: Duration = Duration::from_millis(100);

pub struct UpdateTimer {
    models: Arc<LatencyModels>,
    armed_until: AtomicU64,
    running: AtomicBool,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl UpdateTimer {
    pub fn new(models: Arc<LatencyModels>) -> Arc<Self> {
        Arc::new(Self {
            models,
            armed_until: AtomicU64::new(0),
            running: AtomicBool::new(false),
            handle: std::sync::Mutex::new(None),
        })
    }

    /// Arms the timer to fire `COALESCE_DELAY` from now, coalescing with
    /// any already-pending fire. Spawns the waiting task lazily on first
    /// arm and lets it self-terminate after each fire; a subsequent arm
    /// restarts it.
    pub fn arm(self: &Arc<Self>, now_ms: u64) {
        let target = now_ms + COALESCE_DELAY.as_millis() as u64;
        self.armed_until.fetch_max(target, Ordering::AcqRel);

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let this = Arc::clone(self);
            let handle = tokio::spawn(async move {
                tokio::time::sleep_until(Instant::now() + COALESCE_DELAY).await;
                this.models.update_all(this.armed_until.load(Ordering::Acquire));
                this.running.store(false, Ordering::Release);
                debug!("update timer fired");
            });
            *self.handle.lock().expect("timer handle mutex poisoned") = Some(handle);
        }
    }

    /// `exit_sched()`'s timer half: synchronously cancels any pending fire.
    pub fn cancel(&self) {
        if let Some(handle) = self.handle.lock().expect("timer handle mutex poisoned").take() {
            handle.abort();
        }
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::OpType;

    #[tokio::test]
    async fn arm_eventually_updates_all_models() {
        let models = Arc::new(LatencyModels::new());
        models.get(OpType::Read).input(4096, 1000, 0);
        let timer = UpdateTimer::new(Arc::clone(&models));
        timer.arm(0);
        tokio::time::sleep(COALESCE_DELAY * 2).await;
        assert!(!models.get(OpType::Read).is_cold());
    }

    #[tokio::test]
    async fn cancel_prevents_a_pending_fire() {
        let models = Arc::new(LatencyModels::new());
        let timer = UpdateTimer::new(Arc::clone(&models));
        timer.arm(0);
        timer.cancel();
        tokio::time::sleep(COALESCE_DELAY * 2).await;
        // Nothing to assert on model state directly (update_all on an
        // untouched model is a no-op either way); this just exercises that
        // cancel doesn't panic and leaves `running` clear for a re-arm.
        timer.arm(0);
        timer.cancel();
    }
}
