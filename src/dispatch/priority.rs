//! Priority queue: strict FIFO bypass path.
//!
//! Requests pushed here skip the deadline index entirely and are drained
//! before any batch-queue work, so they never contribute to
//! `total_pred_lat`.

use crate::request::RqData;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Default)]
pub struct PriorityQueue {
    inner: Mutex<VecDeque<RqData>>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Head-insert: bypasses the deadline index entirely.
    pub fn push_head(&self, rq: RqData) {
        self.inner.lock().push_back(rq);
    }

    pub fn pop_front(&self) -> Option<RqData> {
        self.inner.lock().pop_front()
    }

    /// Detaches a specific request by handle, wherever it sits in the FIFO.
    /// Used by merge/finish paths that need to free a request that may
    /// already be sitting in the bypass queue rather than the index.
    pub fn remove(&self, handle: crate::request::RequestHandle) -> Option<RqData> {
        let mut inner = self.inner.lock();
        let pos = inner.iter().position(|r| r.handle == handle)?;
        inner.remove(pos)
    }

    pub fn peek_front(&self) -> Option<crate::request::RequestHandle> {
        self.inner.lock().front().map(|r| r.handle)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
