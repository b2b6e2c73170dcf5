//! Host request contract.
//!
//! The scheduler core never owns a `Request` the way it owns its own
//! bookkeeping: the host constructs and frees requests, the core only
//! reads a handful of fields and attaches one piece of metadata. We model
//! "opaque handle with an attached private slot" as a `u64` handle plus a
//! pool entry the host fields are copied into at `prepare` time, rather
//! than as a two-way owning reference (see DESIGN.md, cyclic-reference
//! note).

use std::fmt;

/// Closed enumeration of operation types. All per-op arrays/tables in the
/// model, index, and batch buffer are indexed by [`OpType::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    Read,
    Write,
    Discard,
    Other,
}

impl OpType {
    /// Fixed dispatch order within a batch page: an op-order bias that
    /// favors reads, then writes, then discards, then everything else.
    pub const DISPATCH_ORDER: [OpType; 4] =
        [OpType::Read, OpType::Write, OpType::Discard, OpType::Other];

    pub const COUNT: usize = 4;

    #[inline]
    pub fn index(self) -> usize {
        match self {
            OpType::Read => 0,
            OpType::Write => 1,
            OpType::Discard => 2,
            OpType::Other => 3,
        }
    }

    #[inline]
    pub fn from_index(i: usize) -> OpType {
        match i {
            0 => OpType::Read,
            1 => OpType::Write,
            2 => OpType::Discard,
            _ => OpType::Other,
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpType::Read => "read",
            OpType::Write => "write",
            OpType::Discard => "discard",
            OpType::Other => "other",
        };
        f.write_str(s)
    }
}

/// Opaque handle to a host-owned request. The core never dereferences this
/// itself; it is an index the host's request pool understands.
pub type RequestHandle = u64;

/// The subset of host `Request` fields the core reads.
#[derive(Debug, Clone, Copy)]
pub struct RequestMeta {
    pub op: OpType,
    /// Submission timestamp, monotonic nanoseconds.
    pub start_time_ns: u64,
    /// Set by the host when dispatch begins; `None` until then.
    pub io_start_time_ns: Option<u64>,
    pub total_bytes: u32,
}

impl RequestMeta {
    pub fn new(op: OpType, start_time_ns: u64, total_bytes: u32) -> Self {
        Self {
            op,
            start_time_ns,
            io_start_time_ns: None,
            total_bytes,
        }
    }

    #[inline]
    pub fn is_small(&self) -> bool {
        self.total_bytes <= SMALL_REQUEST_THRESHOLD
    }
}

/// Small/large request boundary: `bs <= 4096` is small.
pub const SMALL_REQUEST_THRESHOLD: u32 = 4096;

/// Per-request scheduler state attached at `prepare_request`.
/// Deliberately `Copy`: it is small and is moved between the
/// priority queue, deadline index, and batch buffer by value rather than
/// by reference, which is what keeps "at most one of PQ / index / batch
/// buffer" an ownership-checked invariant instead of a runtime one.
#[derive(Debug, Clone, Copy)]
pub struct RqData {
    pub handle: RequestHandle,
    pub op: OpType,
    /// Absolute deadline in ns, chosen at insert time.
    pub deadline: u64,
    /// The model's prediction used at insert time.
    pub pred_lat: u64,
    /// Captured at insert.
    pub block_size: u32,
}

impl RqData {
    pub fn new(handle: RequestHandle, op: OpType, block_size: u32) -> Self {
        Self {
            handle,
            op,
            deadline: 0,
            pred_lat: 0,
            block_size,
        }
    }
}
