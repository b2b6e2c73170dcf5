//! Adaptive-deadline block I/O scheduler core.
//!
//! A userspace, learned-latency variant of a deadline-window mq-deadline
//! scheduler: a per-op-type [`model::LatencyModel`] learns service time from
//! completions, an [`index::DeadlineIndex`] orders pending requests by
//! computed deadline, and a double-buffered [`dispatch::BatchBuffer`] drains
//! the index into dispatch-ready pages under per-op batch caps and a global
//! predicted-latency window. [`lifecycle::IoScheduler`] ties the three
//! together behind the request lifecycle hook surface; [`host`] is a
//! synthetic workload driver for exercising it end-to-end without a real
//! block device.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod index;
pub mod knobs;
pub mod lifecycle;
pub mod metrics;
pub mod model;
pub mod request;
pub mod timer;

pub use error::{Result, SchedError};
pub use lifecycle::IoScheduler;
pub use request::{OpType, RequestHandle, RequestMeta};
