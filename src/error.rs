use thiserror::Error;

/// Errors the scheduler core can produce.
///
/// Internal-state inconsistencies (a host-contract violation, not a user
/// mistake) are never returned here — they are logged once via the
/// lifecycle module's warn-once gate and the call no-ops, per the design's
/// "assertions, not errors" rule.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("failed to allocate request metadata")]
    AllocationFailed,

    #[error("invalid value for knob `{knob}`: {reason}")]
    InvalidKnobValue {
        knob: &'static str,
        reason: String,
    },

    #[error("scheduler init failed: {0}")]
    InitFailed(String),
}

pub type Result<T> = std::result::Result<T, SchedError>;
