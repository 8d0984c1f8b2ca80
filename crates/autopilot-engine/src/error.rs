//! Controller error types.

use thiserror::Error;

use autopilot_core::SnapshotError;

/// Errors returned by [`Controller`](crate::Controller) operations.
///
/// Steady no-ops and failed actions are not errors; they come back as data
/// in a [`CycleReport`](crate::CycleReport).
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("stale snapshot for {target}: timestamp {timestamp} is not after {last}")]
    StaleSnapshot {
        target: String,
        timestamp: u64,
        last: u64,
    },

    #[error("controller stopped: {0}")]
    Stopped(String),

    #[error("state store error: {0}")]
    State(#[from] autopilot_state::StateError),
}

pub type ControllerResult<T> = Result<T, ControllerError>;
