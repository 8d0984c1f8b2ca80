//! Error types for configuration and snapshot validation.

use thiserror::Error;

/// Errors raised while loading or validating policies and engine settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("policy without an id")]
    MissingPolicyId,

    #[error("duplicate policy id: {0}")]
    DuplicatePolicy(String),

    #[error("duplicate target id: {0}")]
    DuplicateTarget(String),

    #[error("policy {0}: threshold must be finite")]
    InvalidThreshold(String),

    #[error("policy {0}: `between` needs threshold_max >= threshold")]
    InvalidBand(String),

    #[error("policy {policy}: min_bound {min} exceeds max_bound {max}")]
    InvalidBounds {
        policy: String,
        min: u32,
        max: u32,
    },

    #[error("policy {0}: scale step must be positive")]
    ZeroStep(String),

    #[error("hysteresis factor must be in (0, 1), got {0}")]
    InvalidHysteresis(f64),
}

/// Errors for snapshots a collector should never deliver.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot has no target id")]
    MissingTarget,

    #[error("snapshot for {0} has no timestamp")]
    MissingTimestamp(String),
}
