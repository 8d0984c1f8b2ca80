//! Rule evaluator: does a policy fire for a snapshot?
//!
//! Pure functions only. A snapshot without the policy's metric never
//! triggers anything.

use autopilot_core::{Condition, MetricSnapshot, Policy};

/// Whether `policy` triggers on `snapshot`.
pub fn evaluate(policy: &Policy, snapshot: &MetricSnapshot) -> bool {
    snapshot
        .reading(&policy.metric)
        .is_some_and(|value| condition_holds(policy, value))
}

/// Apply the policy's comparison to a single value.
pub fn condition_holds(policy: &Policy, value: f64) -> bool {
    match policy.condition {
        Condition::Above => value > policy.threshold,
        Condition::Below => value < policy.threshold,
        // Fails closed without an upper edge.
        Condition::Between => policy
            .threshold_max
            .is_some_and(|max| policy.threshold <= value && value <= max),
        Condition::Equals => value == policy.threshold,
        Condition::NotEquals => value != policy.threshold,
    }
}

/// Distance between a reading and the threshold it was compared against.
pub fn deviation(value: f64, threshold: f64) -> f64 {
    (value - threshold).abs()
}

/// `min(1, |value - threshold| / threshold)`.
///
/// A deviation ratio, not a probability. A zero threshold yields 1 for any
/// non-zero reading.
pub fn confidence(value: f64, threshold: f64) -> f64 {
    if threshold == 0.0 {
        return if value == 0.0 { 0.0 } else { 1.0 };
    }
    (deviation(value, threshold) / threshold.abs()).min(1.0)
}
