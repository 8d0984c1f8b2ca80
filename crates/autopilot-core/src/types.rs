//! Domain types shared across Autopilot crates.
//!
//! These types describe the inputs of the control loop (metric snapshots
//! and policies), its outputs (decisions and execution outcomes), and the
//! per-target controlled quantity. All types serialize to JSON for storage
//! and for the REST API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ConfigError, SnapshotError};

/// Identifier of a monitored resource (service, pool, queue, ...).
pub type TargetId = String;

/// Identifier of a policy.
pub type PolicyId = String;

/// Identifier of a decision, unique per target.
pub type DecisionId = String;

// ── Metrics ───────────────────────────────────────────────────────

/// Point-in-time readings for one target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSnapshot {
    pub target_id: TargetId,
    /// Unix timestamp (milliseconds) when the readings were taken.
    pub timestamp: u64,
    /// Metric name → value, e.g. `"cpu"`, `"memory"`, `"responseTime"`.
    pub readings: HashMap<String, f64>,
}

impl MetricSnapshot {
    pub fn new(target_id: &str, timestamp: u64) -> Self {
        Self {
            target_id: target_id.to_string(),
            timestamp,
            readings: HashMap::new(),
        }
    }

    /// Builder-style helper for adding a reading.
    pub fn with_reading(mut self, metric: &str, value: f64) -> Self {
        self.readings.insert(metric.to_string(), value);
        self
    }

    /// Look up a reading. Non-finite values count as missing.
    pub fn reading(&self, metric: &str) -> Option<f64> {
        self.readings.get(metric).copied().filter(|v| v.is_finite())
    }

    /// Reject snapshots a collector should never have produced.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.target_id.trim().is_empty() {
            return Err(SnapshotError::MissingTarget);
        }
        if self.timestamp == 0 {
            return Err(SnapshotError::MissingTimestamp(self.target_id.clone()));
        }
        Ok(())
    }

    /// Build the composite key for the snapshots table.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.target_id, self.timestamp)
    }
}

// ── Policy ────────────────────────────────────────────────────────

/// Comparison applied to a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    Above,
    Below,
    Between,
    Equals,
    NotEquals,
}

/// What a triggered policy asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    ScaleUp,
    ScaleDown,
    Optimize,
    Alert,
    NoAction,
}

impl Action {
    /// Whether this action changes the controlled quantity.
    pub fn is_scaling(&self) -> bool {
        matches!(self, Action::ScaleUp | Action::ScaleDown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ScaleUp => "scale-up",
            Action::ScaleDown => "scale-down",
            Action::Optimize => "optimize",
            Action::Alert => "alert",
            Action::NoAction => "no-action",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tie-breaker between policies that trigger in the same cycle.
///
/// Declaration order is significance order: `Critical` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A threshold rule bound to one metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub id: PolicyId,
    pub name: String,
    /// Restrict the policy to one target. `None` applies it to every target.
    #[serde(default)]
    pub target: Option<TargetId>,
    /// Reading inspected in each snapshot.
    pub metric: String,
    pub condition: Condition,
    pub threshold: f64,
    /// Upper edge of the band, only meaningful for `between`.
    #[serde(default)]
    pub threshold_max: Option<f64>,
    pub action: Action,
    pub priority: Priority,
    /// Minimum seconds between two triggers of this policy.
    pub cooldown_secs: u64,
    /// Inclusive lower bound on the controlled quantity.
    pub min_bound: u32,
    /// Inclusive upper bound on the controlled quantity.
    pub max_bound: u32,
    /// Instances added or removed per scale action.
    #[serde(default = "default_step")]
    pub step: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Unix timestamp (milliseconds) when this policy was created.
    #[serde(default)]
    pub created_at: u64,
    /// Unix timestamp (milliseconds) of the last explicit update.
    #[serde(default)]
    pub updated_at: u64,
}

fn default_step() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

impl Policy {
    /// Whether this policy is evaluated for `target_id`.
    pub fn applies_to(&self, target_id: &str) -> bool {
        self.target.as_deref().is_none_or(|t| t == target_id)
    }

    /// Cooldown window in milliseconds.
    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_secs.saturating_mul(1000)
    }

    /// Check bounds and threshold bands.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::MissingPolicyId);
        }
        if !self.threshold.is_finite() {
            return Err(ConfigError::InvalidThreshold(self.id.clone()));
        }
        if self.condition == Condition::Between {
            match self.threshold_max {
                Some(max) if max.is_finite() && max >= self.threshold => {}
                _ => return Err(ConfigError::InvalidBand(self.id.clone())),
            }
        }
        if self.min_bound > self.max_bound {
            return Err(ConfigError::InvalidBounds {
                policy: self.id.clone(),
                min: self.min_bound,
                max: self.max_bound,
            });
        }
        if self.step == 0 && self.action.is_scaling() {
            return Err(ConfigError::ZeroStep(self.id.clone()));
        }
        Ok(())
    }
}

// ── Decision ──────────────────────────────────────────────────────

/// The single action chosen for a target in one evaluation cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub id: DecisionId,
    pub target_id: TargetId,
    pub policy_id: PolicyId,
    pub action: Action,
    /// Human-readable explanation.
    pub reason: String,
    /// Deviation heuristic in `[0, 1]`, not a probability.
    pub confidence: f64,
    pub current_value: f64,
    pub threshold: f64,
    /// New controlled quantity for scale actions, already clamped to bounds.
    #[serde(default)]
    pub desired: Option<u32>,
    /// Unix timestamp (milliseconds), taken from the triggering snapshot.
    pub timestamp: u64,
}

// ── Outcome ───────────────────────────────────────────────────────

/// Execution status of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::InProgress => "in-progress",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Execution record for one decision.
///
/// Transitions are `pending → in-progress → completed | failed`. Any other
/// transition is a broken caller contract and panics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outcome {
    pub decision_id: DecisionId,
    pub target_id: TargetId,
    pub status: ExecutionStatus,
    /// Unix timestamp (milliseconds) when execution started.
    pub started_at: u64,
    #[serde(default)]
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Outcome {
    /// A fresh outcome for `decision`.
    pub fn pending(decision: &Decision, now: u64) -> Self {
        Self {
            decision_id: decision.id.clone(),
            target_id: decision.target_id.clone(),
            status: ExecutionStatus::Pending,
            started_at: now,
            completed_at: None,
            error: None,
        }
    }

    /// `pending → in-progress`.
    pub fn start(&mut self, now: u64) {
        assert_eq!(
            self.status,
            ExecutionStatus::Pending,
            "decision {} cannot start from {}",
            self.decision_id,
            self.status
        );
        self.status = ExecutionStatus::InProgress;
        self.started_at = now;
    }

    /// `in-progress → completed`.
    pub fn complete(&mut self, now: u64) {
        self.finish(ExecutionStatus::Completed, now, None);
    }

    /// `in-progress → failed`.
    pub fn fail(&mut self, now: u64, error: impl Into<String>) {
        self.finish(ExecutionStatus::Failed, now, Some(error.into()));
    }

    fn finish(&mut self, status: ExecutionStatus, now: u64, error: Option<String>) {
        assert_eq!(
            self.status,
            ExecutionStatus::InProgress,
            "decision {} cannot become {} from {}",
            self.decision_id,
            status,
            self.status
        );
        self.status = status;
        self.completed_at = Some(now);
        self.error = error;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ── Control state ─────────────────────────────────────────────────

/// Controlled quantity (instance count) of one target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlState {
    pub target_id: TargetId,
    pub current: u32,
    /// Unix timestamp (milliseconds) of the last change.
    pub updated_at: u64,
}

impl ControlState {
    pub fn new(target_id: &str, current: u32) -> Self {
        Self {
            target_id: target_id.to_string(),
            current,
            updated_at: 0,
        }
    }
}

// ── Audit ─────────────────────────────────────────────────────────

/// One entry of the append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    /// Store-assigned, monotonically increasing across all targets.
    pub sequence: u64,
    pub decision: Decision,
    pub outcome: Outcome,
}

impl AuditRecord {
    /// Build the composite key for the audit table.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.decision.target_id, self.sequence)
    }
}

/// Current Unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
