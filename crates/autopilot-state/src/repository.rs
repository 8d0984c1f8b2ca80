//! Repository traits the engine depends on.
//!
//! Each trait covers one kind of record. Methods are synchronous: the
//! engine calls them from a target's own task, outside any await point
//! that matters for ordering.

use autopilot_core::{AuditRecord, ControlState, Decision, MetricSnapshot, Outcome, Policy};

use crate::error::StateResult;

/// CRUD over policies.
pub trait PolicyRepository: Send + Sync {
    /// Insert or replace a policy.
    fn put_policy(&self, policy: &Policy) -> StateResult<()>;

    fn get_policy(&self, id: &str) -> StateResult<Option<Policy>>;

    /// All policies, ordered by id.
    fn list_policies(&self) -> StateResult<Vec<Policy>>;

    /// Delete a policy. Returns true if it existed.
    fn delete_policy(&self, id: &str) -> StateResult<bool>;
}

/// Controlled quantity per target.
pub trait ControlRepository: Send + Sync {
    fn put_control_state(&self, state: &ControlState) -> StateResult<()>;

    fn get_control_state(&self, target_id: &str) -> StateResult<Option<ControlState>>;

    fn list_control_states(&self) -> StateResult<Vec<ControlState>>;
}

/// Append-only audit trail.
pub trait AuditRepository: Send + Sync {
    /// Append a (decision, outcome) pair and return the stored record with
    /// its assigned sequence number.
    fn append_audit(&self, decision: &Decision, outcome: &Outcome) -> StateResult<AuditRecord>;

    /// Append a (decision, outcome) pair and, when given, store the
    /// resulting control state. Both writes commit together or not at all.
    fn commit_decision(
        &self,
        decision: &Decision,
        outcome: &Outcome,
        control: Option<&ControlState>,
    ) -> StateResult<AuditRecord>;

    /// All records for one target, oldest first.
    fn list_audit_for_target(&self, target_id: &str) -> StateResult<Vec<AuditRecord>>;

    /// All records across targets, oldest first within each target.
    fn list_audit(&self) -> StateResult<Vec<AuditRecord>>;
}

/// Bounded per-target snapshot history, used for trend extrapolation.
pub trait SnapshotRepository: Send + Sync {
    /// Store a snapshot and trim the target's history to `keep` entries.
    fn put_snapshot(&self, snapshot: &MetricSnapshot, keep: usize) -> StateResult<()>;

    /// The `limit` most recent snapshots of a target, oldest first.
    fn list_snapshots_for_target(
        &self,
        target_id: &str,
        limit: usize,
    ) -> StateResult<Vec<MetricSnapshot>>;
}

/// Everything the controller needs from storage.
pub trait Repository:
    PolicyRepository + ControlRepository + AuditRepository + SnapshotRepository
{
}

impl<T> Repository for T where
    T: PolicyRepository + ControlRepository + AuditRepository + SnapshotRepository
{
}
