//! Audit trail: append-only history of decisions and their outcomes.
//!
//! Statistics are always recomputed from the stored records; there are no
//! separate counters that could drift from the log.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use autopilot_core::{
    Action, AuditRecord, ControlState, Decision, ExecutionStatus, Outcome, PolicyId,
};
use autopilot_state::{AuditRepository, StateResult};

/// Narrows an audit query. Every set field must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    pub action: Option<Action>,
    pub status: Option<ExecutionStatus>,
    pub policy_id: Option<String>,
    /// Only decisions at or after this Unix timestamp (milliseconds).
    pub since: Option<u64>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, record: &AuditRecord) -> bool {
        self.action.is_none_or(|a| record.decision.action == a)
            && self.status.is_none_or(|s| record.outcome.status == s)
            && self
                .policy_id
                .as_deref()
                .is_none_or(|p| record.decision.policy_id == p)
            && self.since.is_none_or(|t| record.decision.timestamp >= t)
    }
}

/// Derived view over a set of audit records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_events: usize,
    pub total_scale_ups: usize,
    pub total_scale_downs: usize,
    pub total_completed: usize,
    pub total_failed: usize,
    /// Completed / total, `0.0` with no events.
    pub success_rate: f64,
}

impl AuditStats {
    pub fn from_records(records: &[AuditRecord]) -> Self {
        let mut stats = AuditStats {
            total_events: records.len(),
            ..Default::default()
        };
        for r in records {
            match r.decision.action {
                Action::ScaleUp => stats.total_scale_ups += 1,
                Action::ScaleDown => stats.total_scale_downs += 1,
                _ => {}
            }
            match r.outcome.status {
                ExecutionStatus::Completed => stats.total_completed += 1,
                ExecutionStatus::Failed => stats.total_failed += 1,
                _ => {}
            }
        }
        if stats.total_events > 0 {
            stats.success_rate = stats.total_completed as f64 / stats.total_events as f64;
        }
        stats
    }
}

/// Append and query access to the audit log.
#[derive(Clone)]
pub struct AuditTrail {
    repo: Arc<dyn AuditRepository>,
}

impl AuditTrail {
    pub fn new(repo: Arc<dyn AuditRepository>) -> Self {
        Self { repo }
    }

    /// Append a decision with its terminal outcome.
    ///
    /// # Panics
    ///
    /// If the outcome is not terminal or belongs to another decision.
    pub fn append(&self, decision: &Decision, outcome: &Outcome) -> StateResult<AuditRecord> {
        self.commit(decision, outcome, None)
    }

    /// Append a decision with its terminal outcome and store the control
    /// state it produced, in one write.
    ///
    /// # Panics
    ///
    /// If the outcome is not terminal or belongs to another decision.
    pub fn commit(
        &self,
        decision: &Decision,
        outcome: &Outcome,
        control: Option<&ControlState>,
    ) -> StateResult<AuditRecord> {
        assert!(
            outcome.is_terminal(),
            "audit append of non-terminal outcome for {}",
            decision.id
        );
        assert_eq!(
            outcome.decision_id, decision.id,
            "outcome does not belong to decision"
        );
        self.repo.commit_decision(decision, outcome, control)
    }

    /// Records of one target, newest first.
    pub fn query(&self, target_id: &str, filter: &AuditFilter) -> StateResult<Vec<AuditRecord>> {
        let records = self.repo.list_audit_for_target(target_id)?;
        Ok(select(records, filter))
    }

    /// Records of every target, newest first.
    pub fn query_all(&self, filter: &AuditFilter) -> StateResult<Vec<AuditRecord>> {
        let records = self.repo.list_audit()?;
        Ok(select(records, filter))
    }

    /// Statistics for one target, or across all targets.
    pub fn statistics(&self, target_id: Option<&str>) -> StateResult<AuditStats> {
        let records = match target_id {
            Some(t) => self.repo.list_audit_for_target(t)?,
            None => self.repo.list_audit()?,
        };
        Ok(AuditStats::from_records(&records))
    }

    /// Most recent decision timestamp per policy, for rebuilding cooldowns.
    pub fn last_triggered(&self, target_id: &str) -> StateResult<HashMap<PolicyId, u64>> {
        let mut last = HashMap::new();
        for record in self.repo.list_audit_for_target(target_id)? {
            let entry = last
                .entry(record.decision.policy_id)
                .or_insert(record.decision.timestamp);
            *entry = (*entry).max(record.decision.timestamp);
        }
        Ok(last)
    }

    /// Timestamp of the newest decision for a target.
    pub fn latest_decision_at(&self, target_id: &str) -> StateResult<Option<u64>> {
        Ok(self
            .repo
            .list_audit_for_target(target_id)?
            .iter()
            .map(|r| r.decision.timestamp)
            .max())
    }
}

/// Newest first by decision time, ties by sequence; then filter and limit.
fn select(mut records: Vec<AuditRecord>, filter: &AuditFilter) -> Vec<AuditRecord> {
    records.sort_by(|a, b| {
        b.decision
            .timestamp
            .cmp(&a.decision.timestamp)
            .then(b.sequence.cmp(&a.sequence))
    });
    records
        .into_iter()
        .filter(|r| filter.matches(r))
        .take(filter.limit.unwrap_or(usize::MAX))
        .collect()
}
