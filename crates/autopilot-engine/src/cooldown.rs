//! Cooldown gate: suppresses a policy for its cooldown window after it
//! produced a decision.
//!
//! One gate exists per target and is owned by that target's task, so the
//! `is_gated` check and the `record` call can never interleave with another
//! cycle of the same target.

use std::collections::HashMap;
use std::time::Duration;

use autopilot_core::{Policy, PolicyId};

/// Per-policy `last_triggered` timestamps (Unix milliseconds) for one target.
#[derive(Debug, Default, Clone)]
pub struct CooldownGate {
    last_triggered: HashMap<PolicyId, u64>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` iff `now - last_triggered < cooldown`.
    pub fn is_gated(&self, policy: &Policy, now: u64) -> bool {
        self.remaining(policy, now).is_some()
    }

    /// Time left in the policy's cooldown window, if any.
    pub fn remaining(&self, policy: &Policy, now: u64) -> Option<Duration> {
        let last = *self.last_triggered.get(&policy.id)?;
        let elapsed = now.saturating_sub(last);
        let cooldown = policy.cooldown_ms();
        (elapsed < cooldown).then(|| Duration::from_millis(cooldown - elapsed))
    }

    /// Mark `policy` as triggered at `now`.
    ///
    /// # Panics
    ///
    /// If the policy is still inside its cooldown window: a second record
    /// means two decisions slipped through for one window.
    pub fn record(&mut self, policy: &Policy, now: u64) {
        assert!(
            !self.is_gated(policy, now),
            "policy {} recorded again inside its cooldown window",
            policy.id
        );
        self.last_triggered.insert(policy.id.clone(), now);
    }

    /// Seed a timestamp replayed from the audit trail. Keeps the newest.
    pub fn restore(&mut self, policy_id: &str, at: u64) {
        let entry = self.last_triggered.entry(policy_id.to_string()).or_insert(at);
        *entry = (*entry).max(at);
    }

    pub fn last_triggered(&self, policy_id: &str) -> Option<u64> {
        self.last_triggered.get(policy_id).copied()
    }
}
