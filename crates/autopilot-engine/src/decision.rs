//! Decision engine: turns one snapshot into at most one decision.
//!
//! Every enabled, ungated policy is evaluated against the snapshot. When
//! nothing fires, scale-up policies whose reading sits under the hysteresis
//! band propose a scale-down instead. Candidates are ranked by priority,
//! then by how far the reading is from its threshold, then by policy id,
//! and the first one that respects the instance bounds wins.

use tracing::{debug, warn};

use autopilot_core::{
    Action, Condition, ControlState, Decision, EngineSettings, MetricSnapshot, Policy,
};

use crate::cooldown::CooldownGate;
use crate::evaluator::{confidence, deviation, evaluate};

/// A policy that wants to act in this cycle.
#[derive(Debug)]
struct Candidate<'p> {
    policy: &'p Policy,
    action: Action,
    value: f64,
    /// Threshold the value was compared against (the band edge for
    /// synthesized scale-downs).
    threshold: f64,
    synthesized: bool,
}

impl Candidate<'_> {
    fn deviation(&self) -> f64 {
        deviation(self.value, self.threshold)
    }

    /// New controlled quantity, or `None` if the bounds reject the action.
    fn desired(&self, current: u32) -> Option<Option<u32>> {
        let p = self.policy;
        match self.action {
            Action::ScaleUp if current >= p.max_bound => None,
            Action::ScaleUp => Some(Some(current.saturating_add(p.step).min(p.max_bound))),
            Action::ScaleDown if current <= p.min_bound => None,
            Action::ScaleDown => Some(Some(current.saturating_sub(p.step).max(p.min_bound))),
            _ => Some(None),
        }
    }

    fn reason(&self) -> String {
        let p = self.policy;
        if self.synthesized {
            return format!(
                "{} {:.2} below scale-down band {:.2} (hysteresis of policy {})",
                p.metric, self.value, self.threshold, p.id
            );
        }
        let relation = match p.condition {
            Condition::Above => format!("above {:.2}", p.threshold),
            Condition::Below => format!("below {:.2}", p.threshold),
            Condition::Between => format!(
                "within [{:.2}, {:.2}]",
                p.threshold,
                p.threshold_max.unwrap_or(p.threshold)
            ),
            Condition::Equals => format!("equal to {:.2}", p.threshold),
            Condition::NotEquals => format!("not equal to {:.2}", p.threshold),
        };
        format!("{} {:.2} {} (policy {})", p.metric, self.value, relation, p.id)
    }
}

/// Chooses a single action per target per cycle.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    hysteresis_factor: f64,
}

impl DecisionEngine {
    /// `hysteresis_factor` sets the scale-down band at `threshold * factor`.
    pub fn new(hysteresis_factor: f64) -> Self {
        debug_assert!(hysteresis_factor > 0.0 && hysteresis_factor < 1.0);
        Self { hysteresis_factor }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.hysteresis_factor)
    }

    pub fn hysteresis_factor(&self) -> f64 {
        self.hysteresis_factor
    }

    /// Evaluate `policies` for `target_id` and return the winning decision.
    ///
    /// The snapshot timestamp is the evaluation time. The winner is
    /// recorded in `gate` before returning, so the caller must apply the
    /// decision (or at least audit it) and never re-run the same cycle.
    pub fn decide(
        &self,
        target_id: &str,
        snapshot: &MetricSnapshot,
        policies: &[Policy],
        control: &ControlState,
        gate: &mut CooldownGate,
    ) -> Option<Decision> {
        let now = snapshot.timestamp;

        let eligible: Vec<&Policy> = policies
            .iter()
            .filter(|p| p.enabled && p.applies_to(target_id))
            .filter(|p| match p.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        target = %target_id,
                        policy = %p.id,
                        error = %e,
                        "skipping malformed policy"
                    );
                    false
                }
            })
            .filter(|p| {
                let gated = gate.is_gated(p, now);
                if gated {
                    debug!(target = %target_id, policy = %p.id, "policy in cooldown");
                }
                !gated
            })
            .collect();

        let mut candidates: Vec<Candidate<'_>> = Vec::new();
        for &p in &eligible {
            let Some(value) = snapshot.reading(&p.metric) else {
                warn!(
                    target = %target_id,
                    policy = %p.id,
                    metric = %p.metric,
                    "metric missing from snapshot"
                );
                continue;
            };
            if evaluate(p, snapshot) {
                candidates.push(Candidate {
                    policy: p,
                    action: p.action,
                    value,
                    threshold: p.threshold,
                    synthesized: false,
                });
            }
        }

        if candidates.is_empty() {
            candidates = self.scale_down_candidates(&eligible, snapshot, control);
        }

        candidates.sort_by(|a, b| {
            b.policy
                .priority
                .cmp(&a.policy.priority)
                .then(b.deviation().total_cmp(&a.deviation()))
                .then_with(|| a.policy.id.cmp(&b.policy.id))
        });

        for candidate in candidates {
            let Some(desired) = candidate.desired(control.current) else {
                debug!(
                    target = %target_id,
                    policy = %candidate.policy.id,
                    action = %candidate.action,
                    current = control.current,
                    "bound-rejected"
                );
                continue;
            };

            gate.record(candidate.policy, now);

            let decision = Decision {
                id: format!("{target_id}@{now}"),
                target_id: target_id.to_string(),
                policy_id: candidate.policy.id.clone(),
                action: candidate.action,
                reason: candidate.reason(),
                confidence: confidence(candidate.value, candidate.threshold),
                current_value: candidate.value,
                threshold: candidate.threshold,
                desired,
                timestamp: now,
            };
            debug!(
                target = %target_id,
                policy = %decision.policy_id,
                action = %decision.action,
                confidence = decision.confidence,
                "decision made"
            );
            return Some(decision);
        }

        None
    }

    /// Scale-up policies whose reading fell under `threshold * factor`.
    fn scale_down_candidates<'p>(
        &self,
        eligible: &[&'p Policy],
        snapshot: &MetricSnapshot,
        control: &ControlState,
    ) -> Vec<Candidate<'p>> {
        eligible
            .iter()
            .copied()
            .filter(|p| p.action == Action::ScaleUp && p.condition == Condition::Above)
            .filter(|p| control.current > p.min_bound)
            .filter_map(|p| {
                let band = p.threshold * self.hysteresis_factor;
                let value = snapshot.reading(&p.metric)?;
                (value < band).then_some(Candidate {
                    policy: p,
                    action: Action::ScaleDown,
                    value,
                    threshold: band,
                    synthesized: true,
                })
            })
            .collect()
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}
