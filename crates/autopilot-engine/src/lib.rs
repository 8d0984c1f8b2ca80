//! autopilot-engine — the policy-driven control loop.
//!
//! Takes metric snapshots per target, evaluates threshold policies, gates
//! them with per-policy cooldowns, picks at most one decision per cycle,
//! executes it through an [`Actuator`] and records the outcome in the
//! audit trail.
//!
//! # Decision Algorithm
//!
//! ```text
//! eligible   = policies where enabled and not in cooldown
//! triggered  = eligible where evaluate(policy, snapshot)
//!
//! if triggered is empty:
//!     for each scale-up policy (condition above) in eligible:
//!         if value < threshold * hysteresis_factor and current > min_bound:
//!             candidate scale-down
//!
//! sort candidates by priority desc, |value - threshold| desc, policy id
//! winner     = first candidate whose bound check passes
//! confidence = min(1, |value - threshold| / threshold)
//! record winner in the cooldown gate
//! ```
//!
//! Cycles for one target are serialized by the [`Controller`]; cycles for
//! different targets run concurrently.

pub mod audit;
pub mod controller;
pub mod cooldown;
pub mod decision;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod trend;

pub use audit::{AuditFilter, AuditStats, AuditTrail};
pub use controller::{Controller, CycleReport};
pub use cooldown::CooldownGate;
pub use decision::DecisionEngine;
pub use error::{ControllerError, ControllerResult};
pub use evaluator::{confidence, evaluate};
pub use executor::{ActionExecutor, Actuator, BoxFuture, LogActuator};
pub use trend::{Projection, Trend, linear_trend};
