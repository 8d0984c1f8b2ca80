//! Action executor: carries out a decision through the actuator.
//!
//! Each call walks one [`Outcome`] through `pending → in-progress →
//! completed | failed`. Actuator errors and timeouts end in `failed`; the
//! executor never retries. A later evaluation cycle decides again on fresh
//! readings.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use autopilot_core::{Action, ControlState, Decision, Outcome, epoch_millis};

/// Boxed future returned by [`Actuator`] hooks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The infrastructure side of the loop.
///
/// Implementations should be idempotent: a failed call is not retried, so
/// a partially applied action is only corrected by a later decision.
pub trait Actuator: Send + Sync {
    /// Set `target_id` to `desired` instances.
    fn scale<'a>(&'a self, target_id: &'a str, desired: u32) -> BoxFuture<'a, anyhow::Result<()>>;

    fn optimize<'a>(&'a self, decision: &'a Decision) -> BoxFuture<'a, anyhow::Result<()>>;

    fn alert<'a>(&'a self, decision: &'a Decision) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Actuator that only logs. Useful as a dry run.
#[derive(Debug, Default, Clone)]
pub struct LogActuator;

impl Actuator for LogActuator {
    fn scale<'a>(&'a self, target_id: &'a str, desired: u32) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            info!(target = %target_id, desired, "dry-run: scale");
            Ok(())
        })
    }

    fn optimize<'a>(&'a self, decision: &'a Decision) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            info!(target = %decision.target_id, reason = %decision.reason, "dry-run: optimize");
            Ok(())
        })
    }

    fn alert<'a>(&'a self, decision: &'a Decision) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            warn!(target = %decision.target_id, reason = %decision.reason, "dry-run: alert");
            Ok(())
        })
    }
}

/// Decrements the in-flight counter even if the execution future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs decisions against an [`Actuator`] with a timeout.
#[derive(Clone)]
pub struct ActionExecutor {
    actuator: Arc<dyn Actuator>,
    timeout: Duration,
    in_flight: Arc<AtomicUsize>,
}

impl ActionExecutor {
    pub fn new(actuator: Arc<dyn Actuator>, timeout: Duration) -> Self {
        Self {
            actuator,
            timeout,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Executions currently waiting on the actuator.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute with the configured timeout.
    pub async fn execute(&self, decision: &Decision, control: &mut ControlState) -> Outcome {
        self.execute_with_timeout(decision, control, self.timeout)
            .await
    }

    /// Execute `decision`, updating `control` when a scale action succeeds.
    ///
    /// Always returns a terminal outcome.
    pub async fn execute_with_timeout(
        &self,
        decision: &Decision,
        control: &mut ControlState,
        timeout: Duration,
    ) -> Outcome {
        let mut outcome = Outcome::pending(decision, epoch_millis());
        let _guard = InFlight::enter(&self.in_flight);
        outcome.start(epoch_millis());

        match tokio::time::timeout(timeout, self.dispatch(decision)).await {
            Ok(Ok(())) => {
                if decision.action.is_scaling()
                    && let Some(desired) = decision.desired
                {
                    info!(
                        target = %decision.target_id,
                        from = control.current,
                        to = desired,
                        action = %decision.action,
                        "scaled"
                    );
                    control.current = desired;
                    control.updated_at = decision.timestamp;
                }
                outcome.complete(epoch_millis());
            }
            Ok(Err(e)) => {
                warn!(
                    target = %decision.target_id,
                    decision = %decision.id,
                    error = %e,
                    "action failed"
                );
                outcome.fail(epoch_millis(), e.to_string());
            }
            Err(_) => {
                warn!(
                    target = %decision.target_id,
                    decision = %decision.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "action timed out"
                );
                outcome.fail(epoch_millis(), "timeout");
            }
        }

        outcome
    }

    async fn dispatch(&self, decision: &Decision) -> anyhow::Result<()> {
        match decision.action {
            Action::ScaleUp | Action::ScaleDown => {
                let desired = decision.desired.ok_or_else(|| {
                    anyhow::anyhow!("scale decision {} has no desired quantity", decision.id)
                })?;
                self.actuator.scale(&decision.target_id, desired).await
            }
            Action::Optimize => self.actuator.optimize(decision).await,
            Action::Alert => self.actuator.alert(decision).await,
            Action::NoAction => Ok(()),
        }
    }
}
