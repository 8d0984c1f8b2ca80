//! Per-target controller: runs evaluation cycles, one target at a time.
//!
//! Each target gets its own worker task fed by a bounded queue. The worker
//! owns the target's cooldown gate and control state, so the
//! read-check-record sequence of a cycle never overlaps with another cycle
//! for the same target. Different targets run in parallel.
//!
//! A cycle:
//! 1. reject snapshots not newer than the last one seen for the target
//! 2. store the snapshot in the bounded history
//! 3. read the policy set and decide
//! 4. execute the decision
//! 5. append decision and outcome to the audit trail, together with the
//!    control state if it changed
//!
//! A decision whose record cannot be written stays in the worker's backlog,
//! counted by [`Controller::unrecorded`], and is written ahead of any later
//! decision once the store accepts writes again.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use autopilot_core::{
    ControlState, Decision, EngineSettings, MetricSnapshot, Outcome, Policy, TargetId,
};
use autopilot_state::{ControlRepository, PolicyRepository, Repository, SnapshotRepository};

use crate::audit::AuditTrail;
use crate::cooldown::CooldownGate;
use crate::decision::DecisionEngine;
use crate::error::{ControllerError, ControllerResult};
use crate::executor::{ActionExecutor, Actuator};

/// Snapshots queued per target before `submit` waits.
const QUEUE_DEPTH: usize = 64;

/// Result of one evaluation cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub target_id: TargetId,
    pub timestamp: u64,
    pub decision: Option<Decision>,
    pub outcome: Option<Outcome>,
    /// Control state after the cycle.
    pub control: ControlState,
}

struct Job {
    snapshot: MetricSnapshot,
    reply: oneshot::Sender<ControllerResult<CycleReport>>,
}

struct Worker {
    tx: mpsc::Sender<Job>,
    handle: JoinHandle<()>,
}

struct Inner {
    repo: Arc<dyn Repository>,
    audit: AuditTrail,
    engine: DecisionEngine,
    executor: ActionExecutor,
    settings: EngineSettings,
    workers: RwLock<HashMap<TargetId, Worker>>,
    /// Cycles submitted and not yet finished.
    pending: Arc<AtomicUsize>,
    /// Executed decisions whose audit record is not yet stored.
    unrecorded: Arc<AtomicUsize>,
    stopped: AtomicBool,
}

/// Handle to the control loop. Cheap to clone.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    pub fn new<R>(repo: Arc<R>, actuator: Arc<dyn Actuator>, settings: EngineSettings) -> Self
    where
        R: Repository + 'static,
    {
        let audit = AuditTrail::new(repo.clone());
        let repo: Arc<dyn Repository> = repo;
        Self {
            inner: Arc::new(Inner {
                repo,
                audit,
                engine: DecisionEngine::from_settings(&settings),
                executor: ActionExecutor::new(actuator, settings.action_timeout),
                settings,
                workers: RwLock::new(HashMap::new()),
                pending: Arc::new(AtomicUsize::new(0)),
                unrecorded: Arc::new(AtomicUsize::new(0)),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Make a target known with an initial instance count.
    ///
    /// An existing control state wins: registration never resets a target
    /// that has already been scaled.
    pub fn register_target(
        &self,
        target_id: &str,
        instances: u32,
    ) -> ControllerResult<ControlState> {
        if let Some(existing) = self.inner.repo.get_control_state(target_id)? {
            return Ok(existing);
        }
        let state = ControlState::new(target_id, instances);
        self.inner.repo.put_control_state(&state)?;
        info!(target = %target_id, instances, "target registered");
        Ok(state)
    }

    /// Run one evaluation cycle for the snapshot's target and wait for it.
    pub async fn submit(&self, snapshot: MetricSnapshot) -> ControllerResult<CycleReport> {
        snapshot.validate()?;
        let tx = self.sender_for(&snapshot.target_id).await?;

        let permit = tx.reserve().await.map_err(|_| {
            ControllerError::Stopped(format!("worker for {} exited", snapshot.target_id))
        })?;
        let (reply, rx) = oneshot::channel();
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let target_id = snapshot.target_id.clone();
        permit.send(Job { snapshot, reply });

        rx.await.map_err(|_| {
            ControllerError::Stopped(format!("worker for {target_id} dropped the cycle"))
        })?
    }

    /// Stop accepting snapshots and wait for queued cycles to finish.
    pub async fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let workers: Vec<(TargetId, Worker)> = self.inner.workers.write().await.drain().collect();
        for (target_id, worker) in workers {
            drop(worker.tx);
            if let Err(e) = worker.handle.await {
                warn!(target = %target_id, error = %e, "target worker panicked");
            }
        }
        info!("controller stopped");
    }

    pub fn control_state(&self, target_id: &str) -> ControllerResult<Option<ControlState>> {
        Ok(self.inner.repo.get_control_state(target_id)?)
    }

    /// Every target with a control state, ordered by id.
    pub fn targets(&self) -> ControllerResult<Vec<ControlState>> {
        Ok(self.inner.repo.list_control_states()?)
    }

    /// Cycles submitted and not yet finished, across all targets.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Executed decisions still waiting for their audit record to be
    /// written.
    pub fn unrecorded(&self) -> usize {
        self.inner.unrecorded.load(Ordering::SeqCst)
    }

    /// Actions currently waiting on the actuator.
    pub fn in_flight(&self) -> usize {
        self.inner.executor.in_flight()
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.inner.audit
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn repo(&self) -> Arc<dyn Repository> {
        Arc::clone(&self.inner.repo)
    }

    async fn sender_for(&self, target_id: &str) -> ControllerResult<mpsc::Sender<Job>> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(ControllerError::Stopped("shutting down".to_string()));
        }
        if let Some(worker) = self.inner.workers.read().await.get(target_id) {
            return Ok(worker.tx.clone());
        }

        let mut workers = self.inner.workers.write().await;
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(ControllerError::Stopped("shutting down".to_string()));
        }
        if let Some(worker) = workers.get(target_id) {
            return Ok(worker.tx.clone());
        }

        let state = TargetState::bootstrap(target_id, &self.inner)?;
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = tokio::spawn(state.run(rx, Arc::clone(&self.inner.pending)));
        workers.insert(
            target_id.to_string(),
            Worker {
                tx: tx.clone(),
                handle,
            },
        );
        Ok(tx)
    }
}

/// An executed decision the store has not accepted yet.
struct Unrecorded {
    decision: Decision,
    outcome: Outcome,
    control: Option<ControlState>,
}

/// Everything one target's worker owns.
struct TargetState {
    target_id: TargetId,
    repo: Arc<dyn Repository>,
    audit: AuditTrail,
    engine: DecisionEngine,
    executor: ActionExecutor,
    history_limit: usize,
    gate: CooldownGate,
    control: ControlState,
    last_snapshot: Option<u64>,
    backlog: VecDeque<Unrecorded>,
    unrecorded: Arc<AtomicUsize>,
}

impl TargetState {
    /// Rebuild a target's state from the store after a (re)start.
    fn bootstrap(target_id: &str, inner: &Inner) -> ControllerResult<Self> {
        let control = match inner.repo.get_control_state(target_id)? {
            Some(state) => state,
            None => {
                let state = ControlState::new(target_id, inner.settings.default_instances);
                inner.repo.put_control_state(&state)?;
                state
            }
        };

        let mut gate = CooldownGate::new();
        for (policy_id, at) in inner.audit.last_triggered(target_id)? {
            gate.restore(&policy_id, at);
        }

        let last_decision = inner.audit.latest_decision_at(target_id)?;
        let last_stored = inner
            .repo
            .list_snapshots_for_target(target_id, 1)?
            .last()
            .map(|s| s.timestamp);

        info!(
            target = %target_id,
            current = control.current,
            "target worker started"
        );
        Ok(Self {
            target_id: target_id.to_string(),
            repo: Arc::clone(&inner.repo),
            audit: inner.audit.clone(),
            engine: inner.engine.clone(),
            executor: inner.executor.clone(),
            history_limit: inner.settings.history_limit,
            gate,
            control,
            last_snapshot: last_decision.max(last_stored),
            backlog: VecDeque::new(),
            unrecorded: Arc::clone(&inner.unrecorded),
        })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Job>, pending: Arc<AtomicUsize>) {
        while let Some(job) = rx.recv().await {
            let result = self.cycle(job.snapshot).await;
            if let Err(e) = &result {
                warn!(target = %self.target_id, error = %e, "cycle failed");
            }
            pending.fetch_sub(1, Ordering::SeqCst);
            // The submitter may have gone away; the cycle still counts.
            let _ = job.reply.send(result);
        }
        if !self.flush_backlog() {
            error!(
                target = %self.target_id,
                unrecorded = self.backlog.len(),
                "target worker stopped with unrecorded decisions"
            );
        }
        debug!(target = %self.target_id, "target worker stopped");
    }

    /// Write backlogged decisions, oldest first. Returns false if any remain.
    fn flush_backlog(&mut self) -> bool {
        while let Some(entry) = self.backlog.front() {
            if let Err(e) = self
                .audit
                .commit(&entry.decision, &entry.outcome, entry.control.as_ref())
            {
                warn!(
                    target = %self.target_id,
                    decision = %entry.decision.id,
                    backlog = self.backlog.len(),
                    error = %e,
                    "decision not recorded, will retry"
                );
                return false;
            }
            self.backlog.pop_front();
            self.unrecorded.fetch_sub(1, Ordering::SeqCst);
        }
        true
    }

    async fn cycle(&mut self, snapshot: MetricSnapshot) -> ControllerResult<CycleReport> {
        self.flush_backlog();

        if let Some(last) = self.last_snapshot
            && snapshot.timestamp <= last
        {
            return Err(ControllerError::StaleSnapshot {
                target: self.target_id.clone(),
                timestamp: snapshot.timestamp,
                last,
            });
        }
        self.repo.put_snapshot(&snapshot, self.history_limit)?;
        self.last_snapshot = Some(snapshot.timestamp);

        let policies: Vec<Policy> = self
            .repo
            .list_policies()?
            .into_iter()
            .filter(|p| p.applies_to(&self.target_id))
            .collect();

        let decision = self.engine.decide(
            &self.target_id,
            &snapshot,
            &policies,
            &self.control,
            &mut self.gate,
        );

        let outcome = match &decision {
            Some(decision) => {
                let before = self.control.current;
                let outcome = self.executor.execute(decision, &mut self.control).await;
                let changed = self.control.current != before;
                // From here on the decision has happened: it is recorded
                // now or kept until the store takes it.
                self.backlog.push_back(Unrecorded {
                    decision: decision.clone(),
                    outcome: outcome.clone(),
                    control: changed.then(|| self.control.clone()),
                });
                self.unrecorded.fetch_add(1, Ordering::SeqCst);
                self.flush_backlog();
                info!(
                    target = %self.target_id,
                    decision = %decision.id,
                    action = %decision.action,
                    status = %outcome.status,
                    "cycle complete"
                );
                Some(outcome)
            }
            None => {
                debug!(target = %self.target_id, timestamp = snapshot.timestamp, "no decision");
                None
            }
        };

        Ok(CycleReport {
            target_id: self.target_id.clone(),
            timestamp: snapshot.timestamp,
            decision,
            outcome,
            control: self.control.clone(),
        })
    }
}
