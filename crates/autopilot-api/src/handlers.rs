//! REST API handlers.
//!
//! Policy and target CRUD goes straight to the repository; snapshots go
//! through the controller so that every cycle for a target is serialized.
//! All responses use the same JSON envelope.

use std::collections::HashMap;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, info, warn};

use autopilot_core::{MetricSnapshot, Policy, epoch_millis, parse_duration};
use autopilot_engine::{AuditFilter, ControllerError, linear_trend};
use autopilot_state::{PolicyRepository, SnapshotRepository};

use crate::ApiState;
use crate::exposition::{LoopGauges, render_prometheus};

/// Projection horizon when the query does not name one.
const DEFAULT_HORIZON: Duration = Duration::from_secs(300);

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn internal(e: impl std::fmt::Display) -> Response {
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

fn controller_error(e: ControllerError) -> Response {
    let status = match &e {
        ControllerError::Snapshot(_) => StatusCode::BAD_REQUEST,
        ControllerError::StaleSnapshot { .. } => StatusCode::CONFLICT,
        ControllerError::Stopped(_) => StatusCode::SERVICE_UNAVAILABLE,
        ControllerError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Policies ───────────────────────────────────────────────────

/// GET /api/v1/policies
pub async fn list_policies(State(state): State<ApiState>) -> impl IntoResponse {
    match state.controller.repo().list_policies() {
        Ok(policies) => ApiResponse::ok(policies).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/policies/{id}
pub async fn get_policy(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.repo().get_policy(&id) {
        Ok(Some(policy)) => ApiResponse::ok(policy).into_response(),
        Ok(None) => error_response("policy not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal(e),
    }
}

/// POST /api/v1/policies
pub async fn create_policy(
    State(state): State<ApiState>,
    Json(mut policy): Json<Policy>,
) -> impl IntoResponse {
    if let Err(e) = policy.validate() {
        return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
    }
    let repo = state.controller.repo();
    match repo.get_policy(&policy.id) {
        Ok(Some(_)) => {
            return error_response("policy already exists", StatusCode::CONFLICT).into_response();
        }
        Ok(None) => {}
        Err(e) => return internal(e),
    }

    let now = epoch_millis();
    policy.created_at = now;
    policy.updated_at = now;
    match repo.put_policy(&policy) {
        Ok(()) => {
            info!(policy = %policy.id, "policy created");
            (StatusCode::CREATED, ApiResponse::ok(policy)).into_response()
        }
        Err(e) => internal(e),
    }
}

/// PUT /api/v1/policies/{id}
pub async fn update_policy(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(mut policy): Json<Policy>,
) -> impl IntoResponse {
    if policy.id != id {
        return error_response("policy id does not match path", StatusCode::BAD_REQUEST)
            .into_response();
    }
    if let Err(e) = policy.validate() {
        return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
    }
    let repo = state.controller.repo();
    let existing = match repo.get_policy(&id) {
        Ok(Some(existing)) => existing,
        Ok(None) => {
            return error_response("policy not found", StatusCode::NOT_FOUND).into_response();
        }
        Err(e) => return internal(e),
    };

    policy.created_at = existing.created_at;
    policy.updated_at = epoch_millis();
    match repo.put_policy(&policy) {
        Ok(()) => {
            info!(policy = %policy.id, "policy updated");
            ApiResponse::ok(policy).into_response()
        }
        Err(e) => internal(e),
    }
}

/// DELETE /api/v1/policies/{id}
pub async fn delete_policy(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.repo().delete_policy(&id) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("policy not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal(e),
    }
}

// ── Targets ────────────────────────────────────────────────────

/// Register request body.
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    pub instances: u32,
}

/// GET /api/v1/targets
pub async fn list_targets(State(state): State<ApiState>) -> impl IntoResponse {
    match state.controller.targets() {
        Ok(targets) => ApiResponse::ok(targets).into_response(),
        Err(e) => controller_error(e),
    }
}

/// POST /api/v1/targets
pub async fn register_target(
    State(state): State<ApiState>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    if req.id.trim().is_empty() {
        return error_response("target id is required", StatusCode::BAD_REQUEST).into_response();
    }
    match state.controller.register_target(&req.id, req.instances) {
        Ok(control) => (StatusCode::CREATED, ApiResponse::ok(control)).into_response(),
        Err(e) => controller_error(e),
    }
}

/// GET /api/v1/targets/{id}
pub async fn get_target(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.control_state(&id) {
        Ok(Some(control)) => ApiResponse::ok(control).into_response(),
        Ok(None) => error_response("target not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => controller_error(e),
    }
}

// ── Snapshots ──────────────────────────────────────────────────

/// Snapshot submission body. The target comes from the path.
#[derive(Deserialize)]
pub struct SnapshotRequest {
    /// Unix milliseconds; defaults to the time of receipt.
    pub timestamp: Option<u64>,
    pub readings: HashMap<String, f64>,
}

/// POST /api/v1/targets/{id}/snapshots
pub async fn submit_snapshot(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<SnapshotRequest>,
) -> impl IntoResponse {
    let snapshot = MetricSnapshot {
        target_id: id,
        timestamp: req.timestamp.unwrap_or_else(epoch_millis),
        readings: req.readings,
    };
    debug!(target = %snapshot.target_id, readings = snapshot.readings.len(), "snapshot received");
    match state.controller.submit(snapshot).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => controller_error(e),
    }
}

// ── Audit ──────────────────────────────────────────────────────

/// GET /api/v1/targets/{id}/audit
pub async fn target_audit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(filter): Query<AuditFilter>,
) -> impl IntoResponse {
    match state.controller.audit().query(&id, &filter) {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/audit
pub async fn all_audit(
    State(state): State<ApiState>,
    Query(filter): Query<AuditFilter>,
) -> impl IntoResponse {
    match state.controller.audit().query_all(&filter) {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/targets/{id}/stats
pub async fn target_stats(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.audit().statistics(Some(&id)) {
        Ok(stats) => ApiResponse::ok(stats).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/stats
pub async fn all_stats(State(state): State<ApiState>) -> impl IntoResponse {
    match state.controller.audit().statistics(None) {
        Ok(stats) => ApiResponse::ok(stats).into_response(),
        Err(e) => internal(e),
    }
}

// ── Trends ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct TrendQuery {
    pub metric: String,
    /// Duration string such as `"5m"`.
    pub horizon: Option<String>,
    pub threshold: Option<f64>,
}

/// GET /api/v1/targets/{id}/trend?metric=cpu&horizon=5m&threshold=85
pub async fn target_trend(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<TrendQuery>,
) -> impl IntoResponse {
    let horizon = match query.horizon.as_deref().map(parse_duration) {
        Some(Ok(h)) => h,
        Some(Err(e)) => {
            return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
        }
        None => DEFAULT_HORIZON,
    };

    let limit = state.controller.settings().history_limit;
    let history = match state.controller.repo().list_snapshots_for_target(&id, limit) {
        Ok(history) => history,
        Err(e) => return internal(e),
    };

    match linear_trend(&history, &query.metric) {
        Some(trend) => {
            ApiResponse::ok(trend.projection(&id, horizon, query.threshold)).into_response()
        }
        None => error_response(
            "not enough samples for a trend",
            StatusCode::UNPROCESSABLE_ENTITY,
        )
        .into_response(),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let controls = match state.controller.targets() {
        Ok(controls) => controls,
        Err(e) => {
            warn!(error = %e, "metrics scrape: listing targets failed");
            Vec::new()
        }
    };
    let mut stats = Vec::with_capacity(controls.len());
    for c in &controls {
        match state.controller.audit().statistics(Some(&c.target_id)) {
            Ok(s) => stats.push((c.target_id.clone(), s)),
            Err(e) => warn!(
                target = %c.target_id,
                error = %e,
                "metrics scrape: audit statistics failed"
            ),
        }
    }
    let gauges = LoopGauges {
        pending_cycles: state.controller.pending(),
        in_flight_actions: state.controller.in_flight(),
        unrecorded_decisions: state.controller.unrecorded(),
    };

    let body = render_prometheus(&controls, &stats, gauges);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use autopilot_core::{
        Action, AuditRecord, Condition, ControlState, Decision, EngineSettings, MetricSnapshot,
        Outcome, Priority,
    };
    use autopilot_engine::{Controller, LogActuator};
    use autopilot_state::{
        AuditRepository, ControlRepository, PolicyRepository, SnapshotRepository, StateError,
        StateResult, StateStore,
    };

    fn test_state() -> ApiState {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let controller = Controller::new(store, Arc::new(LogActuator), EngineSettings::default());
        ApiState { controller }
    }

    fn test_policy(id: &str) -> Policy {
        Policy {
            id: id.to_string(),
            name: "CPU high".to_string(),
            target: None,
            metric: "cpu".to_string(),
            condition: Condition::Above,
            threshold: 85.0,
            threshold_max: None,
            action: Action::ScaleUp,
            priority: Priority::High,
            cooldown_secs: 300,
            min_bound: 2,
            max_bound: 10,
            step: 1,
            enabled: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn snapshot(timestamp: u64, cpu: f64) -> SnapshotRequest {
        SnapshotRequest {
            timestamp: Some(timestamp),
            readings: HashMap::from([("cpu".to_string(), cpu)]),
        }
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_policies_empty() {
        let state = test_state();
        let resp = list_policies(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_and_get_policy() {
        let state = test_state();

        let resp = create_policy(State(state.clone()), Json(test_policy("cpu-high")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = create_policy(State(state.clone()), Json(test_policy("cpu-high")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = get_policy(State(state), Path("cpu-high".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["threshold"], 85.0);
        assert!(body["data"]["created_at"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn create_rejects_invalid_band() {
        let state = test_state();
        let mut policy = test_policy("band");
        policy.condition = Condition::Between;
        let resp = create_policy(State(state), Json(policy)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_requires_matching_id_and_existing_policy() {
        let state = test_state();
        let resp = update_policy(
            State(state.clone()),
            Path("other".to_string()),
            Json(test_policy("cpu-high")),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = update_policy(
            State(state.clone()),
            Path("cpu-high".to_string()),
            Json(test_policy("cpu-high")),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        state.controller.repo().put_policy(&test_policy("cpu-high")).unwrap();
        let mut changed = test_policy("cpu-high");
        changed.threshold = 90.0;
        let resp = update_policy(State(state.clone()), Path("cpu-high".to_string()), Json(changed))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let stored = state.controller.repo().get_policy("cpu-high").unwrap().unwrap();
        assert_eq!(stored.threshold, 90.0);
    }

    #[tokio::test]
    async fn delete_nonexistent_policy() {
        let state = test_state();
        let resp = delete_policy(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn snapshot_runs_a_cycle() {
        let state = test_state();
        state.controller.repo().put_policy(&test_policy("cpu-high")).unwrap();
        state.controller.register_target("web", 3).unwrap();

        let resp = submit_snapshot(
            State(state.clone()),
            Path("web".to_string()),
            Json(snapshot(1_000, 90.0)),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["decision"]["action"], "scale-up");
        assert_eq!(body["data"]["outcome"]["status"], "completed");
        assert_eq!(body["data"]["control"]["current"], 4);

        let resp = target_audit(
            State(state.clone()),
            Path("web".to_string()),
            Query(AuditFilter::default()),
        )
        .await
        .into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let resp = target_stats(State(state), Path("web".to_string()))
            .await
            .into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"]["total_scale_ups"], 1);
        assert_eq!(body["data"]["success_rate"], 1.0);
    }

    #[tokio::test]
    async fn stale_snapshot_conflicts() {
        let state = test_state();
        let first = submit_snapshot(
            State(state.clone()),
            Path("web".to_string()),
            Json(snapshot(2_000, 10.0)),
        )
        .await
        .into_response();
        assert_eq!(first.status(), StatusCode::OK);

        let again = submit_snapshot(
            State(state),
            Path("web".to_string()),
            Json(snapshot(1_000, 10.0)),
        )
        .await
        .into_response();
        assert_eq!(again.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn register_and_get_target() {
        let state = test_state();
        let resp = register_target(
            State(state.clone()),
            Json(RegisterRequest {
                id: "web".to_string(),
                instances: 3,
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = get_target(State(state.clone()), Path("web".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get_target(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn trend_needs_history() {
        let state = test_state();
        let query = || TrendQuery {
            metric: "cpu".to_string(),
            horizon: Some("1m".to_string()),
            threshold: Some(85.0),
        };

        let resp = target_trend(State(state.clone()), Path("web".to_string()), Query(query()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        for (ts, cpu) in [(1_000, 50.0), (11_000, 60.0)] {
            submit_snapshot(State(state.clone()), Path("web".to_string()), Json(snapshot(ts, cpu)))
                .await
                .into_response();
        }
        let resp = target_trend(State(state), Path("web".to_string()), Query(query()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["secs_to_threshold"], 25);
    }

    #[tokio::test]
    async fn trend_rejects_bad_horizon() {
        let state = test_state();
        let query = TrendQuery {
            metric: "cpu".to_string(),
            horizon: Some("soon".to_string()),
            threshold: None,
        };
        let resp = target_trend(State(state), Path("web".to_string()), Query(query))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let state = test_state();
        state.controller.register_target("web", 3).unwrap();
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("autopilot_instances{target=\"web\"} 3"));
    }
    /// Store whose audit reads always fail.
    struct BrokenAudit(StateStore);

    impl PolicyRepository for BrokenAudit {
        fn put_policy(&self, policy: &Policy) -> StateResult<()> {
            self.0.put_policy(policy)
        }

        fn get_policy(&self, id: &str) -> StateResult<Option<Policy>> {
            self.0.get_policy(id)
        }

        fn list_policies(&self) -> StateResult<Vec<Policy>> {
            self.0.list_policies()
        }

        fn delete_policy(&self, id: &str) -> StateResult<bool> {
            self.0.delete_policy(id)
        }
    }

    impl ControlRepository for BrokenAudit {
        fn put_control_state(&self, state: &ControlState) -> StateResult<()> {
            self.0.put_control_state(state)
        }

        fn get_control_state(&self, target_id: &str) -> StateResult<Option<ControlState>> {
            self.0.get_control_state(target_id)
        }

        fn list_control_states(&self) -> StateResult<Vec<ControlState>> {
            self.0.list_control_states()
        }
    }

    impl AuditRepository for BrokenAudit {
        fn append_audit(&self, decision: &Decision, outcome: &Outcome) -> StateResult<AuditRecord> {
            self.0.append_audit(decision, outcome)
        }

        fn commit_decision(
            &self,
            decision: &Decision,
            outcome: &Outcome,
            control: Option<&ControlState>,
        ) -> StateResult<AuditRecord> {
            self.0.commit_decision(decision, outcome, control)
        }

        fn list_audit_for_target(&self, _target_id: &str) -> StateResult<Vec<AuditRecord>> {
            Err(StateError::Read("corrupt page".to_string()))
        }

        fn list_audit(&self) -> StateResult<Vec<AuditRecord>> {
            Err(StateError::Read("corrupt page".to_string()))
        }
    }

    impl SnapshotRepository for BrokenAudit {
        fn put_snapshot(&self, snapshot: &MetricSnapshot, keep: usize) -> StateResult<()> {
            self.0.put_snapshot(snapshot, keep)
        }

        fn list_snapshots_for_target(
            &self,
            target_id: &str,
            limit: usize,
        ) -> StateResult<Vec<MetricSnapshot>> {
            self.0.list_snapshots_for_target(target_id, limit)
        }
    }

    #[tokio::test]
    async fn prometheus_scrape_survives_audit_read_errors() {
        let store = Arc::new(BrokenAudit(StateStore::open_in_memory().unwrap()));
        let controller = Controller::new(store, Arc::new(LogActuator), EngineSettings::default());
        controller.register_target("web", 3).unwrap();

        let resp = prometheus_metrics(State(ApiState { controller }))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("autopilot_instances{target=\"web\"} 3"));
        assert!(!text.contains("autopilot_decisions_total{"));
        assert!(text.contains("autopilot_unrecorded_decisions 0"));
    }
}
