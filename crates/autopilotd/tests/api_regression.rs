//! API regression tests.
//!
//! Drives the full router the daemon serves: policies, targets, snapshot
//! cycles, audit queries, statistics, trends and metrics.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use autopilot_api::build_router;
use autopilot_core::EngineSettings;
use autopilot_engine::{Controller, LogActuator};
use autopilot_state::StateStore;

fn test_router() -> (Router, Controller) {
    let store = Arc::new(StateStore::open_in_memory().unwrap());
    let controller = Controller::new(store, Arc::new(LogActuator), EngineSettings::default());
    (build_router(controller.clone()), controller)
}

fn cpu_policy() -> Value {
    json!({
        "id": "cpu-high",
        "name": "CPU high",
        "metric": "cpu",
        "condition": "above",
        "threshold": 85.0,
        "action": "scale-up",
        "priority": "high",
        "cooldown_secs": 300,
        "min_bound": 2,
        "max_bound": 10
    })
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn api_policy_lifecycle() {
    let (router, _) = test_router();

    let (status, body) = send(&router, "GET", "/api/v1/policies", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    let (status, body) = send(&router, "POST", "/api/v1/policies", Some(cpu_policy())).await;
    assert_eq!(status, StatusCode::CREATED);
    // Defaults filled in on the way through.
    assert_eq!(body["data"]["step"], 1);
    assert_eq!(body["data"]["enabled"], true);

    let mut updated = cpu_policy();
    updated["threshold"] = json!(90.0);
    let (status, _) = send(&router, "PUT", "/api/v1/policies/cpu-high", Some(updated)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&router, "GET", "/api/v1/policies/cpu-high", None).await;
    assert_eq!(body["data"]["threshold"], 90.0);

    let (status, _) = send(&router, "DELETE", "/api/v1/policies/cpu-high", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&router, "GET", "/api/v1/policies/cpu-high", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn api_scale_up_then_cooldown() {
    let (router, _) = test_router();
    send(&router, "POST", "/api/v1/policies", Some(cpu_policy())).await;
    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/targets",
        Some(json!({"id": "web", "instances": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/targets/web/snapshots",
        Some(json!({"timestamp": 1_000, "readings": {"cpu": 90.0}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["decision"]["action"], "scale-up");
    let confidence = body["data"]["decision"]["confidence"].as_f64().unwrap();
    assert!((confidence - 0.0588).abs() < 1e-3);

    // Two minutes later, still inside the five minute cooldown.
    let (_, body) = send(
        &router,
        "POST",
        "/api/v1/targets/web/snapshots",
        Some(json!({"timestamp": 121_000, "readings": {"cpu": 92.0}})),
    )
    .await;
    assert_eq!(body["data"]["decision"], Value::Null);

    let (_, body) = send(&router, "GET", "/api/v1/targets/web", None).await;
    assert_eq!(body["data"]["current"], 4);

    let (_, body) = send(&router, "GET", "/api/v1/stats", None).await;
    assert_eq!(body["data"]["total_events"], 1);
    assert_eq!(body["data"]["total_scale_ups"], 1);
}

#[tokio::test]
async fn api_audit_filters_by_query() {
    let (router, _) = test_router();
    send(&router, "POST", "/api/v1/policies", Some(cpu_policy())).await;
    send(
        &router,
        "POST",
        "/api/v1/targets",
        Some(json!({"id": "web", "instances": 3})),
    )
    .await;

    // Up at t=1s, down after the cooldown at t=400s.
    for (ts, cpu) in [(1_000, 95.0), (400_000, 20.0)] {
        let (status, _) = send(
            &router,
            "POST",
            "/api/v1/targets/web/snapshots",
            Some(json!({"timestamp": ts, "readings": {"cpu": cpu}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = send(&router, "GET", "/api/v1/targets/web/audit", None).await;
    let records = body["data"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["decision"]["action"], "scale-down");

    let (_, body) = send(&router, "GET", "/api/v1/targets/web/audit?action=scale-up", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = send(
        &router,
        "GET",
        "/api/v1/audit?status=completed&since=2000&limit=5",
        None,
    )
    .await;
    let records = body["data"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["decision"]["timestamp"], 400_000);
}

#[tokio::test]
async fn api_rejects_bad_snapshots() {
    let (router, _) = test_router();

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/targets/web/snapshots",
        Some(json!({"timestamp": 0, "readings": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    send(
        &router,
        "POST",
        "/api/v1/targets/web/snapshots",
        Some(json!({"timestamp": 5_000, "readings": {"cpu": 1.0}})),
    )
    .await;
    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/targets/web/snapshots",
        Some(json!({"timestamp": 5_000, "readings": {"cpu": 1.0}})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn api_trend_projection() {
    let (router, _) = test_router();
    for (ts, cpu) in [(10_000, 40.0), (20_000, 50.0), (30_000, 60.0)] {
        send(
            &router,
            "POST",
            "/api/v1/targets/web/snapshots",
            Some(json!({"timestamp": ts, "readings": {"cpu": cpu}})),
        )
        .await;
    }

    let (status, body) = send(
        &router,
        "GET",
        "/api/v1/targets/web/trend?metric=cpu&horizon=10s&threshold=85",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["trend"]["samples"], 3);
    assert!((body["data"]["projected_value"].as_f64().unwrap() - 70.0).abs() < 1e-6);
    assert_eq!(body["data"]["secs_to_threshold"], 25);
}

#[tokio::test]
async fn api_metrics_exposition() {
    let (router, controller) = test_router();
    controller.register_target("web", 3).unwrap();

    let req = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("autopilot_instances{target=\"web\"} 3"));
    assert!(text.contains("autopilot_pending_cycles 0"));
}

#[tokio::test]
async fn api_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("autopilot.redb");

    {
        let store = Arc::new(StateStore::open(&path).unwrap());
        let controller = Controller::new(store, Arc::new(LogActuator), EngineSettings::default());
        let router = build_router(controller.clone());
        send(&router, "POST", "/api/v1/policies", Some(cpu_policy())).await;
        send(
            &router,
            "POST",
            "/api/v1/targets",
            Some(json!({"id": "web", "instances": 3})),
        )
        .await;
        send(
            &router,
            "POST",
            "/api/v1/targets/web/snapshots",
            Some(json!({"timestamp": 1_000, "readings": {"cpu": 95.0}})),
        )
        .await;
        controller.shutdown().await;
    }

    let store = Arc::new(StateStore::open(&path).unwrap());
    let controller = Controller::new(store, Arc::new(LogActuator), EngineSettings::default());
    let router = build_router(controller);

    let (_, body) = send(&router, "GET", "/api/v1/targets/web", None).await;
    assert_eq!(body["data"]["current"], 4);

    // Cooldown restored from the audit trail.
    let (_, body) = send(
        &router,
        "POST",
        "/api/v1/targets/web/snapshots",
        Some(json!({"timestamp": 60_000, "readings": {"cpu": 95.0}})),
    )
    .await;
    assert_eq!(body["data"]["decision"], Value::Null);
}
