//! autopilot-api — REST API for the Autopilot control loop.
//!
//! Provides axum route handlers for managing policies and targets,
//! submitting metric snapshots, and reading the audit trail.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/policies` | List all policies |
//! | POST | `/api/v1/policies` | Create a policy |
//! | GET | `/api/v1/policies/{id}` | Get a policy |
//! | PUT | `/api/v1/policies/{id}` | Replace a policy |
//! | DELETE | `/api/v1/policies/{id}` | Delete a policy |
//! | GET | `/api/v1/targets` | List targets and their control state |
//! | POST | `/api/v1/targets` | Register a target |
//! | GET | `/api/v1/targets/{id}` | Control state of a target |
//! | POST | `/api/v1/targets/{id}/snapshots` | Submit a snapshot, run a cycle |
//! | GET | `/api/v1/targets/{id}/audit` | Audit trail of a target |
//! | GET | `/api/v1/targets/{id}/stats` | Audit statistics of a target |
//! | GET | `/api/v1/targets/{id}/trend` | Linear trend projection |
//! | GET | `/api/v1/audit` | Audit trail of all targets |
//! | GET | `/api/v1/stats` | Audit statistics of all targets |
//! | GET | `/metrics` | Prometheus exposition |

pub mod exposition;
pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

use autopilot_engine::Controller;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: Controller,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(controller: Controller) -> Router {
    let api_state = ApiState { controller };

    let api_routes = Router::new()
        .route("/policies", get(handlers::list_policies).post(handlers::create_policy))
        .route(
            "/policies/{id}",
            get(handlers::get_policy)
                .put(handlers::update_policy)
                .delete(handlers::delete_policy),
        )
        .route("/targets", get(handlers::list_targets).post(handlers::register_target))
        .route("/targets/{id}", get(handlers::get_target))
        .route("/targets/{id}/snapshots", post(handlers::submit_snapshot))
        .route("/targets/{id}/audit", get(handlers::target_audit))
        .route("/targets/{id}/stats", get(handlers::target_stats))
        .route("/targets/{id}/trend", get(handlers::target_trend))
        .route("/audit", get(handlers::all_audit))
        .route("/stats", get(handlers::all_stats))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(api_state))
}
