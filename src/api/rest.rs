// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. `health` is public; everything else
// requires a Bearer token checked via the `AuthBearer` extractor. Adapted
// from the teacher's `api::rest::router`: same CORS-then-state-then-routes
// shape, narrowed to the surface this spec actually names (health, full
// state snapshot, pause/resume/refresh/shutdown control, CSV trade export)
// — the teacher's feature-flag and regime endpoints have no counterpart
// here and are left for the final trim pass.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::engine::Engine;

pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        .route("/api/v1/control/refresh", post(control_refresh))
        .route("/api/v1/control/shutdown", post(control_shutdown))
        .route("/api/v1/trades/export.csv", get(export_trades_csv))
        .layer(cors)
        .with_state(engine)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: engine.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn full_state(_auth: AuthBearer, State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.build_snapshot())
}

#[derive(Serialize)]
struct ControlResponse {
    status: &'static str,
    message: String,
}

async fn control_pause(_auth: AuthBearer, State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    engine.pause();
    info!("trading paused via API");
    Json(ControlResponse {
        status: "paused",
        message: "trading paused".to_string(),
    })
}

async fn control_resume(_auth: AuthBearer, State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    if engine.is_killed() {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "engine has been killed, resume refused" })),
        )
            .into_response();
    }
    engine.resume();
    info!("trading resumed via API");
    Json(ControlResponse {
        status: "running",
        message: "trading resumed".to_string(),
    })
    .into_response()
}

/// Forces an immediate discovery pass rather than waiting for the next
/// slot-check tick, by dropping the scheduler's cached slot name so the
/// next tick of `run_slot_loop` treats it as a slot change.
async fn control_refresh(_auth: AuthBearer, State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    engine.scheduler.force_rediscovery();
    info!("candidate discovery refresh requested via API");
    Json(ControlResponse {
        status: "refreshing",
        message: "discovery will re-run on the next scheduler tick".to_string(),
    })
}

async fn control_shutdown(_auth: AuthBearer, State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    warn!("shutdown requested via API");
    engine.kill();
    engine.shutdown().await;
    Json(ControlResponse {
        status: "killed",
        message: "engine killed and store flushed".to_string(),
    })
}

#[derive(Deserialize)]
struct ExportQuery {
    #[serde(default = "default_days")]
    days: i64,
}

fn default_days() -> i64 {
    30
}

async fn export_trades_csv(
    _auth: AuthBearer,
    State(engine): State<Arc<Engine>>,
    Query(query): Query<ExportQuery>,
) -> Response {
    match engine.store.export_csv(query.days) {
        Ok(csv) => (
            [(header::CONTENT_TYPE, "text/csv")],
            csv,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "trade export failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
