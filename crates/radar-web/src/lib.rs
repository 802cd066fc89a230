//! Axum JSON surface for alert management, candidate settings and on-demand scans.

mod errors;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use radar_core::{AlertDraft, AutoApplyRecord, CandidateRadarProfile, Match, Notification, RadarAlert};
use radar_engine::{
    AlertScanResult, CandidateScanResult, RadarEngine, RunState, RunSummary, TickOutcome,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

pub use errors::AppError;

pub const CRATE_NAME: &str = "radar-web";

#[derive(Clone)]
pub struct AppState {
    pub engine: RadarEngine,
}

impl AppState {
    pub fn new(engine: RadarEngine) -> Self {
        Self { engine }
    }
}

type Shared = State<Arc<AppState>>;

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct OptInRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub removed_matches: u64,
}

#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub state: RunState,
    pub last_run: Option<RunSummary>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/v1/recruiters/{recruiter_id}/alerts",
            get(list_alerts_handler).post(create_alert_handler),
        )
        .route(
            "/v1/recruiters/{recruiter_id}/alerts/{alert_id}",
            get(get_alert_handler)
                .put(update_alert_handler)
                .delete(delete_alert_handler),
        )
        .route(
            "/v1/recruiters/{recruiter_id}/alerts/{alert_id}/toggle",
            post(toggle_alert_handler),
        )
        .route(
            "/v1/recruiters/{recruiter_id}/alerts/{alert_id}/matches",
            get(list_matches_handler),
        )
        .route(
            "/v1/recruiters/{recruiter_id}/alerts/{alert_id}/scan",
            post(scan_alert_handler),
        )
        .route(
            "/v1/recruiters/{recruiter_id}/alerts/{alert_id}/matches/{candidate_id}/refresh",
            post(refresh_match_handler),
        )
        .route(
            "/v1/candidates/{candidate_id}/talent-radar",
            put(talent_radar_opt_in_handler),
        )
        .route(
            "/v1/candidates/{candidate_id}/auto-apply",
            put(auto_apply_opt_in_handler),
        )
        .route(
            "/v1/candidates/{candidate_id}/auto-apply/history",
            get(auto_apply_history_handler),
        )
        .route(
            "/v1/candidates/{candidate_id}/auto-apply/scan",
            post(scan_candidate_handler),
        )
        .route("/v1/notifications/{recipient_id}", get(notifications_handler))
        .route("/v1/scheduler", get(scheduler_status_handler))
        .route("/v1/scheduler/run", post(scheduler_run_handler))
        .with_state(Arc::new(state))
}

/// Serves until the engine's shutdown signal fires.
pub async fn serve(engine: RadarEngine, port: u16) -> anyhow::Result<()> {
    let shutdown = engine.shutdown.clone();
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "radar web listening");
    axum::serve(listener, app(AppState::new(engine)))
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_alerts_handler(
    State(state): Shared,
    Path(recruiter_id): Path<Uuid>,
) -> Result<Json<Vec<RadarAlert>>, AppError> {
    Ok(Json(state.engine.registry.list(recruiter_id).await?))
}

async fn create_alert_handler(
    State(state): Shared,
    Path(recruiter_id): Path<Uuid>,
    Json(draft): Json<AlertDraft>,
) -> Result<impl IntoResponse, AppError> {
    let alert = state.engine.registry.create(recruiter_id, draft).await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

async fn get_alert_handler(
    State(state): Shared,
    Path((recruiter_id, alert_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RadarAlert>, AppError> {
    Ok(Json(state.engine.registry.get(recruiter_id, alert_id).await?))
}

async fn update_alert_handler(
    State(state): Shared,
    Path((recruiter_id, alert_id)): Path<(Uuid, Uuid)>,
    Json(draft): Json<AlertDraft>,
) -> Result<Json<RadarAlert>, AppError> {
    Ok(Json(state.engine.registry.update(recruiter_id, alert_id, draft).await?))
}

async fn delete_alert_handler(
    State(state): Shared,
    Path((recruiter_id, alert_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeleteResponse>, AppError> {
    let removed_matches = state.engine.registry.delete(recruiter_id, alert_id).await?;
    Ok(Json(DeleteResponse {
        deleted: true,
        removed_matches,
    }))
}

async fn toggle_alert_handler(
    State(state): Shared,
    Path((recruiter_id, alert_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<RadarAlert>, AppError> {
    Ok(Json(
        state
            .engine
            .registry
            .toggle(recruiter_id, alert_id, body.is_active)
            .await?,
    ))
}

async fn list_matches_handler(
    State(state): Shared,
    Path((recruiter_id, alert_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<Match>>, AppError> {
    Ok(Json(state.engine.registry.matches(recruiter_id, alert_id).await?))
}

async fn scan_alert_handler(
    State(state): Shared,
    Path((recruiter_id, alert_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<AlertScanResult>, AppError> {
    let alert = state.engine.registry.get(recruiter_id, alert_id).await?;
    Ok(Json(state.engine.matcher.scan_alert(&alert).await?))
}

async fn refresh_match_handler(
    State(state): Shared,
    Path((recruiter_id, alert_id, candidate_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<Json<Match>, AppError> {
    state.engine.registry.get(recruiter_id, alert_id).await?;
    state
        .engine
        .matcher
        .refresh_match(alert_id, candidate_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("match for candidate {candidate_id}")))
}

async fn talent_radar_opt_in_handler(
    State(state): Shared,
    Path(candidate_id): Path<Uuid>,
    Json(body): Json<OptInRequest>,
) -> Result<Json<CandidateRadarProfile>, AppError> {
    Ok(Json(
        state
            .engine
            .settings
            .set_talent_radar_opt_in(candidate_id, body.enabled)
            .await?,
    ))
}

async fn auto_apply_opt_in_handler(
    State(state): Shared,
    Path(candidate_id): Path<Uuid>,
    Json(body): Json<OptInRequest>,
) -> Result<Json<CandidateRadarProfile>, AppError> {
    Ok(Json(
        state
            .engine
            .settings
            .set_auto_apply_opt_in(candidate_id, body.enabled)
            .await?,
    ))
}

async fn auto_apply_history_handler(
    State(state): Shared,
    Path(candidate_id): Path<Uuid>,
) -> Result<Json<Vec<AutoApplyRecord>>, AppError> {
    Ok(Json(state.engine.settings.auto_apply_history(candidate_id).await?))
}

async fn scan_candidate_handler(
    State(state): Shared,
    Path(candidate_id): Path<Uuid>,
) -> Result<Json<CandidateScanResult>, AppError> {
    let candidate = state
        .engine
        .pool
        .get(candidate_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("candidate {candidate_id}")))?;
    Ok(Json(state.engine.auto_apply.scan_candidate(&candidate).await?))
}

async fn notifications_handler(
    State(state): Shared,
    Path(recipient_id): Path<Uuid>,
) -> Result<Json<Vec<Notification>>, AppError> {
    Ok(Json(state.engine.notifier.inbox(recipient_id).await?))
}

async fn scheduler_status_handler(State(state): Shared) -> Json<SchedulerStatus> {
    let scheduler = &state.engine.scheduler;
    Json(SchedulerStatus {
        state: scheduler.state().await,
        last_run: scheduler.last_run().await,
    })
}

async fn scheduler_run_handler(State(state): Shared) -> Result<Json<RunSummary>, AppError> {
    match state.engine.scheduler.tick().await {
        TickOutcome::Ran(summary) => Ok(Json(summary)),
        TickOutcome::Skipped => Err(AppError::Conflict("a scan run is already in progress".to_string())),
    }
}
