//! HTTP control surface.
//!
//! Thin axum front over `SupervisorHandle`; every mutation goes through the
//! supervisor task so it is serialized with loop start/stop.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::config::SettingsUpdate;
use crate::error::ControlError;
use crate::watch::{LoopState, LoopStatus, Platform, SettingsApplied, SupervisorHandle, WatchedAccount};

#[derive(Clone)]
pub struct AppState {
    pub supervisor: SupervisorHandle,
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/status", get(status))
        .route("/watch/{platform}/start", post(start_watch))
        .route("/watch/{platform}/stop", post(stop_watch))
        .route("/accounts", post(add_account))
        .route("/recipients", post(add_recipient))
        .route("/settings", patch(update_settings))
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControlError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ControlError::PlatformUnavailable(_)
            | ControlError::DuplicateAccount { .. }
            | ControlError::DuplicateRecipient(_) => StatusCode::CONFLICT,
            ControlError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ControlError::SupervisorGone => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
struct WatchResp {
    platform: Platform,
    state: LoopState,
}

#[derive(Deserialize)]
struct AccountReq {
    username: String,
    platform: String,
}

#[derive(Deserialize)]
struct RecipientReq {
    address: String,
}

fn parse_platform(raw: &str) -> Result<Platform, ControlError> {
    raw.parse().map_err(ControlError::InvalidInput)
}

async fn status(State(state): State<AppState>) -> Result<Json<Vec<LoopStatus>>, ControlError> {
    Ok(Json(state.supervisor.status().await?))
}

async fn start_watch(
    State(state): State<AppState>,
    Path(platform): Path<String>,
) -> Result<Json<WatchResp>, ControlError> {
    let platform = parse_platform(&platform)?;
    let loop_state = state.supervisor.start_watch(platform).await?;
    Ok(Json(WatchResp {
        platform,
        state: loop_state,
    }))
}

async fn stop_watch(
    State(state): State<AppState>,
    Path(platform): Path<String>,
) -> Result<Json<WatchResp>, ControlError> {
    let platform = parse_platform(&platform)?;
    let loop_state = state.supervisor.stop_watch(platform).await?;
    Ok(Json(WatchResp {
        platform,
        state: loop_state,
    }))
}

async fn add_account(
    State(state): State<AppState>,
    Json(body): Json<AccountReq>,
) -> Result<(StatusCode, Json<WatchedAccount>), ControlError> {
    let account = WatchedAccount::new(body.username, parse_platform(&body.platform)?);
    state.supervisor.add_account(account.clone()).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn add_recipient(
    State(state): State<AppState>,
    Json(body): Json<RecipientReq>,
) -> Result<(StatusCode, Json<serde_json::Value>), ControlError> {
    let address = body.address.trim().to_string();
    state.supervisor.add_recipient(address.clone()).await?;
    Ok((StatusCode::CREATED, Json(json!({ "address": address }))))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<SettingsApplied>, ControlError> {
    Ok(Json(state.supervisor.update_settings(update).await?))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}
