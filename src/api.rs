//! Local control API: health, stats, manual cleanup, config inspection.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::config::ConfigHandle;
use crate::media::store;
use crate::stats::{Stats, StatsSnapshot};

pub struct AppState {
    pub stats: Arc<Stats>,
    pub config: ConfigHandle,
    pub api_token: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize, Default)]
pub struct CleanupRequest {
    #[serde(default)]
    pub hours: Option<u64>,
}

#[derive(Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed: usize,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

async fn show_config(State(state): State<Arc<AppState>>) -> Json<crate::config::HandlerConfig> {
    Json(state.config.handler())
}

async fn cleanup(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CleanupRequest>>,
) -> Result<Json<CleanupResponse>, (StatusCode, String)> {
    let cfg = state.config.handler();
    let max_age = body
        .and_then(|Json(req)| req.hours)
        .map(|h| std::time::Duration::from_secs(h * 3600))
        .unwrap_or_else(|| cfg.max_temp_age());

    let removed = store::evict(&cfg.temp_dir_path(), max_age)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(CleanupResponse { removed }))
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.api_token {
        let auth = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        match auth {
            Some(val) if val.starts_with("Bearer ") && &val[7..] == expected.as_str() => {}
            _ => return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
        }
    }
    next.run(request).await
}

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/config", get(show_config))
        .route("/api/v1/cleanup", post(cleanup))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}
