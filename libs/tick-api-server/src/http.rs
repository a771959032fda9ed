use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use tick_api::RateConfigPatch;

use super::AppState;

// ═══════════════════════════════════════════════════════════════
//  Config: GET/POST /api/config
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.config())
}

pub(crate) async fn handle_apply_config(
    State(state): State<AppState>,
    Json(patch): Json<RateConfigPatch>,
) -> impl IntoResponse {
    Json(state.engine.apply_config(&patch))
}

// ═══════════════════════════════════════════════════════════════
//  Stats: GET /api/stats, POST /api/stats/clear
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.stats())
}

pub(crate) async fn handle_clear_stats(State(state): State<AppState>) -> impl IntoResponse {
    state.engine.clear_stats();
    StatusCode::NO_CONTENT
}

pub(crate) async fn handle_health() -> &'static str {
    "OK"
}
