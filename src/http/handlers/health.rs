//! `GET /health` — `spec.md` §6.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::http::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    timestamp: chrono::DateTime<chrono::Utc>,
}

static STARTED_AT: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

pub fn mark_start() {
    STARTED_AT.get_or_init(std::time::Instant::now);
}

/// Liveness check. Touches the database pool so a broken connection shows
/// up as a non-2xx rather than a false "ok".
pub async fn health(State(state): State<SharedState>) -> Result<Json<HealthResponse>, crate::error::AppError> {
    sqlx::query("SELECT 1").execute(&state.pool).await?;

    let started = STARTED_AT.get_or_init(std::time::Instant::now);
    Ok(Json(HealthResponse {
        status: "ok",
        uptime_seconds: started.elapsed().as_secs(),
        timestamp: chrono::Utc::now(),
    }))
}
