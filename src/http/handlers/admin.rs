//! `POST /admin/topup` — `n8nKeyAuth`, `spec.md` §6.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::accounts_repo;
use crate::error::AppResult;
use crate::http::state::SharedState;

#[derive(Deserialize)]
pub struct TopupRequest {
    pub ruc: String,
    pub delta: i64,
    pub reason: String,
}

#[derive(Serialize)]
pub struct TopupResponse {
    pub issuer_id: Uuid,
    pub balance: i64,
}

pub async fn topup(
    State(state): State<SharedState>,
    Json(req): Json<TopupRequest>,
) -> AppResult<Json<TopupResponse>> {
    let issuer = accounts_repo::find_issuer_by_ruc(&state.pool, &req.ruc).await?;
    let balance =
        accounts_repo::topup_credits(&state.pool, issuer.id, req.delta, &req.reason, "n8n").await?;

    Ok(Json(TopupResponse {
        issuer_id: issuer.id,
        balance,
    }))
}
