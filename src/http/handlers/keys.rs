//! `GET/POST/DELETE /keys` — API-key lifecycle for `apiKeyAuth` callers,
//! `spec.md` §6.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::accounts_repo;
use crate::domain::{self, ApiKey};
use crate::error::AppResult;
use crate::http::auth::{resolve_issuer_for_caller, CallerIdentity};
use crate::http::state::SharedState;

#[derive(Serialize)]
pub struct ApiKeySummary {
    pub id: Uuid,
    pub key_prefix: String,
    pub name: String,
    pub revoked: bool,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<ApiKey> for ApiKeySummary {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            key_prefix: key.key_prefix,
            name: key.name,
            revoked: key.revoked,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
        }
    }
}

pub async fn list(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
) -> AppResult<Json<Vec<ApiKeySummary>>> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;
    let keys = accounts_repo::list_api_keys(&state.pool, issuer.id).await?;
    Ok(Json(keys.into_iter().map(ApiKeySummary::from).collect()))
}

#[derive(Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
}

#[derive(Serialize)]
pub struct CreateApiKeyResponse {
    /// Shown exactly once; the server never stores this value.
    pub api_key: String,
    #[serde(flatten)]
    pub summary: ApiKeySummary,
}

pub async fn create(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(req): Json<CreateApiKeyRequest>,
) -> AppResult<Json<CreateApiKeyResponse>> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;
    let generated = domain::generate_api_key();

    let key = accounts_repo::create_api_key(
        &state.pool,
        issuer.id,
        &generated.hash,
        &generated.prefix,
        &req.name,
    )
    .await?;

    Ok(Json(CreateApiKeyResponse {
        api_key: generated.raw,
        summary: key.into(),
    }))
}

pub async fn revoke(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
    Path(key_id): Path<Uuid>,
) -> AppResult<axum::http::StatusCode> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;
    accounts_repo::revoke_api_key(&state.pool, issuer.id, key_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
