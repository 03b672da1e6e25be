//! `/auth/sync`, `/auth/activar-ruc` — `spec.md` §6.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::db::accounts_repo;
use crate::error::AppResult;
use crate::http::auth::CallerIdentity;
use crate::http::state::SharedState;

/// Seed credits granted to a freshly activated RUC.
const ACTIVATION_SEED_CREDITS: i64 = 100;

#[derive(Serialize)]
pub struct SyncResponse {
    pub caller_profile_id: uuid::Uuid,
    pub onboarding_needed: bool,
}

/// Creates or finds the caller's profile and reports whether
/// `/auth/activar-ruc` still needs to be called.
pub async fn sync(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
) -> AppResult<Json<SyncResponse>> {
    let profile =
        accounts_repo::find_or_create_caller_profile(&state.pool, &identity.external_subject, &identity.email)
            .await?;

    Ok(Json(SyncResponse {
        caller_profile_id: profile.id,
        onboarding_needed: profile.issuer_id.is_none(),
    }))
}

#[derive(Deserialize)]
pub struct ActivarRucRequest {
    pub ruc: String,
    pub razon_social: String,
    pub direccion_matriz: String,
}

#[derive(Serialize)]
pub struct ActivarRucResponse {
    pub issuer_id: uuid::Uuid,
    pub ruc: String,
    pub establecimiento: &'static str,
    pub punto_emision: &'static str,
    pub credits: i64,
}

/// Creates the Issuer, a default `001` establishment, a default `100`
/// emission point, and seeds the credit ledger — `spec.md` §6.
pub async fn activar_ruc(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(req): Json<ActivarRucRequest>,
) -> AppResult<Json<ActivarRucResponse>> {
    if req.ruc.len() != 13 || !req.ruc.chars().all(|c| c.is_ascii_digit()) {
        return Err(crate::error::AppError::Validation(
            "ruc must be exactly 13 digits".into(),
        ));
    }

    let profile =
        accounts_repo::find_caller_profile(&state.pool, &identity.external_subject).await?;

    let issuer = accounts_repo::activate_ruc(
        &state.pool,
        profile.id,
        &req.ruc,
        &req.razon_social,
        &req.direccion_matriz,
        ACTIVATION_SEED_CREDITS,
    )
    .await?;

    Ok(Json(ActivarRucResponse {
        issuer_id: issuer.id,
        ruc: issuer.ruc,
        establecimiento: "001",
        punto_emision: "100",
        credits: ACTIVATION_SEED_CREDITS,
    }))
}
