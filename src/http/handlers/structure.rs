//! `/structure/establishments`, `/structure/issuing-points`,
//! `/structure/tree`, `/structure/validate` — `spec.md` §6.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::db::accounts_repo;
use crate::domain::{EmissionPoint, Establishment};
use crate::error::AppResult;
use crate::http::auth::{resolve_issuer_for_caller, CallerIdentity};
use crate::http::state::SharedState;

pub async fn list_establishments(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
) -> AppResult<Json<Vec<Establishment>>> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;
    let establishments = accounts_repo::list_establishments(&state.pool, issuer.id).await?;
    Ok(Json(establishments))
}

#[derive(Deserialize)]
pub struct CreateEstablishmentRequest {
    pub codigo: String,
    pub direccion: Option<String>,
}

pub async fn create_establishment(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(req): Json<CreateEstablishmentRequest>,
) -> AppResult<Json<Establishment>> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;
    let establishment = accounts_repo::create_establishment(
        &state.pool,
        issuer.id,
        &req.codigo,
        req.direccion.as_deref(),
    )
    .await?;
    Ok(Json(establishment))
}

#[derive(Deserialize)]
pub struct EmissionPointQuery {
    pub estab_codigo: String,
}

pub async fn list_emission_points(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
    Query(query): Query<EmissionPointQuery>,
) -> AppResult<Json<Vec<EmissionPoint>>> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;
    let points =
        accounts_repo::list_emission_points(&state.pool, issuer.id, &query.estab_codigo).await?;
    Ok(Json(points))
}

#[derive(Deserialize)]
pub struct CreateEmissionPointRequest {
    pub estab_codigo: String,
    pub codigo: String,
}

pub async fn create_emission_point(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(req): Json<CreateEmissionPointRequest>,
) -> AppResult<Json<EmissionPoint>> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;
    let point = accounts_repo::create_emission_point(
        &state.pool,
        issuer.id,
        &req.estab_codigo,
        &req.codigo,
    )
    .await?;
    Ok(Json(point))
}

#[derive(Serialize)]
pub struct EstablishmentNode {
    #[serde(flatten)]
    pub establishment: Establishment,
    pub emission_points: Vec<EmissionPoint>,
}

/// `GET /structure/tree` — the establishments nested with their emission
/// points, for a caller's onboarding screen in one round trip.
pub async fn tree(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
) -> AppResult<Json<Vec<EstablishmentNode>>> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;
    let establishments = accounts_repo::list_establishments(&state.pool, issuer.id).await?;

    let mut nodes = Vec::with_capacity(establishments.len());
    for establishment in establishments {
        let emission_points =
            accounts_repo::list_emission_points(&state.pool, issuer.id, &establishment.codigo)
                .await?;
        nodes.push(EstablishmentNode {
            establishment,
            emission_points,
        });
    }
    Ok(Json(nodes))
}

#[derive(Deserialize)]
pub struct ValidateRequest {
    pub estab_codigo: String,
    pub punto_codigo: String,
}

#[derive(Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
}

pub async fn validate(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(req): Json<ValidateRequest>,
) -> AppResult<Json<ValidateResponse>> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;
    let valid = accounts_repo::validate_point_exists(
        &state.pool,
        issuer.id,
        &req.estab_codigo,
        &req.punto_codigo,
    )
    .await?;
    Ok(Json(ValidateResponse { valid }))
}
