//! `POST /integrations/invoice`, `GET /integrations/status`,
//! `POST /integrations/validate` — `spec.md` §6, `apiKeyAuth`.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::db::{accounts_repo, issuance_repo};
use crate::domain::{Invoice, InvoiceInput};
use crate::error::AppResult;
use crate::http::auth::ApiKeyIssuer;
use crate::http::state::SharedState;
use crate::issuance::{self, IssueInvoiceDeps};

#[derive(Serialize)]
pub struct InvoiceResponse {
    pub invoice_id: uuid::Uuid,
    pub clave_acceso: String,
    pub xml_path: String,
    pub pdf_path: String,
    pub credits_remaining: i64,
}

pub async fn invoice(
    State(state): State<SharedState>,
    Extension(ApiKeyIssuer(issuer)): Extension<ApiKeyIssuer>,
    body: axum::body::Bytes,
) -> AppResult<Json<InvoiceResponse>> {
    let client_input_data: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| crate::error::AppError::Validation(format!("malformed JSON body: {e}")))?;
    let input: InvoiceInput = serde_json::from_value(client_input_data.clone())
        .map_err(|e| crate::error::AppError::Validation(format!("malformed invoice payload: {e}")))?;

    let deps = IssueInvoiceDeps {
        pool: &state.pool,
        storage: &state.storage,
        encryption_key: &state.config.encryption_key,
        tax_lenient: state.config.tax_lenient_unknown_tariff,
    };

    let result = issuance::issue_invoice(&deps, issuer.id, &input, client_input_data).await?;

    Ok(Json(InvoiceResponse {
        invoice_id: result.invoice_id,
        clave_acceso: result.clave_acceso,
        xml_path: result.xml_path,
        pdf_path: result.pdf_path,
        credits_remaining: result.credits_remaining,
    }))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub ruc: String,
    pub razon_social: String,
    pub credits_remaining: i64,
    pub recent_invoices: Vec<Invoice>,
}

pub async fn status(
    State(state): State<SharedState>,
    Extension(ApiKeyIssuer(issuer)): Extension<ApiKeyIssuer>,
) -> AppResult<Json<StatusResponse>> {
    let credits_remaining = accounts_repo::credit_balance(&state.pool, issuer.id).await?;
    let recent_invoices = issuance_repo::history(&state.pool, issuer.id, 20).await?;

    Ok(Json(StatusResponse {
        ruc: issuer.ruc,
        razon_social: issuer.razon_social,
        credits_remaining,
        recent_invoices,
    }))
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
    Extension(ApiKeyIssuer(issuer)): Extension<ApiKeyIssuer>,
    Json(req): Json<ValidateRequest>,
) -> AppResult<Json<ValidateResponse>> {
    let valid = accounts_repo::validate_point_exists(
        &state.pool,
        issuer.id,
        &req.estab_codigo,
        &req.punto_codigo,
    )
    .await?;
    Ok(Json(ValidateResponse { valid }))
}
