//! `POST /invoices/emit`, `GET /invoices/history` — `spec.md` §6.
//!
//! This deployment runs the issuance pipeline synchronously, end to end,
//! inside the request (`spec.md` §9, "Dual issuance paths" — eager
//! policy). There is no separate enqueue-then-poll path.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::db::issuance_repo;
use crate::domain::{Invoice, InvoiceInput};
use crate::error::AppResult;
use crate::http::auth::{resolve_issuer_for_caller, CallerIdentity};
use crate::http::state::SharedState;
use crate::issuance::{self, IssueInvoiceDeps};

#[derive(Serialize)]
pub struct EmitResponse {
    pub invoice_id: uuid::Uuid,
    pub clave_acceso: String,
    pub xml_path: String,
    pub pdf_path: String,
    pub credits_remaining: i64,
}

pub async fn emit(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
    body: axum::body::Bytes,
) -> AppResult<Json<EmitResponse>> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;

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

    Ok(Json(EmitResponse {
        invoice_id: result.invoice_id,
        clave_acceso: result.clave_acceso,
        xml_path: result.xml_path,
        pdf_path: result.pdf_path,
        credits_remaining: result.credits_remaining,
    }))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

pub async fn history(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<Invoice>>> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;
    let invoices = issuance_repo::history(&state.pool, issuer.id, query.limit.min(50)).await?;
    Ok(Json(invoices))
}
