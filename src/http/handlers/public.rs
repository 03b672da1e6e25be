//! `GET /public/pdf/:clave`, `GET /public/xml/:clave` — unauthenticated
//! document retrieval by access key, `spec.md` §6.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;

use crate::db::issuance_repo;
use crate::error::{AppError, AppResult};
use crate::http::state::SharedState;

fn validate_clave(clave: &str) -> AppResult<()> {
    if clave.len() != 49 || !clave.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(
            "clave_acceso must be exactly 49 digits".into(),
        ));
    }
    Ok(())
}

fn split_path(path: &str) -> AppResult<(&str, &str)> {
    path.split_once('/')
        .ok_or_else(|| AppError::Internal(format!("malformed stored path '{path}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_49_digit_clave() {
        assert!(validate_clave(&"1".repeat(49)).is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(validate_clave(&"1".repeat(48)).is_err());
    }

    #[test]
    fn rejects_non_digit_characters() {
        let mut clave = "1".repeat(48);
        clave.push('a');
        assert!(validate_clave(&clave).is_err());
    }

    #[test]
    fn splits_bucket_and_key() {
        let (bucket, key) = split_path("invoices/signed/1790011674001/1.xml").unwrap();
        assert_eq!(bucket, "invoices");
        assert_eq!(key, "signed/1790011674001/1.xml");
    }

    #[test]
    fn rejects_path_without_separator() {
        assert!(split_path("no-bucket-separator").is_err());
    }
}

pub async fn pdf(
    State(state): State<SharedState>,
    Path(clave): Path<String>,
) -> AppResult<impl IntoResponse> {
    validate_clave(&clave)?;
    let invoice = issuance_repo::find_by_clave_acceso(&state.pool, &clave).await?;
    let path = invoice
        .pdf_path
        .ok_or_else(|| AppError::NotFound("invoice has no pdf yet".into()))?;
    let (bucket, key) = split_path(&path)?;
    let bytes = state
        .storage
        .get(bucket, key)
        .await
        .map_err(|e| AppError::Internal(format!("could not read pdf: {e}")))?;

    Ok(([(header::CONTENT_TYPE, "application/pdf")], bytes))
}

pub async fn xml(
    State(state): State<SharedState>,
    Path(clave): Path<String>,
) -> AppResult<impl IntoResponse> {
    validate_clave(&clave)?;
    let invoice = issuance_repo::find_by_clave_acceso(&state.pool, &clave).await?;

    let path = invoice
        .xml_path
        .ok_or_else(|| AppError::NotFound("invoice has no xml yet".into()))?;
    let (bucket, key) = split_path(&path)?;
    let bytes = state
        .storage
        .get(bucket, key)
        .await
        .map_err(|e| AppError::Internal(format!("could not read xml: {e}")))?;

    Ok(([(header::CONTENT_TYPE, "application/xml")], bytes))
}
