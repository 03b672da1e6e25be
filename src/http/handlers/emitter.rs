//! `/emitter/profile`, `/emitter/upload-p12`, `/emitter/config` —
//! `spec.md` §6.

use axum::extract::{Multipart, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::credential_store;
use crate::db::accounts_repo;
use crate::domain::{Ambiente, Issuer};
use crate::error::{AppError, AppResult};
use crate::http::auth::{resolve_issuer_for_caller, CallerIdentity};
use crate::http::state::SharedState;
use crate::storage::layout;

#[derive(Serialize)]
pub struct ProfileResponse {
    pub id: uuid::Uuid,
    pub ruc: String,
    pub razon_social: String,
    pub direccion_matriz: String,
    pub ambiente: i16,
    pub obligado_contabilidad: String,
    pub has_credential: bool,
    pub p12_expiration: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Issuer> for ProfileResponse {
    fn from(issuer: Issuer) -> Self {
        Self {
            id: issuer.id,
            ruc: issuer.ruc,
            razon_social: issuer.razon_social,
            direccion_matriz: issuer.direccion_matriz,
            ambiente: issuer.ambiente.code(),
            obligado_contabilidad: issuer.obligado_contabilidad,
            has_credential: issuer.p12_path.is_some(),
            p12_expiration: issuer.p12_expiration,
        }
    }
}

pub async fn profile(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
) -> AppResult<Json<ProfileResponse>> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;
    Ok(Json(issuer.into()))
}

#[derive(Serialize)]
pub struct UploadP12Response {
    pub p12_path: String,
    pub p12_expiration: chrono::DateTime<chrono::Utc>,
}

/// Validates the uploaded PKCS#12 blob (certificate selection, key
/// pairing, tax-ID match, expiration), stores the blob in the
/// `certificates` bucket, and encrypts the unlock password at rest —
/// `spec.md` §4.1.
pub async fn upload_p12(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
    mut multipart: Multipart,
) -> AppResult<Json<UploadP12Response>> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;

    let mut p12_bytes: Option<Vec<u8>> = None;
    let mut password: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "p12" | "file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("could not read p12 field: {e}")))?;
                p12_bytes = Some(bytes.to_vec());
            }
            "password" => {
                password = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::Validation(format!("could not read password field: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let p12_bytes = p12_bytes.ok_or_else(|| AppError::Validation("missing p12 field".into()))?;
    let password = password.ok_or_else(|| AppError::Validation("missing password field".into()))?;

    let credential = credential_store::load_credential(&p12_bytes, &password)
        .map_err(|e| AppError::Credential(e.to_string()))?;
    credential_store::validate_for_issuer(&credential, &issuer.ruc, chrono::Utc::now())
        .map_err(|e| AppError::Credential(e.to_string()))?;

    let not_after = credential
        .certificate
        .not_after()
        .to_string();
    let p12_expiration = parse_asn1_not_after(&not_after)?;

    let key = layout::certificate_key(&issuer.ruc, chrono::Utc::now().timestamp());
    let path = state
        .storage
        .put(layout::BUCKET_CERTIFICATES, &key, p12_bytes, "application/x-pkcs12")
        .await
        .map_err(|e| AppError::Internal(format!("could not store certificate: {e}")))?;

    let encrypted_password =
        credential_store::encrypt_password(&password, &state.config.encryption_key)
            .map_err(|e| AppError::Internal(e.to_string()))?;

    let updated = accounts_repo::set_credential(
        &state.pool,
        issuer.id,
        &path,
        &encrypted_password,
        p12_expiration,
    )
    .await?;

    Ok(Json(UploadP12Response {
        p12_path: path,
        p12_expiration: updated
            .p12_expiration
            .unwrap_or(p12_expiration),
    }))
}

fn parse_asn1_not_after(s: &str) -> AppResult<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_str(&format!("{s} +0000"), "%b %e %T %Y %Z %z")
        .map(|d| d.with_timezone(&chrono::Utc))
        .map_err(|e| AppError::Internal(format!("could not parse certificate expiration: {e}")))
}

#[derive(Deserialize)]
pub struct UpdateConfigRequest {
    pub ambiente: Option<i16>,
    pub razon_social: Option<String>,
    pub direccion_matriz: Option<String>,
}

pub async fn update_config(
    State(state): State<SharedState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(req): Json<UpdateConfigRequest>,
) -> AppResult<Json<ProfileResponse>> {
    let issuer = resolve_issuer_for_caller(&state, &identity).await?;

    let ambiente = match req.ambiente {
        None => None,
        Some(code) => Some(
            Ambiente::from_code(code)
                .ok_or_else(|| AppError::Validation("ambiente must be 1 or 2".into()))?,
        ),
    };

    let updated = accounts_repo::update_config(
        &state.pool,
        issuer.id,
        ambiente,
        req.razon_social.as_deref(),
        req.direccion_matriz.as_deref(),
    )
    .await?;

    Ok(Json(updated.into()))
}
