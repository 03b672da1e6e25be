//! Repository queries for caller profiles, issuer structure
//! (establishments/emission points), and API keys — the "peripheral"
//! collaborator surface `spec.md` §1 scopes out of the core pipeline but
//! §6 still requires as HTTP routes.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{ApiKey, CallerProfile, EmissionPoint, Establishment, Issuer};
use crate::error::{AppError, AppResult};

pub async fn find_or_create_caller_profile(
    pool: &PgPool,
    external_subject: &str,
    email: &str,
) -> AppResult<CallerProfile> {
    if let Some(existing) = sqlx::query_as::<_, CallerProfile>(
        "SELECT * FROM caller_profiles WHERE external_subject = $1",
    )
    .bind(external_subject)
    .fetch_optional(pool)
    .await?
    {
        return Ok(existing);
    }

    sqlx::query_as::<_, CallerProfile>(
        "INSERT INTO caller_profiles (id, external_subject, email, created_at) \
         VALUES ($1, $2, $3, now()) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(external_subject)
    .bind(email)
    .fetch_one(pool)
    .await
    .map_err(Into::into)
}

pub async fn find_caller_profile(pool: &PgPool, external_subject: &str) -> AppResult<CallerProfile> {
    sqlx::query_as::<_, CallerProfile>("SELECT * FROM caller_profiles WHERE external_subject = $1")
        .bind(external_subject)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("caller profile not found".into()))
}

/// `/auth/activar-ruc`: creates the Issuer, a default `001` establishment,
/// a default `100` emission point, seeds the credit ledger, and links the
/// caller profile — all within one transaction.
pub async fn activate_ruc(
    pool: &PgPool,
    caller_profile_id: Uuid,
    ruc: &str,
    razon_social: &str,
    direccion_matriz: &str,
    seed_credits: i64,
) -> AppResult<Issuer> {
    let mut tx = pool.begin().await?;

    let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM issuers WHERE ruc = $1")
        .bind(ruc)
        .fetch_optional(&mut *tx)
        .await?;
    if existing.is_some() {
        return Err(AppError::Conflict(format!("RUC {ruc} already registered")));
    }

    let issuer = sqlx::query_as::<_, Issuer>(
        "INSERT INTO issuers (id, ruc, razon_social, direccion_matriz, ambiente, obligado_contabilidad, created_at) \
         VALUES ($1, $2, $3, $4, 1, 'NO', now()) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(ruc)
    .bind(razon_social)
    .bind(direccion_matriz)
    .fetch_one(&mut *tx)
    .await?;

    let establishment_id: Uuid = sqlx::query_scalar(
        "INSERT INTO establishments (id, issuer_id, codigo, direccion, created_at) \
         VALUES ($1, $2, '001', $3, now()) RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(issuer.id)
    .bind(direccion_matriz)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO emission_points (id, establishment_id, codigo, secuencial_actual, created_at) \
         VALUES ($1, $2, '100', 0, now())",
    )
    .bind(Uuid::new_v4())
    .bind(establishment_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO credit_ledger (issuer_id, balance, updated_at) VALUES ($1, $2, now())")
        .bind(issuer.id)
        .bind(seed_credits)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE caller_profiles SET issuer_id = $2, onboarded_at = now() WHERE id = $1")
        .bind(caller_profile_id)
        .bind(issuer.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(issuer)
}

pub async fn list_establishments(pool: &PgPool, issuer_id: Uuid) -> AppResult<Vec<Establishment>> {
    sqlx::query_as::<_, Establishment>(
        "SELECT * FROM establishments WHERE issuer_id = $1 ORDER BY codigo",
    )
    .bind(issuer_id)
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}

pub async fn create_establishment(
    pool: &PgPool,
    issuer_id: Uuid,
    codigo: &str,
    direccion: Option<&str>,
) -> AppResult<Establishment> {
    sqlx::query_as::<_, Establishment>(
        "INSERT INTO establishments (id, issuer_id, codigo, direccion, created_at) \
         VALUES ($1, $2, $3, $4, now()) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(issuer_id)
    .bind(codigo)
    .bind(direccion)
    .fetch_one(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(format!("establishment {codigo} already exists"))
        }
        other => other.into(),
    })
}

pub async fn list_emission_points(
    pool: &PgPool,
    issuer_id: Uuid,
    establishment_codigo: &str,
) -> AppResult<Vec<EmissionPoint>> {
    sqlx::query_as::<_, EmissionPoint>(
        r#"
        SELECT ep.* FROM emission_points ep
        JOIN establishments e ON e.id = ep.establishment_id
        WHERE e.issuer_id = $1 AND e.codigo = $2
        ORDER BY ep.codigo
        "#,
    )
    .bind(issuer_id)
    .bind(establishment_codigo)
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}

pub async fn create_emission_point(
    pool: &PgPool,
    issuer_id: Uuid,
    establishment_codigo: &str,
    codigo: &str,
) -> AppResult<EmissionPoint> {
    let establishment_id: Uuid = sqlx::query_scalar(
        "SELECT id FROM establishments WHERE issuer_id = $1 AND codigo = $2",
    )
    .bind(issuer_id)
    .bind(establishment_codigo)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("establishment {establishment_codigo} not found")))?;

    sqlx::query_as::<_, EmissionPoint>(
        "INSERT INTO emission_points (id, establishment_id, codigo, secuencial_actual, created_at) \
         VALUES ($1, $2, $3, 0, now()) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(establishment_id)
    .bind(codigo)
    .fetch_one(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(format!("emission point {codigo} already exists"))
        }
        other => other.into(),
    })
}

pub async fn validate_point_exists(
    pool: &PgPool,
    issuer_id: Uuid,
    estab_codigo: &str,
    punto_codigo: &str,
) -> AppResult<bool> {
    let found: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT ep.id FROM emission_points ep
        JOIN establishments e ON e.id = ep.establishment_id
        WHERE e.issuer_id = $1 AND e.codigo = $2 AND ep.codigo = $3
        "#,
    )
    .bind(issuer_id)
    .bind(estab_codigo)
    .bind(punto_codigo)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

pub async fn list_api_keys(pool: &PgPool, issuer_id: Uuid) -> AppResult<Vec<ApiKey>> {
    sqlx::query_as::<_, ApiKey>(
        "SELECT * FROM api_keys WHERE issuer_id = $1 ORDER BY created_at DESC",
    )
    .bind(issuer_id)
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}

pub async fn create_api_key(
    pool: &PgPool,
    issuer_id: Uuid,
    key_hash: &str,
    key_prefix: &str,
    name: &str,
) -> AppResult<ApiKey> {
    sqlx::query_as::<_, ApiKey>(
        "INSERT INTO api_keys (id, issuer_id, key_hash, key_prefix, name, revoked, created_at) \
         VALUES ($1, $2, $3, $4, $5, false, now()) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(issuer_id)
    .bind(key_hash)
    .bind(key_prefix)
    .bind(name)
    .fetch_one(pool)
    .await
    .map_err(Into::into)
}

pub async fn revoke_api_key(pool: &PgPool, issuer_id: Uuid, key_id: Uuid) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE api_keys SET revoked = true WHERE id = $1 AND issuer_id = $2",
    )
    .bind(key_id)
    .bind(issuer_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("api key not found".into()));
    }
    Ok(())
}

/// Looks up an issuer by the SHA-256 hex digest of a presented API key,
/// refusing revoked keys, and stamps `last_used_at`.
pub async fn find_issuer_by_api_key_hash(pool: &PgPool, key_hash: &str) -> AppResult<Issuer> {
    let issuer_id: Uuid = sqlx::query_scalar(
        "UPDATE api_keys SET last_used_at = now() \
         WHERE key_hash = $1 AND revoked = false \
         RETURNING issuer_id",
    )
    .bind(key_hash)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::Auth("invalid or revoked api key".into()))?;

    super::issuance_repo::find_issuer(pool, issuer_id).await
}

/// Stores the object-store path of a validated PKCS#12 blob, its
/// at-rest-encrypted unlock password, and its expiration — `spec.md` §6,
/// `POST /emitter/upload-p12`.
pub async fn set_credential(
    pool: &PgPool,
    issuer_id: Uuid,
    p12_path: &str,
    encrypted_p12_password: &str,
    p12_expiration: chrono::DateTime<Utc>,
) -> AppResult<Issuer> {
    sqlx::query_as::<_, Issuer>(
        "UPDATE issuers SET p12_path = $2, encrypted_p12_password = $3, p12_expiration = $4 \
         WHERE id = $1 RETURNING *",
    )
    .bind(issuer_id)
    .bind(p12_path)
    .bind(encrypted_p12_password)
    .bind(p12_expiration)
    .fetch_one(pool)
    .await
    .map_err(Into::into)
}

/// Updates the mutable profile fields — `spec.md` §6, `PATCH /emitter/config`.
pub async fn update_config(
    pool: &PgPool,
    issuer_id: Uuid,
    ambiente: Option<crate::domain::Ambiente>,
    razon_social: Option<&str>,
    direccion_matriz: Option<&str>,
) -> AppResult<Issuer> {
    let current = sqlx::query_as::<_, Issuer>("SELECT * FROM issuers WHERE id = $1")
        .bind(issuer_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("issuer {issuer_id} not found")))?;

    sqlx::query_as::<_, Issuer>(
        "UPDATE issuers SET ambiente = $2, razon_social = $3, direccion_matriz = $4 \
         WHERE id = $1 RETURNING *",
    )
    .bind(issuer_id)
    .bind(ambiente.unwrap_or(current.ambiente).code())
    .bind(razon_social.unwrap_or(&current.razon_social))
    .bind(direccion_matriz.unwrap_or(&current.direccion_matriz))
    .fetch_one(pool)
    .await
    .map_err(Into::into)
}

pub async fn find_issuer_by_ruc(pool: &PgPool, ruc: &str) -> AppResult<Issuer> {
    sqlx::query_as::<_, Issuer>("SELECT * FROM issuers WHERE ruc = $1")
        .bind(ruc)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("issuer with RUC {ruc} not found")))
}

pub async fn credit_balance(pool: &PgPool, issuer_id: Uuid) -> AppResult<i64> {
    sqlx::query_scalar("SELECT balance FROM credit_ledger WHERE issuer_id = $1")
        .bind(issuer_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("credit ledger not found".into()))
}

pub async fn topup_credits(
    pool: &PgPool,
    issuer_id: Uuid,
    delta: i64,
    reason: &str,
    actor: &str,
) -> AppResult<i64> {
    let mut tx = pool.begin().await?;
    let balance =
        super::issuance_repo::apply_credit_delta(&mut tx, issuer_id, delta, reason, actor).await?;
    tx.commit().await?;
    Ok(balance)
}
