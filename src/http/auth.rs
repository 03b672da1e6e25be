//! Auth middleware for the three schemes in `spec.md` §6: `bearerAuth`
//! (external identity-provider JWT), `apiKeyAuth` (`x-api-key` →
//! SHA-256 → `api_keys` lookup), `n8nKeyAuth` (static shared secret).
//!
//! This service verifies identity-provider tokens; it never issues them
//! (`spec.md` §1, Non-goals).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::db::accounts_repo;
use crate::domain::Issuer;
use crate::error::AppError;
use crate::http::state::SharedState;

/// JWKS cache TTL — re-fetched lazily once stale rather than on every
/// request, matching the usual "cache with a refresh window" shape for
/// an identity provider's rotating signing keys.
const JWKS_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
}

/// The authenticated caller, attached to request extensions by
/// [`bearer_auth`] for downstream handlers to read via
/// `Extension<CallerIdentity>`.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub external_subject: String,
    pub email: String,
}

/// The issuer resolved from a validated API key, attached by
/// [`api_key_auth`].
#[derive(Debug, Clone)]
pub struct ApiKeyIssuer(pub Issuer);

struct CachedJwks {
    jwks: JwkSet,
    fetched_at: DateTime<Utc>,
}

/// Verifies bearer tokens against the identity provider's JWKS, caching
/// the key set for [`JWKS_CACHE_TTL`] between fetches.
pub struct JwtVerifier {
    client: reqwest::Client,
    jwks_url: String,
    issuer: String,
    cache: RwLock<Option<CachedJwks>>,
}

impl JwtVerifier {
    pub fn new(client: reqwest::Client, jwks_url: String, issuer: String) -> Self {
        Self {
            client,
            jwks_url,
            issuer,
            cache: RwLock::new(None),
        }
    }

    async fn jwks(&self) -> Result<JwkSet, AppError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if Utc::now() - cached.fetched_at < chrono::Duration::from_std(JWKS_CACHE_TTL).unwrap()
                {
                    return Ok(cached.jwks.clone());
                }
            }
        }

        let jwks: JwkSet = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("could not reach identity provider: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Auth(format!("malformed JWKS response: {e}")))?;

        let mut cache = self.cache.write().await;
        *cache = Some(CachedJwks {
            jwks: jwks.clone(),
            fetched_at: Utc::now(),
        });
        Ok(jwks)
    }

    /// Verifies `token`'s signature against the provider's current JWKS,
    /// its issuer claim, and expiry, returning the decoded claims.
    pub async fn verify(&self, token: &str) -> Result<IdentityClaims, AppError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AppError::Auth(format!("invalid token header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AppError::Auth("token is missing a key id".into()))?;

        let jwks = self.jwks().await?;
        let jwk = jwks
            .find(&kid)
            .ok_or_else(|| AppError::Auth("unknown signing key id".into()))?;

        let decoding_key = match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|e| AppError::Auth(format!("invalid signing key: {e}")))?,
            _ => return Err(AppError::Auth("unsupported signing key algorithm".into())),
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<IdentityClaims>(token, &decoding_key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => AppError::Auth("token expired".into()),
                _ => AppError::Auth(format!("invalid token: {e}")),
            }
        })?;

        Ok(data.claims)
    }
}

/// `bearerAuth` middleware: validates the `Authorization: Bearer <jwt>`
/// header and attaches a [`CallerIdentity`] extension.
pub async fn bearer_auth(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req)?;
    let claims = state.jwt_verifier.verify(&token).await?;
    req.extensions_mut().insert(CallerIdentity {
        external_subject: claims.sub,
        email: claims.email.unwrap_or_default(),
    });
    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Result<String, AppError> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Auth("missing Authorization header".into()))?;
    header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| AppError::Auth("Authorization header must use the Bearer scheme".into()))
}

/// `apiKeyAuth` middleware: hashes the presented `x-api-key` header,
/// looks up the owning issuer, and attaches an [`ApiKeyIssuer`]
/// extension. Rejects revoked keys (403, per `spec.md` §7).
pub async fn api_key_auth(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let raw = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Auth("missing x-api-key header".into()))?
        .to_string();

    let hash = crate::domain::hash_api_key(&raw);
    let issuer = accounts_repo::find_issuer_by_api_key_hash(&state.pool, &hash).await?;
    req.extensions_mut().insert(ApiKeyIssuer(issuer));
    Ok(next.run(req).await)
}

/// `n8nKeyAuth` middleware: constant-time comparison against the
/// configured static shared secret.
pub async fn n8n_key_auth(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = req
        .headers()
        .get("x-n8n-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Auth("missing x-n8n-key header".into()))?;

    if !constant_time_eq(presented.as_bytes(), state.config.n8n_api_key.as_bytes()) {
        return Err(AppError::Auth("service key mismatch".into()));
    }
    Ok(next.run(req).await)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        let digest_a = Sha256::digest(a);
        let digest_b = Sha256::digest(b);
        let _ = digest_a == digest_b;
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_slices() {
        assert!(constant_time_eq(b"secret-key", b"secret-key"));
    }

    #[test]
    fn constant_time_eq_rejects_different_slices() {
        assert!(!constant_time_eq(b"secret-key", b"secret-kex"));
    }

    #[test]
    fn constant_time_eq_rejects_different_lengths() {
        assert!(!constant_time_eq(b"short", b"much-longer-value"));
    }
}

/// Resolves the caller's issuer from the [`CallerIdentity`] attached by
/// [`bearer_auth`]. 404s if the caller hasn't run `/auth/activar-ruc` yet.
pub async fn resolve_issuer_for_caller(
    state: &Arc<super::state::AppState>,
    identity: &CallerIdentity,
) -> Result<Issuer, AppError> {
    let profile = accounts_repo::find_caller_profile(&state.pool, &identity.external_subject).await?;
    let issuer_id = profile
        .issuer_id
        .ok_or_else(|| AppError::NotFound("caller has not activated a RUC yet".into()))?;
    crate::db::issuance_repo::find_issuer(&state.pool, issuer_id).await
}
