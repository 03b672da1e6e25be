use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// `(issuer_id, key_hash, key_prefix, name, revoked, last_used_at)`. Only
/// the SHA-256 hash of the raw key is ever stored — the raw key is shown to
/// the caller once, at creation time, and never again.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub issuer_id: Uuid,
    pub key_hash: String,
    pub key_prefix: String,
    pub name: String,
    pub revoked: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// `kp_live_<48 hex chars>` — `spec.md` §6, "API-key format".
const API_KEY_PREFIX: &str = "kp_live_";

/// A freshly minted raw key, shown to the caller exactly once.
pub struct GeneratedApiKey {
    pub raw: String,
    pub prefix: String,
    pub hash: String,
}

/// Generates a new raw API key and its SHA-256 hex digest. The prefix
/// stored alongside the hash is the first 12 characters of the raw key
/// (`kp_live_` plus 4 hex chars), enough to disambiguate keys for display
/// without reconstructing the secret.
pub fn generate_api_key() -> GeneratedApiKey {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    let raw = format!("{API_KEY_PREFIX}{}", hex::encode(bytes));
    let hash = hash_api_key(&raw);
    let prefix = raw.chars().take(12).collect();
    GeneratedApiKey { raw, prefix, hash }
}

/// SHA-256 hex digest of a raw API key, as stored in `key_hash`.
pub fn hash_api_key(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_has_expected_shape() {
        let generated = generate_api_key();
        assert!(generated.raw.starts_with(API_KEY_PREFIX));
        assert_eq!(generated.raw.len(), API_KEY_PREFIX.len() + 48);
        assert_eq!(generated.prefix.len(), 12);
        assert!(generated.raw.starts_with(&generated.prefix));
    }

    #[test]
    fn hash_is_deterministic_and_matches_generation() {
        let generated = generate_api_key();
        assert_eq!(hash_api_key(&generated.raw), generated.hash);
        assert_eq!(hash_api_key(&generated.raw), hash_api_key(&generated.raw));
    }

    #[test]
    fn distinct_keys_hash_differently() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a.raw, b.raw);
        assert_ne!(a.hash, b.hash);
    }
}
