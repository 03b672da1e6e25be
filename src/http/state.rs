//! Shared application state — the common `Arc<AppState>` axum pattern
//! (`SPEC_FULL.md` §4.11), threaded through every handler via
//! `axum::extract::State`.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::http::auth::JwtVerifier;
use crate::notifier::Notifier;
use crate::storage::ArtifactStore;

pub struct AppState {
    pub pool: PgPool,
    pub storage: ArtifactStore,
    pub http_client: reqwest::Client,
    pub notifier: Notifier,
    pub jwt_verifier: JwtVerifier,
    pub config: Config,
}

pub type SharedState = Arc<AppState>;
