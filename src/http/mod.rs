//! HTTP surface: router assembly and the per-scheme auth middleware,
//! `spec.md` §6.

pub mod auth;
pub mod handlers;
pub mod state;

use axum::middleware;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use self::state::SharedState;

/// Builds the full router. Route groups are layered with the auth
/// middleware matching their scheme in `spec.md` §6's route table:
/// `bearerAuth` for caller-facing routes, `apiKeyAuth` for
/// `/integrations/*`, `n8nKeyAuth` for `/admin/*`. `/health` and
/// `/public/*` are unauthenticated.
pub fn router(state: SharedState) -> Router {
    let bearer_routes = Router::new()
        .route("/auth/sync", post(handlers::auth::sync))
        .route("/auth/activar-ruc", post(handlers::auth::activar_ruc))
        .route("/emitter/profile", get(handlers::emitter::profile))
        .route("/emitter/upload-p12", post(handlers::emitter::upload_p12))
        .route("/emitter/config", patch(handlers::emitter::update_config))
        .route(
            "/structure/establishments",
            get(handlers::structure::list_establishments).post(handlers::structure::create_establishment),
        )
        .route(
            "/structure/issuing-points",
            get(handlers::structure::list_emission_points).post(handlers::structure::create_emission_point),
        )
        .route("/structure/tree", get(handlers::structure::tree))
        .route("/structure/validate", post(handlers::structure::validate))
        .route("/invoices/emit", post(handlers::invoices::emit))
        .route("/invoices/history", get(handlers::invoices::history))
        .route("/keys", get(handlers::keys::list).post(handlers::keys::create))
        .route("/keys/{key_id}", delete(handlers::keys::revoke))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::bearer_auth));

    let api_key_routes = Router::new()
        .route("/integrations/invoice", post(handlers::integrations::invoice))
        .route("/integrations/status", get(handlers::integrations::status))
        .route("/integrations/validate", post(handlers::integrations::validate))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::api_key_auth));

    let admin_routes = Router::new()
        .route("/admin/topup", post(handlers::admin::topup))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::n8n_key_auth));

    let public_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/public/pdf/{clave}", get(handlers::public::pdf))
        .route("/public/xml/{clave}", get(handlers::public::xml));

    Router::new()
        .merge(bearer_routes)
        .merge(api_key_routes)
        .merge(admin_routes)
        .merge(public_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
