//! Process entry point: configuration, connection pools, the Settlement
//! Worker, and the HTTP server — `SPEC_FULL.md` §4.11.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

use sri_facturacion::config::Config;
use sri_facturacion::db;
use sri_facturacion::http::auth::JwtVerifier;
use sri_facturacion::http::state::AppState;
use sri_facturacion::http::{self, handlers};
use sri_facturacion::notifier::Notifier;
use sri_facturacion::settlement::worker::{SettlementEndpoints, SettlementWorker};
use sri_facturacion::storage::{ArtifactStore, StorageConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_filter.clone()))
        .json()
        .init();

    handlers::health::mark_start();

    let pool = db::connect(&config.database_url)
        .await
        .context("connecting to the database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running database migrations")?;

    let storage_config = StorageConfig {
        endpoint: format!("{}:{}", config.minio_endpoint, config.minio_port),
        use_ssl: config.minio_use_ssl,
        access_key: config.minio_root_user.clone(),
        secret_key: config.minio_root_password.clone(),
        region: "us-east-1".to_string(),
    };
    let storage = ArtifactStore::connect(&storage_config)
        .await
        .context("connecting to object storage")?;

    let http_client = reqwest::Client::builder()
        .build()
        .context("building the shared http client")?;

    let jwt_verifier = JwtVerifier::new(
        http_client.clone(),
        config.identity_provider_jwks_url.clone(),
        config.identity_provider_issuer.clone(),
    );

    let notifier = Notifier::new(http_client.clone(), config.webhook_notificaciones.clone());

    let settlement_endpoints = SettlementEndpoints {
        pruebas_recepcion: config.sri_pruebas_recepcion_url.clone(),
        pruebas_autorizacion: config.sri_pruebas_autorizacion_url.clone(),
        produccion_recepcion: config.sri_produccion_recepcion_url.clone(),
        produccion_autorizacion: config.sri_produccion_autorizacion_url.clone(),
    };
    let worker = SettlementWorker::new(
        pool.clone(),
        storage.clone(),
        http_client.clone(),
        notifier.clone(),
        settlement_endpoints,
    );
    let worker_handles = worker.spawn();

    let port = config.port;
    let state = Arc::new(AppState {
        pool,
        storage,
        http_client,
        notifier,
        jwt_verifier,
        config,
    });

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding to port {port}"))?;
    tracing::info!(port, "sri-facturacion listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    for handle in worker_handles {
        handle.abort();
    }

    Ok(())
}

async fn shutdown_signal() {
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => tracing::debug!("received SIGINT"),
        _ = sigterm.recv() => tracing::debug!("received SIGTERM"),
    }
    tracing::info!("shutting down");
}
