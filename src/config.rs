//! Typed configuration — `spec.md` §6, "Environment variables".
//!
//! Parsed with `clap`'s `env` feature, matching the pack's `x402-rs`
//! manifest (`clap = { features = ["derive", "env"] }`); `.env` is loaded
//! first via `dotenvy` in `main` so local development needs no exported
//! shell variables.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "sri-facturacion", about = "SRI electronic-invoicing backend")]
pub struct Config {
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "MINIO_ENDPOINT")]
    pub minio_endpoint: String,

    #[arg(long, env = "MINIO_PORT", default_value_t = 9000)]
    pub minio_port: u16,

    #[arg(long, env = "MINIO_USE_SSL", default_value_t = false)]
    pub minio_use_ssl: bool,

    #[arg(long, env = "MINIO_ROOT_USER")]
    pub minio_root_user: String,

    #[arg(long, env = "MINIO_ROOT_PASSWORD")]
    pub minio_root_password: String,

    /// Master secret credential passwords are encrypted against at rest
    /// (`spec.md` §4.1).
    #[arg(long, env = "ENCRYPTION_KEY")]
    pub encryption_key: String,

    #[arg(long, env = "WEB_HOOK_NOTIFICACIONES")]
    pub webhook_notificaciones: Option<String>,

    #[arg(long, env = "N8N_API_KEY")]
    pub n8n_api_key: String,

    /// Identity-provider JWKS/issuer URL used to verify `bearerAuth`
    /// tokens. This service verifies tokens; it never issues them.
    #[arg(long, env = "IDENTITY_PROVIDER_JWKS_URL")]
    pub identity_provider_jwks_url: String,

    #[arg(long, env = "IDENTITY_PROVIDER_ISSUER")]
    pub identity_provider_issuer: String,

    #[arg(long, env = "SRI_AMBIENTE_PRUEBAS_RECEPCION_URL")]
    pub sri_pruebas_recepcion_url: String,

    #[arg(long, env = "SRI_AMBIENTE_PRUEBAS_AUTORIZACION_URL")]
    pub sri_pruebas_autorizacion_url: String,

    #[arg(long, env = "SRI_AMBIENTE_PRODUCCION_RECEPCION_URL")]
    pub sri_produccion_recepcion_url: String,

    #[arg(long, env = "SRI_AMBIENTE_PRODUCCION_AUTORIZACION_URL")]
    pub sri_produccion_autorizacion_url: String,

    /// `false` is a hard error on an unknown IVA tariff; `true` degrades
    /// to the 0% row. See `spec.md` §9, "Unknown IVA tariff fallback".
    #[arg(long, env = "TAX_LENIENT_UNKNOWN_TARIFF", default_value_t = false)]
    pub tax_lenient_unknown_tariff: bool,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Config {
    pub fn load() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Ok(Config::parse())
    }

    pub fn sri_recepcion_url(&self, ambiente: crate::domain::Ambiente) -> &str {
        match ambiente {
            crate::domain::Ambiente::Pruebas => &self.sri_pruebas_recepcion_url,
            crate::domain::Ambiente::Produccion => &self.sri_produccion_recepcion_url,
        }
    }

    pub fn sri_autorizacion_url(&self, ambiente: crate::domain::Ambiente) -> &str {
        match ambiente {
            crate::domain::Ambiente::Pruebas => &self.sri_pruebas_autorizacion_url,
            crate::domain::Ambiente::Produccion => &self.sri_produccion_autorizacion_url,
        }
    }
}
