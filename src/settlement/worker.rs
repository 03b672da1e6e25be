//! Settlement Worker — `spec.md` §4.7.
//!
//! Two `tokio::spawn` loops (`tokio::time::interval`, not an external cron
//! crate) drive the Submit (~20s) and Authorize (~60s) jobs. Each tick
//! tries to acquire an `Arc<tokio::sync::Mutex<()>>` via `try_lock`; if a
//! previous tick is still running, the new one is skipped rather than
//! queued — the idiomatic `tokio` answer to "cron-style but in-process"
//! `spec.md` §9 calls for.
//!
//! Row selection uses [`issuance_repo::claim_for_settlement`], which
//! atomically moves the selected rows into a transient claim state
//! (`ENVIANDO`/`AUTORIZANDO`) in the same statement as the `SELECT ...
//! FOR UPDATE SKIP LOCKED`. A bare `SELECT ... FOR UPDATE` releases its
//! row lock the moment the query completes, so the lock alone cannot
//! protect the SOAP round-trip that follows; the claim state is what
//! keeps a second tick or replica from double-picking a row still in
//! flight (`spec.md` §4.7, "Concurrency contract"). A row that fails to
//! settle is reverted back to its pre-claim state so the next tick
//! retries it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::db::issuance_repo;
use crate::domain::EstadoFactura;
use crate::notifier::{Notifier, TransitionEvent};
use crate::settlement::soap::{
    self, AuthorizationOutcome, ReceptionOutcome,
};
use crate::storage::{layout, ArtifactStore};

const SUBMIT_INTERVAL: Duration = Duration::from_secs(20);
const AUTHORIZE_INTERVAL: Duration = Duration::from_secs(60);
const BATCH_SIZE: i64 = 15;
const SOAP_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Clone)]
pub struct SettlementEndpoints {
    pub pruebas_recepcion: String,
    pub pruebas_autorizacion: String,
    pub produccion_recepcion: String,
    pub produccion_autorizacion: String,
}

impl SettlementEndpoints {
    fn recepcion(&self, ambiente: crate::domain::Ambiente) -> &str {
        match ambiente {
            crate::domain::Ambiente::Pruebas => &self.pruebas_recepcion,
            crate::domain::Ambiente::Produccion => &self.produccion_recepcion,
        }
    }

    fn autorizacion(&self, ambiente: crate::domain::Ambiente) -> &str {
        match ambiente {
            crate::domain::Ambiente::Pruebas => &self.pruebas_autorizacion,
            crate::domain::Ambiente::Produccion => &self.produccion_autorizacion,
        }
    }
}

#[derive(Clone)]
pub struct SettlementWorker {
    pool: PgPool,
    storage: ArtifactStore,
    http_client: reqwest::Client,
    notifier: Notifier,
    endpoints: SettlementEndpoints,
    submit_lock: Arc<Mutex<()>>,
    authorize_lock: Arc<Mutex<()>>,
}

impl SettlementWorker {
    pub fn new(
        pool: PgPool,
        storage: ArtifactStore,
        http_client: reqwest::Client,
        notifier: Notifier,
        endpoints: SettlementEndpoints,
    ) -> Self {
        Self {
            pool,
            storage,
            http_client,
            notifier,
            endpoints,
            submit_lock: Arc::new(Mutex::new(())),
            authorize_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Spawns the Submit and Authorize loops and returns their join
    /// handles for `main` to hold onto (or abort on shutdown).
    pub fn spawn(self) -> Vec<tokio::task::JoinHandle<()>> {
        let submit_worker = self.clone();
        let authorize_worker = self.clone();
        vec![
            tokio::spawn(async move { submit_worker.run_submit_loop().await }),
            tokio::spawn(async move { authorize_worker.run_authorize_loop().await }),
        ]
    }

    async fn run_submit_loop(&self) {
        let mut interval = tokio::time::interval(SUBMIT_INTERVAL);
        loop {
            interval.tick().await;
            let Ok(_guard) = self.submit_lock.try_lock() else {
                tracing::debug!("submit tick skipped, previous tick still running");
                continue;
            };
            if let Err(e) = self.submit_tick().await {
                tracing::warn!(error = %e, "submit tick failed");
            }
        }
    }

    async fn run_authorize_loop(&self) {
        let mut interval = tokio::time::interval(AUTHORIZE_INTERVAL);
        loop {
            interval.tick().await;
            let Ok(_guard) = self.authorize_lock.try_lock() else {
                tracing::debug!("authorize tick skipped, previous tick still running");
                continue;
            };
            if let Err(e) = self.authorize_tick().await {
                tracing::warn!(error = %e, "authorize tick failed");
            }
        }
    }

    async fn submit_tick(&self) -> crate::error::AppResult<()> {
        let invoices = issuance_repo::claim_for_settlement(
            &self.pool,
            EstadoFactura::Firmado,
            EstadoFactura::Enviando,
            BATCH_SIZE,
        )
        .await?;
        for invoice in invoices {
            if let Err(e) = self.submit_one(&invoice).await {
                tracing::warn!(invoice_id = %invoice.id, error = %e, "submit failed, reverting to FIRMADO for retry");
                if let Err(e) = issuance_repo::revert_claim(
                    &self.pool,
                    invoice.id,
                    EstadoFactura::Enviando,
                    EstadoFactura::Firmado,
                )
                .await
                {
                    tracing::warn!(invoice_id = %invoice.id, error = %e, "failed to revert claim");
                }
            }
        }
        Ok(())
    }

    async fn submit_one(&self, invoice: &crate::domain::Invoice) -> crate::error::AppResult<()> {
        let issuer = issuance_repo::find_issuer(&self.pool, invoice.emisor_id).await?;
        let xml_path = invoice
            .xml_path
            .as_deref()
            .ok_or_else(|| crate::error::AppError::Internal("firmado invoice missing xml_path".into()))?;
        let (bucket, key) = split_path(xml_path)?;
        let xml_bytes = self
            .storage
            .get(bucket, key)
            .await
            .map_err(|e| crate::error::AppError::Upstream(e.to_string()))?;

        let envelope = soap::build_reception_envelope(&xml_bytes);
        let response = self
            .http_client
            .post(self.endpoints.recepcion(issuer.ambiente))
            .timeout(SOAP_TIMEOUT)
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(envelope)
            .send()
            .await
            .map_err(|e| crate::error::AppError::Upstream(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| crate::error::AppError::Upstream(e.to_string()))?;

        match soap::parse_reception_response(&body) {
            Ok(ReceptionOutcome::Recibida) => {
                issuance_repo::mark_recibida(&self.pool, invoice.id, Utc::now()).await?;
            }
            Ok(ReceptionOutcome::Devuelta { mensajes }) => {
                issuance_repo::mark_devuelta(&self.pool, invoice.id, &mensajes).await?;
                self.notifier
                    .notify(TransitionEvent {
                        user_uid: issuer.ruc.clone(),
                        invoice_id: invoice.id,
                        clave_acceso: invoice.clave_acceso.clone(),
                        estado: EstadoFactura::Devuelta,
                        mensaje_sri: Some(mensajes),
                        fecha: Utc::now(),
                    })
                    .await;
            }
            Err(e) => {
                // Malformed response: propagate so the caller reverts the
                // claim back to FIRMADO and retries next tick.
                return Err(crate::error::AppError::Upstream(e.to_string()));
            }
        }
        Ok(())
    }

    async fn authorize_tick(&self) -> crate::error::AppResult<()> {
        let invoices = issuance_repo::claim_for_settlement(
            &self.pool,
            EstadoFactura::Recibida,
            EstadoFactura::Autorizando,
            BATCH_SIZE,
        )
        .await?;
        for invoice in invoices {
            if let Err(e) = self.authorize_one(&invoice).await {
                tracing::warn!(invoice_id = %invoice.id, error = %e, "authorize failed, reverting to RECIBIDA for retry");
                if let Err(e) = issuance_repo::revert_claim(
                    &self.pool,
                    invoice.id,
                    EstadoFactura::Autorizando,
                    EstadoFactura::Recibida,
                )
                .await
                {
                    tracing::warn!(invoice_id = %invoice.id, error = %e, "failed to revert claim");
                }
            }
        }
        Ok(())
    }

    async fn authorize_one(&self, invoice: &crate::domain::Invoice) -> crate::error::AppResult<()> {
        let issuer = issuance_repo::find_issuer(&self.pool, invoice.emisor_id).await?;

        let envelope = soap::build_authorization_envelope(&invoice.clave_acceso);
        let response = self
            .http_client
            .post(self.endpoints.autorizacion(issuer.ambiente))
            .timeout(SOAP_TIMEOUT)
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(envelope)
            .send()
            .await
            .map_err(|e| crate::error::AppError::Upstream(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| crate::error::AppError::Upstream(e.to_string()))?;

        match soap::parse_authorization_response(&body) {
            Ok(AuthorizationOutcome::Autorizado {
                authorized_xml,
                fecha_autorizacion,
            }) => {
                let key = layout::authorized_xml_key(&issuer.ruc, &invoice.clave_acceso);
                let path = self
                    .storage
                    .put(
                        layout::BUCKET_INVOICES,
                        &key,
                        authorized_xml.into_bytes(),
                        "application/xml",
                    )
                    .await
                    .map_err(|e| crate::error::AppError::Internal(e.to_string()))?;

                let changed =
                    issuance_repo::mark_autorizado(&self.pool, invoice.id, &path, fecha_autorizacion)
                        .await?;
                if changed {
                    self.notifier
                        .notify(TransitionEvent {
                            user_uid: issuer.ruc.clone(),
                            invoice_id: invoice.id,
                            clave_acceso: invoice.clave_acceso.clone(),
                            estado: EstadoFactura::Autorizado,
                            mensaje_sri: None,
                            fecha: fecha_autorizacion,
                        })
                        .await;
                }
            }
            Ok(AuthorizationOutcome::NoAutorizado { mensajes }) => {
                let changed =
                    issuance_repo::mark_rechazado(&self.pool, invoice.id, &mensajes).await?;
                if changed {
                    self.notifier
                        .notify(TransitionEvent {
                            user_uid: issuer.ruc.clone(),
                            invoice_id: invoice.id,
                            clave_acceso: invoice.clave_acceso.clone(),
                            estado: EstadoFactura::Rechazado,
                            mensaje_sri: Some(mensajes),
                            fecha: Utc::now(),
                        })
                        .await;
                }
            }
            Ok(AuthorizationOutcome::NoRecordYet) => {
                // numeroComprobantes == 0: propagate so the caller reverts
                // the claim back to RECIBIDA and retries next tick.
                return Err(crate::error::AppError::Upstream(
                    "no authorization record yet".to_string(),
                ));
            }
            Ok(AuthorizationOutcome::Unrecognized { estado, mensajes }) => {
                // A genuinely unexpected authority state: store it verbatim
                // before reverting to RECIBIDA for retry, rather than
                // silently discarding it.
                let combined = if mensajes.is_empty() {
                    estado.clone()
                } else {
                    format!("{estado}: {mensajes}")
                };
                issuance_repo::mark_otro_estado(&self.pool, invoice.id, &combined).await?;
                return Err(crate::error::AppError::Upstream(format!(
                    "unrecognized authority state '{estado}', stored and retrying"
                )));
            }
            Err(e) => {
                return Err(crate::error::AppError::Upstream(e.to_string()));
            }
        }
        Ok(())
    }
}

fn split_path(path: &str) -> crate::error::AppResult<(&str, &str)> {
    path.split_once('/')
        .ok_or_else(|| crate::error::AppError::Internal(format!("malformed stored path '{path}'")))
}
