//! Notifier — `spec.md` §4.10.
//!
//! POSTs a terminal-transition event to a configured webhook. Failures
//! are logged and swallowed: delivery is at-most-once, same as the
//! Settlement Worker's SOAP calls, and uses the same `reqwest` client.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::EstadoFactura;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct TransitionEvent {
    pub user_uid: String,
    pub invoice_id: Uuid,
    pub clave_acceso: String,
    pub estado: EstadoFactura,
    pub mensaje_sri: Option<String>,
    pub fecha: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(client: reqwest::Client, webhook_url: Option<String>) -> Self {
        Self {
            client,
            webhook_url,
        }
    }

    /// Sends the event if a webhook is configured. Never returns an error
    /// to the caller — a failed delivery is logged and otherwise ignored,
    /// per `spec.md` §4.7 "Notifications".
    pub async fn notify(&self, event: TransitionEvent) {
        let Some(url) = &self.webhook_url else {
            return;
        };

        let invoice_id = event.invoice_id;
        let result = self
            .client
            .post(url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&event)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(%invoice_id, "webhook delivered");
            }
            Ok(response) => {
                tracing::warn!(%invoice_id, status = %response.status(), "webhook returned non-2xx");
            }
            Err(err) => {
                tracing::warn!(%invoice_id, error = %err, "webhook delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_without_configured_webhook_is_a_noop() {
        let notifier = Notifier::new(reqwest::Client::new(), None);
        notifier
            .notify(TransitionEvent {
                user_uid: "user-1".into(),
                invoice_id: Uuid::new_v4(),
                clave_acceso: "1".repeat(49),
                estado: EstadoFactura::Autorizado,
                mensaje_sri: None,
                fecha: Utc::now(),
            })
            .await;
    }

    #[tokio::test]
    async fn notify_posts_json_body_to_configured_webhook() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/hook"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let notifier = Notifier::new(
            reqwest::Client::new(),
            Some(format!("{}/hook", server.uri())),
        );
        notifier
            .notify(TransitionEvent {
                user_uid: "user-1".into(),
                invoice_id: Uuid::new_v4(),
                clave_acceso: "2".repeat(49),
                estado: EstadoFactura::Rechazado,
                mensaje_sri: Some("rechazado por sri".into()),
                fecha: Utc::now(),
            })
            .await;
    }
}
