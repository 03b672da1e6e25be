use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `estado` — the invoice state machine.
///
/// Terminal states: `Autorizado`, `Rechazado`. Transitions are monotone;
/// the Settlement Worker never moves an invoice backward and never
/// re-enters a terminal state.
///
/// `Enviando`/`Autorizando` are transient claim states: the Settlement
/// Worker atomically moves a row into one of these (`spec.md` §4.7,
/// "Concurrency contract") for the duration of the SOAP round-trip, so a
/// second worker tick or replica can never select the same row out of
/// `Firmado`/`Recibida` while the first is still in flight. A row that
/// fails to settle (transport error, malformed response) is reverted back
/// to its pre-claim state so the next tick retries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum EstadoFactura {
    Pendiente,
    Firmado,
    Enviando,
    Recibida,
    Autorizando,
    Devuelta,
    Autorizado,
    Rechazado,
}

impl EstadoFactura {
    /// True for the two states the Settlement Worker must never leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Autorizado | Self::Rechazado)
    }
}

/// The central state-machine row.
///
/// Invariants:
/// - `clave_acceso` is 49 digits with a valid modulo-11 check digit once
///   `estado != Pendiente`.
/// - `(emisor_id, punto_emision_id, secuencial)` is globally unique — a gap
///   is legal (a `Pendiente` row that never advances), a duplicate never is.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub emisor_id: Uuid,
    pub punto_emision_id: Uuid,
    /// 9-digit sequential, unique within `(emisor_id, punto_emision_id)`.
    pub secuencial: String,
    /// 49-digit access key with a modulo-11 check digit.
    pub clave_acceso: String,
    pub identificacion_comprador: String,
    pub razon_social_comprador: String,
    pub subtotal_sin_impuestos: Decimal,
    pub subtotal_0: Decimal,
    pub subtotal_iva: Decimal,
    pub valor_iva: Decimal,
    pub importe_total: Decimal,
    pub estado: EstadoFactura,
    pub xml_path: Option<String>,
    pub pdf_path: Option<String>,
    pub fecha_envio_sri: Option<DateTime<Utc>>,
    pub fecha_autorizacion: Option<DateTime<Utc>>,
    pub mensajes_sri: Option<String>,
    /// Opaque echo of the caller's request, preserved for auditing.
    pub client_input_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Strict internal value type for the caller-supplied invoice payload.
///
/// The caller's JSON is loosely typed at the HTTP boundary; this type is
/// what the pipeline actually operates on after validation. The raw JSON
/// is preserved separately as [`Invoice::client_input_data`] for auditing
/// (see `spec.md` §9, "Dynamic JSON payloads").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceInput {
    pub estab_codigo: String,
    pub punto_codigo: String,
    pub identificacion_comprador: String,
    pub razon_social_comprador: String,
    pub lines: Vec<LineItemInput>,
    #[serde(default)]
    pub info_adicional: Vec<(String, String)>,
}

/// BT-style invoice line before tax calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemInput {
    pub codigo_principal: String,
    pub descripcion: String,
    pub cantidad: Decimal,
    pub precio_unitario: Decimal,
    #[serde(default)]
    pub descuento: Decimal,
    /// IVA tariff as supplied by the caller — may be a fraction (`0.15`)
    /// or a whole percentage (`15`); normalized by the tax calculator.
    pub tarifa_iva: Decimal,
}

impl InvoiceInput {
    /// Shape/rule validation at the boundary. Returns all violations, not
    /// just the first.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.estab_codigo.len() != 3 || !self.estab_codigo.chars().all(|c| c.is_ascii_digit())
        {
            errors.push("estab_codigo must be exactly 3 digits".to_string());
        }
        if self.punto_codigo.len() != 3 || !self.punto_codigo.chars().all(|c| c.is_ascii_digit())
        {
            errors.push("punto_codigo must be exactly 3 digits".to_string());
        }
        if self.identificacion_comprador.trim().is_empty() {
            errors.push("identificacion_comprador must not be empty".to_string());
        }
        if self.razon_social_comprador.trim().is_empty() {
            errors.push("razon_social_comprador must not be empty".to_string());
        }
        if self.lines.is_empty() {
            errors.push("at least one line item is required".to_string());
        }
        if self.lines.len() > 1000 {
            errors.push("invoice cannot have more than 1000 line items".to_string());
        }
        for (i, line) in self.lines.iter().enumerate() {
            if line.descripcion.trim().is_empty() {
                errors.push(format!("lines[{i}].descripcion must not be empty"));
            }
            if line.cantidad <= Decimal::ZERO {
                errors.push(format!("lines[{i}].cantidad must be positive"));
            }
            if line.precio_unitario < Decimal::ZERO {
                errors.push(format!("lines[{i}].precio_unitario must not be negative"));
            }
            if line.descuento < Decimal::ZERO {
                errors.push(format!("lines[{i}].descuento must not be negative"));
            }
        }

        errors
    }
}
