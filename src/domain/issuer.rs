use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `ambiente` — 1 = testing SRI endpoints, 2 = production SRI endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "int2")]
#[repr(i16)]
pub enum Ambiente {
    Pruebas = 1,
    Produccion = 2,
}

impl Ambiente {
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(Self::Pruebas),
            2 => Some(Self::Produccion),
            _ => None,
        }
    }

    pub fn code(self) -> i16 {
        self as i16
    }
}

/// Tax identity: the SRI-registered taxpayer that originates invoices.
///
/// Invariant: an issuer without a valid (unexpired) credential cannot
/// originate invoices — enforced at the top of `IssueInvoice`, not here.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Issuer {
    pub id: Uuid,
    /// 13-digit RUC.
    pub ruc: String,
    pub razon_social: String,
    pub direccion_matriz: String,
    pub ambiente: Ambiente,
    /// `SI` or `NO`.
    pub obligado_contabilidad: String,
    pub p12_path: Option<String>,
    pub encrypted_p12_password: Option<String>,
    pub p12_expiration: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A physical location under an [`Issuer`]. `codigo` is 3 digits, unique
/// per issuer.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Establishment {
    pub id: Uuid,
    pub issuer_id: Uuid,
    pub codigo: String,
    pub direccion: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A cash register under an [`Establishment`].
///
/// Invariant: `secuencial_actual` is strictly non-decreasing and advances
/// by exactly 1 per successful allocation — enforced by the
/// `generar_secuencial` database function, never by application code.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmissionPoint {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub codigo: String,
    pub secuencial_actual: i32,
    pub created_at: DateTime<Utc>,
}

/// Per-issuer integer credit balance.
///
/// Invariant: `balance >= 0` at all times. Each successful issuance that
/// reaches AUTORIZADO (or, under the eager policy this deployment runs,
/// each issuance accepted into the pipeline) decrements it by exactly 1.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CreditLedger {
    pub issuer_id: Uuid,
    pub balance: i64,
    pub updated_at: DateTime<Utc>,
}

/// External identity-provider subject mapped to an (optional, until
/// `/auth/activar-ruc`) [`Issuer`].
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CallerProfile {
    pub id: Uuid,
    pub external_subject: String,
    pub email: String,
    pub issuer_id: Option<Uuid>,
    pub onboarded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit entry bound to an issuer (top-ups, adjustments).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionLogEntry {
    pub id: Uuid,
    pub issuer_id: Uuid,
    pub delta: i64,
    pub reason: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}
