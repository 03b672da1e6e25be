//! Core entities of the invoice-issuance pipeline.
//!
//! All monetary fields are [`rust_decimal::Decimal`] end to end — never
//! floating point — matching the rest of this service's arithmetic.

mod api_key;
mod invoice;
mod issuer;

pub use api_key::{generate_api_key, hash_api_key, ApiKey, GeneratedApiKey};
pub use invoice::{EstadoFactura, Invoice, InvoiceInput, LineItemInput};
pub use issuer::{
    Ambiente, CallerProfile, CreditLedger, EmissionPoint, Establishment, Issuer,
    TransactionLogEntry,
};
