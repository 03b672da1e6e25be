//! # sri-facturacion
//!
//! Electronic-invoicing backend for Ecuador's SRI (Servicio de Rentas
//! Internas): builds and signs `factura` XML documents, submits them
//! through the SRI's reception/authorization SOAP endpoints, renders
//! RIDE PDF receipts, and exposes the whole lifecycle over HTTP.
//!
//! All monetary values use [`rust_decimal::Decimal`] — never floating
//! point. Timestamps are stored in UTC and converted to
//! `America/Guayaquil` local time only at the XML/access-key boundary,
//! where the SRI's wire format requires it.
//!
//! ## Module map
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`access_key`] | 49-digit `claveAcceso` construction and modulo-11 check digit |
//! | [`tax_calculator`] | IVA tariff normalization and line/aggregate tax totals |
//! | [`xml`] | `factura` XML assembly, canonicalization, and XAdES-BES signing |
//! | [`credential_store`] | PKCS#12 credential loading, validation, at-rest password encryption |
//! | [`receipt`] | RIDE PDF rendering |
//! | [`issuance`] | Orchestrates the above into the synchronous issuance pipeline |
//! | [`settlement`] | Reception/authorization SOAP polling workers |
//! | [`storage`] | Object-store adapter (MinIO via the S3 API) |
//! | [`notifier`] | Webhook delivery for invoice state transitions |
//! | [`domain`] | Core entities: issuers, invoices, API keys |
//! | [`db`] | `sqlx` repository queries and connection pool |
//! | [`http`] | Axum router, auth middleware, request handlers |
//! | [`config`] | Environment-backed configuration |
//! | [`error`] | Application error type and HTTP status mapping |

pub mod access_key;
pub mod config;
pub mod credential_store;
pub mod db;
pub mod domain;
pub mod error;
pub mod http;
pub mod issuance;
pub mod notifier;
pub mod receipt;
pub mod settlement;
pub mod storage;
pub mod tax_calculator;
pub mod xml;
