//! Background settlement pipeline: SOAP envelope handling and the
//! Submit/Authorize scheduler (`spec.md` §4.7).

pub mod soap;
pub mod worker;

pub use worker::{SettlementEndpoints, SettlementWorker};
