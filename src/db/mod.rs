//! Database access: connection pool and the repository queries backing
//! the Sequencing & Credit Core (`spec.md` §4.6) and the peripheral
//! collaborator surface (`spec.md` §6).

pub mod accounts_repo;
pub mod issuance_repo;
pub mod pool;

pub use pool::connect;
