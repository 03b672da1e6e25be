//! XML construction and signing for the SRI `factura` document.

pub mod assembler;
pub mod canonicalize;
pub mod signer;

pub use assembler::assemble_factura_xml;
pub use signer::{sign_factura_xml, SignedDocument};
