//! Receipt metadata verification and repair.
//!
//! A receipt is a small JSON document that carries a `content_hash` field: the
//! upper-case hex SHA-256 of the document's own bytes with that field removed.
//! [`Receipt`] verifies the hash and repairs it with streaming, line-oriented
//! rewrites that touch only the bytes of the field being changed.
//!
//! Repairs write a temp file beside the original and, when asked to update,
//! atomically rename it over the original.

mod error;
mod patterns;
mod receipt;

pub use error::ReceiptError;
pub use receipt::Receipt;
