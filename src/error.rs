//! Error taxonomy for the import pipeline and repair dispatcher.
//!
//! Four failure classes, surfaced to the caller with a human-readable cause:
//!
//! - [`IngestError::Configuration`]: an invalid spec or request, caught
//!   before any database work begins.
//! - [`IngestError::Parse`]: the row source could not be decoded under the
//!   configured delimiter/quote/escape settings; no table is touched.
//! - [`IngestError::Transaction`]: a failure during staging, casting, or
//!   final-table creation; the whole import transaction rolled back.
//! - [`IngestError::Dispatch`]: the external repair procedure call failed.
//!
//! Interpretation problems (absent or partial procedure results) are not
//! errors; the audit interpreter always produces a best-effort summary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("failed to parse row source: {0}")]
    Parse(String),
    #[error("import transaction rolled back: {0}")]
    Transaction(String),
    #[error("repair dispatch failed: {0}")]
    Dispatch(String),
}

impl IngestError {
    pub fn config(message: impl Into<String>) -> Self {
        IngestError::Configuration(message.into())
    }
}

impl From<csv::Error> for IngestError {
    fn from(err: csv::Error) -> Self {
        IngestError::Parse(err.to_string())
    }
}
