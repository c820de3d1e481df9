use thiserror::Error;

use crate::pow::PowError;

/// Failures while talking to a ledger node or preparing what we send it.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("node request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The node answered with a non-success status.
    #[error("node returned {status}: {message}")]
    Node { status: u16, message: String },

    #[error("proof of work failed: {0}")]
    Pow(#[from] PowError),

    /// The blocking attach worker died before producing a result.
    #[error("attach worker failed: {0}")]
    Worker(String),
}
