//! # Ledger Client
//!
//! The seam between the dispatcher and a ledger node. The dispatcher only
//! ever decodes raw trytes and hands a whole batch to [`LedgerClient::submit`];
//! how the batch reaches the network is the client's business.
//!
//! [`HttpLedgerClient`] is the production implementation: tip selection,
//! local attach with the chosen PoW variant, then broadcast and store.

pub mod attach;
pub mod error;
pub mod http;
pub mod transaction;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::pow::SealFn;
use crate::ternary::Trytes;

pub use error::LedgerError;
pub use http::HttpLedgerClient;
pub use transaction::{Transaction, TransactionError};

/// The two tips a bundle attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tips {
    pub trunk_transaction: Trytes,
    pub branch_transaction: Trytes,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Decode one raw transaction.
    fn decode(&self, raw: &str) -> Result<Transaction, TransactionError> {
        Transaction::parse(raw)
    }

    /// Seal and publish a batch, preserving its order.
    async fn submit(
        &self,
        transactions: Vec<Transaction>,
        min_depth: u64,
        min_weight_magnitude: usize,
        seal: SealFn,
    ) -> Result<(), LedgerError>;
}
