//! Local attach: chain a bundle onto two tips and seal every transaction.
//!
//! Transactions are processed from last to first. The last one references
//! both tips directly; every earlier one uses the hash of its successor as
//! trunk and the tips' trunk as branch, so the bundle forms a single chain
//! ending in the tips.

use crate::config::MAX_TIMESTAMP_VALUE;
use crate::pow::{PowError, SealFn};
use crate::ternary::Trytes;

use super::{Tips, Transaction};

/// Attach and seal a copy of `transactions`. The input is left untouched and
/// the result keeps its order.
pub fn attach_bundle(
    transactions: &[Transaction],
    tips: &Tips,
    min_weight_magnitude: usize,
    seal: SealFn,
    now_ms: i64,
) -> Result<Vec<Transaction>, PowError> {
    let mut attached = transactions.to_vec();
    let mut successor: Option<Trytes> = None;

    for tx in attached.iter_mut().rev() {
        match successor.take() {
            None => {
                tx.trunk_transaction = tips.trunk_transaction.clone();
                tx.branch_transaction = tips.branch_transaction.clone();
            }
            Some(hash) => {
                tx.trunk_transaction = hash;
                tx.branch_transaction = tips.trunk_transaction.clone();
            }
        }

        if tx.tag.is_all_nines() {
            tx.tag = tx.obsolete_tag.clone();
        }
        tx.attachment_timestamp = now_ms;
        tx.attachment_timestamp_lower_bound = 0;
        tx.attachment_timestamp_upper_bound = MAX_TIMESTAMP_VALUE;

        tx.nonce = seal(&tx.to_trytes(), min_weight_magnitude)?;
        successor = Some(tx.hash());
    }

    Ok(attached)
}
