//! # Transaction Codec
//!
//! A transaction travels as exactly 2673 trytes. Decoding splits that string
//! into typed fields at the fixed offsets in [`crate::config`]; encoding
//! writes them back in the same order, so `decode → encode` is lossless for
//! every transaction the decoder accepts.

use thiserror::Error;

use crate::config::{
    ADDRESS, ATTACHMENT_TIMESTAMP, ATTACHMENT_TIMESTAMP_LOWER_BOUND,
    ATTACHMENT_TIMESTAMP_UPPER_BOUND, BRANCH_TRANSACTION, BUNDLE, CURRENT_INDEX, LAST_INDEX, NONCE,
    OBSOLETE_TAG, SIGNATURE_MESSAGE_FRAGMENT, TAG, TIMESTAMP, TRANSACTION_TRYTES,
    TRUNK_TRANSACTION, VALUE, VALUE_USABLE_TRITS,
};
use crate::ternary::{
    curl, int_to_trytes, trits_to_int, TernaryError, Trit, Trytes, TRITS_PER_TRYTE,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("transaction must be {expected} trytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error(transparent)]
    Encoding(#[from] TernaryError),

    /// Trits beyond the 33 the value field may use are non-zero.
    #[error("value field uses reserved trits")]
    ValueOutOfRange,

    #[error("current index {current} outside 0..={last}")]
    InvalidIndex { current: i64, last: i64 },
}

/// One decoded ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub signature_message_fragment: Trytes,
    pub address: Trytes,
    pub value: i64,
    pub obsolete_tag: Trytes,
    pub timestamp: i64,
    pub current_index: i64,
    pub last_index: i64,
    pub bundle: Trytes,
    pub trunk_transaction: Trytes,
    pub branch_transaction: Trytes,
    pub tag: Trytes,
    pub attachment_timestamp: i64,
    pub attachment_timestamp_lower_bound: i64,
    pub attachment_timestamp_upper_bound: i64,
    pub nonce: Trytes,
}

impl Default for Transaction {
    /// The all-nines transaction.
    fn default() -> Self {
        Self {
            signature_message_fragment: Trytes::all_nines(SIGNATURE_MESSAGE_FRAGMENT.1),
            address: Trytes::all_nines(ADDRESS.1),
            value: 0,
            obsolete_tag: Trytes::all_nines(OBSOLETE_TAG.1),
            timestamp: 0,
            current_index: 0,
            last_index: 0,
            bundle: Trytes::all_nines(BUNDLE.1),
            trunk_transaction: Trytes::all_nines(TRUNK_TRANSACTION.1),
            branch_transaction: Trytes::all_nines(BRANCH_TRANSACTION.1),
            tag: Trytes::all_nines(TAG.1),
            attachment_timestamp: 0,
            attachment_timestamp_lower_bound: 0,
            attachment_timestamp_upper_bound: 0,
            nonce: Trytes::all_nines(NONCE.1),
        }
    }
}

fn trit_range((offset, len): (usize, usize)) -> std::ops::Range<usize> {
    offset * TRITS_PER_TRYTE..(offset + len) * TRITS_PER_TRYTE
}

impl Transaction {
    /// Decode a raw string. Length is checked before the alphabet so a
    /// truncated payload reports as such. Valid trytes are ASCII, so the
    /// reported length is in bytes.
    pub fn parse(raw: &str) -> Result<Self, TransactionError> {
        if raw.len() != TRANSACTION_TRYTES {
            return Err(TransactionError::InvalidLength {
                expected: TRANSACTION_TRYTES,
                actual: raw.len(),
            });
        }
        Self::from_trytes(&Trytes::new(raw)?)
    }

    pub fn from_trytes(trytes: &Trytes) -> Result<Self, TransactionError> {
        if trytes.len() != TRANSACTION_TRYTES {
            return Err(TransactionError::InvalidLength {
                expected: TRANSACTION_TRYTES,
                actual: trytes.len(),
            });
        }

        let trits = trytes.to_trits();
        let int = |field: (usize, usize)| trits_to_int(&trits[trit_range(field)]);
        let text = |(offset, len): (usize, usize)| trytes.sub(offset, len);

        let value_trits: &[Trit] = &trits[trit_range(VALUE)];
        let (used, reserved) = value_trits.split_at(VALUE_USABLE_TRITS);
        if reserved.iter().any(|&t| t != 0) {
            return Err(TransactionError::ValueOutOfRange);
        }

        let current_index = int(CURRENT_INDEX);
        let last_index = int(LAST_INDEX);
        if current_index < 0 || last_index < 0 || current_index > last_index {
            return Err(TransactionError::InvalidIndex {
                current: current_index,
                last: last_index,
            });
        }

        Ok(Self {
            signature_message_fragment: text(SIGNATURE_MESSAGE_FRAGMENT),
            address: text(ADDRESS),
            value: trits_to_int(used),
            obsolete_tag: text(OBSOLETE_TAG),
            timestamp: int(TIMESTAMP),
            current_index,
            last_index,
            bundle: text(BUNDLE),
            trunk_transaction: text(TRUNK_TRANSACTION),
            branch_transaction: text(BRANCH_TRANSACTION),
            tag: text(TAG),
            attachment_timestamp: int(ATTACHMENT_TIMESTAMP),
            attachment_timestamp_lower_bound: int(ATTACHMENT_TIMESTAMP_LOWER_BOUND),
            attachment_timestamp_upper_bound: int(ATTACHMENT_TIMESTAMP_UPPER_BOUND),
            nonce: text(NONCE),
        })
    }

    /// Encode back to the 2673-tryte wire form.
    ///
    /// Tryte fields are written as-is, so callers that edit them must keep
    /// each one at its layout length.
    pub fn to_trytes(&self) -> Trytes {
        let mut out = String::with_capacity(TRANSACTION_TRYTES);
        let mut push = |trytes: &Trytes| out.push_str(trytes.as_str());

        push(&self.signature_message_fragment);
        push(&self.address);
        push(&int_to_trytes(self.value, VALUE.1));
        push(&self.obsolete_tag);
        push(&int_to_trytes(self.timestamp, TIMESTAMP.1));
        push(&int_to_trytes(self.current_index, CURRENT_INDEX.1));
        push(&int_to_trytes(self.last_index, LAST_INDEX.1));
        push(&self.bundle);
        push(&self.trunk_transaction);
        push(&self.branch_transaction);
        push(&self.tag);
        push(&int_to_trytes(self.attachment_timestamp, ATTACHMENT_TIMESTAMP.1));
        push(&int_to_trytes(
            self.attachment_timestamp_lower_bound,
            ATTACHMENT_TIMESTAMP_LOWER_BOUND.1,
        ));
        push(&int_to_trytes(
            self.attachment_timestamp_upper_bound,
            ATTACHMENT_TIMESTAMP_UPPER_BOUND.1,
        ));
        push(&self.nonce);

        Trytes::concat_unchecked(out)
    }

    /// Curl hash of the encoded transaction, 81 trytes.
    pub fn hash(&self) -> Trytes {
        Trytes::pack(&curl::hash(&self.to_trytes().to_trits()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction {
            address: Trytes::new("A".repeat(81)).unwrap(),
            value: -1_234_567,
            timestamp: 1_700_000_000,
            current_index: 1,
            last_index: 3,
            bundle: Trytes::new("B".repeat(81)).unwrap(),
            tag: Trytes::new(format!("RELAY{}", "9".repeat(22))).unwrap(),
            ..Transaction::default()
        }
    }

    #[test]
    fn hash_matches_known_answer() {
        let raw = format!("{}{}", "ABCDEFGHIJKLMNOPQRSTUVWXYZ9".repeat(81), "9".repeat(486));
        let tx = Transaction::parse(&raw).unwrap();
        assert_eq!(
            tx.hash().as_str(),
            "QDH9ZHET9WHATLBQEW9TACUKAIDXHYPAXI9G9EXTLLLNWQJ9PIU9BSSNWNYUAULHTIMCRZQITMPJUSICM"
        );
        assert_eq!(Transaction::default().hash(), Trytes::all_nines(81));
    }

    #[test]
    fn non_ascii_input_reports_byte_length() {
        let raw = format!("{}\u{e9}", "9".repeat(TRANSACTION_TRYTES - 1));
        match Transaction::parse(&raw) {
            Err(TransactionError::InvalidLength { expected, actual }) => {
                assert_eq!(expected, TRANSACTION_TRYTES);
                assert_eq!(actual, TRANSACTION_TRYTES + 1);
            }
            other => panic!("expected length error, got {other:?}"),
        }
    }

    #[test]
    fn default_encodes_to_all_nines() {
        let trytes = Transaction::default().to_trytes();
        assert_eq!(trytes.len(), TRANSACTION_TRYTES);
        assert!(trytes.is_all_nines());
    }

    #[test]
    fn decode_reads_fields_at_their_offsets() {
        let tx = sample();
        let decoded = Transaction::parse(tx.to_trytes().as_str()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.value, -1_234_567);
        assert_eq!(&decoded.tag.as_str()[..5], "RELAY");
    }

    #[test]
    fn field_offsets_match_wire_positions() {
        let raw = sample().to_trytes();
        assert_eq!(&raw.as_str()[2187..2190], "AAA");
        assert_eq!(&raw.as_str()[2349..2352], "BBB");
        assert_eq!(&raw.as_str()[2592..2597], "RELAY");
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            Transaction::parse("ABC").unwrap_err(),
            TransactionError::InvalidLength {
                expected: TRANSACTION_TRYTES,
                actual: 3
            }
        );
    }

    #[test]
    fn rejects_bad_alphabet() {
        let mut raw = Transaction::default().to_trytes().as_str().to_string();
        raw.replace_range(100..101, "a");
        assert!(matches!(
            Transaction::parse(&raw),
            Err(TransactionError::Encoding(TernaryError::InvalidTryte {
                position: 100,
                character: 'a'
            }))
        ));
    }

    #[test]
    fn rejects_value_in_reserved_trits() {
        let mut raw = Transaction::default().to_trytes().as_str().to_string();
        // First tryte past the 33 usable value trits.
        let reserved = VALUE.0 + VALUE_USABLE_TRITS / 3;
        raw.replace_range(reserved..reserved + 1, "A");
        assert_eq!(
            Transaction::parse(&raw).unwrap_err(),
            TransactionError::ValueOutOfRange
        );
    }

    #[test]
    fn rejects_current_index_past_last() {
        let tx = Transaction {
            current_index: 4,
            last_index: 2,
            ..Transaction::default()
        };
        assert_eq!(
            Transaction::parse(tx.to_trytes().as_str()).unwrap_err(),
            TransactionError::InvalidIndex {
                current: 4,
                last: 2
            }
        );
    }

    #[test]
    fn hash_is_81_trytes_and_tracks_content() {
        let a = Transaction::default();
        let b = sample();
        assert_eq!(a.hash().len(), 81);
        assert_ne!(a.hash(), b.hash());
        assert_eq!(b.hash(), b.clone().hash());
    }
}
