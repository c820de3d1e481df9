//! # Proof-of-Work Engine
//!
//! A ledger node only accepts a transaction whose Curl hash ends in
//! `min_weight_magnitude` zero trits. Finding a nonce that achieves this is
//! the expensive part of every submission, so the engine ships several
//! implementations and picks the fastest one the host can run:
//!
//! | Variant                | Technique                               |
//! |------------------------|-----------------------------------------|
//! | `PowBitslicedParallel` | 64 nonces per transform, every core     |
//! | `PowBitsliced`         | 64 nonces per transform, one core       |
//! | `PowCurl`              | one nonce per transform (fallback)      |
//!
//! All variants share the same preparation step: the first 7776 trits of the
//! transaction never change during the search, so they are absorbed once into
//! a midstate. Each candidate then costs exactly one transform of the final
//! block, which holds the nonce.

pub mod bitsliced;
pub mod parallel;
pub mod scalar;

use std::fmt;
use std::sync::OnceLock;

use thiserror::Error;

use crate::config::{
    MAX_MIN_WEIGHT_MAGNITUDE, NONCE_OFFSET_IN_LAST_BLOCK, NONCE_TRITS, TRANSACTION_TRITS,
    TRANSACTION_TRYTES,
};
use crate::ternary::{Curl, TernaryError, Trit, Trytes, HASH_LENGTH, STATE_LENGTH};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PowError {
    #[error("expected {expected} trytes to seal, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("min weight magnitude {requested} exceeds hash length {max}")]
    InvalidMinWeightMagnitude { requested: usize, max: usize },

    /// The nonce space ran out or the search was stopped without a hit.
    #[error("nonce search exhausted without a valid nonce")]
    Exhausted,

    #[error("nonce encoding failed: {0}")]
    Encoding(#[from] TernaryError),
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// Sealing entry point shared by every variant: transaction trytes and min
/// weight magnitude in, 27-tryte nonce out.
pub type SealFn = fn(&Trytes, usize) -> Result<Trytes, PowError>;

pub const POW_BITSLICED_PARALLEL: &str = "PowBitslicedParallel";
pub const POW_BITSLICED: &str = "PowBitsliced";
pub const POW_CURL: &str = "PowCurl";

/// A named PoW implementation.
#[derive(Clone, Copy)]
pub struct PowVariant {
    name: &'static str,
    seal: SealFn,
}

impl PowVariant {
    pub const fn new(name: &'static str, seal: SealFn) -> Self {
        Self { name, seal }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn seal_fn(&self) -> SealFn {
        self.seal
    }

    /// Find a nonce for `trytes` at difficulty `min_weight_magnitude`.
    pub fn seal(&self, trytes: &Trytes, min_weight_magnitude: usize) -> Result<Trytes, PowError> {
        (self.seal)(trytes, min_weight_magnitude)
    }
}

impl fmt::Debug for PowVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PowVariant").field(&self.name).finish()
    }
}

impl PartialEq for PowVariant {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for PowVariant {}

struct Candidate {
    variant: PowVariant,
    available: fn() -> bool,
}

/// Fastest first. The last entry must always be available.
const CANDIDATES: [Candidate; 3] = [
    Candidate {
        variant: PowVariant::new(POW_BITSLICED_PARALLEL, parallel::seal),
        available: parallel::is_available,
    },
    Candidate {
        variant: PowVariant::new(POW_BITSLICED, bitsliced::seal),
        available: bitsliced::is_available,
    },
    Candidate {
        variant: PowVariant::new(POW_CURL, scalar::seal),
        available: scalar::is_available,
    },
];

/// Every variant this host can run, fastest first.
pub fn available_variants() -> Vec<PowVariant> {
    CANDIDATES
        .iter()
        .filter(|c| (c.available)())
        .map(|c| c.variant)
        .collect()
}

/// Pick the fastest variant available on this host.
///
/// Pure capability check, no benchmarking and no I/O, so it returns the same
/// answer on every call for a given host and build.
pub fn select_best_variant() -> PowVariant {
    CANDIDATES
        .iter()
        .find(|c| (c.available)())
        .map(|c| c.variant)
        .unwrap_or(PowVariant::new(POW_CURL, scalar::seal))
}

/// [`select_best_variant`], computed once per process.
pub fn best_variant() -> PowVariant {
    static BEST: OnceLock<PowVariant> = OnceLock::new();
    *BEST.get_or_init(|| {
        let variant = select_best_variant();
        tracing::info!(pow = variant.name(), "selected PoW implementation");
        variant
    })
}

/// Look up a variant by name, whether or not the host would pick it.
pub fn variant_by_name(name: &str) -> Option<PowVariant> {
    CANDIDATES
        .iter()
        .map(|c| c.variant)
        .find(|v| v.name.eq_ignore_ascii_case(name))
}

// ---------------------------------------------------------------------------
// Shared search input
// ---------------------------------------------------------------------------

/// Everything a search worker needs, computed once per seal call.
#[derive(Clone)]
pub(crate) struct SearchInput {
    /// Sponge state after absorbing every block but the last.
    pub midstate: [Trit; STATE_LENGTH],
    /// The last 243 trits of the transaction; the nonce lives at its tail.
    pub last_block: [Trit; HASH_LENGTH],
    pub min_weight_magnitude: usize,
}

impl SearchInput {
    pub fn prepare(trytes: &Trytes, min_weight_magnitude: usize) -> Result<Self, PowError> {
        if trytes.len() != TRANSACTION_TRYTES {
            return Err(PowError::InvalidLength {
                expected: TRANSACTION_TRYTES,
                actual: trytes.len(),
            });
        }
        if min_weight_magnitude > MAX_MIN_WEIGHT_MAGNITUDE {
            return Err(PowError::InvalidMinWeightMagnitude {
                requested: min_weight_magnitude,
                max: MAX_MIN_WEIGHT_MAGNITUDE,
            });
        }

        let trits = trytes.to_trits();
        let split = TRANSACTION_TRITS - HASH_LENGTH;

        let mut curl = Curl::new();
        curl.absorb(&trits[..split]);

        let mut last_block = [0; HASH_LENGTH];
        last_block.copy_from_slice(&trits[split..]);

        Ok(Self {
            midstate: *curl.state(),
            last_block,
            min_weight_magnitude,
        })
    }

    /// Encode a winning nonce as trytes.
    pub fn nonce_trytes(nonce: &[Trit; NONCE_TRITS]) -> Result<Trytes, PowError> {
        Ok(Trytes::from_trits(nonce)?)
    }
}

/// Whether the trailing `min_weight_magnitude` trits of the hash part of
/// `state` are all zero.
pub(crate) fn meets_difficulty(state: &[Trit], min_weight_magnitude: usize) -> bool {
    state[HASH_LENGTH - min_weight_magnitude..HASH_LENGTH]
        .iter()
        .all(|&t| t == 0)
}

/// Range of the nonce inside the last block.
pub(crate) const NONCE_RANGE: std::ops::Range<usize> =
    NONCE_OFFSET_IN_LAST_BLOCK..NONCE_OFFSET_IN_LAST_BLOCK + NONCE_TRITS;

/// Check a fully sealed transaction (nonce included) against a difficulty.
pub fn verify(trytes: &Trytes, min_weight_magnitude: usize) -> bool {
    if trytes.len() != TRANSACTION_TRYTES || min_weight_magnitude > MAX_MIN_WEIGHT_MAGNITUDE {
        return false;
    }
    let hash = crate::ternary::curl::hash(&trytes.to_trits());
    meets_difficulty(&hash, min_weight_magnitude)
}

/// Replace the trailing nonce of `trytes` with `nonce`.
pub fn with_nonce(trytes: &Trytes, nonce: &Trytes) -> Result<Trytes, TernaryError> {
    let keep = trytes.len().saturating_sub(nonce.len());
    let mut joined = String::with_capacity(trytes.len());
    joined.push_str(&trytes.as_str()[..keep]);
    joined.push_str(nonce.as_str());
    Trytes::new(joined)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// A random, but syntactically valid, transaction.
    pub(crate) fn random_transaction(seed: u64) -> Trytes {
        let mut rng = StdRng::seed_from_u64(seed);
        let raw: String = (0..TRANSACTION_TRYTES)
            .map(|_| crate::ternary::TRYTE_ALPHABET[rng.gen_range(0..27)] as char)
            .collect();
        Trytes::new(raw).unwrap()
    }

    #[test]
    fn selection_is_stable() {
        let first = select_best_variant();
        for _ in 0..5 {
            assert_eq!(select_best_variant(), first);
        }
        assert_eq!(best_variant(), first);
    }

    #[test]
    fn scalar_fallback_is_always_available() {
        let names: Vec<_> = available_variants().iter().map(|v| v.name()).collect();
        assert_eq!(names.last(), Some(&POW_CURL));
        assert_eq!(names[0], select_best_variant().name());
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(variant_by_name("powcurl").map(|v| v.name()), Some(POW_CURL));
        assert_eq!(
            variant_by_name(POW_BITSLICED_PARALLEL).map(|v| v.name()),
            Some(POW_BITSLICED_PARALLEL)
        );
        assert!(variant_by_name("PowGpu").is_none());
    }

    #[test]
    fn every_variant_finds_a_valid_nonce() {
        let tx = random_transaction(11);
        for candidate in &CANDIDATES {
            let variant = candidate.variant;
            let nonce = variant.seal(&tx, 5).unwrap();
            assert_eq!(nonce.len(), NONCE_TRITS / 3, "{}", variant.name());

            let sealed = with_nonce(&tx, &nonce).unwrap();
            assert!(verify(&sealed, 5), "{} produced a bad nonce", variant.name());
        }
    }

    #[test]
    fn zero_difficulty_accepts_anything() {
        let tx = random_transaction(3);
        let nonce = scalar::seal(&tx, 0).unwrap();
        assert!(verify(&with_nonce(&tx, &nonce).unwrap(), 0));
    }

    #[test]
    fn rejects_wrong_length_and_excess_mwm() {
        let short = Trytes::all_nines(10);
        assert_eq!(
            scalar::seal(&short, 1).unwrap_err(),
            PowError::InvalidLength {
                expected: TRANSACTION_TRYTES,
                actual: 10
            }
        );

        let tx = random_transaction(1);
        assert!(matches!(
            bitsliced::seal(&tx, 244),
            Err(PowError::InvalidMinWeightMagnitude { requested: 244, .. })
        ));
    }

    #[test]
    fn verify_rejects_unsealed_hash() {
        // An unsealed transaction passes mwm 9 with probability 3^-9.
        let misses = (100..110)
            .map(random_transaction)
            .filter(|tx| !verify(tx, 9))
            .count();
        assert!(misses >= 9);
    }
}
