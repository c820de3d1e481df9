//! # Balanced Ternary Encoding
//!
//! The ledger speaks base 3. A **trit** is one of `-1`, `0`, `1`; a **tryte**
//! is three trits packed into one character of the alphabet
//! `9ABCDEFGHIJKLMNOPQRSTUVWXYZ`:
//!
//! ```text
//!   9 → 0    A..M → 1..13    N..Z → -13..-1
//! ```
//!
//! Trits inside a tryte are little-endian, so `value = t0 + 3·t1 + 9·t2`.
//! Integers stored in transaction fields use the same little-endian balanced
//! encoding across however many trits the field reserves.

pub mod curl;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use curl::{Curl, HASH_LENGTH, STATE_LENGTH};

/// A single balanced ternary digit: `-1`, `0` or `1`.
pub type Trit = i8;

/// Trits per tryte.
pub const TRITS_PER_TRYTE: usize = 3;

/// The tryte alphabet, indexed by tryte value (negative values wrap from the end).
pub const TRYTE_ALPHABET: &[u8; 27] = b"9ABCDEFGHIJKLMNOPQRSTUVWXYZ";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while parsing or converting ternary data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TernaryError {
    /// A character outside `9A-Z` was found.
    #[error("invalid tryte {character:?} at position {position}")]
    InvalidTryte { position: usize, character: char },

    /// A trit slice could not be packed into whole trytes.
    #[error("trit count {0} is not a multiple of 3")]
    InvalidTritLength(usize),

    /// A trit value outside `-1..=1`.
    #[error("invalid trit value {value} at position {position}")]
    InvalidTrit { position: usize, value: i8 },
}

// ---------------------------------------------------------------------------
// Trytes
// ---------------------------------------------------------------------------

/// A validated tryte string.
///
/// Construction checks the alphabet once so downstream code can convert to
/// trits without re-validating.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Trytes(String);

impl Trytes {
    /// Validate `value` and wrap it.
    pub fn new(value: impl Into<String>) -> Result<Self, TernaryError> {
        let value = value.into();
        if let Some((position, character)) = value
            .chars()
            .enumerate()
            .find(|(_, c)| tryte_value(*c).is_none())
        {
            return Err(TernaryError::InvalidTryte {
                position,
                character,
            });
        }
        Ok(Self(value))
    }

    /// `len` nines, i.e. `len` zero-valued trytes.
    pub fn all_nines(len: usize) -> Self {
        Self("9".repeat(len))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Expand into trits, three per tryte.
    pub fn to_trits(&self) -> Vec<Trit> {
        let mut trits = Vec::with_capacity(self.0.len() * TRITS_PER_TRYTE);
        for c in self.0.chars() {
            // Alphabet was validated in `new`.
            let value = tryte_value(c).unwrap_or(0);
            let mut chunk = [0 as Trit; TRITS_PER_TRYTE];
            int_to_trits_into(value as i64, &mut chunk);
            trits.extend_from_slice(&chunk);
        }
        trits
    }

    /// Pack trits into trytes. The slice length must be a multiple of 3.
    pub fn from_trits(trits: &[Trit]) -> Result<Self, TernaryError> {
        if trits.len() % TRITS_PER_TRYTE != 0 {
            return Err(TernaryError::InvalidTritLength(trits.len()));
        }
        if let Some((position, &value)) = trits.iter().enumerate().find(|(_, t)| !(-1..=1).contains(*t)) {
            return Err(TernaryError::InvalidTrit { position, value });
        }

        Ok(Self::pack(trits))
    }

    /// Pack trits the caller already knows are valid, e.g. Curl output.
    pub(crate) fn pack(trits: &[Trit]) -> Self {
        let encoded = trits
            .chunks(TRITS_PER_TRYTE)
            .map(|chunk| {
                let value = trits_to_int(chunk);
                let index = if value < 0 { value + 27 } else { value };
                TRYTE_ALPHABET[index as usize] as char
            })
            .collect();
        Self(encoded)
    }

    /// Wrap a string assembled from other `Trytes`.
    pub(crate) fn concat_unchecked(value: String) -> Self {
        Self(value)
    }

    /// `len` trytes starting at tryte `offset`.
    ///
    /// # Panics
    ///
    /// If the range is out of bounds.
    pub fn sub(&self, offset: usize, len: usize) -> Self {
        Self(self.0[offset..offset + len].to_string())
    }

    /// Whether every tryte is `9`.
    pub fn is_all_nines(&self) -> bool {
        self.0.bytes().all(|b| b == b'9')
    }
}

impl fmt::Display for Trytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Trytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full transactions are 2673 characters; keep logs readable.
        if self.0.len() > 24 {
            write!(f, "Trytes({}…[{}])", &self.0[..24], self.0.len())
        } else {
            write!(f, "Trytes({})", self.0)
        }
    }
}

impl TryFrom<String> for Trytes {
    type Error = TernaryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Trytes> for String {
    fn from(value: Trytes) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// Integer conversions
// ---------------------------------------------------------------------------

/// Value of a single tryte character, or `None` if it is not in the alphabet.
pub fn tryte_value(c: char) -> Option<i8> {
    let index = TRYTE_ALPHABET.iter().position(|&b| b as char == c)? as i8;
    Some(if index > 13 { index - 27 } else { index })
}

/// Little-endian balanced ternary to integer.
pub fn trits_to_int(trits: &[Trit]) -> i64 {
    trits
        .iter()
        .rev()
        .fold(0i64, |acc, &t| acc * 3 + t as i64)
}

/// Integer to `len` little-endian balanced trits.
///
/// Digits beyond `len` are dropped, so callers must make sure the value fits
/// (`|value| <= (3^len - 1) / 2`).
pub fn int_to_trits(value: i64, len: usize) -> Vec<Trit> {
    let mut out = vec![0 as Trit; len];
    int_to_trits_into(value, &mut out);
    out
}

/// Integer to `len` trytes, with the same truncation rule as [`int_to_trits`].
pub fn int_to_trytes(value: i64, len: usize) -> Trytes {
    Trytes::pack(&int_to_trits(value, len * TRITS_PER_TRYTE))
}

/// In-place variant of [`int_to_trits`], used on the PoW hot path.
pub fn int_to_trits_into(mut value: i64, out: &mut [Trit]) {
    for slot in out.iter_mut() {
        let mut rem = (value % 3) as Trit;
        value /= 3;
        if rem > 1 {
            rem -= 3;
            value += 1;
        } else if rem < -1 {
            rem += 3;
            value -= 1;
        }
        *slot = rem;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
