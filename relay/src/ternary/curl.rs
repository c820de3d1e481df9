//! # Curl-P-81
//!
//! The ternary sponge the ledger uses for transaction hashes and for the
//! proof-of-work check. State is 729 trits; the rate is the first 243.
//!
//! Each round rewrites every state trit from two trits of the previous
//! state, walking an index that steps `+364` / `-365` through the whole
//! state, through an 11-entry truth table.

use super::Trit;

/// Hash output length in trits (81 trytes).
pub const HASH_LENGTH: usize = 243;

/// Sponge state length in trits.
pub const STATE_LENGTH: usize = 3 * HASH_LENGTH;

/// Rounds per transform. The "81" in Curl-P-81.
pub const NUMBER_OF_ROUNDS: usize = 81;

/// Indexed by `a + 4·b + 5` where `a`, `b` are the two input trits.
const TRUTH_TABLE: [Trit; 11] = [1, 0, -1, 2, 1, -1, 0, 2, -1, 1, 0];

/// Next position in the transform walk.
#[inline(always)]
pub(crate) fn next_index(index: usize) -> usize {
    if index < 365 {
        index + 364
    } else {
        index - 365
    }
}

/// Curl-P-81 sponge.
#[derive(Clone)]
pub struct Curl {
    state: [Trit; STATE_LENGTH],
}

impl Default for Curl {
    fn default() -> Self {
        Self::new()
    }
}

impl Curl {
    /// A fresh sponge with an all-zero state.
    pub fn new() -> Self {
        Self {
            state: [0; STATE_LENGTH],
        }
    }

    /// Absorb `trits` in 243-trit blocks, transforming after each block.
    /// A trailing partial block overwrites only the leading part of the rate.
    pub fn absorb(&mut self, trits: &[Trit]) {
        for block in trits.chunks(HASH_LENGTH) {
            self.state[..block.len()].copy_from_slice(block);
            self.transform();
        }
    }

    /// Squeeze one 243-trit block out of the sponge.
    pub fn squeeze(&mut self) -> [Trit; HASH_LENGTH] {
        let mut out = [0; HASH_LENGTH];
        out.copy_from_slice(&self.state[..HASH_LENGTH]);
        self.transform();
        out
    }

    /// Apply the 81-round permutation.
    pub fn transform(&mut self) {
        let mut scratch = [0 as Trit; STATE_LENGTH];
        let mut index = 0usize;
        for _ in 0..NUMBER_OF_ROUNDS {
            scratch.copy_from_slice(&self.state);
            for slot in self.state.iter_mut() {
                let prev = index;
                index = next_index(index);
                let a = scratch[prev] as i32;
                let b = scratch[index] as i32;
                *slot = TRUTH_TABLE[(a + (b << 2) + 5) as usize];
            }
        }
    }

    pub fn state(&self) -> &[Trit; STATE_LENGTH] {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut [Trit; STATE_LENGTH] {
        &mut self.state
    }
}

/// One-shot hash: absorb everything, squeeze one block.
pub fn hash(trits: &[Trit]) -> [Trit; HASH_LENGTH] {
    let mut curl = Curl::new();
    curl.absorb(trits);
    curl.squeeze()
}
