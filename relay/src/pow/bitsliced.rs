//! `PowBitsliced`: 64 candidate nonces per transform.
//!
//! Every trit of the sponge is stored as two bit planes `(lo, hi)`, one bit
//! per lane, so a single pass of 64-bit logic runs 64 independent Curl
//! instances side by side:
//!
//! ```text
//!   trit   lo  hi
//!    -1     1   0
//!     0     1   1
//!     1     0   1
//! ```
//!
//! Lanes differ only in the first four nonce trits (`lane - 32`); the other
//! 77 come from a counter shared by all lanes. A lane wins when every
//! checked hash trit is zero, i.e. `lo & hi` is set in that lane's bit.

use std::sync::atomic::{AtomicBool, Ordering};

use super::{meets_difficulty, PowError, SearchInput, NONCE_RANGE};
use crate::config::NONCE_TRITS;
use crate::ternary::curl::{next_index, NUMBER_OF_ROUNDS};
use crate::ternary::{int_to_trits, int_to_trits_into, Trit, Trytes, HASH_LENGTH, STATE_LENGTH};

const LANES: usize = 64;

/// Nonce trits that tell the lanes apart. Four balanced trits cover -40..=40.
const LANE_TRITS: usize = 4;
const LANE_BIAS: i64 = 32;

const COUNTER_TRITS: usize = NONCE_TRITS - LANE_TRITS;

const ALL: u64 = u64::MAX;
const NONE: u64 = 0;

pub fn is_available() -> bool {
    cfg!(target_pointer_width = "64")
}

pub fn seal(trytes: &Trytes, min_weight_magnitude: usize) -> Result<Trytes, PowError> {
    let input = SearchInput::prepare(trytes, min_weight_magnitude)?;
    let stop = AtomicBool::new(false);
    let nonce = search(&input, 0, 1, &stop).ok_or(PowError::Exhausted)?;
    SearchInput::nonce_trytes(&nonce)
}

// ---------------------------------------------------------------------------
// Sliced state
// ---------------------------------------------------------------------------

#[inline(always)]
fn encode(trit: Trit) -> (u64, u64) {
    match trit {
        -1 => (ALL, NONE),
        0 => (ALL, ALL),
        _ => (NONE, ALL),
    }
}

/// 64 Curl states, one per bit.
#[derive(Clone)]
pub(crate) struct SlicedState {
    lo: [u64; STATE_LENGTH],
    hi: [u64; STATE_LENGTH],
}

impl SlicedState {
    /// Every lane starts from the same scalar state.
    pub fn broadcast(trits: &[Trit; STATE_LENGTH]) -> Self {
        let mut state = Self {
            lo: [NONE; STATE_LENGTH],
            hi: [NONE; STATE_LENGTH],
        };
        for (pos, &trit) in trits.iter().enumerate() {
            state.set_all(pos, trit);
        }
        state
    }

    #[inline(always)]
    pub fn set_all(&mut self, pos: usize, trit: Trit) {
        let (lo, hi) = encode(trit);
        self.lo[pos] = lo;
        self.hi[pos] = hi;
    }

    pub fn set_lane(&mut self, pos: usize, lane: usize, trit: Trit) {
        let bit = 1u64 << lane;
        let (lo, hi) = encode(trit);
        self.lo[pos] = (self.lo[pos] & !bit) | (lo & bit);
        self.hi[pos] = (self.hi[pos] & !bit) | (hi & bit);
    }

    #[cfg(test)]
    pub fn lane(&self, pos: usize, lane: usize) -> Trit {
        match ((self.lo[pos] >> lane) & 1, (self.hi[pos] >> lane) & 1) {
            (1, 0) => -1,
            (0, 1) => 1,
            _ => 0,
        }
    }

    /// Curl-P-81 on all lanes at once.
    pub fn transform(&mut self) {
        let mut scratch_lo = [NONE; STATE_LENGTH];
        let mut scratch_hi = [NONE; STATE_LENGTH];
        let mut index = 0usize;

        for _ in 0..NUMBER_OF_ROUNDS {
            scratch_lo.copy_from_slice(&self.lo);
            scratch_hi.copy_from_slice(&self.hi);

            for pos in 0..STATE_LENGTH {
                let prev = index;
                index = next_index(index);

                let alpha = scratch_lo[prev];
                let beta = scratch_hi[prev];
                let gamma = scratch_hi[index];
                let delta = (alpha | !gamma) & (scratch_lo[index] ^ beta);

                self.lo[pos] = !delta;
                self.hi[pos] = (alpha ^ gamma) | delta;
            }
        }
    }

    /// Lanes whose trailing `min_weight_magnitude` hash trits are all zero.
    fn winners(&self, min_weight_magnitude: usize) -> u64 {
        let mut mask = ALL;
        for pos in HASH_LENGTH - min_weight_magnitude..HASH_LENGTH {
            mask &= self.lo[pos] & self.hi[pos];
            if mask == NONE {
                break;
            }
        }
        mask
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

fn lane_trits(lane: usize) -> Vec<Trit> {
    int_to_trits(lane as i64 - LANE_BIAS, LANE_TRITS)
}

/// Try counters `start`, `start + step`, ... 64 lanes at a time until a
/// lane satisfies the difficulty or `stop` is raised.
pub(crate) fn search(
    input: &SearchInput,
    start: i64,
    step: i64,
    stop: &AtomicBool,
) -> Option<[Trit; NONCE_TRITS]> {
    let mut template = SlicedState::broadcast(&input.midstate);
    for (pos, &trit) in input.last_block.iter().enumerate() {
        template.set_all(pos, trit);
    }
    for lane in 0..LANES {
        for (offset, trit) in lane_trits(lane).into_iter().enumerate() {
            template.set_lane(NONCE_RANGE.start + offset, lane, trit);
        }
    }

    let counter_start = NONCE_RANGE.start + LANE_TRITS;
    let mut counter_trits = [0 as Trit; COUNTER_TRITS];
    let mut counter = start;

    loop {
        if stop.load(Ordering::Relaxed) {
            return None;
        }

        int_to_trits_into(counter, &mut counter_trits);
        let mut state = template.clone();
        for (offset, &trit) in counter_trits.iter().enumerate() {
            state.set_all(counter_start + offset, trit);
        }
        state.transform();

        let winners = state.winners(input.min_weight_magnitude);
        if winners != NONE {
            let lane = winners.trailing_zeros() as usize;
            let mut nonce = [0 as Trit; NONCE_TRITS];
            nonce[..LANE_TRITS].copy_from_slice(&lane_trits(lane));
            nonce[LANE_TRITS..].copy_from_slice(&counter_trits);
            debug_assert!(lane_passes(input, &nonce));
            return Some(nonce);
        }

        counter = counter.checked_add(step)?;
    }
}

/// Scalar re-check of a winning nonce.
fn lane_passes(input: &SearchInput, nonce: &[Trit; NONCE_TRITS]) -> bool {
    let mut block = input.last_block;
    block[NONCE_RANGE].copy_from_slice(nonce);
    let mut curl = crate::ternary::Curl::new();
    *curl.state_mut() = input.midstate;
    curl.absorb(&block);
    meets_difficulty(curl.state(), input.min_weight_magnitude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::tests::random_transaction;
    use crate::ternary::Curl;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn encoding_round_trips_every_trit() {
        let mut state = SlicedState::broadcast(&[0; STATE_LENGTH]);
        for (lane, trit) in [(0, -1), (17, 0), (63, 1)] {
            state.set_lane(5, lane, trit);
            assert_eq!(state.lane(5, lane), trit);
        }
        assert_eq!(state.lane(5, 1), 0);
    }

    #[test]
    fn sliced_transform_matches_scalar_lane_by_lane() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut sliced = SlicedState::broadcast(&[0; STATE_LENGTH]);
        let mut scalars = Vec::with_capacity(LANES);

        for lane in 0..LANES {
            let mut curl = Curl::new();
            for pos in 0..STATE_LENGTH {
                let trit: Trit = rng.gen_range(-1..=1);
                curl.state_mut()[pos] = trit;
                sliced.set_lane(pos, lane, trit);
            }
            scalars.push(curl);
        }

        sliced.transform();
        for (lane, curl) in scalars.iter_mut().enumerate() {
            curl.transform();
            for pos in 0..STATE_LENGTH {
                assert_eq!(
                    sliced.lane(pos, lane),
                    curl.state()[pos],
                    "lane {lane} position {pos}"
                );
            }
        }
    }

    #[test]
    fn lane_prefixes_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for lane in 0..LANES {
            assert!(seen.insert(lane_trits(lane)));
        }
    }

    #[test]
    fn found_nonce_passes_scalar_check() {
        let input = SearchInput::prepare(&random_transaction(21), 6).unwrap();
        let nonce = search(&input, 0, 1, &AtomicBool::new(false)).unwrap();
        assert!(lane_passes(&input, &nonce));
    }
}
