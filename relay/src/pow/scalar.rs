//! `PowCurl`: one candidate nonce per Curl transform.
//!
//! Slow, but it runs anywhere and is trivially correct, which makes it both
//! the guaranteed fallback and the reference the faster variants are tested
//! against.

use std::sync::atomic::{AtomicBool, Ordering};

use super::{meets_difficulty, PowError, SearchInput, NONCE_RANGE};
use crate::config::NONCE_TRITS;
use crate::ternary::{int_to_trits_into, Curl, Trit, Trytes};

pub fn is_available() -> bool {
    true
}

pub fn seal(trytes: &Trytes, min_weight_magnitude: usize) -> Result<Trytes, PowError> {
    let input = SearchInput::prepare(trytes, min_weight_magnitude)?;
    let stop = AtomicBool::new(false);
    let nonce = search(&input, 0, 1, &stop).ok_or(PowError::Exhausted)?;
    SearchInput::nonce_trytes(&nonce)
}

/// Try counters `start`, `start + step`, ... until one satisfies the
/// difficulty or `stop` is raised.
pub(crate) fn search(
    input: &SearchInput,
    start: i64,
    step: i64,
    stop: &AtomicBool,
) -> Option<[Trit; NONCE_TRITS]> {
    let mut block = input.last_block;
    let mut counter = start;

    loop {
        if stop.load(Ordering::Relaxed) {
            return None;
        }

        int_to_trits_into(counter, &mut block[NONCE_RANGE]);

        let mut curl = Curl::new();
        *curl.state_mut() = input.midstate;
        curl.absorb(&block);

        if meets_difficulty(curl.state(), input.min_weight_magnitude) {
            let mut nonce = [0; NONCE_TRITS];
            nonce.copy_from_slice(&block[NONCE_RANGE]);
            return Some(nonce);
        }

        counter = counter.checked_add(step)?;
    }
}
