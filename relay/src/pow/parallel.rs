//! `PowBitslicedParallel`: the bitsliced search fanned out over the rayon
//! pool. Worker `w` of `n` walks counters `w, w + n, w + 2n, ...`, so the
//! workers never overlap, and the first hit raises a shared flag that stops
//! the rest.

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use super::{bitsliced, PowError, SearchInput};
use crate::ternary::Trytes;

pub fn is_available() -> bool {
    bitsliced::is_available() && num_cpus::get() > 1
}

pub fn seal(trytes: &Trytes, min_weight_magnitude: usize) -> Result<Trytes, PowError> {
    let input = SearchInput::prepare(trytes, min_weight_magnitude)?;
    let workers = rayon::current_num_threads().max(1) as i64;
    let found = AtomicBool::new(false);

    let nonce = (0..workers)
        .into_par_iter()
        .find_map_any(|worker| {
            let hit = bitsliced::search(&input, worker, workers, &found);
            if hit.is_some() {
                found.store(true, Ordering::Relaxed);
            }
            hit
        })
        .ok_or(PowError::Exhausted)?;

    tracing::trace!(workers, "parallel nonce search finished");
    SearchInput::nonce_trytes(&nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::tests::random_transaction;
    use crate::pow::{verify, with_nonce};

    #[test]
    fn parallel_nonce_is_valid() {
        let tx = random_transaction(99);
        let nonce = seal(&tx, 7).unwrap();
        assert!(verify(&with_nonce(&tx, &nonce).unwrap(), 7));
    }
}
