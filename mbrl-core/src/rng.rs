// Every random draw in the crate goes through this generator. It starts from a fixed seed so runs
// are reproducible unless a caller reseeds it.

use rand::{SeedableRng, rngs::StdRng};
use std::cell::RefCell;

thread_local! {
    pub static RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(0));
}

/// Reseeds the generator of the calling thread.
pub fn seed_rng(seed: u64) {
    RNG.with_borrow_mut(|rng| *rng = StdRng::seed_from_u64(seed));
}
