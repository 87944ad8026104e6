//! Unbiased shuffling shared by the sampler and the per-question choice order.

use rand::Rng;

/// Fisher–Yates shuffle performed from the end of the slice.
///
/// Every permutation is equally likely given a uniform `rng`.
pub fn shuffle_in_place<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);
    }
}

/// Returns a shuffled copy of `items` using the thread-local generator.
#[must_use]
pub fn shuffled<T: Clone>(items: &[T]) -> Vec<T> {
    let mut out = items.to_vec();
    shuffle_in_place(&mut out, &mut rand::rng());
    out
}
