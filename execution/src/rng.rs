//! Unbiased index selection for draws.
//!
//! Every winner in the system is chosen through [`unbiased_index`]. Raw bytes come from a
//! cryptographic generator and are reduced with rejection sampling: the smallest byte width
//! that can hold the bound is read, and values falling in the truncated tail above the
//! largest multiple of `bound` are thrown away and redrawn. Without the rejection step a
//! plain `raw % bound` would favour low indices whenever `bound` does not divide the range.

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

/// A uniform index in `[0, bound)`. Returns `None` for an empty range.
pub fn unbiased_index<R: RngCore + CryptoRng>(rng: &mut R, bound: usize) -> Option<usize> {
    if bound == 0 {
        return None;
    }
    let bound = bound as u64;
    let width = byte_width(bound);
    let range = 1u128 << (8 * width as u32);
    // Largest multiple of `bound` that fits in the sampled width.
    let threshold = range - range % u128::from(bound);

    let mut buf = [0u8; 8];
    loop {
        rng.fill_bytes(&mut buf[..width]);
        let raw = buf[..width]
            .iter()
            .fold(0u128, |acc, byte| (acc << 8) | u128::from(*byte));
        if raw < threshold {
            return Some((raw % u128::from(bound)) as usize);
        }
    }
}

/// Draws from the operating system's CSPRNG. No state is shared between calls.
pub fn draw_index(bound: usize) -> Option<usize> {
    unbiased_index(&mut OsRng, bound)
}

fn byte_width(bound: u64) -> usize {
    // Bytes needed to represent `bound - 1`, at least one.
    let bits = 64 - (bound - 1).leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}
