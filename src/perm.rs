// src/perm.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Permutation construction and verification (component C).

use crate::rng::ChaseRng;

/// Fisher-Yates inside-out shuffle: writes a uniform random permutation of
/// `{base, base+1, ..., base+nr-1}` into `out[0..nr)`.
pub fn gen_random_permutation(out: &mut [u32], nr: usize, base: u32, rng: &mut ChaseRng) {
    debug_assert!(out.len() >= nr);
    for i in 0..nr {
        let t = rng.below(i + 1);
        out[i] = out[t];
        out[t] = base + i as u32;
    }
}

/// The identity permutation: `out[i] = base + i`.
pub fn gen_ordered_permutation(out: &mut [u32], nr: usize, base: u32) {
    debug_assert!(out.len() >= nr);
    for i in 0..nr {
        out[i] = base + i as u32;
    }
}

/// Verifies that `p[0..nr)` is a bijection onto some contiguous range of
/// `nr` integers (the `base` is recovered from the data, not assumed).
pub fn is_a_permutation(p: &[u32], nr: usize) -> bool {
    if p.len() < nr || nr == 0 {
        return nr == 0;
    }
    let base = *p[..nr].iter().min().unwrap();
    let mut seen = vec![false; nr];
    for &v in &p[..nr] {
        let idx = match v.checked_sub(base) {
            Some(i) => i as usize,
            None => return false,
        };
        if idx >= nr || seen[idx] {
            return false;
        }
        seen[idx] = true;
    }
    seen.iter().all(|&b| b)
}
