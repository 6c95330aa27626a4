// src/mixer.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-element intra-stride offset table that lets parallel chases coexist
//! in one arena without their pointer slots ever colliding (component D).
//!
//! The table is a cyclic Latin square over one random base permutation of
//! `[0, nr_mixer_indices)`: `data[j][i] = base[(i + j) mod nr_mixer_indices]`.
//! A shift of a permutation is itself a permutation, so every column is one
//! (the property the original per-column draw was going for); and because a
//! fixed-offset shift never sends two distinct columns to the same residue,
//! every row is *also* injective across columns — which is exactly what
//! `mixer_index_for` needs for §8 property 4 (two distinct mixer slots never
//! land on the same intra-element offset for the same arena element).
//! Columns past `nr_mixer_indices` repeat column `i mod nr_mixer_indices`
//! (`nr_mixers` can exceed `nr_mixer_indices` by a wide margin — one column
//! per parallel chase slot, but only `nr_mixer_indices` worth of offsets
//! exist to hand out), which is fine since `Layout::max_parallel_chases`
//! caps how many of those columns are ever requested at once.
//!
//! Building the square is a single pass over `(j, i)`, parallelized with
//! rayon the same way the table's consumers (the chase graph builder)
//! parallelize over independent work items.

use rayon::prelude::*;

use crate::constants::NR_MIXERS_FLOOR;
use crate::perm::gen_random_permutation;
use crate::rng::ChaseRng;

/// Smallest power of two `>= need`, floored at `NR_MIXERS_FLOOR`.
pub fn nr_mixers(nr_threads: usize, parallelism: usize) -> usize {
    let need = (nr_threads * parallelism).max(1);
    let mut n = NR_MIXERS_FLOOR;
    while n < need {
        n *= 2;
    }
    n
}

/// Transposed mixer table: `mixer[j * nr_mixers + i]` is the `j`-th
/// mixer-index for slot `i`. `nr_mixer_indices` columns, `nr_mixers` slots.
pub struct MixerTable {
    pub nr_mixers: usize,
    pub nr_mixer_indices: usize,
    data: Vec<u32>,
}

impl MixerTable {
    /// `stride / base_object_size` mixer indices per slot.
    pub fn generate(nr_mixers: usize, nr_mixer_indices: usize, seed: u64) -> Self {
        assert!(nr_mixers.is_power_of_two());
        assert!(nr_mixer_indices >= 1);

        let mut rng = ChaseRng::init(seed);
        let mut base = vec![0u32; nr_mixer_indices];
        gen_random_permutation(&mut base, nr_mixer_indices, 0, &mut rng);

        // Row j is `base` cyclically shifted by j; build rows in parallel,
        // the table's one embarrassingly-parallel axis.
        let rows: Vec<Vec<u32>> = (0..nr_mixer_indices)
            .into_par_iter()
            .map(|j| {
                (0..nr_mixers)
                    .map(|i| base[(i + j) % nr_mixer_indices])
                    .collect()
            })
            .collect();

        let mut data = vec![0u32; nr_mixers * nr_mixer_indices];
        for (j, row) in rows.into_iter().enumerate() {
            data[j * nr_mixers..(j + 1) * nr_mixers].copy_from_slice(&row);
        }

        Self {
            nr_mixers,
            nr_mixer_indices,
            data,
        }
    }

    /// The `j`-th mixer index used by slot `i`.
    #[inline]
    pub fn at(&self, j: usize, i: usize) -> u32 {
        self.data[j * self.nr_mixers + i]
    }

    /// The full length-`nr_mixer_indices` column used by slot `i`, as the
    /// mixer index for arena element `x`: `column[x mod nr_mixer_indices]`.
    /// Cycling on `nr_mixer_indices` (not `nr_mixers`) keeps `j` a valid row
    /// index into the column — the column only has `nr_mixer_indices`
    /// entries no matter how many slots `nr_mixers` provides.
    #[inline]
    pub fn mixer_index_for(&self, slot: usize, x: u64) -> u32 {
        let j = (x as usize) % self.nr_mixer_indices;
        self.at(j, slot)
    }
}
