// src/chase/graph.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chase graph builder (component E): threads pointer cells into a single
//! cycle with TLB-grouped locality, writing through a mixer column so
//! concurrent chases never touch each other's pointer slots.
//!
//! Uses the forward-link construction `*at(perm[i]) = at(perm[(i+1) mod n])`,
//! not the inverse-permutation form — no `inv` array is ever allocated.

use crate::arena::Arena;
use crate::error::{ChaseError, Result};
use crate::geometry::Layout;
use crate::mixer::MixerTable;
use crate::perm::{gen_ordered_permutation, gen_random_permutation, is_a_permutation};
use crate::rng::ChaseRng;

/// Build one chase cycle inside `arena`, using mixer column `mixer_idx` for
/// every pointer slot, and return the byte offset of the cycle's first
/// element (`MIXED(0, mixer_idx)`).
pub fn generate_chase(
    layout: &Layout,
    mixer: &MixerTable,
    mixer_idx: usize,
    arena: &Arena,
    ordered: bool,
    seed: u64,
) -> Result<u64> {
    let perm = build_visitation_order(layout, ordered, seed)?;
    link_cycle(layout, mixer, mixer_idx, arena, &perm)?;
    Ok(layout.mixed(mixer, 0, mixer_idx) as u64)
}

/// Long-chase variant: builds `k = max(1, nr_mixer_indices / total_par)`
/// independent visitation orders over the same `nr_elts` elements, each
/// threaded through its own mixer slot starting at `mixer_idx`, then links
/// the `k` sub-cycles end to end into one super-cycle that crosses from one
/// permutation to the next exactly once per lap. A chase that always jumps
/// from entry N of one permutation straight to entry 0 of a different one
/// is harder for an entry-indexed stride prefetcher to model than a single
/// long permutation would be.
pub fn generate_chase_long(
    layout: &Layout,
    mixer: &MixerTable,
    mixer_idx: usize,
    arena: &Arena,
    total_par: usize,
    seed: u64,
) -> Result<u64> {
    let k = (layout.nr_mixer_indices / total_par.max(1)).max(1);
    if mixer_idx + k > mixer.nr_mixers {
        return Err(ChaseError::Layout(format!(
            "generate_chase_long needs {k} consecutive mixer slots from {mixer_idx}, only {} available",
            mixer.nr_mixers
        )));
    }

    let mut perms = Vec::with_capacity(k);
    for slot in 0..k {
        perms.push(build_visitation_order(layout, false, seed ^ (slot as u64))?);
    }

    // Link each sub-permutation's internal cycle, but splice sub-cycle m's
    // last element to sub-cycle (m+1)'s first element instead of closing it
    // on itself, so the whole thing is one cycle of length k * nr_elts.
    for (slot, perm) in perms.iter().enumerate() {
        let next_slot = (slot + 1) % k;
        let next_perm = &perms[next_slot];
        let n = perm.len();
        for i in 0..n {
            let cur = perm[i] as u64;
            let cur_off = layout.mixed(mixer, cur, mixer_idx + slot);
            let (next_val, next_mixer_slot) = if i + 1 < n {
                (perm[i + 1] as u64, mixer_idx + slot)
            } else {
                (next_perm[0] as u64, mixer_idx + next_slot)
            };
            let next_off = layout.mixed(mixer, next_val, next_mixer_slot) as u64;
            // SAFETY: cur_off/next_off are derived from Layout::mixed and
            // stay within the arena by construction.
            unsafe {
                arena.write_word(cur_off, next_off);
            }
        }
    }

    Ok(layout.mixed(mixer, 0, mixer_idx) as u64)
}

fn build_visitation_order(layout: &Layout, ordered: bool, seed: u64) -> Result<Vec<u32>> {
    let nr_elts = layout.nr_elts;
    let mut perm = vec![0u32; nr_elts];

    if ordered {
        gen_ordered_permutation(&mut perm, nr_elts, 0);
    } else {
        let mut rng = ChaseRng::init(seed);
        let mut tlb_perm = vec![0u32; layout.nr_tlb_groups];
        gen_random_permutation(&mut tlb_perm, layout.nr_tlb_groups, 0, &mut rng);

        for i in 0..layout.nr_tlb_groups {
            let base = tlb_perm[i] as usize * layout.nr_elts_per_tlb;
            let start = i * layout.nr_elts_per_tlb;
            let end = start + layout.nr_elts_per_tlb;
            gen_random_permutation(&mut perm[start..end], layout.nr_elts_per_tlb, base as u32, &mut rng);
        }
    }

    if !is_a_permutation(&perm, nr_elts) {
        return Err(ChaseError::Invariant(
            "chase visitation order is not a permutation of [0, nr_elts)".into(),
        ));
    }
    Ok(perm)
}

fn link_cycle(
    layout: &Layout,
    mixer: &MixerTable,
    mixer_idx: usize,
    arena: &Arena,
    perm: &[u32],
) -> Result<()> {
    let n = perm.len();
    for i in 0..n {
        let cur = perm[i] as u64;
        let next = perm[(i + 1) % n] as u64;
        let cur_off = layout.mixed(mixer, cur, mixer_idx);
        let next_off = layout.mixed(mixer, next, mixer_idx) as u64;
        // SAFETY: offsets are produced by `Layout::mixed`, which always
        // stays within `[layout.offset, layout.offset + total_memory)`.
        unsafe {
            arena.write_word(cur_off, next_off);
        }
    }
    Ok(())
}

/// Walk the cycle starting at `first` for up to `nr_elts + 1` steps,
/// returning the visited offsets in order. Used by tests to verify
/// cycle-completeness without re-deriving the permutation.
pub fn walk_cycle(arena: &Arena, first: u64, max_steps: usize) -> Vec<u64> {
    let mut visited = Vec::with_capacity(max_steps);
    let mut cur = first;
    for _ in 0..max_steps {
        visited.push(cur);
        // SAFETY: `cur` was produced by a prior `generate_chase` call and is
        // a valid in-arena pointer slot offset.
        cur = unsafe { arena.read_word(cur as usize) };
        if cur == first {
            break;
        }
    }
    visited
}
