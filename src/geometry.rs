// src/geometry.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Arena geometry shared between the mixer, the chase graph builder, and the
//! chase kernels: element counts, TLB grouping, and the `MIXED(x, i)`
//! addressing function (§3 "Mixed address").

use crate::error::{ChaseError, Result};
use crate::mixer::MixerTable;

/// Minimum element footprint: one pointer-sized slot.
pub const BASE_OBJECT_SIZE: usize = std::mem::size_of::<u64>();

#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub total_memory: usize,
    pub stride: usize,
    pub tlb_locality: usize,
    pub offset: usize,
    pub nr_elts: usize,
    pub nr_elts_per_tlb: usize,
    pub nr_tlb_groups: usize,
    pub nr_mixer_indices: usize,
}

impl Layout {
    pub fn new(total_memory: usize, stride: usize, tlb_locality: usize, offset: usize) -> Result<Self> {
        if stride < BASE_OBJECT_SIZE {
            return Err(ChaseError::Config(format!(
                "stride {stride} is smaller than the minimum element size {BASE_OBJECT_SIZE}"
            )));
        }
        if tlb_locality < stride || tlb_locality % stride != 0 {
            return Err(ChaseError::Config(format!(
                "tlb_locality {tlb_locality} must be >= stride {stride} and a multiple of it"
            )));
        }
        if total_memory % tlb_locality != 0 {
            return Err(ChaseError::Config(format!(
                "total_memory {total_memory} must be a multiple of tlb_locality {tlb_locality}"
            )));
        }
        if total_memory % stride != 0 {
            return Err(ChaseError::Config(format!(
                "total_memory {total_memory} must be a multiple of stride {stride}"
            )));
        }

        let nr_elts = total_memory / stride;
        let nr_elts_per_tlb = tlb_locality / stride;
        let nr_tlb_groups = total_memory / tlb_locality;
        let nr_mixer_indices = stride / BASE_OBJECT_SIZE;

        Ok(Self {
            total_memory,
            stride,
            tlb_locality,
            offset,
            nr_elts,
            nr_elts_per_tlb,
            nr_tlb_groups,
            nr_mixer_indices,
        })
    }

    /// `MIXED(x, i)`: the byte offset (relative to `self.offset`) of the
    /// pointer slot inside element `x` used by mixer slot `i`.
    #[inline]
    pub fn mixed(&self, mixer: &MixerTable, x: u64, slot: usize) -> usize {
        let mixer_i = mixer.mixer_index_for(slot, x) as usize;
        let intra = mixer_i * (self.stride / self.nr_mixer_indices);
        self.offset + (x as usize) * self.stride + intra
    }

    /// Byte offset of the start of element `x` (no mixer applied).
    #[inline]
    pub fn element_offset(&self, x: u64) -> usize {
        self.offset + (x as usize) * self.stride
    }

    /// Number of threads `* parallelism` this layout's stride can host
    /// without two mixer columns colliding (`nr_mixer_indices` is the hard
    /// ceiling — each parallel chase needs its own column).
    pub fn max_parallel_chases(&self) -> usize {
        self.nr_mixer_indices
    }
}
