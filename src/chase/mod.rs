// src/chase/mod.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dependent-load micro-benchmark: cycle construction (component E) plus
//! the kernels that walk it (component F).

pub mod graph;
pub mod kernel;

pub use graph::{generate_chase, generate_chase_long, walk_cycle};
pub use kernel::{plant_critword, plant_critword2, run_round, ChaseHeads, Kernel, PrefetchHint};
