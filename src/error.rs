// src/error.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Four error kinds, mapped onto one enum: bad configuration, an OS call
//! that failed, a layout/capacity mismatch, and an invariant violation.
//!
//! Every binary's `main` matches on `Result<(), ChaseError>` and exits 1 on
//! any variant, 0 on `Ok`. There is no partial-progress / retry semantics
//! anywhere in this crate: a benchmark run is either valid or it terminates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChaseError {
    /// Unknown workload, missing workload argument, stride too small, too
    /// many threads for the stride, inconsistent `-l`/`-c` combination, etc.
    #[error("usage error: {0}")]
    Config(String),

    /// mmap, madvise, shmget/shmat, sched_*affinity, pthread_create, or any
    /// other OS-level call failed.
    #[error("OS error: {0}")]
    Os(String),

    /// The arena doesn't have enough per-element slack to place what the
    /// builder needs (a `critword` pointer, emitted branch-chase code, ...).
    #[error("arena layout error: {0}")]
    Layout(String),

    /// A correctness invariant the builder itself is supposed to guarantee
    /// did not hold (permutation check, cycle length, mixer disjointness).
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl From<anyhow::Error> for ChaseError {
    fn from(e: anyhow::Error) -> Self {
        ChaseError::Os(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChaseError>;
