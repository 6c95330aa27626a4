// src/constants.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sizing constants shared across the arena, mixer, and runner.

/// Minimum power-of-two mixer table width, regardless of `nr_threads * parallelism`.
///
/// The table is sized to the actual thread/parallelism product as long as it
/// stays a power of two and never drops below this floor (see DESIGN.md).
pub const NR_MIXERS_FLOOR: usize = 64;

/// Byte padding applied to every per-thread record so workers and the sampler
/// never share a cache line (§5).
pub const AVOID_FALSE_SHARING: usize = 1024;

/// Hard cap on the number of interleaved parallel-chase heads a single thread
/// can advance (`parallelN` kernels, `critword2`).
pub const MAX_PARALLEL: usize = 10;

/// Default sampling period between `count` swaps, in milliseconds.
pub const DEFAULT_SAMPLE_PERIOD_MS: u64 = 500;

/// Default number of retained samples (the sample taken immediately after the
/// startup barrier is always discarded on top of this).
pub const DEFAULT_NR_SAMPLES: usize = 5;

/// Default total arena size when `-m` is not given (64 MiB).
pub const DEFAULT_TOTAL_MEMORY: usize = 64 * 1024 * 1024;

/// Default stride in bytes (one cache line on most current hardware).
pub const DEFAULT_STRIDE: usize = 64;

/// Default TLB locality window in bytes (64 pages of 4 KiB).
pub const DEFAULT_TLB_LOCALITY: usize = 64 * 4096;

/// Default cache-flush scratch area size, touched between cycle construction
/// and the start barrier when `-F` is requested.
pub const DEFAULT_CACHE_FLUSH_SIZE: usize = 8 * 1024 * 1024;

/// Size of the `SWEEP_MAX`-padded global counter used by the fairness tool.
pub const SWEEP_MAX: usize = 64;
