// src/lib.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory hierarchy micro-benchmarks: dependent-load pointer chasing under
//! single- and multi-threaded contention, sustained streaming bandwidth,
//! loaded latency (a chase thread alongside bandwidth threads), cache-line
//! ping-pong latency, and cross-core atomic-increment fairness.
//!
//! The three binaries in `src/bin/` are thin CLI wrappers over this
//! library; the actual measurement logic lives here so it can be unit- and
//! integration-tested without spawning a process per scenario.

pub mod arena;
pub mod bandwidth;
pub mod branch;
pub mod chase;
pub mod cli;
pub mod constants;
pub mod error;
pub mod fairness;
pub mod geometry;
pub mod mixer;
#[cfg(feature = "numa")]
pub mod numa;
pub mod perm;
pub mod pingpong;
pub mod rng;
pub mod runner;

pub use error::{ChaseError, Result};

/// Install the crate's `tracing` subscriber, honoring `RUST_LOG` and the
/// CLI's `-v` repeat count (each `-v` lowers the default filter by one
/// level: warn -> info -> debug -> trace).
pub fn init_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
