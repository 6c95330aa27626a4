// src/cli.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line surfaces for all three binaries (component J), parsed with
//! `clap`'s derive API the way `openentropy-cli` builds its flag structs.
//! Flag letters are unchanged from the tool's original design — only the
//! parsing machinery behind them is new.

use clap::{Parser, ValueEnum};

use crate::error::{ChaseError, Result};

/// Parse a size with an optional `k`/`m`/`g` (binary, i.e. 1024-based)
/// suffix: `64k`, `256m`, `1g`, or a bare byte count.
pub fn parse_size_suffix(s: &str) -> std::result::Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size".into());
    }
    let (digits, mult) = match s.chars().last().unwrap().to_ascii_lowercase() {
        'k' => (&s[..s.len() - 1], 1024),
        'm' => (&s[..s.len() - 1], 1024 * 1024),
        'g' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let n: usize = digits
        .parse()
        .map_err(|_| format!("{s:?} is not a valid size (expected digits plus optional k/m/g suffix)"))?;
    n.checked_mul(mult).ok_or_else(|| format!("size {s:?} overflows usize"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MeanKind {
    Mean,
    Geomean,
}

/// `chase` — dependent-load / bandwidth / loaded-latency tool.
#[derive(Parser, Debug)]
#[command(name = "chase", version, about = "Memory hierarchy micro-benchmark: dependent-load, bandwidth, and loaded-latency modes")]
pub struct ChaseArgs {
    /// Chase workload, e.g. `simple`, `parallel4`, `work:8`, `critword:16`.
    #[arg(short = 'c', long = "workload", default_value = "simple")]
    pub workload: String,

    /// Loaded-latency mode: run one chase thread plus bandwidth threads
    /// executing the named bandwidth workload (`memcpy-libc`, `stream-triad`, ...).
    #[arg(short = 'l', long = "loaded")]
    pub loaded: Option<String>,

    /// Total arena size, e.g. `64m`, `1g`.
    #[arg(short = 'm', long = "memory", value_parser = parse_size_suffix, default_value = "64m")]
    pub total_memory: usize,

    /// Number of samples to report (the sample right after the start barrier is always discarded).
    #[arg(short = 'n', long = "samples", default_value_t = crate::constants::DEFAULT_NR_SAMPLES)]
    pub nr_samples: usize,

    /// Stride between chase elements, e.g. `64`, `256`.
    #[arg(short = 's', long = "stride", value_parser = parse_size_suffix, default_value = "64")]
    pub stride: usize,

    /// TLB locality window, e.g. `256k`.
    #[arg(short = 'T', long = "tlb-locality", value_parser = parse_size_suffix, default_value = "256k")]
    pub tlb_locality: usize,

    /// Number of worker threads (chase threads, or parallel-chase threads under `-l`).
    #[arg(short = 't', long = "threads", default_value_t = 1)]
    pub nr_threads: usize,

    /// Visit elements in address order instead of a random permutation.
    #[arg(short = 'o', long = "ordered")]
    pub ordered: bool,

    /// Shift the whole chase by `N` bytes inside the arena.
    #[arg(short = 'O', long = "offset", value_parser = parse_size_suffix, default_value = "0")]
    pub offset: usize,

    /// Backing page size (defaults to the native page size).
    #[arg(short = 'p', long = "page-size", value_parser = parse_size_suffix)]
    pub page_size: Option<usize>,

    /// Request transparent huge pages for the arena.
    #[arg(short = 'H', long = "huge-pages")]
    pub huge_pages: bool,

    /// Cache-flush scratch area size, touched before the start barrier.
    #[arg(short = 'F', long = "cache-flush", value_parser = parse_size_suffix)]
    pub cache_flush: Option<usize>,

    /// NUMA page-weighting list, `node:weight,node:weight,...`.
    #[arg(short = 'W', long = "numa-weights")]
    pub numa_weights: Option<String>,

    /// Disable thread-to-core affinity pinning.
    #[arg(short = 'X', long = "no-affinity")]
    pub no_affinity: bool,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Timestamp every reported line.
    #[arg(short = 'y', long = "timestamps")]
    pub timestamps: bool,

    /// Print the arithmetic or geometric mean instead of the minimum.
    #[arg(short = 'a', long = "aggregate", value_enum)]
    pub aggregate: Option<MeanKind>,

    /// Fixed RNG seed (visitation order and mixer table), for reproducible runs.
    #[arg(long = "seed", default_value_t = 0)]
    pub seed: u64,
}

impl ChaseArgs {
    pub fn aggregate_mode(&self) -> crate::runner::Aggregate {
        match self.aggregate {
            None => crate::runner::Aggregate::Min,
            Some(MeanKind::Mean) => crate::runner::Aggregate::Mean,
            Some(MeanKind::Geomean) => crate::runner::Aggregate::Geomean,
        }
    }

    #[cfg(feature = "numa")]
    pub fn numa_weights_parsed(&self) -> Result<Option<Vec<(usize, u64)>>> {
        match &self.numa_weights {
            None => Ok(None),
            Some(s) => crate::numa::parse_weight_list(s)
                .map(Some)
                .map_err(ChaseError::Config),
        }
    }

    #[cfg(not(feature = "numa"))]
    pub fn numa_weights_parsed(&self) -> Result<Option<Vec<(usize, u64)>>> {
        if self.numa_weights.is_some() {
            return Err(ChaseError::Config("NUMA weighting requested but the \"numa\" feature is disabled".into()));
        }
        Ok(None)
    }
}

/// `pingpong` — cache-line ping-pong latency sweep.
#[derive(Parser, Debug)]
#[command(name = "pingpong", version, about = "Cache-line ping-pong latency between pairs of cores")]
pub struct PingPongArgs {
    /// Bitmask of candidate cores to sweep over.
    #[arg(short = 'd', long = "mask")]
    pub mask: u64,

    /// Largest core-pair distance to sweep (pairs are swept `0..sweep_max`).
    #[arg(short = 's', long = "sweep-max", default_value_t = crate::constants::SWEEP_MAX)]
    pub sweep_max: usize,

    /// Seconds to run each pair's measurement for.
    #[arg(short = 't', long = "time-slice", default_value_t = 1)]
    pub time_slice_seconds: u64,

    /// Field separator character in the output table.
    #[arg(short = 'S', long = "separator", default_value_t = ',')]
    pub sep_char: char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FairnessMode {
    /// Locked compare-and-swap (`-l`).
    LockedCas,
    /// Plain atomic exchange (`-u`).
    Exchange,
    /// Atomic fetch-add (`-x`).
    FetchAdd,
}

/// `fairness` — atomic-increment fairness across cores.
#[derive(Parser, Debug)]
#[command(name = "fairness", version, about = "Cross-core fairness of a shared atomic counter")]
pub struct FairnessArgs {
    /// Contended-access primitive to measure.
    #[arg(value_enum)]
    pub mode: FairnessMode,

    /// Busy-work relaxation iterations between attempts.
    #[arg(short = 'r', long = "relax", default_value_t = 0)]
    pub nr_relax: usize,

    /// Shared array length the counter indexes into.
    #[arg(short = 's', long = "array-elts", default_value_t = 1)]
    pub nr_array_elts: usize,

    /// Number of cores to include in the test.
    #[arg(short = 'c', long = "cores")]
    pub nr_tested_cores: usize,
}
