// src/runner.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The thread runner (component I): spawns pinned worker threads behind a
//! startup barrier, then samples their per-thread counters at a fixed
//! period, discarding the first sample and aggregating the rest per `-a`.
//!
//! Workers and the sampler share `ThreadRecord`s (one `AtomicU64` each,
//! padded to a full cache line) rather than a channel, so the hot loop in
//! `chase::kernel::run_round` / `bandwidth::run_pass` never blocks on
//! anything but memory.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::constants::AVOID_FALSE_SHARING;
use crate::error::{ChaseError, Result};

const PAD: usize = AVOID_FALSE_SHARING - std::mem::size_of::<AtomicU64>();

/// A single worker's step counter, padded so no two threads' records share a
/// cache line (§5).
#[repr(C)]
pub struct ThreadRecord {
    pub count: AtomicU64,
    _pad: [u8; PAD],
}

impl ThreadRecord {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            _pad: [0; PAD],
        }
    }
}

impl Default for ThreadRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// A reusable rendezvous point: every worker calls `wait()` once after
/// pinning itself, and none proceeds to its hot loop until all have
/// arrived. Built on `Mutex`+`Condvar` rather than `std::sync::Barrier`
/// because the number of participants isn't known until CLI parsing
/// resolves thread/parallelism counts at runtime.
pub struct StartBarrier {
    state: Mutex<usize>,
    cvar: Condvar,
    total: usize,
}

impl StartBarrier {
    pub fn new(total: usize) -> Self {
        Self {
            state: Mutex::new(0),
            cvar: Condvar::new(),
            total,
        }
    }

    pub fn wait(&self) {
        let mut arrived = self.state.lock().unwrap();
        *arrived += 1;
        if *arrived >= self.total {
            self.cvar.notify_all();
        } else {
            while *arrived < self.total {
                arrived = self.cvar.wait(arrived).unwrap();
            }
        }
    }
}

/// Spawn one worker thread: optionally pin it to `cpu`, wait at `barrier`,
/// then repeatedly call `step` and add its return value to `record.count`
/// until `stop` is set.
pub fn spawn_worker<F>(
    label: String,
    cpu: Option<core_affinity::CoreId>,
    barrier: Arc<StartBarrier>,
    record: Arc<ThreadRecord>,
    stop: Arc<AtomicBool>,
    mut step: F,
) -> Result<JoinHandle<()>>
where
    F: FnMut() -> u64 + Send + 'static,
{
    std::thread::Builder::new()
        .name(label)
        .spawn(move || {
            if let Some(cpu) = cpu {
                core_affinity::set_for_current(cpu);
            }
            barrier.wait();
            while !stop.load(Ordering::Relaxed) {
                let added = step();
                record.count.fetch_add(added, Ordering::Relaxed);
            }
        })
        .map_err(|e| ChaseError::Os(format!("pthread_create failed: {e}")))
}

/// Sample every record in `records` every `period`, discarding the first
/// interval (workers are still ramping up right after the barrier opens),
/// converting each interval's raw count into caller-defined units via
/// `to_metric`. Returns one `Vec<f64>` of `nr_samples` readings per record.
pub fn run_sampler<M>(
    records: &[Arc<ThreadRecord>],
    period: Duration,
    nr_samples: usize,
    to_metric: M,
) -> Vec<Vec<f64>>
where
    M: Fn(u64, Duration) -> f64,
{
    let mut out: Vec<Vec<f64>> = vec![Vec::with_capacity(nr_samples); records.len()];

    std::thread::sleep(period);
    for r in records {
        r.count.swap(0, Ordering::Relaxed);
    }

    for _ in 0..nr_samples {
        let start = Instant::now();
        std::thread::sleep(period);
        let elapsed = start.elapsed();
        for (i, r) in records.iter().enumerate() {
            let c = r.count.swap(0, Ordering::Relaxed);
            out[i].push(to_metric(c, elapsed));
        }
    }
    out
}

/// The `-a` aggregation mode applied to a record's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Min,
    Mean,
    Geomean,
}

impl Aggregate {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "min" => Ok(Self::Min),
            "mean" => Ok(Self::Mean),
            "geomean" => Ok(Self::Geomean),
            other => Err(ChaseError::Config(format!("unknown aggregate mode {other:?}"))),
        }
    }

    pub fn apply(&self, values: &[f64]) -> f64 {
        assert!(!values.is_empty(), "aggregate over an empty sample set");
        match self {
            Aggregate::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Aggregate::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Aggregate::Geomean => {
                let log_sum: f64 = values.iter().map(|v| v.max(f64::MIN_POSITIVE).ln()).sum();
                (log_sum / values.len() as f64).exp()
            }
        }
    }
}

/// Convert a raw dependent-load step count over `elapsed` into nanoseconds
/// per step (the chase tool's primary metric, §4.I).
pub fn ns_per_step(count: u64, elapsed: Duration) -> f64 {
    if count == 0 {
        return f64::INFINITY;
    }
    elapsed.as_nanos() as f64 / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn thread_record_is_padded_to_a_full_line() {
        assert_eq!(std::mem::size_of::<ThreadRecord>(), AVOID_FALSE_SHARING);
    }

    #[test]
    fn start_barrier_releases_all_waiters_together() {
        let barrier = Arc::new(StartBarrier::new(4));
        let arrived = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let barrier = Arc::clone(&barrier);
            let arrived = Arc::clone(&arrived);
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                arrived.fetch_add(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(arrived.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn spawn_worker_accumulates_steps_until_stopped() {
        let barrier = Arc::new(StartBarrier::new(1));
        let record = Arc::new(ThreadRecord::new());
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_worker(
            "test-worker".into(),
            None,
            Arc::clone(&barrier),
            Arc::clone(&record),
            Arc::clone(&stop),
            || 7u64,
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        assert!(record.count.load(Ordering::Relaxed) >= 7);
        assert_eq!(record.count.load(Ordering::Relaxed) % 7, 0);
    }

    #[test]
    fn aggregate_modes_match_reference_values() {
        let values = vec![1.0, 2.0, 4.0];
        assert_eq!(Aggregate::Min.apply(&values), 1.0);
        assert!((Aggregate::Mean.apply(&values) - 7.0 / 3.0).abs() < 1e-9);
        assert!((Aggregate::Geomean.apply(&values) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn ns_per_step_handles_zero_count() {
        assert_eq!(ns_per_step(0, Duration::from_secs(1)), f64::INFINITY);
        assert!(ns_per_step(1_000_000_000, Duration::from_secs(1)) - 1.0 < 1e-6);
    }
}
