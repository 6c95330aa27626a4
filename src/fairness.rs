// src/fairness.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Atomic-increment fairness tool (component N): `nr_tested_cores` pinned
//! threads hammer a shared array of `nr_array_elts` atomics with one of
//! three contended-access primitives, and we report how evenly the
//! increments were distributed across threads — a CAS loop starves
//! differently than a bare `fetch_add` under contention.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::FairnessMode;
use crate::error::Result;
use crate::runner::{spawn_worker, StartBarrier, ThreadRecord};

/// One contended attempt against `cell`, returning 1 on every call (the
/// runner's per-thread counter is the increment count itself).
fn attempt(mode: FairnessMode, cell: &AtomicU64, relax: usize) -> u64 {
    match mode {
        FairnessMode::LockedCas => loop {
            let cur = cell.load(Ordering::Relaxed);
            if cell
                .compare_exchange_weak(cur, cur.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
            for _ in 0..relax {
                std::hint::spin_loop();
            }
        },
        FairnessMode::Exchange => {
            cell.swap(cell.load(Ordering::Relaxed).wrapping_add(1), Ordering::AcqRel);
        }
        FairnessMode::FetchAdd => {
            cell.fetch_add(1, Ordering::Relaxed);
        }
    }
    for _ in 0..relax {
        std::hint::spin_loop();
    }
    1
}

/// Run the fairness test for `duration`, returning one increment count per
/// tested thread (thread `i` hammers `array[i % nr_array_elts]`).
pub fn run(
    mode: FairnessMode,
    nr_relax: usize,
    nr_array_elts: usize,
    nr_tested_cores: usize,
    duration: Duration,
) -> Result<Vec<u64>> {
    let array: Arc<Vec<AtomicU64>> = Arc::new((0..nr_array_elts.max(1)).map(|_| AtomicU64::new(0)).collect());
    let barrier = Arc::new(StartBarrier::new(nr_tested_cores));
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let mut records = Vec::with_capacity(nr_tested_cores);
    let mut handles = Vec::with_capacity(nr_tested_cores);

    for i in 0..nr_tested_cores {
        let record = Arc::new(ThreadRecord::new());
        records.push(Arc::clone(&record));
        let array = Arc::clone(&array);
        let slot = i % nr_array_elts.max(1);
        let cpu = core_affinity::CoreId { id: i };
        let handle = spawn_worker(
            format!("fairness-{i}"),
            Some(cpu),
            Arc::clone(&barrier),
            record,
            Arc::clone(&stop),
            move || attempt(mode, &array[slot], nr_relax),
        )?;
        handles.push(handle);
    }

    std::thread::sleep(duration);
    stop.store(true, Ordering::Relaxed);
    for h in handles {
        let _ = h.join();
    }

    Ok(records.iter().map(|r| r.count.load(Ordering::Relaxed)).collect())
}

/// Fairness ratio: the slowest thread's share relative to the fastest
/// (`1.0` is perfectly fair, approaching `0.0` as some thread starves).
pub fn fairness_ratio(counts: &[u64]) -> f64 {
    let max = counts.iter().cloned().max().unwrap_or(0);
    let min = counts.iter().cloned().min().unwrap_or(0);
    if max == 0 {
        0.0
    } else {
        min as f64 / max as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_add_never_loses_an_increment() {
        let counts = run(FairnessMode::FetchAdd, 0, 1, 4, Duration::from_millis(30)).unwrap();
        assert_eq!(counts.len(), 4);
        assert!(counts.iter().sum::<u64>() > 0);
    }

    #[test]
    fn locked_cas_keeps_every_thread_making_progress() {
        let counts = run(FairnessMode::LockedCas, 0, 1, 4, Duration::from_millis(30)).unwrap();
        assert!(counts.iter().all(|&c| c > 0), "every thread should land at least one CAS");
    }

    #[test]
    fn fairness_ratio_is_one_when_all_threads_tie() {
        assert_eq!(fairness_ratio(&[10, 10, 10]), 1.0);
        assert_eq!(fairness_ratio(&[0, 0, 0]), 0.0);
        assert!((fairness_ratio(&[5, 10]) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn separate_array_slots_isolate_threads_from_each_other() {
        let counts = run(FairnessMode::FetchAdd, 0, 4, 4, Duration::from_millis(30)).unwrap();
        assert!(counts.iter().all(|&c| c > 0));
    }
}
