// tests/scenarios.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-cutting integration tests that need a real arena, exercising the
//! public library surface the way `chase`'s `main` wires it together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use memchase::arena::Arena;
use memchase::bandwidth::{self, BandwidthBuffers, BandwidthKernel};
use memchase::chase::{self, ChaseHeads, Kernel};
use memchase::geometry::Layout;
use memchase::mixer::MixerTable;
use memchase::runner::{run_sampler, spawn_worker, ns_per_step, StartBarrier, ThreadRecord};

#[test]
fn single_thread_simple_chase_reports_a_finite_latency() {
    let layout = Layout::new(1 << 20, 64, 64 * 4096, 0).unwrap();
    let mixer = Arc::new(MixerTable::generate(64, layout.nr_mixer_indices, 1));
    let arena = Arc::new(Arena::alloc(Arena::native_page_size(), false, layout.total_memory).unwrap());

    let first = chase::generate_chase(&layout, &mixer, 0, &arena, false, 0).unwrap();

    let barrier = Arc::new(StartBarrier::new(1));
    let stop = Arc::new(AtomicBool::new(false));
    let record = Arc::new(ThreadRecord::new());

    let arena_for_worker = Arc::clone(&arena);
    let mut heads = ChaseHeads::single(first);
    let handle = spawn_worker(
        "single-chase".into(),
        None,
        Arc::clone(&barrier),
        Arc::clone(&record),
        Arc::clone(&stop),
        move || chase::run_round(&Kernel::Simple, &arena_for_worker, &mut heads),
    )
    .unwrap();

    let samples = run_sampler(&[Arc::clone(&record)], Duration::from_millis(10), 3, ns_per_step);
    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].len(), 3);
    assert!(samples[0].iter().all(|&v| v.is_finite() && v > 0.0));
}

#[test]
fn parallel_chases_across_threads_use_disjoint_mixer_slots() {
    let layout = Layout::new(256 * 1024, 256, 256 * 1024, 0).unwrap();
    let mixer = Arc::new(MixerTable::generate(64, layout.nr_mixer_indices, 2));
    let arena = Arc::new(Arena::alloc(Arena::native_page_size(), false, layout.total_memory).unwrap());

    let nr_threads = 4;
    let mut firsts = Vec::new();
    for t in 0..nr_threads {
        firsts.push(chase::generate_chase(&layout, &mixer, t, &arena, false, t as u64).unwrap());
    }
    // Every thread's starting offset must be distinct: they live in
    // disjoint mixer columns even though they share every element's stride.
    let mut sorted = firsts.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), nr_threads);
}

#[test]
fn loaded_latency_reports_one_latency_and_one_bandwidth_column() {
    let layout = Layout::new(256 * 1024, 64, 64 * 4096, 0).unwrap();
    let mixer = Arc::new(MixerTable::generate(64, layout.nr_mixer_indices, 9));
    let arena = Arc::new(Arena::alloc(Arena::native_page_size(), false, layout.total_memory).unwrap());
    let first = chase::generate_chase(&layout, &mixer, 0, &arena, false, 3).unwrap();

    let barrier = Arc::new(StartBarrier::new(4));
    let stop = Arc::new(AtomicBool::new(false));

    let chase_record = Arc::new(ThreadRecord::new());
    let arena_for_worker = Arc::clone(&arena);
    let mut heads = ChaseHeads::single(first);
    let chase_handle = spawn_worker(
        "loaded-chase".into(),
        None,
        Arc::clone(&barrier),
        Arc::clone(&chase_record),
        Arc::clone(&stop),
        move || chase::run_round(&Kernel::Simple, &arena_for_worker, &mut heads),
    )
    .unwrap();

    let mut bw_records = Vec::new();
    let mut bw_handles = Vec::new();
    for _ in 0..3 {
        let record = Arc::new(ThreadRecord::new());
        bw_records.push(Arc::clone(&record));
        let mut buffers = BandwidthBuffers::new(BandwidthKernel::MemcpyLibc, 4096);
        let handle = spawn_worker(
            "loaded-bandwidth".into(),
            None,
            Arc::clone(&barrier),
            record,
            Arc::clone(&stop),
            move || bandwidth::run_pass(BandwidthKernel::MemcpyLibc, &mut buffers),
        )
        .unwrap();
        bw_handles.push(handle);
    }

    let latency_samples = run_sampler(&[chase_record], Duration::from_millis(10), 2, ns_per_step);
    let bandwidth_samples = run_sampler(&bw_records, Duration::from_millis(10), 2, bandwidth::bytes_per_interval_to_mib_per_s);

    stop.store(true, Ordering::Relaxed);
    chase_handle.join().unwrap();
    for h in bw_handles {
        h.join().unwrap();
    }

    assert_eq!(latency_samples.len(), 1, "exactly one latency column");
    assert!(latency_samples[0].iter().all(|&v| v.is_finite()));

    // The report combines every bandwidth thread's per-interval reading into
    // one aggregated column (S6) rather than printing one line per thread.
    let nr_samples = bandwidth_samples[0].len();
    let mut combined_bandwidth = vec![0.0f64; nr_samples];
    for samples in &bandwidth_samples {
        assert_eq!(samples.len(), nr_samples);
        for (j, &v) in samples.iter().enumerate() {
            combined_bandwidth[j] += v;
        }
    }
    assert_eq!(combined_bandwidth.len(), 2, "one aggregated bandwidth column per sample interval");
    assert!(combined_bandwidth.iter().all(|&v| v >= 0.0));
}
