// src/bin/chase.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `chase` binary: parses CLI flags, builds the arena and chase
//! graph(s), runs the worker threads behind a start barrier, samples their
//! counters, and prints a report. See `memchase::cli::ChaseArgs` for flags.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use memchase::arena::Arena;
use memchase::bandwidth::{self, BandwidthBuffers, BandwidthKernel};
use memchase::chase::{self, ChaseHeads, Kernel};
use memchase::cli::ChaseArgs;
use memchase::constants::{DEFAULT_SAMPLE_PERIOD_MS, NR_MIXERS_FLOOR};
use memchase::error::{ChaseError, Result};
use memchase::geometry::Layout;
use memchase::mixer::{nr_mixers, MixerTable};
use memchase::runner::{run_sampler, spawn_worker, ns_per_step, StartBarrier, ThreadRecord};

fn main() {
    let args = ChaseArgs::parse();
    memchase::init_logging(args.verbose);

    if let Err(e) = run(args) {
        eprintln!("chase: {e}");
        std::process::exit(1);
    }
}

fn run(args: ChaseArgs) -> Result<()> {
    let layout = Layout::new(args.total_memory, args.stride, args.tlb_locality, args.offset)?;
    let bandwidth_kernel = args
        .loaded
        .as_deref()
        .map(BandwidthKernel::parse)
        .transpose()?;
    // In loaded-latency mode the chase side always runs the plain dependent
    // load chase; `-c` there only selects the memory-load (`-l`) workload.
    let kernel = if bandwidth_kernel.is_some() {
        Kernel::Simple
    } else {
        Kernel::parse(&args.workload)?
    };

    let (nr_chase_threads, nr_bandwidth_threads) = match bandwidth_kernel {
        Some(_) => (1usize, args.nr_threads.saturating_sub(1).max(1)),
        None => (args.nr_threads.max(1), 0),
    };

    let heads_per_chase_thread = kernel.heads_needed().max(1);
    let slots_needed = nr_chase_threads * heads_per_chase_thread;
    if slots_needed > layout.max_parallel_chases() {
        return Err(ChaseError::Config(format!(
            "{slots_needed} concurrent chase heads requested but stride {} only provides \
             {} disjoint mixer slots (increase -s or reduce -t)",
            layout.stride,
            layout.max_parallel_chases()
        )));
    }
    let nr_mixer_slots = nr_mixers(slots_needed, 1).max(NR_MIXERS_FLOOR);
    let mixer = Arc::new(MixerTable::generate(nr_mixer_slots, layout.nr_mixer_indices, args.seed));

    let page_size = args.page_size.unwrap_or_else(Arena::native_page_size);
    let arena = Arc::new(Arena::alloc(page_size, args.huge_pages, layout.total_memory + layout.offset)?);

    #[cfg(feature = "numa")]
    if let Some(weights) = args.numa_weights_parsed()? {
        arena.bind_weighted(&weights, args.seed)?;
    }

    let nr_total_threads = nr_chase_threads + nr_bandwidth_threads;
    let barrier = Arc::new(StartBarrier::new(nr_total_threads.max(1)));
    let stop = Arc::new(AtomicBool::new(false));

    let mut chase_records = Vec::new();
    let mut chase_handles = Vec::new();

    for t in 0..nr_chase_threads {
        let first_slot = t * heads_per_chase_thread;
        let mut starts = Vec::with_capacity(heads_per_chase_thread);
        for h in 0..heads_per_chase_thread {
            let slot = first_slot + h;
            let first = chase::generate_chase(&layout, &mixer, slot, &arena, args.ordered, args.seed ^ (slot as u64))?;
            starts.push(first);
        }

        if let Kernel::Critword(n) = kernel {
            chase::plant_critword(&arena, starts[0], n)?;
        }
        if let Kernel::Critword2(n) = kernel {
            let second = chase::plant_critword2(&arena, starts[0], n);
            starts.push(second);
        }

        let record = Arc::new(ThreadRecord::new());
        chase_records.push(Arc::clone(&record));

        let arena_for_worker = Arc::clone(&arena);
        let mut heads = if starts.len() > 1 {
            ChaseHeads::many(&starts)
        } else {
            ChaseHeads::single(starts[0])
        };
        let cpu = if args.no_affinity {
            None
        } else {
            Some(core_affinity::CoreId { id: t })
        };

        let handle = spawn_worker(
            format!("chase-{t}"),
            cpu,
            Arc::clone(&barrier),
            record,
            Arc::clone(&stop),
            move || chase::run_round(&kernel, &arena_for_worker, &mut heads),
        )?;
        chase_handles.push(handle);
    }

    let mut bw_records = Vec::new();
    let mut bw_handles = Vec::new();
    if let Some(bw_kernel) = bandwidth_kernel {
        let bw_elts = (layout.total_memory / 8).max(1024);
        for t in 0..nr_bandwidth_threads {
            let record = Arc::new(ThreadRecord::new());
            bw_records.push(Arc::clone(&record));
            let cpu = if args.no_affinity {
                None
            } else {
                Some(core_affinity::CoreId { id: nr_chase_threads + t })
            };
            let mut buffers = BandwidthBuffers::new(bw_kernel, bw_elts);
            let handle = spawn_worker(
                format!("bandwidth-{t}"),
                cpu,
                Arc::clone(&barrier),
                record,
                Arc::clone(&stop),
                move || bandwidth::run_pass(bw_kernel, &mut buffers),
            )?;
            bw_handles.push(handle);
        }
    }

    let period = Duration::from_millis(DEFAULT_SAMPLE_PERIOD_MS);
    let chase_samples = run_sampler(&chase_records, period, args.nr_samples, ns_per_step);
    let bw_samples = if bw_records.is_empty() {
        Vec::new()
    } else {
        run_sampler(&bw_records, period, args.nr_samples, bandwidth::bytes_per_interval_to_mib_per_s)
    };

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in chase_handles.into_iter().chain(bw_handles) {
        let _ = h.join();
    }

    report(&args, &chase_samples, &bw_samples, nr_chase_threads)
}

/// Print the run's two columns (§4.I step 7): one chase latency — each
/// thread's per-sample `ns_per_step` aggregated, the per-thread aggregates
/// averaged across threads, the result scaled by `nr_chase_threads` — and,
/// in loaded-latency mode, one bandwidth column formed by summing every
/// bandwidth thread's reading within each sample interval before applying
/// the aggregate once to that combined series (S6: "one latency column and
/// one aggregated bandwidth column", not one line per thread).
fn report(
    args: &ChaseArgs,
    chase_samples: &[Vec<f64>],
    bw_samples: &[Vec<f64>],
    nr_chase_threads: usize,
) -> Result<()> {
    let aggregate = args.aggregate_mode();

    let mut per_thread = Vec::with_capacity(chase_samples.len());
    for (i, samples) in chase_samples.iter().enumerate() {
        if samples.is_empty() {
            return Err(ChaseError::Invariant(format!("chase thread {i} produced no samples")));
        }
        per_thread.push(aggregate.apply(samples));
    }
    let mean_across_threads = per_thread.iter().sum::<f64>() / per_thread.len() as f64;
    let chase_value = mean_across_threads * nr_chase_threads as f64;
    println!("chase: {chase_value:.3} ns/access");

    if !bw_samples.is_empty() {
        let nr_samples = bw_samples[0].len();
        let mut combined = vec![0.0f64; nr_samples];
        for samples in bw_samples {
            for (j, &v) in samples.iter().enumerate() {
                combined[j] += v;
            }
        }
        let value = aggregate.apply(&combined);
        println!("bandwidth: {value:.1} MiB/s");
    }
    Ok(())
}
