// src/pingpong.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cache-line ping-pong latency tool (component M): two pinned threads pass
//! a single cache line back and forth as fast as possible; half the
//! round-trip time is the line's migration latency between that pair of
//! cores. Swept across every candidate pair under a core mask.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::constants::AVOID_FALSE_SHARING;
use crate::error::{ChaseError, Result};

const PAD: usize = AVOID_FALSE_SHARING - 1;

/// The shared line the two threads hand back and forth. `turn` says whose
/// move it is; `handoffs` is written only by the thread that just moved, so
/// the sampler can read it from either side without contending for it.
#[repr(C)]
struct PingPongCell {
    turn: AtomicU8,
    _pad: [u8; PAD],
}

impl PingPongCell {
    fn new() -> Self {
        Self {
            turn: AtomicU8::new(0),
            _pad: [0; PAD],
        }
    }
}

/// Run one pair's measurement for `duration`, returning nanoseconds per
/// one-way handoff (i.e. half the measured round-trip ping-pong rate).
pub fn measure_pair(core_a: core_affinity::CoreId, core_b: core_affinity::CoreId, duration: Duration) -> Result<f64> {
    let cell = Arc::new(PingPongCell::new());
    let count = Arc::new(AtomicU64::new(0));
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let handle_a = {
        let cell = Arc::clone(&cell);
        let count = Arc::clone(&count);
        let stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .spawn(move || {
                core_affinity::set_for_current(core_a);
                while !stop.load(Ordering::Relaxed) {
                    while cell.turn.load(Ordering::Acquire) != 0 {
                        if stop.load(Ordering::Relaxed) {
                            return;
                        }
                        std::hint::spin_loop();
                    }
                    count.fetch_add(1, Ordering::Relaxed);
                    cell.turn.store(1, Ordering::Release);
                }
            })
            .map_err(|e| ChaseError::Os(format!("pthread_create failed: {e}")))?
    };

    let handle_b = {
        let cell = Arc::clone(&cell);
        let stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .spawn(move || {
                core_affinity::set_for_current(core_b);
                while !stop.load(Ordering::Relaxed) {
                    while cell.turn.load(Ordering::Acquire) != 1 {
                        if stop.load(Ordering::Relaxed) {
                            return;
                        }
                        std::hint::spin_loop();
                    }
                    cell.turn.store(0, Ordering::Release);
                }
            })
            .map_err(|e| ChaseError::Os(format!("pthread_create failed: {e}")))?
    };

    let start = Instant::now();
    std::thread::sleep(duration);
    stop.store(true, Ordering::Relaxed);
    // Nudge both spinners past their wait loops so they observe `stop`.
    cell.turn.store(2, Ordering::Release);
    let _ = handle_a.join();
    let _ = handle_b.join();
    let elapsed = start.elapsed();

    let handoffs = count.load(Ordering::Relaxed);
    if handoffs == 0 {
        return Ok(f64::INFINITY);
    }
    // Each counted handoff corresponds to one full round trip (A -> B -> A).
    Ok(elapsed.as_nanos() as f64 / (handoffs as f64 * 2.0))
}

/// Sweep every pair of cores set in `mask` whose index distance is less
/// than `sweep_max`, returning one `sep`-separated row per pair:
/// `core_a<sep>core_b<sep>ns_per_handoff`.
pub fn sweep(mask: u64, sweep_max: usize, time_slice: Duration, sep: char) -> Vec<String> {
    let cores: Vec<usize> = (0..64).filter(|i| mask & (1u64 << i) != 0).collect();
    let mut rows = Vec::new();
    for (ai, &a) in cores.iter().enumerate() {
        for &b in cores.iter().skip(ai + 1) {
            if b.abs_diff(a) >= sweep_max {
                continue;
            }
            let ns = measure_pair(core_affinity::CoreId { id: a }, core_affinity::CoreId { id: b }, time_slice)
                .unwrap_or(f64::NAN);
            rows.push(format!("{a}{sep}{b}{sep}{ns:.2}"));
        }
    }
    rows
}
