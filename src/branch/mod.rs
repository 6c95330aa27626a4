// src/branch/mod.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Branch-chase rewriter (component H): instead of chasing pointers through
//! data memory, rewrite each element of an already-built chase cycle, in
//! place, into a small stub of machine code, and let the CPU "chase" by
//! executing an indirect jump from stub to stub. This isolates
//! branch-target-buffer / indirect-branch-predictor behavior from the
//! load-use latency the data chase measures.
//!
//! The stub for element `x` is written directly over that element's
//! pointer slot (the same bytes `chase::graph::generate_chase` linked the
//! cycle through): bytes `[0, 8)` hold the overwritten pointer word, bytes
//! `[8, stub_size)` are slack the element reserves for code and must still
//! be zero (the arena's mmap-zero guarantee) at rewrite time. No separate
//! code buffer is used — the arena itself is made executable.
//!
//! Each architecture backend is a capability: `supports()` reports whether
//! this process can emit and run stubs for the host architecture, `emit()`
//! writes one stub into a caller-provided buffer. `mod.rs` walks the cycle,
//! verifies the zero-slack precondition, picks the effective chunk size,
//! and owns the in-arena rewrite; the backends only know how to encode one
//! stub.

#[cfg(target_arch = "x86_64")]
mod x86_64_emitter;
#[cfg(target_arch = "aarch64")]
mod aarch64_emitter;

#[cfg(target_arch = "x86_64")]
pub use x86_64_emitter::X86_64Emitter;
#[cfg(target_arch = "aarch64")]
pub use aarch64_emitter::Aarch64Emitter;

use crate::arena::Arena;
use crate::error::{ChaseError, Result};

/// A per-architecture code generator for one chase-stub shape.
pub trait BranchChaseEmitter {
    /// Whether this backend can run on the current host.
    fn supports(&self) -> bool;

    /// Fixed size in bytes of every stub this backend emits.
    fn stub_size(&self) -> usize;

    /// Write one stub into `code` (exactly `stub_size()` bytes). If
    /// `terminal` is true the stub returns to its caller instead of jumping
    /// to `next_addr` (used to close out a chunk).
    fn emit(&self, code: &mut [u8], next_addr: u64, terminal: bool);
}

/// The emitter backend for the architecture this binary was built for, or
/// `None` on architectures without a backend (the runner falls back to a
/// data-chase-only plan in that case).
pub fn default_emitter() -> Option<Box<dyn BranchChaseEmitter>> {
    #[cfg(target_arch = "x86_64")]
    {
        let e = X86_64Emitter;
        if e.supports() {
            return Some(Box::new(e));
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        let e = Aarch64Emitter;
        if e.supports() {
            return Some(Box::new(e));
        }
    }
    None
}

/// Largest power-of-two divisor of `cycle_len` closest to `requested`
/// (§4.H "choose an effective chunk size that is a power-of-two divisor of
/// the cycle length closest to the requested chunk size"). Ties are broken
/// toward the larger divisor (fewer returns to the caller per lap).
pub fn effective_chunk_size(cycle_len: usize, requested: usize) -> usize {
    let requested = requested.max(1);
    let mut best = 1usize;
    let mut best_diff = usize::MAX;
    let mut p = 1usize;
    while p <= cycle_len {
        if cycle_len % p == 0 {
            let diff = requested.abs_diff(p);
            if diff < best_diff || (diff == best_diff && p > best) {
                best = p;
                best_diff = diff;
            }
        }
        p *= 2;
    }
    best
}

/// Rewrite the pointer-chase cycle starting at `head` (as returned by
/// `chase::graph::generate_chase`, a byte offset into `arena`) into a chain
/// of executable branch-chase stubs, in place, over the same pointer slots
/// the cycle already uses.
///
/// `nr_elts` is the cycle's length. Every element is visited, in cycle
/// order, exactly once: first to confirm the cycle actually closes after
/// `nr_elts` steps and that its code slack (bytes `[8, stub_size)` past the
/// pointer word) is still zero everywhere — a fatal precondition per §4.H,
/// since a non-zero slack byte means something else (an `incr` counter, a
/// `critword` secondary pointer) is sharing those bytes and would be
/// silently clobbered — then again to actually emit each stub.
///
/// `requested_chunk_size` is adjusted to the nearest power-of-two divisor
/// of `nr_elts` (see [`effective_chunk_size`]) before use: every stub but
/// the last in a chunk jumps to the next stub; the last stub in a chunk
/// returns to its caller with the address of the next chunk's first stub
/// (wrapping to the head once the whole cycle completes), so a caller can
/// keep invoking chunk by chunk and still walk every element of the
/// original cycle exactly once per lap.
///
/// Returns the absolute address of the first stub (call it through
/// [`call_stub`]).
pub fn convert_pointers_to_branches(
    emitter: &dyn BranchChaseEmitter,
    arena: &Arena,
    head: u64,
    nr_elts: usize,
    requested_chunk_size: usize,
) -> Result<u64> {
    let stub_size = emitter.stub_size();

    // Walk the cycle once in visitation order, collecting each element's
    // pointer-slot offset (property 3: cycle completeness).
    let mut offsets = Vec::with_capacity(nr_elts);
    let mut cur = head;
    for _ in 0..nr_elts {
        offsets.push(cur);
        // SAFETY: `cur` was produced by `generate_chase` (or, on later
        // iterations, by reading a not-yet-rewritten pointer slot on the
        // same cycle) and stays in-arena.
        cur = unsafe { arena.read_word(cur as usize) };
    }
    if cur != head {
        return Err(ChaseError::Invariant(
            "branch-chase cycle did not close after nr_elts steps".into(),
        ));
    }

    for &off in &offsets {
        // SAFETY: `off` is a live pointer-slot offset on the cycle;
        // `stub_size - 8` more bytes following it are the code slack the
        // layout is expected to reserve.
        let slack = unsafe { arena.read_bytes(off as usize + 8, stub_size - 8) };
        if slack.iter().any(|&b| b != 0) {
            return Err(ChaseError::Layout(format!(
                "element at offset {off} has non-zero branch-chase slack bytes [8,{stub_size}); \
                 increase stride so each element reserves {stub_size} zero bytes for code"
            )));
        }
    }

    let chunk_size = effective_chunk_size(nr_elts, requested_chunk_size);
    arena.make_executable()?;

    let mut buf = vec![0u8; stub_size];
    for (i, &off) in offsets.iter().enumerate() {
        let is_chunk_end = (i + 1) % chunk_size == 0 || i + 1 == nr_elts;
        let next_off = offsets[(i + 1) % nr_elts];
        let next_addr = arena.as_ptr() as u64 + next_off;
        emitter.emit(&mut buf, next_addr, is_chunk_end);
        // SAFETY: the zero-slack check above confirmed `off + stub_size`
        // bytes are reserved and unused; branch-chase runs single-threaded
        // so nothing else touches this arena during the rewrite.
        unsafe {
            arena.write_bytes(off as usize, &buf);
        }
    }

    Ok(arena.as_ptr() as u64 + head)
}

/// Invoke the stub at absolute address `addr` (as returned by
/// `convert_pointers_to_branches`, or by a previous call to this function),
/// returning the address of the next chunk's entry stub.
///
/// # Safety
/// `addr` must address a live, fully-written stub.
#[inline]
pub unsafe fn call_stub(addr: u64) -> u64 {
    let f: extern "C" fn() -> u64 = std::mem::transmute(addr as *const ());
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A plain `nr_elts`-element forward-linked cycle at stride `stride`
    /// starting at offset 0 — the same forward-link convention
    /// `chase::graph::link_cycle` uses, built directly so every element's
    /// pointer slot sits at a stride-aligned offset with no mixer intra
    /// offset, which is what a branch-chase element needs: the stub must
    /// fit inside its own element without touching its neighbor's bytes.
    fn small_cycle(stride: usize, nr_elts: usize) -> (Arena, u64) {
        let total = stride * nr_elts;
        let arena = Arena::alloc(Arena::native_page_size(), false, total).unwrap();
        for i in 0..nr_elts {
            let cur = (i * stride) as u64;
            let next = (((i + 1) % nr_elts) * stride) as u64;
            // SAFETY: cur/next are both < total, within the arena.
            unsafe {
                arena.write_word(cur as usize, next);
            }
        }
        (arena, 0u64)
    }

    #[test]
    fn effective_chunk_size_exact_divisor_matches_request() {
        assert_eq!(effective_chunk_size(16, 4), 4);
        assert_eq!(effective_chunk_size(1, 1), 1);
    }

    #[test]
    fn effective_chunk_size_falls_back_to_closest_power_of_two_divisor() {
        // divisors of 8 that are powers of two: 1, 2, 4, 8; closest to 3 is
        // a tie between 2 and 4, broken toward the larger.
        assert_eq!(effective_chunk_size(8, 3), 4);
    }

    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    #[test]
    fn branch_chase_rewrites_the_real_cycle_in_place_and_closes_the_lap() {
        let emitter = default_emitter().expect("host architecture has a branch-chase backend");
        let stub_size = emitter.stub_size();
        let stride = 64;
        assert!(stride >= stub_size);
        let (arena, head) = small_cycle(stride, 4);

        let first = convert_pointers_to_branches(emitter.as_ref(), &arena, head, 4, 2).unwrap();
        assert_eq!(first, arena.as_ptr() as u64 + head);

        // Drive the whole cycle two chunks at a time and confirm it laps
        // back to the head, visiting every element of the original cycle.
        // SAFETY: every stub on the 4-element cycle was written above.
        let after_first_chunk = unsafe { call_stub(first) };
        // SAFETY: see above.
        let after_second_chunk = unsafe { call_stub(after_first_chunk) };
        assert_eq!(after_second_chunk, first);
    }

    #[test]
    fn rejects_a_cycle_whose_slack_bytes_are_not_zero() {
        let emitter = match default_emitter() {
            Some(e) => e,
            None => return,
        };
        let (arena, head) = small_cycle(64, 4);

        // Simulate another kernel (e.g. `incr`) having already written into
        // this element's code slack.
        // SAFETY: head+8 is within the 64-byte element and not yet used by
        // anything but the pointer word.
        unsafe {
            arena.write_word(head as usize + 8, 0xdead_beef);
        }

        let err = convert_pointers_to_branches(emitter.as_ref(), &arena, head, 4, 2);
        assert!(matches!(err, Err(ChaseError::Layout(_))));
    }
}
