// src/chase/kernel.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chase kernels (component F): the tight inner loops a worker thread runs
//! forever, each advancing the per-thread `count` by its unroll factor `U`
//! as the only side effect on the hot path besides the dependent loads
//! themselves (and, for `incr`/`critword*`, one store per step).
//!
//! Dispatch is a tagged-variant `Kernel` enum matched once per outer-loop
//! iteration (a handful of times per millisecond, not once per dependent
//! load) — the per-variant hot loops below are themselves branch-free
//! beyond the loop counter, per Design Notes §9's "model as a tagged
//! variant of `Kernel`" guidance.

use crate::arena::Arena;
use crate::error::{ChaseError, Result};

/// Target unroll factor every kernel variant aims for (`U ~= 200`, §4.F).
pub const TARGET_UNROLL: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchHint {
    T0,
    T1,
    T2,
    Nta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Simple,
    /// `parallelN`, `N` independent chase heads advanced once per inner step.
    Parallel(usize),
    /// `work:K`, `K` trivial ALU ops mixed with the pointer value between
    /// dereferences.
    Work(usize),
    Incr,
    Prefetch(PrefetchHint),
    Movdqa { non_temporal: bool },
    /// `critword:N`, single chase reading both `p` and `p+N` each step.
    Critword(usize),
    /// `critword2:N`, two parallel chases offset by `N` bytes.
    Critword2(usize),
}

impl Kernel {
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, arg) = match spec.split_once(':') {
            Some((n, a)) => (n, Some(a)),
            None => (spec, None),
        };

        let need_arg = |a: Option<&str>, kind: &str| -> Result<usize> {
            a.ok_or_else(|| ChaseError::Config(format!("workload {kind} requires an argument")))?
                .parse::<usize>()
                .map_err(|_| ChaseError::Config(format!("workload {kind} argument must be an integer")))
        };

        match name {
            "simple" => Ok(Kernel::Simple),
            "incr" => Ok(Kernel::Incr),
            "prefetcht0" => Ok(Kernel::Prefetch(PrefetchHint::T0)),
            "prefetcht1" => Ok(Kernel::Prefetch(PrefetchHint::T1)),
            "prefetcht2" => Ok(Kernel::Prefetch(PrefetchHint::T2)),
            "prefetchnta" => Ok(Kernel::Prefetch(PrefetchHint::Nta)),
            "movdqa" => Ok(Kernel::Movdqa { non_temporal: false }),
            "movntdqa" => Ok(Kernel::Movdqa { non_temporal: true }),
            "work" => Ok(Kernel::Work(need_arg(arg, "work")?)),
            "critword" => Ok(Kernel::Critword(need_arg(arg, "critword")?)),
            "critword2" => Ok(Kernel::Critword2(need_arg(arg, "critword2")?)),
            other if other.starts_with("parallel") => {
                let n: usize = other[8..]
                    .parse()
                    .map_err(|_| ChaseError::Config(format!("unknown workload {spec:?}")))?;
                if !(2..=crate::constants::MAX_PARALLEL).contains(&n) {
                    return Err(ChaseError::Config(format!(
                        "parallel{n} out of range 2..={}",
                        crate::constants::MAX_PARALLEL
                    )));
                }
                Ok(Kernel::Parallel(n))
            }
            other => Err(ChaseError::Config(format!("unknown workload {other:?}"))),
        }
    }

    /// Number of independent `generate_chase` calls this kernel needs.
    /// `critword2`'s second head is derived from the first by
    /// `plant_critword2` (an offset parallel cycle), not a second
    /// independent call, so it still only needs one.
    pub fn heads_needed(&self) -> usize {
        match self {
            Kernel::Parallel(n) => *n,
            _ => 1,
        }
    }

    /// Per-inner-step repeat count so the total per-call unroll stays close
    /// to `TARGET_UNROLL` (`U = N * u(N)`, §4.F).
    fn inner_reps(&self) -> usize {
        match self {
            Kernel::Parallel(n) => (TARGET_UNROLL / n).max(1),
            _ => TARGET_UNROLL,
        }
    }

    /// Total unroll factor `U` added to `count` per `run_round` call.
    pub fn unroll_factor(&self) -> u64 {
        match self {
            Kernel::Parallel(n) => (n * self.inner_reps()) as u64,
            Kernel::Critword2(_) => self.inner_reps() as u64,
            _ => self.inner_reps() as u64,
        }
    }
}

/// Mutable chase-head state a worker advances in place. `heads[0..n)` hold
/// byte offsets into the arena; unused slots are `u64::MAX`.
pub struct ChaseHeads {
    pub heads: [u64; crate::constants::MAX_PARALLEL],
    pub n: usize,
}

impl ChaseHeads {
    pub fn single(start: u64) -> Self {
        let mut heads = [u64::MAX; crate::constants::MAX_PARALLEL];
        heads[0] = start;
        Self { heads, n: 1 }
    }

    pub fn many(starts: &[u64]) -> Self {
        let mut heads = [u64::MAX; crate::constants::MAX_PARALLEL];
        heads[..starts.len()].copy_from_slice(starts);
        Self { heads, n: starts.len() }
    }
}

/// Run one round of the kernel's inner loop, advancing `state.heads` in
/// place and returning the unroll factor to add to the per-thread counter.
///
/// This is the function the runner calls in a tight `loop {}` from the
/// worker thread; nothing else happens on that thread's hot path.
#[inline]
pub fn run_round(kernel: &Kernel, arena: &Arena, state: &mut ChaseHeads) -> u64 {
    match kernel {
        Kernel::Simple => {
            let mut p = state.heads[0];
            for _ in 0..TARGET_UNROLL {
                // SAFETY: p is always a live offset inside the chase cycle.
                p = unsafe { arena.read_word(p as usize) };
            }
            state.heads[0] = p;
            TARGET_UNROLL as u64
        }
        Kernel::Parallel(n) => {
            let reps = (TARGET_UNROLL / n).max(1);
            for _ in 0..reps {
                for i in 0..*n {
                    let p = state.heads[i];
                    // SAFETY: see Kernel::Simple.
                    state.heads[i] = unsafe { arena.read_word(p as usize) };
                }
            }
            (n * reps) as u64
        }
        Kernel::Work(k) => {
            let mut p = state.heads[0];
            let mut mix: u64 = 0;
            for _ in 0..TARGET_UNROLL {
                // SAFETY: see Kernel::Simple.
                let next = unsafe { arena.read_word(p as usize) };
                for _ in 0..*k {
                    mix = mix.wrapping_add(p).wrapping_mul(2654435761);
                }
                std::hint::black_box(mix);
                p = next;
            }
            state.heads[0] = p;
            TARGET_UNROLL as u64
        }
        Kernel::Incr => {
            let mut p = state.heads[0];
            for _ in 0..TARGET_UNROLL {
                // Counter field sits 8 bytes after the pointer slot.
                // SAFETY: elements reserve `base_object_size` = 12 bytes for
                // this kernel (pointer + u32 counter), enforced by the
                // layout/element-size computation at runner setup.
                unsafe {
                    let counter_addr = arena.as_ptr().add(p as usize + 8) as *mut u32;
                    std::ptr::write(counter_addr, std::ptr::read(counter_addr).wrapping_add(1));
                    p = arena.read_word(p as usize);
                }
            }
            state.heads[0] = p;
            TARGET_UNROLL as u64
        }
        Kernel::Prefetch(hint) => {
            let mut p = state.heads[0];
            for _ in 0..TARGET_UNROLL {
                prefetch(arena, p as usize, *hint);
                // SAFETY: see Kernel::Simple.
                p = unsafe { arena.read_word(p as usize) };
            }
            state.heads[0] = p;
            TARGET_UNROLL as u64
        }
        Kernel::Movdqa { non_temporal } => {
            let mut p = state.heads[0];
            for _ in 0..TARGET_UNROLL {
                // SAFETY: elements reserve at least 64 bytes for this
                // kernel, enforced at runner setup.
                let next = unsafe { simd_fold_next(arena, p as usize, *non_temporal) };
                p = next;
            }
            state.heads[0] = p;
            TARGET_UNROLL as u64
        }
        Kernel::Critword(n) => {
            let mut p = state.heads[0];
            for _ in 0..TARGET_UNROLL {
                // SAFETY: `critword` elements have a second pointer planted
                // at offset `n` during arena construction, mirroring the
                // first word's value.
                unsafe {
                    std::hint::black_box(arena.read_word(p as usize + n));
                    p = arena.read_word(p as usize);
                }
            }
            state.heads[0] = p;
            TARGET_UNROLL as u64
        }
        Kernel::Critword2(n) => {
            let reps = TARGET_UNROLL;
            let mut p0 = state.heads[0];
            let mut p1 = state.heads[1];
            for _ in 0..reps {
                // SAFETY: both heads walk disjoint cycles planted at
                // construction time (primary and +n-offset parallel cycle).
                unsafe {
                    p0 = arena.read_word(p0 as usize);
                    p1 = arena.read_word(p1 as usize);
                }
            }
            state.heads[0] = p0;
            state.heads[1] = p1;
            reps as u64
        }
    }
}

#[inline]
fn prefetch(arena: &Arena, offset: usize, hint: PrefetchHint) {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        use std::arch::x86_64::{_mm_prefetch, _MM_HINT_NTA, _MM_HINT_T0, _MM_HINT_T1, _MM_HINT_T2};
        let p = arena.as_ptr().add(offset) as *const i8;
        match hint {
            PrefetchHint::T0 => _mm_prefetch(p, _MM_HINT_T0),
            PrefetchHint::T1 => _mm_prefetch(p, _MM_HINT_T1),
            PrefetchHint::T2 => _mm_prefetch(p, _MM_HINT_T2),
            PrefetchHint::Nta => _mm_prefetch(p, _MM_HINT_NTA),
        }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (arena, offset, hint);
    }
}

/// Read four 16-byte chunks of a 64-byte element with ordinary or
/// non-temporal SIMD loads and fold the result into the next-address value.
///
/// # Safety
/// `offset` must address a live 64-byte chase element.
#[cfg(target_arch = "x86_64")]
#[inline]
unsafe fn simd_fold_next(arena: &Arena, offset: usize, non_temporal: bool) -> u64 {
    use std::arch::x86_64::{_mm_load_si128, _mm_stream_load_si128, __m128i};

    let base = arena.as_ptr().add(offset) as *const __m128i;
    let mut acc = _mm_setzero();
    for i in 0..4 {
        let chunk = if non_temporal {
            _mm_stream_load_si128(base.add(i))
        } else {
            _mm_load_si128(base.add(i))
        };
        acc = xor128(acc, chunk);
    }
    std::hint::black_box(acc);
    // The next-hop pointer still lives in the first 8 bytes of the element.
    arena.read_word(offset)
}

#[cfg(target_arch = "x86_64")]
#[inline]
unsafe fn _mm_setzero() -> std::arch::x86_64::__m128i {
    std::arch::x86_64::_mm_setzero_si128()
}

#[cfg(target_arch = "x86_64")]
#[inline]
unsafe fn xor128(a: std::arch::x86_64::__m128i, b: std::arch::x86_64::__m128i) -> std::arch::x86_64::__m128i {
    std::arch::x86_64::_mm_xor_si128(a, b)
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
unsafe fn simd_fold_next(arena: &Arena, offset: usize, _non_temporal: bool) -> u64 {
    arena.read_word(offset)
}

/// Plant a secondary pointer at byte offset `n` of every element on the
/// cycle starting at `first`, mirroring the primary next-hop value
/// (`critword:N`, §4.F).
pub fn plant_critword(arena: &Arena, first: u64, n: usize) -> Result<()> {
    let mut p = first;
    loop {
        // SAFETY: p was produced by generate_chase and stays in-arena.
        let next = unsafe { arena.read_word(p as usize) };
        unsafe {
            arena.write_word(p as usize + n, next);
        }
        p = next;
        if p == first {
            break;
        }
    }
    Ok(())
}

/// Build the second parallel cycle for `critword2:N`: a cycle offset by `n`
/// bytes from the primary cycle starting at `first`, so the two heads walk
/// disjoint but parallel cycles in lockstep.
pub fn plant_critword2(arena: &Arena, first: u64, n: usize) -> u64 {
    let mut p = first;
    loop {
        // SAFETY: p was produced by generate_chase and stays in-arena.
        let next = unsafe { arena.read_word(p as usize) };
        unsafe {
            arena.write_word(p as usize + n, next + n as u64);
        }
        p = next;
        if p == first {
            break;
        }
    }
    first + n as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::geometry::Layout;
    use crate::mixer::MixerTable;

    fn make_cycle(stride: usize, nr_elts: usize) -> (Arena, u64, Layout, MixerTable) {
        let total = stride * nr_elts;
        let layout = Layout::new(total, stride, total, 0).unwrap();
        let mixer = MixerTable::generate(64, layout.nr_mixer_indices, 1);
        let arena = Arena::alloc(Arena::native_page_size(), false, total).unwrap();
        let first = crate::chase::graph::generate_chase(&layout, &mixer, 0, &arena, false, 1).unwrap();
        (arena, first, layout, mixer)
    }

    #[test]
    fn parse_recognizes_all_named_variants() {
        assert_eq!(Kernel::parse("simple").unwrap(), Kernel::Simple);
        assert_eq!(Kernel::parse("incr").unwrap(), Kernel::Incr);
        assert_eq!(Kernel::parse("parallel4").unwrap(), Kernel::Parallel(4));
        assert_eq!(Kernel::parse("work:8").unwrap(), Kernel::Work(8));
        assert_eq!(Kernel::parse("critword:16").unwrap(), Kernel::Critword(16));
        assert_eq!(Kernel::parse("critword2:32").unwrap(), Kernel::Critword2(32));
        assert_eq!(
            Kernel::parse("prefetcht0").unwrap(),
            Kernel::Prefetch(PrefetchHint::T0)
        );
    }

    #[test]
    fn parse_rejects_missing_args_and_bad_range() {
        assert!(Kernel::parse("work").is_err());
        assert!(Kernel::parse("parallel1").is_err());
        assert!(Kernel::parse("parallel99").is_err());
        assert!(Kernel::parse("nonsense").is_err());
    }

    #[test]
    fn simple_kernel_advances_and_counts() {
        let (arena, first, layout, _mixer) = make_cycle(64, 64);
        let _ = layout;
        let mut state = ChaseHeads::single(first);
        let added = run_round(&Kernel::Simple, &arena, &mut state);
        assert_eq!(added, TARGET_UNROLL as u64);
        // After 200 steps on a 64-element cycle we're at step 200 % 64 = 8.
        assert_ne!(state.heads[0], first);
    }

    #[test]
    fn incr_kernel_increments_counters_without_clobbering_links() {
        let (arena, first, _layout, _mixer) = make_cycle(64, 16);
        let mut state = ChaseHeads::single(first);
        run_round(&Kernel::Incr, &arena, &mut state);
        // The cycle is still walkable (the pointer word wasn't touched).
        let visited = crate::chase::graph::walk_cycle(&arena, first, 17);
        assert_eq!(visited.len(), 16);
    }

    #[test]
    fn critword_roundtrip_mirrors_next_pointer() {
        let (arena, first, _layout, _mixer) = make_cycle(64, 8);
        plant_critword(&arena, first, 16).unwrap();
        let mut p = first;
        for _ in 0..8 {
            let next = unsafe { arena.read_word(p as usize) };
            let secondary = unsafe { arena.read_word(p as usize + 16) };
            assert_eq!(next, secondary);
            p = next;
        }
    }

    #[test]
    fn critword2_builds_parallel_offset_cycle() {
        let (arena, first, layout, _mixer) = make_cycle(64, 8);
        let n = 32;
        assert!(n + 8 <= layout.stride);
        let second_first = plant_critword2(&arena, first, n);
        assert_eq!(second_first, first + n as u64);

        let mut p0 = first;
        let mut p1 = second_first;
        for _ in 0..8 {
            p0 = unsafe { arena.read_word(p0 as usize) };
            p1 = unsafe { arena.read_word(p1 as usize) };
            assert_eq!(p1, p0 + n as u64);
        }
    }

    #[test]
    fn parallel_kernel_unroll_is_close_to_target() {
        let k = Kernel::Parallel(5);
        assert!(k.unroll_factor() as i64 - TARGET_UNROLL as i64 <= 5);
    }
}
