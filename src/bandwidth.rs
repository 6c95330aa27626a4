// src/bandwidth.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming bandwidth kernels (component G): a worker repeatedly sweeps a
//! private buffer with `memcpy`/`memset`/STREAM-style loops, the runner's
//! sampler converting the bytes moved per interval into MiB/s.
//!
//! Each kernel touches `buf_bytes` per call and returns the number of bytes
//! moved, mirroring the dependent-load kernels' "return unroll factor"
//! contract in component F so the runner's sampler can treat both families
//! uniformly (bytes/ns vs. steps/ns).

use std::time::Duration;

use crate::error::{ChaseError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthKernel {
    MemcpyLibc,
    MemsetLibc,
    MemsetzLibc,
    StreamCopy,
    StreamSum,
    StreamTriad,
}

impl BandwidthKernel {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "memcpy-libc" => Ok(Self::MemcpyLibc),
            "memset-libc" => Ok(Self::MemsetLibc),
            "memsetz-libc" => Ok(Self::MemsetzLibc),
            "stream-copy" => Ok(Self::StreamCopy),
            "stream-sum" => Ok(Self::StreamSum),
            "stream-triad" => Ok(Self::StreamTriad),
            other => Err(ChaseError::Config(format!("unknown bandwidth workload {other:?}"))),
        }
    }

    /// Whether this kernel needs a second (destination) buffer.
    pub fn needs_two_buffers(&self) -> bool {
        matches!(self, Self::MemcpyLibc | Self::StreamCopy | Self::StreamTriad)
    }
}

/// A worker's private pair of buffers. `src`/`dst` are equal-length and
/// page-aligned; `dst` is absent for in-place kernels.
pub struct BandwidthBuffers {
    src: Vec<f64>,
    dst: Option<Vec<f64>>,
}

impl BandwidthBuffers {
    pub fn new(kernel: BandwidthKernel, elts: usize) -> Self {
        Self {
            src: vec![1.0; elts],
            dst: if kernel.needs_two_buffers() { Some(vec![0.0; elts]) } else { None },
        }
    }

    pub fn byte_len(&self) -> usize {
        self.src.len() * std::mem::size_of::<f64>()
    }
}

/// Run one pass of `kernel` over `buffers`, returning the number of bytes
/// moved (read + written, per §4.G's "bytes moved" accounting).
pub fn run_pass(kernel: BandwidthKernel, buffers: &mut BandwidthBuffers) -> u64 {
    let n = buffers.src.len();
    let byte_len = buffers.byte_len();

    match kernel {
        BandwidthKernel::MemcpyLibc => {
            let dst = buffers.dst.as_mut().expect("memcpy-libc needs a destination buffer");
            // SAFETY: src and dst are distinct, equal-length, live allocations.
            unsafe {
                libc::memcpy(
                    dst.as_mut_ptr() as *mut libc::c_void,
                    buffers.src.as_ptr() as *const libc::c_void,
                    byte_len,
                );
            }
            (byte_len * 2) as u64
        }
        BandwidthKernel::MemsetLibc => {
            // SAFETY: src is a live allocation of byte_len bytes.
            unsafe {
                libc::memset(buffers.src.as_mut_ptr() as *mut libc::c_void, 0xa5, byte_len);
            }
            byte_len as u64
        }
        BandwidthKernel::MemsetzLibc => {
            // SAFETY: see MemsetLibc.
            unsafe {
                libc::memset(buffers.src.as_mut_ptr() as *mut libc::c_void, 0, byte_len);
            }
            byte_len as u64
        }
        BandwidthKernel::StreamCopy => {
            let dst = buffers.dst.as_mut().expect("stream-copy needs a destination buffer");
            for i in 0..n {
                dst[i] = buffers.src[i];
            }
            (byte_len * 2) as u64
        }
        BandwidthKernel::StreamSum => {
            // R:W 1:0 — a single array is read and folded into a scalar;
            // nothing is written back to memory.
            let mut total = 0.0f64;
            for &v in &buffers.src {
                total += v;
            }
            std::hint::black_box(total);
            byte_len as u64
        }
        BandwidthKernel::StreamTriad => {
            let dst = buffers.dst.as_mut().expect("stream-triad needs a destination buffer");
            const SCALAR: f64 = 3.0;
            for i in 0..n {
                dst[i] = buffers.src[i] + SCALAR * dst[i];
            }
            (byte_len * 2) as u64
        }
    }
}

/// Convert bytes moved over an interval into MiB/s (§4.G interval-close
/// contract, mirroring the dependent-load kernels' ns-per-step conversion).
/// Takes a `Duration`, matching `runner::ns_per_step`'s signature, so both
/// converters satisfy `run_sampler`'s `Fn(u64, Duration) -> f64` bound.
pub fn bytes_per_interval_to_mib_per_s(bytes: u64, interval: Duration) -> f64 {
    let interval_ns = interval.as_nanos();
    if interval_ns == 0 {
        return 0.0;
    }
    let bytes_per_ns = bytes as f64 / interval_ns as f64;
    let bytes_per_s = bytes_per_ns * 1_000_000_000.0;
    bytes_per_s / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recognizes_all_named_kernels() {
        for name in ["memcpy-libc", "memset-libc", "memsetz-libc", "stream-copy", "stream-sum", "stream-triad"] {
            assert!(BandwidthKernel::parse(name).is_ok(), "{name} should parse");
        }
        assert!(BandwidthKernel::parse("bogus").is_err());
    }

    #[test]
    fn memcpy_moves_source_bytes_into_destination() {
        let mut buffers = BandwidthBuffers::new(BandwidthKernel::MemcpyLibc, 1024);
        buffers.src.iter_mut().enumerate().for_each(|(i, v)| *v = i as f64);
        let moved = run_pass(BandwidthKernel::MemcpyLibc, &mut buffers);
        assert_eq!(moved, (buffers.byte_len() * 2) as u64);
        assert_eq!(buffers.dst.as_ref().unwrap(), &buffers.src);
    }

    #[test]
    fn memsetz_zeroes_the_buffer() {
        let mut buffers = BandwidthBuffers::new(BandwidthKernel::MemsetzLibc, 256);
        run_pass(BandwidthKernel::MemsetzLibc, &mut buffers);
        let bytes: &[u8] = bytemuck_view(&buffers.src);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn stream_triad_matches_reference_formula() {
        let mut buffers = BandwidthBuffers::new(BandwidthKernel::StreamTriad, 4);
        buffers.src.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        buffers.dst.as_mut().unwrap().copy_from_slice(&[10.0, 20.0, 30.0, 40.0]);
        run_pass(BandwidthKernel::StreamTriad, &mut buffers);
        assert_eq!(buffers.dst.unwrap(), vec![31.0, 62.0, 93.0, 124.0]);
    }

    #[test]
    fn mib_per_s_conversion_is_sane() {
        // 1 MiB moved in 1ms => ~1000 MiB/s.
        let mib = bytes_per_interval_to_mib_per_s(1024 * 1024, Duration::from_millis(1));
        assert!((mib - 1000.0).abs() < 1.0);
        assert_eq!(bytes_per_interval_to_mib_per_s(100, Duration::from_nanos(0)), 0.0);
    }

    fn bytemuck_view(v: &[f64]) -> &[u8] {
        // SAFETY: any bit pattern is a valid u8; f64 slices have no padding
        // gaps to hide from this re-interpretation for a pure byte scan.
        unsafe { std::slice::from_raw_parts(v.as_ptr() as *const u8, std::mem::size_of_val(v)) }
    }
}
