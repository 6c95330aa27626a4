// src/arena.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Page-aligned, optionally huge-paged, optionally NUMA-interleaved anonymous
//! arena allocator (component A).
//!
//! Built directly on `libc::mmap`/`madvise` rather than a crate like
//! `memmap2`, because the THP-policy and `MAP_HUGETLB` control this needs
//! isn't exposed by higher-level mmap wrappers — raw `libc` is the right
//! tool for this kind of syscall-level work (see DESIGN.md).

use std::ffi::c_void;
use std::fs;
use std::ptr::NonNull;

use crate::error::{ChaseError, Result};

#[cfg(feature = "numa")]
use crate::numa::NumaTopology;
#[cfg(feature = "numa")]
use crate::rng::ChaseRng;

/// A contiguous, zero-initialized, page-aligned anonymous region that lives
/// for the remainder of the process and is never freed early.
pub struct Arena {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: chase threads only ever touch disjoint byte ranges inside the
// arena (mixer columns never overlap); the bandwidth kernels each own a
// private buffer and never see this type. No interior mutability is
// exposed except through explicit raw-pointer helpers whose callers
// already uphold that disjointness.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    pub fn native_page_size() -> usize {
        // SAFETY: sysconf with a well-known, argument-free name.
        let v = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if v <= 0 {
            4096
        } else {
            v as usize
        }
    }

    pub fn is_huge(page_size: usize) -> bool {
        page_size > Self::native_page_size()
    }

    /// Acquire a zeroed, readable/writable anonymous region of at least
    /// `ceil(size, page_size)` bytes, per §4.A's contract.
    pub fn alloc(page_size: usize, use_thp: bool, size: usize) -> Result<Self> {
        let native = Self::native_page_size();
        if page_size != native && use_thp {
            return Err(ChaseError::Config(
                "transparent huge pages cannot be combined with a non-native page size".into(),
            ));
        }

        let aligned_len = size.div_ceil(page_size) * page_size;

        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        if Self::is_huge(page_size) {
            flags |= huge_page_mmap_flags(page_size)?;
        }

        // SAFETY: standard anonymous mmap; we check the return value below.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                aligned_len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(ChaseError::Os(format!(
                "mmap({aligned_len} bytes, page_size={page_size}) failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        let ptr = NonNull::new(raw as *mut u8)
            .expect("mmap returned a non-null pointer on success");

        if page_size == native {
            let advice = if use_thp {
                ensure_thp_policy_permissive()?;
                libc::MADV_HUGEPAGE
            } else {
                libc::MADV_NOHUGEPAGE
            };
            // SAFETY: `ptr`/`aligned_len` describe the region we just mapped.
            let rc = unsafe { libc::madvise(raw, aligned_len, advice) };
            if rc != 0 {
                tracing::debug!(
                    "madvise({}) failed (non-fatal): {}",
                    if use_thp { "MADV_HUGEPAGE" } else { "MADV_NOHUGEPAGE" },
                    std::io::Error::last_os_error()
                );
            }
        }

        Ok(Self {
            ptr,
            len: aligned_len,
        })
    }

    /// Bind each page of the arena to a NUMA node sampled from `weights`
    /// (a `(node_id, weight)` cumulative distribution), then touch the first
    /// byte of the page so the binding is realized.
    #[cfg(feature = "numa")]
    pub fn bind_weighted(&self, weights: &[(usize, u64)], seed: u64) -> Result<()> {
        if weights.is_empty() {
            return Ok(());
        }
        let topology = NumaTopology::detect()?;
        let total_weight: u64 = weights.iter().map(|(_, w)| *w).sum();
        if total_weight == 0 {
            return Err(ChaseError::Config("NUMA weights sum to zero".into()));
        }

        let page_size = Self::native_page_size();
        let mut rng = ChaseRng::init(seed);
        let nr_pages = self.len.div_ceil(page_size);

        for p in 0..nr_pages {
            let draw = rng.int(total_weight - 1);
            let mut acc = 0u64;
            let mut chosen = weights[0].0;
            for &(node, w) in weights {
                acc += w;
                if draw < acc {
                    chosen = node;
                    break;
                }
            }
            let offset = p * page_size;
            let len = page_size.min(self.len - offset);
            // SAFETY: offset/len are within `self.len`.
            let addr = unsafe { self.ptr.as_ptr().add(offset) };
            topology.bind_area_to_node(addr as *mut c_void, len, chosen)?;
            // First-touch to realize the binding.
            // SAFETY: addr points `len` bytes into our own mapping.
            unsafe {
                std::ptr::write_volatile(addr, 0);
            }
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Byte slice covering the whole arena. Callers must respect the
    /// disjoint-byte-range discipline the rest of the crate relies on.
    ///
    /// # Safety
    /// The caller must not alias this with a concurrently-held mutable
    /// reference into an overlapping range.
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }

    /// # Safety
    /// Same aliasing requirement as [`Arena::as_slice`].
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }

    /// Read a machine word (the pointer slot) at byte `offset`.
    ///
    /// # Safety
    /// `offset + 8 <= self.len()` and the slot must be aligned and not be
    /// concurrently written from another thread.
    #[inline]
    pub unsafe fn read_word(&self, offset: usize) -> u64 {
        let p = self.ptr.as_ptr().add(offset) as *const u64;
        std::ptr::read(p)
    }

    /// Write a machine word (the pointer slot) at byte `offset`.
    ///
    /// # Safety
    /// Same as [`Arena::read_word`].
    #[inline]
    pub unsafe fn write_word(&self, offset: usize, value: u64) {
        let p = self.ptr.as_ptr().add(offset) as *mut u64;
        std::ptr::write(p, value);
    }

    /// Read an arbitrary byte run starting at `offset` (used by the
    /// branch-chase rewriter to check an element's code slack is zero).
    ///
    /// # Safety
    /// `offset + len <= self.len()`.
    #[inline]
    pub unsafe fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len)
    }

    /// Write an arbitrary byte buffer at `offset` (used by the branch-chase
    /// rewriter to emit a stub over an element's pointer slot and trailing
    /// code slack).
    ///
    /// # Safety
    /// `offset + bytes.len() <= self.len()`, and no thread may be reading or
    /// executing that range concurrently with the write.
    #[inline]
    pub unsafe fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        let dst = self.ptr.as_ptr().add(offset);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
    }

    /// Add `PROT_EXEC` to the arena's mapping so previously-emitted
    /// branch-chase stubs can be executed directly out of it. One-way: the
    /// branch-chase rewriter calls this right before emitting, after which
    /// the arena holds live code as well as data.
    pub fn make_executable(&self) -> Result<()> {
        // SAFETY: ptr/len describe our own live mapping.
        let rc = unsafe {
            libc::mprotect(
                self.ptr.as_ptr() as *mut c_void,
                self.len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            )
        };
        if rc != 0 {
            return Err(ChaseError::Os(format!(
                "mprotect(PROT_EXEC) failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // Process-lifetime arena: in practice this never runs before exit,
        // but if it ever does (e.g. in unit tests), release the mapping.
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut c_void, self.len);
        }
    }
}

fn huge_page_mmap_flags(page_size: usize) -> Result<libc::c_int> {
    let shift = page_size.trailing_zeros();
    if !page_size.is_power_of_two() {
        return Err(ChaseError::Config(format!(
            "huge page size {page_size} is not a power of two"
        )));
    }
    // MAP_HUGETLB encodes the requested page size's log2 in bits 26..=31.
    Ok(libc::MAP_HUGETLB | ((shift as libc::c_int) << 26))
}

/// Read `/sys/kernel/mm/transparent_hugepage/enabled` (or `defrag`) and
/// report whether the active (bracketed) choice is in `allowed`.
pub fn read_thp_policy(path: &str) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    content
        .split_whitespace()
        .find(|tok| tok.starts_with('[') && tok.ends_with(']'))
        .map(|tok| tok.trim_matches(|c| c == '[' || c == ']').to_string())
}

fn ensure_thp_policy_permissive() -> Result<()> {
    const ENABLED: &str = "/sys/kernel/mm/transparent_hugepage/enabled";
    const DEFRAG: &str = "/sys/kernel/mm/transparent_hugepage/defrag";

    if let Some(policy) = read_thp_policy(ENABLED) {
        if policy != "always" && policy != "madvise" {
            write_thp_policy(ENABLED, "madvise");
        }
    }
    if let Some(policy) = read_thp_policy(DEFRAG) {
        if policy != "always" && policy != "defer+madvise" && policy != "madvise" {
            write_thp_policy(DEFRAG, "madvise");
        }
    }
    Ok(())
}

fn write_thp_policy(path: &str, value: &str) {
    if let Err(e) = fs::write(path, value) {
        tracing::warn!("could not set THP policy {path}={value}: {e}");
    }
}

/// Parse the default huge-page size (bytes) from `/proc/meminfo`'s
/// `Hugepagesize:` line.
pub fn default_hugepage_size() -> Option<usize> {
    let content = fs::read_to_string("/proc/meminfo").ok()?;
    parse_hugepagesize(&content)
}

fn parse_hugepagesize(meminfo: &str) -> Option<usize> {
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("Hugepagesize:") {
            let kb: usize = rest.split_whitespace().next()?.parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_page_size_is_sane() {
        let p = Arena::native_page_size();
        assert!(p.is_power_of_two());
        assert!(p >= 4096);
    }

    #[test]
    fn is_huge_compares_to_native() {
        let native = Arena::native_page_size();
        assert!(!Arena::is_huge(native));
        assert!(Arena::is_huge(native * 512));
    }

    #[test]
    fn alloc_rounds_up_and_zeroes() {
        let native = Arena::native_page_size();
        let arena = Arena::alloc(native, false, native + 1).unwrap();
        assert_eq!(arena.len(), native * 2);
        // SAFETY: sole owner, no concurrent access in this test.
        let s = unsafe { arena.as_slice() };
        assert!(s.iter().all(|&b| b == 0));
    }

    #[test]
    fn read_write_word_roundtrip() {
        let native = Arena::native_page_size();
        let arena = Arena::alloc(native, false, native).unwrap();
        unsafe {
            arena.write_word(128, 0xdead_beef_cafe_babe);
            assert_eq!(arena.read_word(128), 0xdead_beef_cafe_babe);
        }
    }

    #[test]
    fn parse_hugepagesize_finds_kb_value() {
        let meminfo = "MemTotal:       16384000 kB\nHugepagesize:       2048 kB\n";
        assert_eq!(parse_hugepagesize(meminfo), Some(2 * 1024 * 1024));
    }

    #[test]
    fn parse_hugepagesize_missing_is_none() {
        assert_eq!(parse_hugepagesize("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn read_thp_policy_picks_bracketed_choice() {
        let dir = std::env::temp_dir().join(format!("memchase-thp-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("enabled");
        std::fs::write(&path, "always [madvise] never\n").unwrap();
        assert_eq!(
            read_thp_policy(path.to_str().unwrap()),
            Some("madvise".to_string())
        );
        let _ = std::fs::remove_dir_all(&dir);
    }
}
