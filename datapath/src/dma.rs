//! # Device-visible backing memory
//!
//! ## Purpose
//!
//! This module provides the owned, page-aligned memory regions that descriptor
//! rings and the receive buffer pool are carved out of. The device reads and
//! writes this memory out-of-band, so the region must have a stable base
//! address for its whole lifetime and must be released exactly once.
//!
//! ## How it works
//!
//! `DmaRegion` wraps an anonymous `libc::mmap` allocation rounded up to the
//! system page size. The kernel hands the mapping back zero-filled, which the
//! completion-ring protocol relies on (untouched entries must read as color 0).
//! The mapping is torn down in `Drop` via `munmap`, with failures logged rather
//! than panicking.

use std::{io, ptr, slice};

/// An owned, page-aligned, zero-initialized memory region with a stable base
/// address, suitable for handing to the device collaborator for DMA mapping.
pub struct DmaRegion {
    base: *mut libc::c_void,
    len: usize,
}

// The region is a plain byte range with no thread affinity; access is
// serialized by whoever owns the containing ring or pool.
unsafe impl Send for DmaRegion {}

impl DmaRegion {
    /// Allocates a new zeroed region of at least `size` bytes, rounded up to
    /// the system page size.
    pub fn alloc(size: usize) -> Result<Self, io::Error> {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
        let len = (size + page_size - 1) & !(page_size - 1);
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(DmaRegion { base, len })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.base as *mut u8
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrows `len` bytes starting at `offset`.
    ///
    /// The borrow must not be held across a point where the device may write
    /// the same range; callers read device-written ranges in short scopes.
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.len);
        unsafe { slice::from_raw_parts(self.base.add(offset) as *const u8, len) }
    }

    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.len);
        unsafe { slice::from_raw_parts_mut(self.base.add(offset) as *mut u8, len) }
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        unsafe {
            if self.base != libc::MAP_FAILED && !self.base.is_null() {
                let res = libc::munmap(self.base, self.len);
                if res < 0 {
                    log::error!("Failed to unmap memory: {}", io::Error::last_os_error());
                }
            }
        }
    }
}
