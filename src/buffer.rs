//! # Probe buffers
//!
//! Page-aligned, zero-initialized arrays used as the raw material for the timing loops. A buffer
//! is owned by exactly one sweep and is released when it goes out of scope, whichever way the
//! sweep exits.
use crate::error::ProbeError;
use crate::format_size;
use log::{debug, warn};
use std::alloc::{self, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

/// Fallback used when the OS refuses to report its page size
const DEFAULT_PAGE_SIZE: usize = 4096;

/// Memory page size of the running system, resolved once at startup and handed to allocations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSize(usize);

impl PageSize {
    pub fn new(bytes: usize) -> Result<Self, ProbeError> {
        if bytes.is_power_of_two() {
            Ok(PageSize(bytes))
        } else {
            Err(ProbeError::PageSize(bytes))
        }
    }

    /// Query the page size from the OS
    pub fn detect() -> Self {
        #[cfg(unix)]
        {
            let reported = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if reported > 0 {
                if let Ok(page) = PageSize::new(reported as usize) {
                    return page;
                }
            }
            warn!(
                "sysconf(_SC_PAGESIZE) returned {}, assuming {} byte pages",
                reported, DEFAULT_PAGE_SIZE
            );
        }
        PageSize(DEFAULT_PAGE_SIZE)
    }

    pub fn bytes(self) -> usize {
        self.0
    }
}

/// Types for which the all-zero bit pattern is a valid value.
///
/// # Safety
/// Implementors must be plain data with no invalid bit patterns.
pub unsafe trait ZeroedCell: Copy {}

unsafe impl ZeroedCell for usize {}

/// Two adjacent machine words touched together by the sequential-stride timer
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WordPair {
    pub value: usize,
    pub scratch: usize,
}

unsafe impl ZeroedCell for WordPair {}

/// Page-aligned zero-initialized array of `T`, freed on drop
pub struct ProbeBuffer<T: ZeroedCell> {
    ptr: NonNull<T>,
    len: usize,
    layout: Layout,
}

impl<T: ZeroedCell> ProbeBuffer<T> {
    /// Allocate `len` zeroed cells aligned to the page size
    pub fn zeroed(page_size: PageSize, len: usize) -> Result<Self, ProbeError> {
        if len == 0 || std::mem::size_of::<T>() == 0 {
            return Err(ProbeError::EmptyBuffer);
        }

        let align = page_size.bytes().max(std::mem::align_of::<T>());
        let bytes = std::mem::size_of::<T>()
            .checked_mul(len)
            .ok_or(ProbeError::Layout { bytes: usize::MAX, align })?;
        let layout =
            Layout::from_size_align(bytes, align).map_err(|_| ProbeError::Layout { bytes, align })?;

        // SAFETY: layout has a non-zero size, checked above
        let raw = unsafe { alloc::alloc_zeroed(layout) } as *mut T;
        let ptr = NonNull::new(raw).ok_or(ProbeError::Allocation { bytes, align })?;

        debug!(
            "Allocated {} probe buffer ({} cells, {} byte alignment)",
            format_size(bytes as f32),
            len,
            align
        );

        Ok(ProbeBuffer { ptr, len, layout })
    }

    /// Allocate enough zeroed cells to cover `bytes` bytes (at least one cell)
    pub fn zeroed_bytes(page_size: PageSize, bytes: usize) -> Result<Self, ProbeError> {
        Self::zeroed(page_size, (bytes / std::mem::size_of::<T>()).max(1))
    }

    pub fn alignment(&self) -> usize {
        self.layout.align()
    }
}

impl<T: ZeroedCell> Deref for ProbeBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: ptr points to `len` initialized (zeroed) cells owned by self
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: ZeroedCell> DerefMut for ProbeBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: as in deref, and &mut self guarantees exclusive access
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: ZeroedCell> Drop for ProbeBuffer<T> {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with exactly this layout
        unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, self.layout) };
        debug!("Released {} probe buffer", format_size(self.layout.size() as f32));
    }
}

// The buffer owns its allocation outright, like a Box<[T]>
unsafe impl<T: ZeroedCell + Send> Send for ProbeBuffer<T> {}
