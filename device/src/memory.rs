//! Host memory regions.
//!
//! [`HostMemory`] is the storage behind CPU buffers: either an aligned,
//! zero-initialized allocation owned by the region, or caller memory wrapped
//! without taking ownership.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{AllocationSnafu, Result};

#[derive(Debug)]
pub struct HostMemory {
    ptr: NonNull<u8>,
    len: usize,
    /// `None` when the memory belongs to the caller.
    layout: Option<Layout>,
}

// SAFETY: `HostMemory` is a plain byte region with no thread affinity. Shared
// access only hands out `&[u8]`; mutation requires `&mut self`.
unsafe impl Send for HostMemory {}
unsafe impl Sync for HostMemory {}

impl HostMemory {
    /// Allocate `size` zeroed bytes starting at a multiple of `alignment`.
    pub fn alloc(size: usize, alignment: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size.max(1), alignment).map_err(|e| {
            AllocationSnafu { buffer_type: "host", size, reason: e.to_string() }.build()
        })?;

        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            AllocationSnafu { buffer_type: "host", size, reason: "out of memory" }.build()
        })?;

        Ok(Self { ptr, len: size, layout: Some(layout) })
    }

    /// Wrap caller memory without taking ownership.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// the returned region (and any buffer built on it) is alive, and must not
    /// be accessed through other paths while the region is in use.
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len, layout: None }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_owned(&self) -> bool {
        self.layout.is_some()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` bytes (allocation or caller contract).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            // SAFETY: allocated in `alloc` with this exact layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

// =========================================================================
// Raw allocation
// =========================================================================

/// Alignment of [`raw_alloc`] results; also the size of the length header.
const RAW_ALIGN: usize = 16;

/// `malloc`-style allocation for callers that only keep the pointer.
///
/// Returns null if the allocation fails. Release with [`raw_free`].
pub fn raw_alloc(size: usize) -> *mut u8 {
    let Some(total) = size.checked_add(RAW_ALIGN) else {
        return std::ptr::null_mut();
    };
    let Ok(layout) = Layout::from_size_align(total, RAW_ALIGN) else {
        return std::ptr::null_mut();
    };

    // SAFETY: `layout` is non-zero sized. The header slot is aligned for
    // `usize` because `RAW_ALIGN` is.
    unsafe {
        let base = alloc::alloc(layout);
        if base.is_null() {
            return base;
        }
        base.cast::<usize>().write(size);
        base.add(RAW_ALIGN)
    }
}

/// Release memory obtained from [`raw_alloc`]. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or a live pointer returned by [`raw_alloc`].
pub unsafe fn raw_free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: the caller passes a pointer produced by `raw_alloc`, so the
    // header sits `RAW_ALIGN` bytes before it and records the payload size.
    unsafe {
        let base = ptr.sub(RAW_ALIGN);
        let size = base.cast::<usize>().read();
        let layout = Layout::from_size_align_unchecked(size + RAW_ALIGN, RAW_ALIGN);
        alloc::dealloc(base, layout);
    }
}

/// Round `offset` up to the next multiple of `alignment` (a power of two).
pub const fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}
