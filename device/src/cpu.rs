//! Host memory buffers usable by the CPU backend.

use std::ptr::NonNull;
use std::sync::Arc;

use kiln_graph::Tensor;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::backend::Backend;
use crate::buffer::{Buffer, BufferInterface, tensor_get, tensor_set};
use crate::buffer_type::{BufferType, is_buffer_type};
use crate::error::Result;
use crate::memory::HostMemory;

/// Host memory aligned for vectorized access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuBufferType {
    alignment: usize,
}

impl CpuBufferType {
    pub const DEFAULT_ALIGNMENT: usize = 64;

    /// # Panics
    ///
    /// If `alignment` is not a power of two.
    pub fn with_alignment(alignment: usize) -> Self {
        assert!(alignment.is_power_of_two(), "alignment {alignment} is not a power of two");
        Self { alignment }
    }
}

impl Default for CpuBufferType {
    fn default() -> Self {
        Self { alignment: Self::DEFAULT_ALIGNMENT }
    }
}

impl BufferType for CpuBufferType {
    fn name(&self) -> &str {
        "CPU"
    }

    fn alloc(&self, size: usize) -> Result<Box<dyn BufferInterface>> {
        let memory = HostMemory::alloc(size, self.alignment)?;
        Ok(Box::new(HostBuffer::new(memory)))
    }

    fn alignment(&self) -> usize {
        self.alignment
    }

    fn supports_backend(&self, backend: &dyn Backend) -> bool {
        backend.default_buffer_type().is_host()
    }

    fn is_host(&self) -> bool {
        true
    }
}

static CPU_BUFFER_TYPE: Lazy<Arc<dyn BufferType>> = Lazy::new(|| Arc::new(CpuBufferType::default()));

/// The shared default CPU buffer type.
pub fn cpu_buffer_type() -> Arc<dyn BufferType> {
    Arc::clone(&CPU_BUFFER_TYPE)
}

pub fn is_cpu_buffer_type(buffer_type: &dyn BufferType) -> bool {
    is_buffer_type::<CpuBufferType>(buffer_type)
}

/// Wrap caller memory as a CPU buffer. The buffer never frees it.
///
/// # Safety
///
/// `ptr` must be valid for reads and writes of `size` bytes until the
/// returned buffer is dropped, and must not be accessed elsewhere meanwhile.
///
/// # Panics
///
/// If `ptr` is not aligned to [`CpuBufferType::DEFAULT_ALIGNMENT`].
pub unsafe fn cpu_buffer_from_ptr(ptr: NonNull<u8>, size: usize) -> Arc<Buffer> {
    assert_eq!(
        ptr.as_ptr() as usize % CpuBufferType::DEFAULT_ALIGNMENT,
        0,
        "pointer must be aligned to {} bytes",
        CpuBufferType::DEFAULT_ALIGNMENT
    );
    // SAFETY: forwarded to the caller.
    let memory = unsafe { HostMemory::from_raw(ptr, size) };
    Buffer::new(cpu_buffer_type(), Box::new(HostBuffer::new(memory)), size)
}

/// Buffer context over a [`HostMemory`] region.
#[derive(Debug)]
pub struct HostBuffer {
    base: *mut u8,
    memory: Mutex<HostMemory>,
}

// SAFETY: `base` is a copy of the pointer owned by `memory`, only handed out
// and never dereferenced here; all accesses go through the mutex.
unsafe impl Send for HostBuffer {}
unsafe impl Sync for HostBuffer {}

impl HostBuffer {
    pub fn new(memory: HostMemory) -> Self {
        Self { base: memory.as_ptr(), memory: Mutex::new(memory) }
    }
}

impl BufferInterface for HostBuffer {
    fn base(&self) -> *mut u8 {
        self.base
    }

    fn init_tensor(&self, tensor: &Tensor, offset: usize, alloc_size: usize) {
        // Zero the block padding past the logical end.
        let padding = (offset + tensor.nbytes())..(offset + alloc_size);
        if !padding.is_empty() {
            self.memory.lock().as_mut_slice()[padding].fill(0);
        }
    }

    fn write(&self, offset: usize, data: &[u8]) {
        self.memory.lock().as_mut_slice()[offset..offset + data.len()].copy_from_slice(data);
    }

    fn read(&self, offset: usize, data: &mut [u8]) {
        data.copy_from_slice(&self.memory.lock().as_slice()[offset..offset + data.len()]);
    }

    fn cpy_tensor_from(&self, src: &Tensor, dst: &Tensor) -> bool {
        if !Buffer::of(src).is_some_and(|buffer| buffer.is_host()) {
            return false;
        }
        copy_between(src, dst);
        true
    }

    fn cpy_tensor_to(&self, src: &Tensor, dst: &Tensor) -> bool {
        if !Buffer::of(dst).is_some_and(|buffer| buffer.is_host()) {
            return false;
        }
        copy_between(src, dst);
        true
    }

    fn clear(&self, value: u8) {
        self.memory.lock().as_mut_slice().fill(value);
    }
}

/// Both tensors are in host memory, so a single staged copy suffices.
fn copy_between(src: &Tensor, dst: &Tensor) {
    let mut staging = vec![0; src.nbytes()];
    tensor_get(src, &mut staging, 0);
    tensor_set(dst, &staging, 0);
}
