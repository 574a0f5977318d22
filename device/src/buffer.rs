//! Allocated storage regions and tensor data transfer.
//!
//! A [`Buffer`] pairs the [`BufferType`] it came from with a backend-specific
//! [`BufferInterface`]. Buffers are handed out as `Arc<Buffer>`; tensors bound
//! into a buffer keep only a weak reference, so once the owner frees the
//! buffer no tensor operation can reach its memory.
//!
//! Every tensor operation addresses a byte range `[offset, offset + len)`
//! relative to the start of the tensor. Ranges outside the tensor's
//! footprint, unbound tensors and freed buffers are caller bugs and panic.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use kiln_dtype::ext::HasDType;
use kiln_graph::{Storage, Tensor};
use snafu::{ResultExt, ensure};
use tracing::{debug, trace};

use crate::buffer_type::BufferType;
use crate::error::*;

/// Backend-specific half of a buffer.
///
/// Offsets passed to `read`/`write` are absolute within the buffer and have
/// already been bounds-checked by [`Buffer`].
pub trait BufferInterface: Send + Sync + Any {
    /// Start of the region. Only meaningful for host-visible memory.
    fn base(&self) -> *mut u8;

    /// Called once when `tensor` is bound at `offset`, with the bytes the
    /// buffer type reserved for it.
    fn init_tensor(&self, _tensor: &Tensor, _offset: usize, _alloc_size: usize) {}

    fn write(&self, offset: usize, data: &[u8]);

    fn read(&self, offset: usize, data: &mut [u8]);

    /// Copy `src` (in any buffer) into `dst` (in this buffer) in one step.
    /// Returns `false` if this pairing is not supported.
    fn cpy_tensor_from(&self, _src: &Tensor, _dst: &Tensor) -> bool {
        false
    }

    /// Copy `src` (in this buffer) into `dst` (in any buffer) in one step.
    fn cpy_tensor_to(&self, _src: &Tensor, _dst: &Tensor) -> bool {
        false
    }

    fn clear(&self, value: u8);
}

pub struct Buffer {
    buffer_type: Arc<dyn BufferType>,
    iface: Box<dyn BufferInterface>,
    size: usize,
}

impl Buffer {
    /// Assemble a buffer from a backend-provided interface.
    pub fn new(buffer_type: Arc<dyn BufferType>, iface: Box<dyn BufferInterface>, size: usize) -> Arc<Self> {
        debug!(buffer_type = buffer_type.name(), size, "Buffer created");
        Arc::new(Self { buffer_type, iface, size })
    }

    /// The live buffer a tensor is bound to, if any.
    pub fn of(tensor: &Tensor) -> Option<Arc<Buffer>> {
        tensor.storage()?.upgrade::<Buffer>()
    }

    pub fn base(&self) -> *mut u8 {
        self.iface.base()
    }

    /// Total size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn buffer_type(&self) -> &Arc<dyn BufferType> {
        &self.buffer_type
    }

    pub fn alignment(&self) -> usize {
        self.buffer_type.alignment()
    }

    pub fn alloc_size(&self, tensor: &Tensor) -> usize {
        self.buffer_type.alloc_size(tensor)
    }

    pub fn is_host(&self) -> bool {
        self.buffer_type.is_host()
    }

    /// Backend-specific context, for backends that need to downcast it.
    pub fn interface(&self) -> &dyn BufferInterface {
        &*self.iface
    }

    /// Bind `tensor` to the region starting at `offset`.
    ///
    /// The offset must be aligned and the tensor must fit entirely. The
    /// buffer's `init_tensor` hook runs exactly once per tensor, because a
    /// tensor can only be bound once.
    pub fn alloc_tensor(self: &Arc<Self>, tensor: &Tensor, offset: usize) -> Result<()> {
        let alignment = self.alignment();
        ensure!(offset % alignment == 0, MisalignedSnafu { name: tensor.name(), offset, alignment });

        let alloc_size = self.alloc_size(tensor);
        let end = offset.saturating_add(alloc_size);
        ensure!(end <= self.size, OutOfSpaceSnafu { name: tensor.name(), end, size: self.size });

        tensor.bind(Storage::new(self, offset)).context(BindSnafu)?;
        self.iface.init_tensor(tensor, offset, alloc_size);

        trace!(tensor.name = tensor.name(), offset, alloc_size, "Tensor bound");
        Ok(())
    }

    /// Write `data` into `tensor` starting `offset` bytes into the tensor.
    pub fn set_tensor(&self, tensor: &Tensor, data: &[u8], offset: usize) {
        let at = self.locate(tensor, offset, data.len());
        trace!(tensor.name = tensor.name(), offset, size = data.len(), "set_tensor");
        self.iface.write(at, data);
    }

    /// Fill `data` from `tensor` starting `offset` bytes into the tensor.
    pub fn get_tensor(&self, tensor: &Tensor, data: &mut [u8], offset: usize) {
        let at = self.locate(tensor, offset, data.len());
        trace!(tensor.name = tensor.name(), offset, size = data.len(), "get_tensor");
        self.iface.read(at, data);
    }

    /// Single-step copy into `dst`, which must live in this buffer.
    pub fn cpy_tensor_from(&self, src: &Tensor, dst: &Tensor) -> bool {
        check_footprints(src, dst);
        self.locate(dst, 0, dst.nbytes());
        self.iface.cpy_tensor_from(src, dst)
    }

    /// Single-step copy out of `src`, which must live in this buffer.
    pub fn cpy_tensor_to(&self, src: &Tensor, dst: &Tensor) -> bool {
        check_footprints(src, dst);
        self.locate(src, 0, src.nbytes());
        self.iface.cpy_tensor_to(src, dst)
    }

    /// Set every byte of the buffer to `value`.
    pub fn clear(&self, value: u8) {
        self.iface.clear(value);
    }

    /// Release the region. Tensors bound to it become unreachable.
    pub fn free(self: Arc<Self>) {
        drop(self);
    }

    /// Absolute offset of `tensor[offset..offset + len]` within this buffer.
    fn locate(&self, tensor: &Tensor, offset: usize, len: usize) -> usize {
        let storage = tensor.storage().unwrap_or_else(|| panic!("tensor '{}' is not bound to a buffer", tensor.name()));
        let owner = storage.upgrade::<Buffer>().unwrap_or_else(|| panic!("buffer of tensor '{}' was freed", tensor.name()));
        assert!(std::ptr::eq(Arc::as_ptr(&owner), self), "tensor '{}' does not live in this buffer", tensor.name());

        let nbytes = tensor.nbytes();
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= nbytes),
            "range {offset}..{} out of bounds for tensor '{}' of {nbytes} bytes",
            offset.saturating_add(len),
            tensor.name(),
        );
        storage.offset() + offset
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        debug!(buffer_type = self.buffer_type.name(), size = self.size, "Buffer freed");
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("buffer_type", &self.buffer_type.name())
            .field("size", &self.size)
            .field("base", &self.base())
            .finish()
    }
}

// =========================================================================
// Tensor-level transfers
// =========================================================================

fn bound_buffer(tensor: &Tensor) -> Arc<Buffer> {
    match tensor.storage() {
        None => panic!("tensor '{}' is not bound to a buffer", tensor.name()),
        Some(storage) => {
            storage.upgrade::<Buffer>().unwrap_or_else(|| panic!("buffer of tensor '{}' was freed", tensor.name()))
        }
    }
}

/// Write `data` into `tensor` through whatever buffer it is bound to.
pub fn tensor_set(tensor: &Tensor, data: &[u8], offset: usize) {
    bound_buffer(tensor).set_tensor(tensor, data, offset);
}

/// Read bytes of `tensor` through whatever buffer it is bound to.
pub fn tensor_get(tensor: &Tensor, data: &mut [u8], offset: usize) {
    bound_buffer(tensor).get_tensor(tensor, data, offset);
}

/// Read the whole footprint of `tensor`.
pub fn tensor_read(tensor: &Tensor) -> Vec<u8> {
    let mut data = vec![0; tensor.nbytes()];
    tensor_get(tensor, &mut data, 0);
    data
}

/// Write typed elements starting at the first byte of `tensor`.
///
/// # Panics
///
/// If `T` is not the element type of `tensor`.
pub fn tensor_set_slice<T: HasDType + bytemuck::Pod>(tensor: &Tensor, values: &[T]) {
    check_element_type::<T>(tensor);
    tensor_set(tensor, bytemuck::cast_slice(values), 0);
}

/// Read the footprint of `tensor` as typed elements.
///
/// # Panics
///
/// If `T` is not the element type of `tensor`.
pub fn tensor_get_vec<T: HasDType + bytemuck::Pod>(tensor: &Tensor) -> Vec<T> {
    check_element_type::<T>(tensor);
    let mut values = vec![T::zeroed(); tensor.nbytes() / size_of::<T>()];
    tensor_get(tensor, bytemuck::cast_slice_mut(&mut values), 0);
    values
}

fn check_footprints(src: &Tensor, dst: &Tensor) {
    assert_eq!(
        src.nbytes(),
        dst.nbytes(),
        "cannot copy '{}' into '{}': footprints differ",
        src.name(),
        dst.name()
    );
}

fn check_element_type<T: HasDType>(tensor: &Tensor) {
    assert_eq!(
        T::DTYPE,
        tensor.dtype(),
        "tensor '{}' holds {} elements, not {}",
        tensor.name(),
        tensor.dtype().name(),
        T::DTYPE.name()
    );
}

/// Copy the bytes of `src` into `dst`.
///
/// Tries the destination buffer's single-step copy, then the source
/// buffer's, then a round trip through host memory. Tensors that share a
/// buffer always take the round trip.
pub fn tensor_copy(src: &Tensor, dst: &Tensor) {
    check_footprints(src, dst);
    if std::ptr::eq(src, dst) {
        return;
    }

    let src_buffer = bound_buffer(src);
    let dst_buffer = bound_buffer(dst);
    if !Arc::ptr_eq(&src_buffer, &dst_buffer) {
        if dst_buffer.cpy_tensor_from(src, dst) {
            trace!(src = src.name(), dst = dst.name(), "Copied by destination buffer");
            return;
        }
        if src_buffer.cpy_tensor_to(src, dst) {
            trace!(src = src.name(), dst = dst.name(), "Copied by source buffer");
            return;
        }
    }

    let mut staging = vec![0; src.nbytes()];
    src_buffer.get_tensor(src, &mut staging, 0);
    dst_buffer.set_tensor(dst, &staging, 0);
    trace!(src = src.name(), dst = dst.name(), size = staging.len(), "Copied through host");
}
