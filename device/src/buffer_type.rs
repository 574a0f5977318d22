//! Storage classes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use kiln_graph::Tensor;
use snafu::ensure;
use tracing::debug;

use crate::backend::Backend;
use crate::buffer::{Buffer, BufferInterface};
use crate::error::*;

/// A class of storage: how to allocate it, how tensors must be laid out in
/// it, and which backends can use it.
pub trait BufferType: Send + Sync + Any + fmt::Debug {
    fn name(&self) -> &str;

    /// Allocate the backend-specific part of a buffer of at least `size` bytes.
    ///
    /// Callers normally go through [`BufferTypeExt::alloc_buffer`], which
    /// also assembles the [`Buffer`].
    fn alloc(&self, size: usize) -> Result<Box<dyn BufferInterface>>;

    /// Required alignment of tensor offsets. A power of two, fixed for the
    /// lifetime of the type.
    fn alignment(&self) -> usize;

    /// Largest single buffer this type can allocate.
    fn max_size(&self) -> usize {
        usize::MAX
    }

    /// Bytes needed to store `tensor`, padding included.
    fn alloc_size(&self, tensor: &Tensor) -> usize {
        default_alloc_size(tensor)
    }

    /// Whether `backend` can operate on buffers of this type.
    fn supports_backend(&self, backend: &dyn Backend) -> bool;

    /// Whether buffers of this type are plain host memory.
    fn is_host(&self) -> bool {
        false
    }
}

/// Logical footprint of `tensor`, rounded up to whole blocks for quantized
/// element types.
pub fn default_alloc_size(tensor: &Tensor) -> usize {
    let nbytes = tensor.nbytes();
    let dtype = tensor.dtype();
    if dtype.is_quantized() { nbytes.next_multiple_of(dtype.type_size()) } else { nbytes }
}

/// Allocation entry point on shared buffer types.
pub trait BufferTypeExt {
    /// Allocate a buffer of `size` bytes.
    fn alloc_buffer(&self, size: usize) -> Result<Arc<Buffer>>;
}

impl BufferTypeExt for Arc<dyn BufferType> {
    fn alloc_buffer(&self, size: usize) -> Result<Arc<Buffer>> {
        alloc_buffer(self, size)
    }
}

/// Allocate a buffer of `size` bytes from `buffer_type`.
pub fn alloc_buffer(buffer_type: &Arc<dyn BufferType>, size: usize) -> Result<Arc<Buffer>> {
    let max_size = buffer_type.max_size();
    ensure!(
        size <= max_size,
        AllocationSnafu { buffer_type: buffer_type.name(), size, reason: format!("exceeds maximum of {max_size} bytes") }
    );

    let iface = buffer_type.alloc(size).inspect_err(|e| {
        debug!(buffer_type = buffer_type.name(), size, error = %e, "Buffer allocation failed");
    })?;
    Ok(Buffer::new(Arc::clone(buffer_type), iface, size))
}

/// Whether `buffer_type` is the concrete type `T`.
pub fn is_buffer_type<T: BufferType>(buffer_type: &dyn BufferType) -> bool {
    let any: &dyn Any = buffer_type;
    any.is::<T>()
}
