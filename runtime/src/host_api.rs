//! Capability table handed to backend modules.
//!
//! A module built as a separate library cannot rely on sharing statics with
//! the host, so the host passes it a [`HostApi`]: plain function pointers
//! for the allocation, buffer, tensor layout and type queries a backend
//! implementation needs. Fields are only ever appended; `version` grows with
//! every append so a module can reject a host older than itself.

use std::ptr::NonNull;
use std::sync::Arc;

use kiln_device::memory::{raw_alloc, raw_free};
use kiln_device::{Backend, Buffer, BufferInterface, BufferType, alloc_buffer, cpu_buffer_from_ptr, cpu_buffer_type};
use kiln_dtype::DType;
use kiln_graph::{Op, Tensor, UnaryOp, rope_yarn_corr_dims};
use snafu::ensure;

use crate::cpu::is_cpu;
use crate::error::{IncompatibleHostApiSnafu, Result};

/// Version of the table layout this host provides.
pub const HOST_API_VERSION: u32 = 1;

#[repr(C)]
pub struct HostApi {
    pub version: u32,
    /// `size_of::<HostApi>()` as compiled into the host.
    pub size: usize,

    pub free: unsafe fn(*mut u8),
    pub malloc: fn(usize) -> *mut u8,
    pub buffer_init: fn(Arc<dyn BufferType>, Box<dyn BufferInterface>, usize) -> Arc<Buffer>,
    pub cpu_buffer_from_ptr: unsafe fn(NonNull<u8>, usize) -> Arc<Buffer>,
    pub cpu_buffer_type: fn() -> Arc<dyn BufferType>,
    pub buft_get_alloc_size: fn(&dyn BufferType, &Tensor) -> usize,
    pub buft_alloc_buffer: fn(&Arc<dyn BufferType>, usize) -> kiln_device::Result<Arc<Buffer>>,
    pub backend_is_cpu: fn(&dyn Backend) -> bool,

    pub tensor_get: fn(&Tensor, &mut [u8], usize),
    pub tensor_set: fn(&Tensor, &[u8], usize),

    pub is_quantized: fn(DType) -> bool,
    pub type_size: fn(DType) -> usize,
    pub blck_size: fn(DType) -> usize,
    pub is_transposed: fn(&Tensor) -> bool,
    pub nbytes: fn(&Tensor) -> usize,
    pub get_unary_op: fn(&Tensor) -> Option<UnaryOp>,
    pub nelements: fn(&Tensor) -> usize,
    pub nrows: fn(&Tensor) -> usize,
    pub is_permuted: fn(&Tensor) -> bool,
    pub is_contiguous: fn(&Tensor) -> bool,
    pub op_name: fn(Op) -> &'static str,
    pub type_name: fn(DType) -> &'static str,
    pub element_size: fn(&Tensor) -> usize,
    pub row_size: fn(DType, usize) -> usize,
    pub rope_yarn_corr_dims: fn(usize, usize, f32, f32, f32) -> [f32; 2],
    pub op_desc: fn(&Tensor) -> &'static str,
}

static HOST_API: HostApi = HostApi {
    version: HOST_API_VERSION,
    size: size_of::<HostApi>(),

    free: raw_free,
    malloc: raw_alloc,
    buffer_init: Buffer::new,
    cpu_buffer_from_ptr,
    cpu_buffer_type,
    buft_get_alloc_size,
    buft_alloc_buffer: alloc_buffer,
    backend_is_cpu: is_cpu,

    tensor_get: kiln_device::tensor_get,
    tensor_set: kiln_device::tensor_set,

    is_quantized: |dtype| dtype.is_quantized(),
    type_size: |dtype| dtype.type_size(),
    blck_size: |dtype| dtype.block_size(),
    is_transposed: Tensor::is_transposed,
    nbytes: Tensor::nbytes,
    get_unary_op: Tensor::unary_op,
    nelements: Tensor::nelements,
    nrows: Tensor::nrows,
    is_permuted: Tensor::is_permuted,
    is_contiguous: Tensor::is_contiguous,
    op_name: Op::name,
    type_name: |dtype| dtype.name(),
    element_size: Tensor::element_size,
    row_size: |dtype, ne| dtype.row_size(ne),
    rope_yarn_corr_dims,
    op_desc: Tensor::op_desc,
};

fn buft_get_alloc_size(buffer_type: &dyn BufferType, tensor: &Tensor) -> usize {
    buffer_type.alloc_size(tensor)
}

impl HostApi {
    /// The table of this host, fully populated.
    pub fn current() -> &'static HostApi {
        &HOST_API
    }

    /// Fail unless this table is at least `min_version`.
    pub fn require(&self, min_version: u32) -> Result<()> {
        ensure!(
            self.version >= min_version,
            IncompatibleHostApiSnafu { required: min_version, available: self.version }
        );
        Ok(())
    }
}
