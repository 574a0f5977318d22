//! The backend contract: storage classes, buffers, execution contexts and
//! the registry that names them.
//!
//! - [`buffer_type`] - Storage classes and buffer allocation
//! - [`buffer`] - Allocated regions and tensor data transfer
//! - [`backend`] - Execution contexts, async transfers and graph plans
//! - [`registry`] - Backend discovery by name
//! - [`cpu`] - Host memory buffer type
//! - [`memory`] - Aligned host allocations

pub mod backend;
pub mod buffer;
pub mod buffer_type;
pub mod cpu;
pub mod error;
pub mod memory;
pub mod registry;


pub use backend::{
    AsyncRead, Backend, BackendId, GraphPlan, first_unsupported, is_backend, supports_graph, tensor_copy_async,
};
pub use buffer::{
    Buffer, BufferInterface, tensor_copy, tensor_get, tensor_get_vec, tensor_read, tensor_set, tensor_set_slice,
};
pub use buffer_type::{BufferType, BufferTypeExt, alloc_buffer, default_alloc_size, is_buffer_type};
pub use cpu::{CpuBufferType, HostBuffer, cpu_buffer_from_ptr, cpu_buffer_type, is_cpu_buffer_type};
pub use error::{Error, Result};
pub use memory::{HostMemory, align_up};
pub use registry::{BackendRegistry, InitFn, UserData};
