//! Reference CPU backend.
//!
//! Executes graphs with the kernels in [`kernels`] on tensors in host
//! buffers. Async transfers are either queued until
//! [`Backend::synchronize`] ([`AsyncMode::Deferred`]) or run before the call
//! returns ([`AsyncMode::Immediate`]); graph computation always runs inline,
//! after everything queued before it.

pub mod config;
pub mod kernels;
pub mod plan;
pub mod queue;

use std::sync::Arc;

use kiln_device::{
    AsyncRead, Backend, BackendId, BackendRegistry, Buffer, BufferType, CpuBufferType, GraphPlan, Result, UserData,
    cpu_buffer_type, is_backend,
};
use kiln_graph::{Graph, Tensor};
use tracing::debug;

pub use config::{AsyncMode, CpuConfig};
pub use plan::CpuPlan;
pub use queue::CpuQueue;

pub struct CpuBackend {
    id: BackendId,
    config: CpuConfig,
    buffer_type: Arc<dyn BufferType>,
    queue: CpuQueue,
}

impl CpuBackend {
    pub const NAME: &'static str = "CPU";

    /// # Panics
    ///
    /// If `config.alignment` is not a power of two.
    pub fn new(config: CpuConfig) -> Self {
        let buffer_type: Arc<dyn BufferType> = if config.alignment == CpuBufferType::DEFAULT_ALIGNMENT {
            cpu_buffer_type()
        } else {
            Arc::new(CpuBufferType::with_alignment(config.alignment))
        };

        let id = BackendId::next();
        debug!(backend.id = %id, async_mode = ?config.async_mode, alignment = config.alignment, "CPU backend created");
        Self { id, config, buffer_type, queue: CpuQueue::new() }
    }

    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    /// Number of queued operations not yet executed.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn flush_if_immediate(&mut self) {
        if self.config.async_mode == AsyncMode::Immediate {
            self.queue.submit();
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new(CpuConfig::default())
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn instance_id(&self) -> BackendId {
        self.id
    }

    fn default_buffer_type(&self) -> Arc<dyn BufferType> {
        Arc::clone(&self.buffer_type)
    }

    fn set_tensor_async(&mut self, tensor: &Arc<Tensor>, data: Vec<u8>, offset: usize) {
        self.queue.push_set(Arc::clone(tensor), data, offset);
        self.flush_if_immediate();
    }

    fn get_tensor_async(&mut self, tensor: &Arc<Tensor>, offset: usize, size: usize) -> AsyncRead {
        let read = AsyncRead::pending();
        self.queue.push_get(Arc::clone(tensor), offset, size, read.clone());
        self.flush_if_immediate();
        read
    }

    /// Any source can be read into a destination in host memory.
    fn cpy_tensor_from_async(&mut self, src: &Arc<Tensor>, dst: &Arc<Tensor>) -> bool {
        if !Buffer::of(dst).is_some_and(|buffer| buffer.is_host()) {
            return false;
        }
        self.queue.push_copy(Arc::clone(src), Arc::clone(dst));
        self.flush_if_immediate();
        true
    }

    fn cpy_tensor_to_async(&mut self, src: &Arc<Tensor>, dst: &Arc<Tensor>) -> bool {
        if !Buffer::of(src).is_some_and(|buffer| buffer.is_host()) {
            return false;
        }
        self.queue.push_copy(Arc::clone(src), Arc::clone(dst));
        self.flush_if_immediate();
        true
    }

    fn synchronize(&mut self) {
        let ops = self.queue.submit();
        debug!(backend.id = %self.id, ops, "CPU backend synchronized");
    }

    fn graph_plan_create(&mut self, graph: &Graph) -> Result<GraphPlan> {
        let plan = CpuPlan::compile(graph, Self::NAME)?;
        Ok(GraphPlan::new(self.id, plan))
    }

    fn graph_plan_compute(&mut self, plan: &GraphPlan) {
        self.queue.submit();
        plan.get::<CpuPlan>(self.id).execute();
    }

    fn supports_op(&self, node: &Tensor) -> bool {
        kernels::supports(node)
    }
}

/// Queued work still runs before the backend goes away, whether it is freed
/// or dropped.
impl Drop for CpuBackend {
    fn drop(&mut self) {
        let flushed = self.queue.submit();
        debug!(backend.id = %self.id, flushed, "CPU backend released");
    }
}

/// Whether `backend` is a [`CpuBackend`].
pub fn is_cpu(backend: &dyn Backend) -> bool {
    is_backend::<CpuBackend>(backend)
}

/// Registry init function: `params` as accepted by [`CpuConfig::with_params`],
/// applied over the environment configuration.
pub fn init(params: &str, _user_data: Option<&UserData>) -> Result<Box<dyn Backend>> {
    let config = CpuConfig::from_params(params)?;
    Ok(Box::new(CpuBackend::new(config)))
}

/// Register the CPU backend as `"CPU"` and return its index.
pub fn register(registry: &mut BackendRegistry) -> usize {
    registry.register(CpuBackend::NAME, init, cpu_buffer_type(), None)
}
