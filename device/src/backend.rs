//! Execution contexts.
//!
//! A [`Backend`] moves tensor data (synchronously through buffers, or through
//! its own asynchronous queue) and executes graphs, directly or through a
//! precompiled [`GraphPlan`].
//!
//! # Async model
//!
//! The `_async` methods may return before the work is done. Work issued on
//! one backend completes in issue order, and [`Backend::synchronize`] blocks
//! until everything issued so far has finished. Nothing orders work between
//! two backends.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kiln_graph::{Graph, Tensor};
use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::{tensor_copy, tensor_get, tensor_set};
use crate::buffer_type::BufferType;
use crate::error::Result;

/// Identity of one backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendId(u64);

impl BackendId {
    /// A fresh id, distinct from every id handed out before in this process.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result slot of an asynchronous read.
///
/// The bytes become available once the issuing backend has completed the
/// read, at the latest after [`Backend::synchronize`].
#[derive(Debug, Clone, Default)]
pub struct AsyncRead {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl AsyncRead {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn ready(data: Vec<u8>) -> Self {
        Self { slot: Arc::new(Mutex::new(Some(data))) }
    }

    /// Deliver the bytes. Called by the backend that owns the read.
    pub fn complete(&self, data: Vec<u8>) {
        *self.slot.lock() = Some(data);
    }

    pub fn is_ready(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Take the bytes if the read has completed.
    pub fn take(&self) -> Option<Vec<u8>> {
        self.slot.lock().take()
    }
}

/// A graph compiled by one backend instance for repeated execution.
pub struct GraphPlan {
    owner: BackendId,
    inner: Box<dyn Any + Send>,
}

impl GraphPlan {
    pub fn new<P: Any + Send>(owner: BackendId, inner: P) -> Self {
        Self { owner, inner: Box::new(inner) }
    }

    pub fn owner(&self) -> BackendId {
        self.owner
    }

    /// The backend-specific plan.
    ///
    /// # Panics
    ///
    /// If the plan was created by another backend instance or holds another
    /// plan type.
    pub fn get<P: Any>(&self, backend: BackendId) -> &P {
        assert_eq!(self.owner, backend, "graph plan created by backend {} used on backend {backend}", self.owner);
        self.inner.downcast_ref::<P>().unwrap_or_else(|| panic!("graph plan of backend {backend} has a foreign type"))
    }
}

impl fmt::Debug for GraphPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphPlan").field("owner", &self.owner).finish_non_exhaustive()
    }
}

pub trait Backend: Send + Any {
    fn name(&self) -> &str;

    fn instance_id(&self) -> BackendId;

    /// Buffer type new tensors for this backend should use.
    fn default_buffer_type(&self) -> Arc<dyn BufferType>;

    /// Write `data` into `tensor` at `offset`, possibly after returning.
    fn set_tensor_async(&mut self, tensor: &Arc<Tensor>, data: Vec<u8>, offset: usize) {
        tensor_set(tensor, &data, offset);
    }

    /// Read `size` bytes of `tensor` at `offset`, possibly after returning.
    fn get_tensor_async(&mut self, tensor: &Arc<Tensor>, offset: usize, size: usize) -> AsyncRead {
        let mut data = vec![0; size];
        tensor_get(tensor, &mut data, offset);
        AsyncRead::ready(data)
    }

    /// Queue a single-step copy into `dst`, which lives in a buffer of this
    /// backend. Returns `false` if the pairing is not supported.
    fn cpy_tensor_from_async(&mut self, _src: &Arc<Tensor>, _dst: &Arc<Tensor>) -> bool {
        false
    }

    /// Queue a single-step copy out of `src`, which lives in a buffer of this
    /// backend.
    fn cpy_tensor_to_async(&mut self, _src: &Arc<Tensor>, _dst: &Arc<Tensor>) -> bool {
        false
    }

    /// Block until all previously issued async work has completed.
    fn synchronize(&mut self) {}

    /// Compile `graph` for repeated execution.
    ///
    /// Fails only if the graph contains an operation this backend cannot
    /// represent; check [`supports_graph`] first.
    fn graph_plan_create(&mut self, graph: &Graph) -> Result<GraphPlan>;

    /// Execute a plan created by this instance.
    fn graph_plan_compute(&mut self, plan: &GraphPlan);

    fn graph_plan_free(&mut self, plan: GraphPlan) {
        debug!(backend = self.name(), plan.owner = %plan.owner(), "Graph plan freed");
    }

    /// Execute `graph` once, without keeping a plan.
    fn graph_compute(&mut self, graph: &Graph) -> Result<()> {
        let plan = self.graph_plan_create(graph)?;
        self.graph_plan_compute(&plan);
        self.graph_plan_free(plan);
        Ok(())
    }

    /// Whether this backend can execute the operation producing `node`.
    fn supports_op(&self, node: &Tensor) -> bool;

    /// Release the backend. Buffers allocated through its buffer types stay
    /// valid.
    fn free(self: Box<Self>) {}
}

impl fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").field("name", &self.name()).field("id", &self.instance_id()).finish()
    }
}

/// Whether `backend` is the concrete type `B`.
pub fn is_backend<B: Backend>(backend: &dyn Backend) -> bool {
    let any: &dyn Any = backend;
    any.is::<B>()
}

/// First node of `graph` that `backend` cannot execute.
pub fn first_unsupported<'g>(backend: &dyn Backend, graph: &'g Graph) -> Option<&'g Arc<Tensor>> {
    graph.nodes().iter().find(|node| !backend.supports_op(node))
}

/// Whether `backend` can execute every node of `graph`.
pub fn supports_graph(backend: &dyn Backend, graph: &Graph) -> bool {
    first_unsupported(backend, graph).is_none()
}

/// Queue a copy of `src` into `dst` on `backend`.
///
/// Tries the backend's `cpy_tensor_from_async`, then `cpy_tensor_to_async`.
/// If neither applies, the backend is synchronized and the copy runs
/// synchronously through [`tensor_copy`], so it still observes earlier work.
pub fn tensor_copy_async(backend: &mut dyn Backend, src: &Arc<Tensor>, dst: &Arc<Tensor>) {
    if backend.cpy_tensor_from_async(src, dst) || backend.cpy_tensor_to_async(src, dst) {
        return;
    }
    backend.synchronize();
    tensor_copy(src, dst);
}
