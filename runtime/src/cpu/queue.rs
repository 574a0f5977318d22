//! In-order queue behind the CPU backend's async transfers.
//!
//! Nothing runs in the background: queued operations execute, in the order
//! they were issued, when the owner calls [`CpuQueue::submit`].

use std::fmt;
use std::sync::Arc;

use kiln_device::{AsyncRead, tensor_copy, tensor_get, tensor_set};
use kiln_graph::Tensor;
use tracing::trace;

enum PendingOp {
    Set { tensor: Arc<Tensor>, data: Vec<u8>, offset: usize },
    Get { tensor: Arc<Tensor>, offset: usize, size: usize, read: AsyncRead },
    Copy { src: Arc<Tensor>, dst: Arc<Tensor> },
}

#[derive(Default)]
pub struct CpuQueue {
    pending: Vec<PendingOp>,
}

impl fmt::Debug for CpuQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuQueue").field("pending_count", &self.pending.len()).finish()
    }
}

impl CpuQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn push_set(&mut self, tensor: Arc<Tensor>, data: Vec<u8>, offset: usize) {
        self.pending.push(PendingOp::Set { tensor, data, offset });
    }

    /// Queue a read whose bytes are delivered into `read`.
    pub fn push_get(&mut self, tensor: Arc<Tensor>, offset: usize, size: usize, read: AsyncRead) {
        self.pending.push(PendingOp::Get { tensor, offset, size, read });
    }

    pub fn push_copy(&mut self, src: Arc<Tensor>, dst: Arc<Tensor>) {
        self.pending.push(PendingOp::Copy { src, dst });
    }

    /// Run every queued operation in issue order and return how many ran.
    pub fn submit(&mut self) -> usize {
        let ops = std::mem::take(&mut self.pending);
        let count = ops.len();
        for op in ops {
            Self::execute_op(op);
        }
        count
    }

    fn execute_op(op: PendingOp) {
        match op {
            PendingOp::Set { tensor, data, offset } => {
                trace!(tensor.name = tensor.name(), offset, size = data.len(), "Deferred set");
                tensor_set(&tensor, &data, offset);
            }
            PendingOp::Get { tensor, offset, size, read } => {
                trace!(tensor.name = tensor.name(), offset, size, "Deferred get");
                let mut data = vec![0; size];
                tensor_get(&tensor, &mut data, offset);
                read.complete(data);
            }
            PendingOp::Copy { src, dst } => {
                trace!(src = src.name(), dst = dst.name(), "Deferred copy");
                tensor_copy(&src, &dst);
            }
        }
    }
}
