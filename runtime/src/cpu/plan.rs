//! Graph plans of the CPU backend.
//!
//! Creating a plan validates every node once and records the kernel each
//! computing node needs; executing it only walks that list. Leafs and view
//! nodes produce no step.

use std::sync::Arc;

use kiln_device::Result;
use kiln_device::error::UnsupportedOpSnafu;
use kiln_graph::{Graph, Tensor};
use snafu::ensure;
use tracing::debug;

use super::kernels::{self, Kernel};

/// A node with the kernel that computes it.
#[derive(Debug, Clone)]
pub struct Step {
    pub node: Arc<Tensor>,
    pub kernel: Kernel,
}

#[derive(Debug, Clone, Default)]
pub struct CpuPlan {
    steps: Vec<Step>,
}

impl CpuPlan {
    /// Validate `graph` and lower it to a list of steps in graph order.
    pub fn compile(graph: &Graph, backend: &str) -> Result<Self> {
        let mut steps = Vec::with_capacity(graph.len());
        for node in graph.nodes() {
            ensure!(
                kernels::supports(node),
                UnsupportedOpSnafu { backend, op: node.op(), node: node.name() }
            );
            if let Some(kernel) = Kernel::select(node) {
                steps.push(Step { node: Arc::clone(node), kernel });
            }
        }

        debug!(backend, nodes = graph.len(), steps = steps.len(), "CPU plan compiled");
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order.
    ///
    /// # Panics
    ///
    /// If a tensor the plan touches is unbound or its buffer was freed.
    pub fn execute(&self) {
        for step in &self.steps {
            step.kernel.run(&step.node);
        }
    }
}
