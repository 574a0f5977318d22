//! Forward computation graphs.

use std::collections::HashSet;
use std::sync::Arc;

use crate::Tensor;

/// A topologically ordered list of compute nodes plus the leafs they read.
///
/// Nodes appear after all of their sources. View nodes are kept in the node
/// list so backends see every tensor a computation touches.
#[derive(Debug, Default, Clone)]
pub struct Graph {
    nodes: Vec<Arc<Tensor>>,
    leafs: Vec<Arc<Tensor>>,
    /// Addresses of tensors already added; kept alive by `nodes`/`leafs`.
    visited: HashSet<usize>,
}

fn key(tensor: &Arc<Tensor>) -> usize {
    Arc::as_ptr(tensor) as usize
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph that computes `output`.
    pub fn build_forward(output: &Arc<Tensor>) -> Self {
        let mut graph = Self::new();
        graph.expand(output);
        graph
    }

    /// Add `tensor` and everything it depends on. Tensors already present are
    /// skipped.
    pub fn expand(&mut self, tensor: &Arc<Tensor>) {
        // Iterative post-order walk; deep chains must not overflow the stack.
        let mut stack: Vec<(Arc<Tensor>, usize)> = vec![(Arc::clone(tensor), 0)];
        while let Some((current, next_src)) = stack.pop() {
            if next_src == 0 && self.visited.contains(&key(&current)) {
                continue;
            }
            if let Some(src) = current.src().get(next_src).cloned() {
                stack.push((current, next_src + 1));
                if !self.visited.contains(&key(&src)) {
                    stack.push((src, 0));
                }
                continue;
            }

            if !self.visited.insert(key(&current)) {
                continue;
            }
            if current.is_leaf() {
                self.leafs.push(current);
            } else {
                self.nodes.push(current);
            }
        }
    }

    pub fn nodes(&self) -> &[Arc<Tensor>] {
        &self.nodes
    }

    pub fn leafs(&self) -> &[Arc<Tensor>] {
        &self.leafs
    }

    /// Number of compute nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The last node added, usually the graph output.
    pub fn output(&self) -> Option<&Arc<Tensor>> {
        self.nodes.last()
    }
}
