//! Tensor and graph entities consumed by the backend layer.
//!
//! - [`tensor`] - Tensor metadata, layout introspection and storage binding
//! - [`op`] - Operations a node can carry
//! - [`ops`] - Constructors that build graph nodes
//! - [`graph`] - Forward graphs in execution order
//! - [`rope`] - Rotary embedding correction ranges

pub mod error;
pub mod graph;
pub mod op;
pub mod ops;
pub mod rope;
pub mod tensor;


pub use error::{Error, Result};
pub use graph::Graph;
pub use op::{Op, OpParams, UnaryOp};
pub use rope::rope_yarn_corr_dims;
pub use tensor::{Dims, MAX_DIMS, Storage, Tensor, ViewSource, contiguous_strides};

pub use kiln_dtype::DType;
