//! Tensor metadata and storage binding.
//!
//! A [`Tensor`] never owns its bytes. Leaf and compute tensors are bound once
//! to a buffer region through [`Storage`]; view tensors resolve their storage
//! through the tensor they view.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use kiln_dtype::DType;
use smallvec::SmallVec;
use snafu::ensure;

use crate::error::*;
use crate::{Op, OpParams, UnaryOp};

pub const MAX_DIMS: usize = 4;

/// Element counts (`ne`) or byte strides (`nb`) per dimension.
pub type Dims = [usize; MAX_DIMS];

/// Where a tensor's bytes live: a weak handle to the owning buffer and a byte
/// offset inside it.
///
/// The handle is weak because buffers own their memory exclusively; once a
/// buffer is freed, [`Storage::upgrade`] returns `None`.
#[derive(Debug, Clone)]
pub struct Storage {
    buffer: Weak<dyn Any + Send + Sync>,
    offset: usize,
}

impl Storage {
    pub fn new<B: Any + Send + Sync>(buffer: &Arc<B>, offset: usize) -> Self {
        let buffer: Weak<B> = Arc::downgrade(buffer);
        let buffer: Weak<dyn Any + Send + Sync> = buffer;
        Self { buffer, offset }
    }

    /// Byte offset from the start of the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Recover the buffer if it is still alive and of type `B`.
    pub fn upgrade<B: Any + Send + Sync>(&self) -> Option<Arc<B>> {
        self.buffer.upgrade()?.downcast::<B>().ok()
    }

    pub fn is_live(&self) -> bool {
        self.buffer.strong_count() > 0
    }

    /// Whether both locations point into the same buffer.
    pub fn same_buffer(&self, other: &Storage) -> bool {
        Weak::ptr_eq(&self.buffer, &other.buffer)
    }

    fn shifted(&self, by: usize) -> Self {
        Self { buffer: Weak::clone(&self.buffer), offset: self.offset + by }
    }
}

/// The tensor a view borrows its storage from.
#[derive(Debug, Clone)]
pub struct ViewSource {
    pub tensor: Arc<Tensor>,
    pub offset: usize,
}

pub struct Tensor {
    name: String,
    dtype: DType,
    ne: Dims,
    nb: Dims,
    op: Op,
    params: OpParams,
    src: SmallVec<[Arc<Tensor>; 2]>,
    view: Option<ViewSource>,
    storage: OnceLock<Storage>,
}

impl Tensor {
    /// Create a contiguous leaf tensor (inputs, weights).
    pub fn new(name: impl Into<String>, dtype: DType, shape: &[usize]) -> Result<Arc<Self>> {
        let name = name.into();
        let ne = to_dims(&name, shape)?;
        Ok(Self::leaf(name, dtype, ne))
    }

    /// Shorthand for a 1-D leaf.
    pub fn new_1d(name: impl Into<String>, dtype: DType, ne0: usize) -> Arc<Self> {
        Self::leaf(name.into(), dtype, [ne0, 1, 1, 1])
    }

    fn leaf(name: String, dtype: DType, ne: Dims) -> Arc<Self> {
        let nb = contiguous_strides(dtype, &ne);
        Self::node(name, dtype, ne, nb, Op::None, OpParams::None, SmallVec::new(), None)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn node(
        name: String,
        dtype: DType,
        ne: Dims,
        nb: Dims,
        op: Op,
        params: OpParams,
        src: SmallVec<[Arc<Tensor>; 2]>,
        view: Option<ViewSource>,
    ) -> Arc<Self> {
        Arc::new(Self { name, dtype, ne, nb, op, params, src, view, storage: OnceLock::new() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Elements per dimension.
    pub fn ne(&self) -> &Dims {
        &self.ne
    }

    /// Byte strides per dimension.
    pub fn nb(&self) -> &Dims {
        &self.nb
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn params(&self) -> OpParams {
        self.params
    }

    pub fn src(&self) -> &[Arc<Tensor>] {
        &self.src
    }

    pub fn view_source(&self) -> Option<&ViewSource> {
        self.view.as_ref()
    }

    pub fn is_leaf(&self) -> bool {
        self.op == Op::None
    }

    pub fn is_view(&self) -> bool {
        self.view.is_some()
    }

    /// The unary function of an [`Op::Unary`] node.
    pub fn unary_op(&self) -> Option<UnaryOp> {
        match (self.op, self.params) {
            (Op::Unary, OpParams::Unary(op)) => Some(op),
            _ => None,
        }
    }

    /// Operation name, with unary nodes described by their function.
    pub fn op_desc(&self) -> &'static str {
        self.unary_op().map_or_else(|| self.op.name(), UnaryOp::name)
    }

    // =========================================================================
    // Layout
    // =========================================================================

    /// Number of dimensions, ignoring trailing dimensions of size one.
    pub fn n_dims(&self) -> usize {
        self.ne.iter().rposition(|&n| n != 1).map_or(1, |last| last + 1)
    }

    pub fn nelements(&self) -> usize {
        self.ne.iter().product()
    }

    pub fn nrows(&self) -> usize {
        self.ne[1] * self.ne[2] * self.ne[3]
    }

    /// Bytes per block of the element type.
    pub fn element_size(&self) -> usize {
        self.dtype.type_size()
    }

    /// Bytes spanned by the tensor, from its first to its last element.
    ///
    /// Quantized rows count whole blocks.
    pub fn nbytes(&self) -> usize {
        if self.ne.contains(&0) {
            return 0;
        }

        let tail: usize = (1..MAX_DIMS).map(|i| (self.ne[i] - 1) * self.nb[i]).sum();
        let block = self.dtype.block_size();
        if block == 1 {
            self.dtype.type_size() + (self.ne[0] - 1) * self.nb[0] + tail
        } else {
            self.ne[0].div_ceil(block) * self.nb[0] + tail
        }
    }

    /// Bytes of one row of this tensor.
    pub fn row_size(&self) -> usize {
        self.dtype.row_size(self.ne[0])
    }

    pub fn is_transposed(&self) -> bool {
        self.nb[0] > self.nb[1]
    }

    pub fn is_permuted(&self) -> bool {
        self.nb[0] > self.nb[1] || self.nb[1] > self.nb[2] || self.nb[2] > self.nb[3]
    }

    pub fn is_contiguous(&self) -> bool {
        self.nb == contiguous_strides(self.dtype, &self.ne)
    }

    /// Same number of elements in every dimension.
    pub fn same_shape(&self, other: &Tensor) -> bool {
        self.ne == other.ne
    }

    // =========================================================================
    // Storage
    // =========================================================================

    /// Bind this tensor to a buffer region. Only succeeds once.
    pub fn bind(&self, storage: Storage) -> Result<()> {
        ensure!(self.view.is_none(), ViewBindingSnafu { name: self.name.clone() });
        self.storage.set(storage).map_err(|_| AlreadyBoundSnafu { name: self.name.clone() }.build())
    }

    /// Resolve where this tensor's bytes live, following views to their base.
    pub fn storage(&self) -> Option<Storage> {
        match &self.view {
            Some(view) => view.tensor.storage().map(|storage| storage.shifted(view.offset)),
            None => self.storage.get().cloned(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.storage().is_some()
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("name", &self.name)
            .field("dtype", &self.dtype)
            .field("ne", &self.ne)
            .field("nb", &self.nb)
            .field("op", &self.op)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Strides of a densely packed tensor.
pub fn contiguous_strides(dtype: DType, ne: &Dims) -> Dims {
    let nb0 = dtype.type_size();
    let nb1 = dtype.row_size(ne[0]);
    let nb2 = nb1 * ne[1];
    let nb3 = nb2 * ne[2];
    [nb0, nb1, nb2, nb3]
}

pub(crate) fn to_dims(name: &str, shape: &[usize]) -> Result<Dims> {
    ensure!(shape.len() <= MAX_DIMS, TooManyDimsSnafu { name, dims: shape.len() });
    let mut ne = [1; MAX_DIMS];
    ne[..shape.len()].copy_from_slice(shape);
    Ok(ne)
}
