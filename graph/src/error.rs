use kiln_dtype::DType;
use snafu::Snafu;

use crate::Op;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Tensors are limited to four dimensions.
    #[snafu(display("tensor '{name}' has {dims} dimensions, at most 4 are supported"))]
    TooManyDims { name: String, dims: usize },

    #[snafu(display("{op:?}: shape mismatch between {lhs:?} and {rhs:?}"))]
    ShapeMismatch { op: Op, lhs: [usize; 4], rhs: [usize; 4] },

    #[snafu(display("{op:?}: dtype mismatch between {lhs} and {rhs}"))]
    DTypeMismatch { op: Op, lhs: DType, rhs: DType },

    /// Reshape or copy changes the number of elements.
    #[snafu(display("{op:?}: element count mismatch, {expected} != {actual}"))]
    ElementCountMismatch { op: Op, expected: usize, actual: usize },

    /// The operation requires a contiguous input.
    #[snafu(display("{op:?}: tensor '{name}' is not contiguous"))]
    NotContiguous { op: Op, name: String },

    #[snafu(display("invalid permutation {axes:?}"))]
    InvalidPermutation { axes: [usize; 4] },

    /// A view reaches past the end of the tensor it views.
    #[snafu(display("view of '{name}' ends at byte {end}, source has {available} bytes"))]
    ViewOutOfBounds { name: String, end: usize, available: usize },

    /// A row length is not a whole number of quantization blocks.
    #[snafu(display("{op:?}: row of {ne} elements is not a multiple of the {dtype} block size"))]
    PartialBlock { op: Op, dtype: DType, ne: usize },

    #[snafu(display("tensor '{name}' is already bound to storage"))]
    AlreadyBound { name: String },

    /// Views borrow the storage of their source and cannot be bound directly.
    #[snafu(display("tensor '{name}' is a view and cannot be bound"))]
    ViewBinding { name: String },
}
