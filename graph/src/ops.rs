//! Graph-building constructors.
//!
//! Each function validates its inputs and returns a new node; nothing is
//! computed here.

use std::sync::Arc;

use kiln_dtype::DType;
use smallvec::smallvec;
use snafu::ensure;

use crate::error::*;
use crate::tensor::{Dims, MAX_DIMS, ViewSource, contiguous_strides, to_dims};
use crate::{Op, OpParams, Tensor, UnaryOp};

/// Views are named after what they reinterpret; compute nodes after their op.
fn node_name(op: Op, a: &Tensor) -> String {
    match op {
        Op::Reshape => format!("{} (reshaped)", a.name()),
        Op::View => format!("{} (view)", a.name()),
        Op::Permute => format!("{} (permuted)", a.name()),
        Op::Transpose => format!("{} (transposed)", a.name()),
        _ => op.name().to_lowercase(),
    }
}

fn compute_node(op: Op, params: OpParams, dtype: DType, ne: Dims, srcs: &[&Arc<Tensor>]) -> Arc<Tensor> {
    Tensor::node(
        node_name(op, srcs[0]),
        dtype,
        ne,
        contiguous_strides(dtype, &ne),
        op,
        params,
        srcs.iter().map(|&t| Arc::clone(t)).collect(),
        None,
    )
}

fn view_node(op: Op, params: OpParams, a: &Arc<Tensor>, ne: Dims, nb: Dims, offset: usize) -> Arc<Tensor> {
    Tensor::node(
        node_name(op, a),
        a.dtype(),
        ne,
        nb,
        op,
        params,
        smallvec![Arc::clone(a)],
        Some(ViewSource { tensor: Arc::clone(a), offset }),
    )
}

/// Copy `a` into a new contiguous tensor.
pub fn dup(a: &Arc<Tensor>) -> Arc<Tensor> {
    compute_node(Op::Dup, OpParams::None, a.dtype(), *a.ne(), &[a])
}

fn binary(op: Op, a: &Arc<Tensor>, b: &Arc<Tensor>) -> Result<Arc<Tensor>> {
    ensure!(a.same_shape(b), ShapeMismatchSnafu { op, lhs: *a.ne(), rhs: *b.ne() });
    ensure!(a.dtype() == b.dtype(), DTypeMismatchSnafu { op, lhs: a.dtype(), rhs: b.dtype() });
    Ok(compute_node(op, OpParams::None, a.dtype(), *a.ne(), &[a, b]))
}

pub fn add(a: &Arc<Tensor>, b: &Arc<Tensor>) -> Result<Arc<Tensor>> {
    binary(Op::Add, a, b)
}

pub fn sub(a: &Arc<Tensor>, b: &Arc<Tensor>) -> Result<Arc<Tensor>> {
    binary(Op::Sub, a, b)
}

pub fn mul(a: &Arc<Tensor>, b: &Arc<Tensor>) -> Result<Arc<Tensor>> {
    binary(Op::Mul, a, b)
}

pub fn div(a: &Arc<Tensor>, b: &Arc<Tensor>) -> Result<Arc<Tensor>> {
    binary(Op::Div, a, b)
}

/// Multiply every element of `a` by `s`.
pub fn scale(a: &Arc<Tensor>, s: f32) -> Arc<Tensor> {
    compute_node(Op::Scale, OpParams::Scale(s), a.dtype(), *a.ne(), &[a])
}

pub fn unary(a: &Arc<Tensor>, op: UnaryOp) -> Arc<Tensor> {
    compute_node(Op::Unary, OpParams::Unary(op), a.dtype(), *a.ne(), &[a])
}

pub fn neg(a: &Arc<Tensor>) -> Arc<Tensor> {
    unary(a, UnaryOp::Neg)
}

pub fn abs(a: &Arc<Tensor>) -> Arc<Tensor> {
    unary(a, UnaryOp::Abs)
}

pub fn relu(a: &Arc<Tensor>) -> Arc<Tensor> {
    unary(a, UnaryOp::Relu)
}

pub fn sqr(a: &Arc<Tensor>) -> Arc<Tensor> {
    unary(a, UnaryOp::Sqr)
}

/// Matrix product contracting the first dimension of both operands.
///
/// `a` is `[k, m]`, `b` is `[k, n]`, the result is `[m, n]` in `f32`.
/// Higher dimensions are batch dimensions and must match.
pub fn mul_mat(a: &Arc<Tensor>, b: &Arc<Tensor>) -> Result<Arc<Tensor>> {
    let (an, bn) = (a.ne(), b.ne());
    ensure!(
        an[0] == bn[0] && an[2] == bn[2] && an[3] == bn[3],
        ShapeMismatchSnafu { op: Op::MulMat, lhs: *an, rhs: *bn }
    );
    ensure!(!b.is_transposed(), NotContiguousSnafu { op: Op::MulMat, name: b.name() });
    Ok(compute_node(Op::MulMat, OpParams::None, DType::F32, [an[1], bn[1], an[2], an[3]], &[a, b]))
}

/// Copy `src` into `dst`, converting layout. The result is a view of `dst`.
pub fn cpy(src: &Arc<Tensor>, dst: &Arc<Tensor>) -> Result<Arc<Tensor>> {
    ensure!(
        src.nelements() == dst.nelements(),
        ElementCountMismatchSnafu { op: Op::Cpy, expected: dst.nelements(), actual: src.nelements() }
    );
    Ok(Tensor::node(
        format!("{} (copy of {})", dst.name(), src.name()),
        dst.dtype(),
        *dst.ne(),
        *dst.nb(),
        Op::Cpy,
        OpParams::None,
        smallvec![Arc::clone(src), Arc::clone(dst)],
        Some(ViewSource { tensor: Arc::clone(dst), offset: 0 }),
    ))
}

/// Reinterpret a contiguous tensor with a new shape.
pub fn reshape(a: &Arc<Tensor>, shape: &[usize]) -> Result<Arc<Tensor>> {
    ensure!(a.is_contiguous(), NotContiguousSnafu { op: Op::Reshape, name: a.name() });
    let ne = to_dims(a.name(), shape)?;
    let count: usize = ne.iter().product();
    ensure!(
        count == a.nelements(),
        ElementCountMismatchSnafu { op: Op::Reshape, expected: a.nelements(), actual: count }
    );
    let block = a.dtype().block_size();
    ensure!(ne[0] % block == 0, PartialBlockSnafu { op: Op::Reshape, dtype: a.dtype(), ne: ne[0] });
    Ok(view_node(Op::Reshape, OpParams::None, a, ne, contiguous_strides(a.dtype(), &ne), 0))
}

/// A strided window into `a`.
///
/// `strides` gives the byte strides of dimensions `1..shape.len()`; the first
/// dimension is always packed. `offset` is in bytes from the start of `a`.
pub fn view(a: &Arc<Tensor>, shape: &[usize], strides: &[usize], offset: usize) -> Result<Arc<Tensor>> {
    let ne = to_dims(a.name(), shape)?;
    let mut nb = contiguous_strides(a.dtype(), &ne);
    for (dim, &stride) in strides.iter().enumerate().take(MAX_DIMS - 1) {
        nb[dim + 1] = stride;
    }
    // Strides past the explicitly given ones continue densely.
    for dim in (strides.len() + 1).max(2)..MAX_DIMS {
        nb[dim] = nb[dim - 1] * ne[dim - 1];
    }

    let result = view_node(Op::View, OpParams::None, a, ne, nb, offset);
    let end = offset + result.nbytes();
    ensure!(end <= a.nbytes(), ViewOutOfBoundsSnafu { name: a.name(), end, available: a.nbytes() });
    Ok(result)
}

/// Reorder dimensions: source dimension `i` becomes result dimension `axes[i]`.
pub fn permute(a: &Arc<Tensor>, axes: [usize; MAX_DIMS]) -> Result<Arc<Tensor>> {
    let mut seen = [false; MAX_DIMS];
    for &axis in &axes {
        ensure!(axis < MAX_DIMS && !seen[axis], InvalidPermutationSnafu { axes });
        seen[axis] = true;
    }

    let mut ne = [0; MAX_DIMS];
    let mut nb = [0; MAX_DIMS];
    for (i, &axis) in axes.iter().enumerate() {
        ne[axis] = a.ne()[i];
        nb[axis] = a.nb()[i];
    }
    Ok(view_node(Op::Permute, OpParams::Permute(axes), a, ne, nb, 0))
}

/// Swap the first two dimensions.
pub fn transpose(a: &Arc<Tensor>) -> Arc<Tensor> {
    let mut ne = *a.ne();
    let mut nb = *a.nb();
    ne.swap(0, 1);
    nb.swap(0, 1);
    view_node(Op::Transpose, OpParams::None, a, ne, nb, 0)
}
