//! Reference `f32` kernels.
//!
//! Every kernel reads its sources through the buffers they are bound to,
//! follows their byte strides, and writes the result in the destination's
//! layout. Throughput is not a goal; these kernels define what the other
//! backends have to agree with.

use kiln_device::{tensor_read, tensor_set};
use kiln_dtype::DType;
use kiln_graph::{Op, OpParams, Tensor, UnaryOp};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
        }
    }
}

/// The computation a graph node needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kernel {
    /// `Dup` and `Cpy`: element-wise copy into the node's layout.
    Copy,
    Binary(BinaryOp),
    Scale(f32),
    Unary(UnaryOp),
    MulMat,
}

impl Kernel {
    /// Kernel computing `node`, or `None` for leafs, views and operations
    /// without a kernel.
    pub fn select(node: &Tensor) -> Option<Self> {
        match (node.op(), node.params()) {
            (Op::Dup | Op::Cpy, _) => Some(Self::Copy),
            (Op::Add, _) => Some(Self::Binary(BinaryOp::Add)),
            (Op::Sub, _) => Some(Self::Binary(BinaryOp::Sub)),
            (Op::Mul, _) => Some(Self::Binary(BinaryOp::Mul)),
            (Op::Div, _) => Some(Self::Binary(BinaryOp::Div)),
            (Op::Scale, OpParams::Scale(s)) => Some(Self::Scale(s)),
            (Op::Unary, OpParams::Unary(op)) => Some(Self::Unary(op)),
            (Op::MulMat, _) => Some(Self::MulMat),
            _ => None,
        }
    }

    /// Compute `node` from its sources.
    pub fn run(self, node: &Tensor) {
        trace!(node = node.name(), kernel = ?self, "Running kernel");
        let src = node.src();
        let out = match self {
            Self::Copy => gather(&src[0]),
            Self::Binary(op) => {
                let b = gather(&src[1]);
                gather(&src[0]).into_iter().zip(b).map(|(x, y)| op.apply(x, y)).collect()
            }
            Self::Scale(s) => gather(&src[0]).into_iter().map(|x| x * s).collect(),
            Self::Unary(op) => gather(&src[0]).into_iter().map(|x| unary(op, x)).collect(),
            Self::MulMat => mul_mat(&src[0], &src[1]),
        };
        scatter(node, &out);
    }
}

/// Whether the CPU backend can execute the operation producing `node`.
///
/// Leafs and views need no computation and are accepted for every element
/// type. Computing operations need `f32` for the node and all its sources.
pub fn supports(node: &Tensor) -> bool {
    if node.is_leaf() || node.op().is_view() {
        return true;
    }
    Kernel::select(node).is_some()
        && node.dtype() == DType::F32
        && node.src().iter().all(|src| src.dtype() == DType::F32)
}

fn unary(op: UnaryOp, x: f32) -> f32 {
    match op {
        UnaryOp::Neg => -x,
        UnaryOp::Abs => x.abs(),
        UnaryOp::Relu => x.max(0.0),
        UnaryOp::Sqr => x * x,
    }
}

/// `a` is `[k, m, ..]`, `b` is `[k, n, ..]`, the result `[m, n, ..]`:
/// every output element is the dot product of a row of `a` and a row of `b`.
fn mul_mat(a: &Tensor, b: &Tensor) -> Vec<f32> {
    let [k, m, d2, d3] = *a.ne();
    let n = b.ne()[1];
    let (a, b) = (gather(a), gather(b));

    let mut out = vec![0.0; m * n * d2 * d3];
    for batch in 0..d2 * d3 {
        let (a_base, b_base, out_base) = (batch * k * m, batch * k * n, batch * m * n);
        for j in 0..n {
            let b_row = &b[b_base + j * k..b_base + (j + 1) * k];
            for i in 0..m {
                let a_row = &a[a_base + i * k..a_base + (i + 1) * k];
                out[out_base + j * m + i] = a_row.iter().zip(b_row).map(|(x, y)| x * y).sum();
            }
        }
    }
    out
}

/// Byte offsets of every element of `tensor`, dimension 0 fastest.
fn offsets(tensor: &Tensor) -> impl Iterator<Item = usize> {
    let [ne0, ne1, ne2, ne3] = *tensor.ne();
    let [nb0, nb1, nb2, nb3] = *tensor.nb();
    (0..ne3).flat_map(move |i3| {
        (0..ne2).flat_map(move |i2| {
            (0..ne1).flat_map(move |i1| (0..ne0).map(move |i0| i0 * nb0 + i1 * nb1 + i2 * nb2 + i3 * nb3))
        })
    })
}

/// Elements of an `f32` tensor in logical order.
pub fn gather(tensor: &Tensor) -> Vec<f32> {
    let bytes = tensor_read(tensor);
    offsets(tensor).map(|offset| bytemuck::pod_read_unaligned::<f32>(&bytes[offset..offset + 4])).collect()
}

/// Write `values`, in logical order, into an `f32` tensor.
///
/// Bytes between strided elements keep their contents.
pub fn scatter(tensor: &Tensor, values: &[f32]) {
    assert_eq!(values.len(), tensor.nelements(), "wrong element count for tensor '{}'", tensor.name());
    if tensor.is_contiguous() {
        tensor_set(tensor, bytemuck::cast_slice(values), 0);
        return;
    }

    let mut bytes = tensor_read(tensor);
    for (offset, value) in offsets(tensor).zip(values) {
        bytes[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
    }
    tensor_set(tensor, &bytes, 0);
}
