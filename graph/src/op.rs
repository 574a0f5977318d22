//! Operations a graph node can carry.

/// The operation that produced a tensor.
///
/// `None` marks a leaf (weights, inputs). The view family (`Reshape`,
/// `View`, `Permute`, `Transpose`) reinterprets the storage of its source and
/// performs no computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::EnumCount, strum::EnumIter, strum::IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Op {
    None,
    Dup,
    Add,
    Sub,
    Mul,
    Div,
    Scale,
    Cpy,
    Reshape,
    View,
    Permute,
    Transpose,
    MulMat,
    Unary,
}

impl Op {
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// True for operations that only reinterpret their source's storage.
    pub const fn is_view(self) -> bool {
        matches!(self, Self::Reshape | Self::View | Self::Permute | Self::Transpose)
    }
}

/// Element-wise unary functions carried by [`Op::Unary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::EnumCount, strum::EnumIter, strum::IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum UnaryOp {
    Neg,
    Abs,
    Relu,
    Sqr,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Per-node parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OpParams {
    #[default]
    None,
    Scale(f32),
    Unary(UnaryOp),
    Permute([usize; 4]),
}
