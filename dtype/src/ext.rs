use super::*;

/// Rust scalars with a native tensor element type.
pub trait HasDType: Copy {
    const DTYPE: DType;
}

macro_rules! impl_dtype_ext {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(impl HasDType for $ty { const DTYPE: DType = $dtype; })*
    };
}

impl_dtype_ext! {
    f32 => DType::F32,
    i8 => DType::I8, i16 => DType::I16, i32 => DType::I32,
}
