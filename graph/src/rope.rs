//! Rotary position embedding helpers.

use std::f32::consts::PI;

/// Dimension at which a rotation frequency completes `n_rot` full turns over
/// `n_ctx_orig` positions.
fn corr_dim(n_dims: usize, n_ctx_orig: usize, n_rot: f32, base: f32) -> f32 {
    n_dims as f32 * (n_ctx_orig as f32 / (n_rot * 2.0 * PI)).ln() / (2.0 * base.ln())
}

/// YaRN correction range `[start, end]` over the rotated dimensions.
///
/// Dimensions below `start` are extrapolated, dimensions above `end` are
/// interpolated, and the range in between is blended. `beta_fast` and
/// `beta_slow` are the rotation counts that bound the blend.
pub fn rope_yarn_corr_dims(n_dims: usize, n_ctx_orig: usize, freq_base: f32, beta_fast: f32, beta_slow: f32) -> [f32; 2] {
    let start = corr_dim(n_dims, n_ctx_orig, beta_fast, freq_base).floor();
    let end = corr_dim(n_dims, n_ctx_orig, beta_slow, freq_base).ceil();
    [start.max(0.0), end.min(n_dims as f32 - 1.0)]
}
