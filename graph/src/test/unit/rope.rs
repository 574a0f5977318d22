use test_case::test_case;

use crate::rope_yarn_corr_dims;

#[test_case(128, 4096, 10000.0 => [20.0, 46.0] ; "llama defaults")]
#[test_case(64, 2048, 10000.0 => [8.0, 21.0] ; "small head")]
#[test_case(8, 4096, 2.0 => [17.0, 7.0] ; "end clamped to last dim")]
fn test_corr_dims(n_dims: usize, n_ctx_orig: usize, base: f32) -> [f32; 2] {
    rope_yarn_corr_dims(n_dims, n_ctx_orig, base, 32.0, 1.0)
}

#[test]
fn test_corr_dims_start_clamped_to_zero() {
    let [start, _] = rope_yarn_corr_dims(128, 1, 10000.0, 32.0, 1.0);
    assert_eq!(start, 0.0);
}
