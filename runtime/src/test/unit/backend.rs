//! CPU backend: async ordering, graph execution and plans.

use std::sync::Arc;

use kiln_device::error::Error as DeviceError;
use kiln_device::{
    Backend, BufferTypeExt, tensor_copy_async, tensor_get_vec, tensor_set_slice, supports_graph,
};
use kiln_graph::{DType, Graph, Op, Tensor, ops};

use crate::cpu::{AsyncMode, CpuBackend, CpuConfig, is_cpu};
use crate::test::{bind_all, bind_graph};

fn immediate() -> CpuBackend {
    CpuBackend::new(CpuConfig::builder().async_mode(AsyncMode::Immediate).build())
}

fn floats(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

#[test]
fn test_deferred_set_visible_after_synchronize() {
    let mut backend = CpuBackend::default();
    let t = Tensor::new_1d("t", DType::F32, 4);
    let _buffer = bind_all(&backend, &[&t]);

    backend.set_tensor_async(&t, floats(&[1.0, 2.0, 3.0, 4.0]), 0);
    assert_eq!(backend.pending(), 1);
    assert_eq!(tensor_get_vec::<f32>(&t), vec![0.0; 4]);

    backend.synchronize();
    assert_eq!(backend.pending(), 0);
    assert_eq!(tensor_get_vec::<f32>(&t), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_deferred_read_completes_on_synchronize() {
    let mut backend = CpuBackend::default();
    let t = Tensor::new_1d("t", DType::F32, 4);
    let _buffer = bind_all(&backend, &[&t]);
    tensor_set_slice(&t, &[5.0f32, 6.0, 7.0, 8.0]);

    let read = backend.get_tensor_async(&t, 8, 8);
    assert!(!read.is_ready());

    backend.synchronize();
    assert_eq!(read.take(), Some(floats(&[7.0, 8.0])));
}

#[test]
fn test_async_operations_run_in_issue_order() {
    let mut backend = CpuBackend::default();
    let t = Tensor::new_1d("t", DType::F32, 2);
    let _buffer = bind_all(&backend, &[&t]);

    backend.set_tensor_async(&t, floats(&[1.0, 1.0]), 0);
    let first = backend.get_tensor_async(&t, 0, 8);
    backend.set_tensor_async(&t, floats(&[2.0, 2.0]), 0);
    let second = backend.get_tensor_async(&t, 0, 8);
    backend.synchronize();

    assert_eq!(first.take(), Some(floats(&[1.0, 1.0])));
    assert_eq!(second.take(), Some(floats(&[2.0, 2.0])));
}

#[test]
fn test_immediate_mode_runs_inline() {
    let mut backend = immediate();
    let t = Tensor::new_1d("t", DType::F32, 2);
    let _buffer = bind_all(&backend, &[&t]);

    backend.set_tensor_async(&t, floats(&[3.0, 4.0]), 0);
    let read = backend.get_tensor_async(&t, 4, 4);

    assert_eq!(backend.pending(), 0);
    assert_eq!(read.take(), Some(floats(&[4.0])));
}

#[test]
fn test_graph_compute_sees_earlier_async_writes() {
    let mut backend = CpuBackend::default();
    let a = Tensor::new_1d("a", DType::F32, 3);
    let out = ops::neg(&a);
    let graph = Graph::build_forward(&out);
    let _buffer = bind_graph(&backend, &graph);

    backend.set_tensor_async(&a, floats(&[1.0, -2.0, 3.0]), 0);
    backend.graph_compute(&graph).unwrap();

    assert_eq!(tensor_get_vec::<f32>(&out), vec![-1.0, 2.0, -3.0]);
}

#[test]
fn test_elementwise_graph() {
    let mut backend = CpuBackend::default();
    let a = Tensor::new("a", DType::F32, &[2, 2]).unwrap();
    let b = Tensor::new("b", DType::F32, &[2, 2]).unwrap();
    let sum = ops::add(&a, &b).unwrap();
    let diff = ops::sub(&sum, &b).unwrap();
    let prod = ops::mul(&diff, &b).unwrap();
    let quot = ops::div(&prod, &a).unwrap();
    let out = ops::relu(&ops::scale(&ops::sqr(&ops::abs(&quot)), 0.5));
    let masked = ops::relu(&ops::neg(&a));
    let mut graph = Graph::build_forward(&out);
    graph.expand(&masked);
    let _buffer = bind_graph(&backend, &graph);

    tensor_set_slice(&a, &[1.0f32, 2.0, 4.0, -8.0]);
    tensor_set_slice(&b, &[2.0f32, -2.0, 0.5, 4.0]);
    backend.graph_compute(&graph).unwrap();

    assert_eq!(tensor_get_vec::<f32>(&sum), vec![3.0, 0.0, 4.5, -4.0]);
    assert_eq!(tensor_get_vec::<f32>(&quot), vec![2.0, -2.0, 0.5, 4.0]);
    assert_eq!(tensor_get_vec::<f32>(&out), vec![2.0, 2.0, 0.125, 8.0]);
    assert_eq!(tensor_get_vec::<f32>(&masked), vec![0.0, 0.0, 0.0, 8.0]);
}

#[test]
fn test_mul_mat() {
    let mut backend = CpuBackend::default();
    let a = Tensor::new("a", DType::F32, &[3, 2]).unwrap();
    let b = Tensor::new("b", DType::F32, &[3, 2]).unwrap();
    let graph = Graph::build_forward(&ops::mul_mat(&a, &b).unwrap());
    let out = Arc::clone(graph.output().unwrap());
    let _buffer = bind_graph(&backend, &graph);

    tensor_set_slice(&a, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
    tensor_set_slice(&b, &[1.0f32, 0.0, 1.0, 0.0, 1.0, 0.0]);
    backend.graph_compute(&graph).unwrap();

    assert_eq!(out.ne(), &[2, 2, 1, 1]);
    assert_eq!(tensor_get_vec::<f32>(&out), vec![4.0, 10.0, 2.0, 5.0]);
}

#[test]
fn test_dup_of_transpose_follows_strides() {
    let mut backend = CpuBackend::default();
    let a = Tensor::new("a", DType::F32, &[2, 3]).unwrap();
    let out = ops::dup(&ops::transpose(&a));
    let graph = Graph::build_forward(&out);
    let _buffer = bind_graph(&backend, &graph);

    tensor_set_slice(&a, &[0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0]);
    backend.graph_compute(&graph).unwrap();

    assert!(out.is_contiguous());
    assert_eq!(tensor_get_vec::<f32>(&out), vec![0.0, 2.0, 4.0, 1.0, 3.0, 5.0]);
}

#[test]
fn test_cpy_into_view_leaves_rest_untouched() {
    let mut backend = CpuBackend::default();
    let src = Tensor::new_1d("src", DType::F32, 2);
    let dst = Tensor::new_1d("dst", DType::F32, 4);
    let window = ops::view(&dst, &[2], &[], 8).unwrap();
    let out = ops::cpy(&src, &window).unwrap();
    let graph = Graph::build_forward(&out);
    let _buffer = bind_graph(&backend, &graph);

    tensor_set_slice(&dst, &[9.0f32; 4]);
    tensor_set_slice(&src, &[7.0f32, 8.0]);
    backend.graph_compute(&graph).unwrap();

    assert_eq!(tensor_get_vec::<f32>(&dst), vec![9.0, 9.0, 7.0, 8.0]);
}

#[test]
fn test_cpy_into_transposed_destination() {
    let mut backend = CpuBackend::default();
    let src = Tensor::new("src", DType::F32, &[3, 2]).unwrap();
    let dst = Tensor::new("dst", DType::F32, &[2, 3]).unwrap();
    let out = ops::cpy(&src, &ops::transpose(&dst)).unwrap();
    let graph = Graph::build_forward(&out);
    let _buffer = bind_graph(&backend, &graph);

    tensor_set_slice(&src, &[0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0]);
    backend.graph_compute(&graph).unwrap();

    assert_eq!(tensor_get_vec::<f32>(&dst), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
}

#[test]
fn test_plan_reuse_sees_new_inputs() {
    let mut backend = CpuBackend::default();
    let a = Tensor::new_1d("a", DType::F32, 2);
    let out = ops::scale(&a, 3.0);
    let graph = Graph::build_forward(&out);
    let _buffer = bind_graph(&backend, &graph);
    let plan = backend.graph_plan_create(&graph).unwrap();

    tensor_set_slice(&a, &[1.0f32, 2.0]);
    backend.graph_plan_compute(&plan);
    assert_eq!(tensor_get_vec::<f32>(&out), vec![3.0, 6.0]);

    tensor_set_slice(&a, &[-1.0f32, 0.5]);
    backend.graph_plan_compute(&plan);
    assert_eq!(tensor_get_vec::<f32>(&out), vec![-3.0, 1.5]);

    backend.graph_plan_free(plan);
}

#[test]
fn test_plan_has_no_steps_for_views() {
    let mut backend = CpuBackend::default();
    let a = Tensor::new("a", DType::F32, &[4, 2]).unwrap();
    let reshaped = ops::reshape(&a, &[8]).unwrap();
    let graph = Graph::build_forward(&ops::neg(&reshaped));

    let plan = crate::cpu::CpuPlan::compile(&graph, "CPU").unwrap();
    assert_eq!(graph.len(), 2);
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.steps()[0].node.op(), Op::Unary);

    let wrapped = backend.graph_plan_create(&graph).unwrap();
    assert_eq!(wrapped.owner(), backend.instance_id());
}

#[test]
#[should_panic(expected = "used on backend")]
fn test_plan_from_another_instance_panics() {
    let mut first = CpuBackend::default();
    let mut second = CpuBackend::default();
    let a = Tensor::new_1d("a", DType::F32, 2);
    let graph = Graph::build_forward(&ops::neg(&a));

    let plan = first.graph_plan_create(&graph).unwrap();
    second.graph_plan_compute(&plan);
}

#[test]
fn test_supports_op() {
    let backend = CpuBackend::default();
    let f32_a = Tensor::new("a", DType::F32, &[32, 2]).unwrap();
    let f32_b = Tensor::new("b", DType::F32, &[32, 3]).unwrap();
    let q4 = Tensor::new("q", DType::Q4_0, &[32, 2]).unwrap();
    let f16 = Tensor::new_1d("h", DType::F16, 4);

    assert!(backend.supports_op(&f32_a));
    assert!(backend.supports_op(&ops::mul_mat(&f32_a, &f32_b).unwrap()));
    assert!(backend.supports_op(&q4));
    assert!(backend.supports_op(&ops::transpose(&q4)));
    assert!(!backend.supports_op(&ops::mul_mat(&q4, &f32_b).unwrap()));
    assert!(!backend.supports_op(&ops::neg(&f16)));
}

#[test]
fn test_unsupported_graph_is_rejected_before_compute() {
    let mut backend = CpuBackend::default();
    let h = Tensor::new_1d("h", DType::F16, 4);
    let graph = Graph::build_forward(&ops::relu(&ops::neg(&h)));

    assert!(!supports_graph(&backend, &graph));
    let err = backend.graph_compute(&graph).unwrap_err();
    assert!(matches!(err, DeviceError::UnsupportedOp { op: Op::Unary, ref backend, .. } if backend == "CPU"));
}

#[test]
fn test_copy_async_is_deferred() {
    let mut backend = CpuBackend::default();
    let src = Tensor::new_1d("src", DType::F32, 3);
    let dst = Tensor::new_1d("dst", DType::F32, 3);
    let _src_buffer = bind_all(&backend, &[&src]);
    let _dst_buffer = bind_all(&backend, &[&dst]);
    tensor_set_slice(&src, &[1.0f32, 2.0, 3.0]);

    tensor_copy_async(&mut backend, &src, &dst);
    assert_eq!(backend.pending(), 1);
    assert_eq!(tensor_get_vec::<f32>(&dst), vec![0.0; 3]);

    backend.synchronize();
    assert_eq!(tensor_get_vec::<f32>(&dst), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_free_runs_queued_work() {
    let mut backend = Box::new(CpuBackend::default());
    let t = Tensor::new_1d("t", DType::F32, 1);
    let _buffer = bind_all(&*backend, &[&t]);

    backend.set_tensor_async(&t, floats(&[42.0]), 0);
    backend.free();

    assert_eq!(tensor_get_vec::<f32>(&t), vec![42.0]);
}

#[test]
fn test_drop_runs_queued_work() {
    let src = Tensor::new_1d("src", DType::F32, 2);
    let dst = Tensor::new_1d("dst", DType::F32, 2);
    let (_buffer, read) = {
        let mut backend = CpuBackend::default();
        let buffer = bind_all(&backend, &[&src, &dst]);
        backend.set_tensor_async(&src, floats(&[1.5, -3.0]), 0);
        tensor_copy_async(&mut backend, &src, &dst);
        let read = backend.get_tensor_async(&dst, 0, 8);
        assert_eq!(backend.pending(), 3);
        (buffer, read)
    };

    assert_eq!(tensor_get_vec::<f32>(&dst), vec![1.5, -3.0]);
    assert_eq!(read.take(), Some(floats(&[1.5, -3.0])));
}

#[test]
fn test_alignment_selects_buffer_type() {
    let default = CpuBackend::default();
    let wide = CpuBackend::new(CpuConfig::builder().alignment(256).build());

    assert!(is_cpu(&default));
    assert_eq!(default.default_buffer_type().alignment(), 64);
    assert_eq!(wide.default_buffer_type().alignment(), 256);
    assert!(wide.default_buffer_type().is_host());
    assert!(wide.default_buffer_type().supports_backend(&default));

    let buffer = wide.default_buffer_type().alloc_buffer(512).unwrap();
    let t = Tensor::new_1d("t", DType::F32, 4);
    assert!(buffer.alloc_tensor(&t, 64).is_err());
    assert!(buffer.alloc_tensor(&t, 256).is_ok());
}

#[test]
fn test_instances_are_distinct() {
    let first = CpuBackend::default();
    let second = CpuBackend::default();
    assert_ne!(first.instance_id(), second.instance_id());
    assert_eq!(first.name(), "CPU");
    assert!(Arc::ptr_eq(&first.default_buffer_type(), &second.default_buffer_type()));
}
