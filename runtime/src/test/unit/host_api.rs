//! Every table entry reaches the host implementation it names.

use std::ptr::NonNull;

use kiln_device::BufferType;
use kiln_dtype::DType;
use kiln_graph::{Op, Tensor, UnaryOp, ops, rope_yarn_corr_dims};

use crate::cpu::CpuBackend;
use crate::error::Error;
use crate::host_api::{HOST_API_VERSION, HostApi};

#[test]
fn test_header() {
    let api = HostApi::current();
    assert_eq!(api.version, HOST_API_VERSION);
    assert_eq!(api.size, size_of::<HostApi>());
    assert!(std::ptr::eq(api, HostApi::current()));
}

#[test]
fn test_require() {
    let api = HostApi::current();
    api.require(1).unwrap();
    api.require(HOST_API_VERSION).unwrap();

    let err = api.require(HOST_API_VERSION + 1).unwrap_err();
    assert!(matches!(err, Error::IncompatibleHostApi { required, available } if required == HOST_API_VERSION + 1 && available == HOST_API_VERSION));
}

#[test]
fn test_type_queries() {
    let api = HostApi::current();
    assert!((api.is_quantized)(DType::Q4_0));
    assert!(!(api.is_quantized)(DType::F32));
    assert_eq!((api.type_size)(DType::F16), 2);
    assert_eq!((api.type_size)(DType::Q4_0), 18);
    assert_eq!((api.blck_size)(DType::Q4_0), 32);
    assert_eq!((api.type_name)(DType::Q4K), "q4_K");
    assert_eq!((api.row_size)(DType::Q4_0, 64), 36);
    assert_eq!((api.op_name)(Op::MulMat), "MUL_MAT");
}

#[test]
fn test_tensor_queries() {
    let api = HostApi::current();
    let a = Tensor::new("a", DType::F32, &[4, 3, 2]).unwrap();
    let t = ops::transpose(&a);
    let p = ops::permute(&a, [1, 2, 0, 3]).unwrap();
    let r = ops::relu(&a);

    assert_eq!((api.nelements)(&a), 24);
    assert_eq!((api.nrows)(&a), 6);
    assert_eq!((api.nbytes)(&a), 96);
    assert_eq!((api.element_size)(&a), 4);
    assert!((api.is_contiguous)(&a));
    assert!((api.is_transposed)(&t));
    assert!(!(api.is_transposed)(&a));
    assert!((api.is_permuted)(&p));
    assert_eq!((api.get_unary_op)(&r), Some(UnaryOp::Relu));
    assert_eq!((api.get_unary_op)(&a), None);
    assert_eq!((api.op_desc)(&r), "RELU");
    assert_eq!((api.op_desc)(&t), "TRANSPOSE");
}

#[test]
fn test_rope_entry() {
    let api = HostApi::current();
    assert_eq!((api.rope_yarn_corr_dims)(128, 4096, 10000.0, 32.0, 1.0), rope_yarn_corr_dims(128, 4096, 10000.0, 32.0, 1.0));
}

#[test]
fn test_memory_entries() {
    let api = HostApi::current();
    let ptr = (api.malloc)(100);
    assert!(!ptr.is_null());
    // SAFETY: `ptr` holds 100 writable bytes from `malloc`.
    unsafe {
        ptr.write_bytes(0x5A, 100);
        assert_eq!(*ptr.add(99), 0x5A);
        (api.free)(ptr);
        (api.free)(std::ptr::null_mut());
    }
}

#[test]
fn test_buffer_entries() {
    let api = HostApi::current();
    let buffer_type = (api.cpu_buffer_type)();
    assert_eq!(buffer_type.name(), "CPU");

    let t = Tensor::new_1d("t", DType::F32, 4);
    assert_eq!((api.buft_get_alloc_size)(&*buffer_type, &t), 16);

    let buffer = (api.buft_alloc_buffer)(&buffer_type, 64).unwrap();
    buffer.alloc_tensor(&t, 0).unwrap();
    (api.tensor_set)(&t, &[1, 2, 3, 4], 4);
    let mut out = [0u8; 6];
    (api.tensor_get)(&t, &mut out, 2);
    assert_eq!(out, [0, 0, 1, 2, 3, 4]);

    let iface = buffer_type.alloc(32).unwrap();
    let wrapped = (api.buffer_init)(buffer_type.clone(), iface, 32);
    assert_eq!(wrapped.size(), 32);
}

#[test]
fn test_cpu_buffer_from_ptr_entry() {
    #[repr(C, align(64))]
    struct Block([u8; 64]);

    let api = HostApi::current();
    let mut block = Block([7; 64]);
    let ptr = NonNull::new(block.0.as_mut_ptr()).unwrap();
    // SAFETY: `block` outlives `buffer` and is not touched while it lives.
    let buffer = unsafe { (api.cpu_buffer_from_ptr)(ptr, 64) };
    let t = Tensor::new_1d("t", DType::F32, 16);
    buffer.alloc_tensor(&t, 0).unwrap();

    let mut out = [0u8; 4];
    (api.tensor_get)(&t, &mut out, 60);
    assert_eq!(out, [7; 4]);
    drop(buffer);
}

#[test]
fn test_backend_is_cpu() {
    let api = HostApi::current();
    assert!((api.backend_is_cpu)(&CpuBackend::default()));
}
