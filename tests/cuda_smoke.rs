//! End-to-end checks on a real device
//!
//! Skipped when no CUDA device can be opened.
#![cfg(feature = "cuda")]

use std::sync::Arc;

use devq::prelude::*;
use devq::runtime::cuda::is_cuda_available;

fn cuda_context() -> Option<Arc<Context<CudaRuntime>>> {
    if !is_cuda_available() {
        eprintln!("CUDA not available, skipping");
        return None;
    }
    Context::open(CudaDevice::new(0)).ok()
}

#[test]
fn test_cuda_dot() {
    let Some(ctx) = cuda_context() else { return };
    let x = DeviceBuffer::from_slice(&ctx, &[1.0f32, 2.0, 3.0]).unwrap();
    let y = DeviceBuffer::from_slice(&ctx, &[4.0f32, 5.0, 6.0]).unwrap();
    let z = DeviceBuffer::zeroed(&ctx, 4).unwrap();
    ctx.dot(DType::F32, 3, Vector::new(x.at(0), 1), Vector::new(y.at(0), 1), z.at(0))
        .unwrap();
    assert_eq!(z.to_vec::<f32>().unwrap(), vec![32.0]);
}

#[test]
fn test_cuda_gemm_row_major() {
    let Some(ctx) = cuda_context() else { return };
    let a = DeviceBuffer::from_slice(&ctx, &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let b = DeviceBuffer::from_slice(&ctx, &[1.0f64, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap();
    let c = DeviceBuffer::zeroed(&ctx, 4 * 8).unwrap();
    let shape = GemmShape::new(Order::RowMajor, 2, 2, 3);
    ctx.gemm(
        DType::F64,
        &shape,
        1.0,
        Matrix::new(a.at(0), 3),
        Matrix::new(b.at(0), 2),
        0.0,
        Matrix::new(c.at(0), 2),
    )
    .unwrap();
    assert_eq!(c.to_vec::<f64>().unwrap(), vec![4.0, 5.0, 10.0, 11.0]);
}

#[test]
fn test_cuda_ger_batched() {
    let Some(ctx) = cuda_context() else { return };
    let x = DeviceBuffer::from_slice(&ctx, &[1.0f32, 2.0]).unwrap();
    let y = DeviceBuffer::from_slice(&ctx, &[3.0f32, 4.0]).unwrap();
    let a = DeviceBuffer::zeroed(&ctx, 16).unwrap();
    let (xs, ys, as_) = ([x.at(0)], [y.at(0)], [a.at(0)]);
    let shape = GerShape {
        order: Order::RowMajor,
        m: 2,
        n: 2,
    };
    ctx.ger_batched(
        DType::F32,
        &shape,
        1.0,
        VectorBatch::new(&xs, 1),
        VectorBatch::new(&ys, 1),
        MatrixBatch::new(&as_, 2),
    )
    .unwrap();
    assert_eq!(a.to_vec::<f32>().unwrap(), vec![3.0, 4.0, 6.0, 8.0]);
}

#[test]
fn test_cuda_single_rank_all_reduce() {
    let Some(ctx) = cuda_context() else { return };
    let id = CliqueId::generate(&ctx).unwrap();
    let comm = Communicator::new(&ctx, &id, 1, 0).unwrap();
    let src = DeviceBuffer::from_slice(&ctx, &[1.0f32, 2.0]).unwrap();
    let dest = DeviceBuffer::zeroed(&ctx, 8).unwrap();
    comm.all_reduce(src.at(0), dest.at(0), 2, DType::F32, ReduceOp::Sum)
        .unwrap();
    assert_eq!(dest.to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
    assert_eq!(ctx.comm_error(), "no error");
}

#[test]
fn test_cuda_gemv_batched_shared_output_accumulates() {
    let Some(ctx) = cuda_context() else { return };
    // Two items write the same one-element y; both contributions must land.
    let a0 = DeviceBuffer::from_slice(&ctx, &[1.0f64, 2.0]).unwrap();
    let a1 = DeviceBuffer::from_slice(&ctx, &[3.0f64, 4.0]).unwrap();
    let x = DeviceBuffer::from_slice(&ctx, &[1.0f64, 1.0]).unwrap();
    let y = DeviceBuffer::zeroed(&ctx, 8).unwrap();
    let a_refs = [a0.at(0), a1.at(0)];
    let x_refs = [x.at(0), x.at(0)];
    let y_refs = [y.at(0), y.at(0)];
    let shape = GemvShape {
        order: Order::RowMajor,
        trans: Transpose::NoTrans,
        m: 1,
        n: 2,
    };
    ctx.gemv_batched(
        DType::F64,
        &shape,
        1.0,
        MatrixBatch::new(&a_refs, 2),
        VectorBatch::new(&x_refs, 1),
        1.0,
        VectorBatch::new(&y_refs, 1),
    )
    .unwrap();
    assert_eq!(y.to_vec::<f64>().unwrap(), vec![10.0]);
}

#[test]
fn test_cuda_ger_batched_shared_output_accumulates() {
    let Some(ctx) = cuda_context() else { return };
    let x = DeviceBuffer::from_slice(&ctx, &[1.0f32, 2.0]).unwrap();
    let y = DeviceBuffer::from_slice(&ctx, &[1.0f32, 1.0]).unwrap();
    let a = DeviceBuffer::zeroed(&ctx, 16).unwrap();
    let batch = 64;
    let x_refs = vec![x.at(0); batch];
    let y_refs = vec![y.at(0); batch];
    let a_refs = vec![a.at(0); batch];
    let shape = GerShape {
        order: Order::ColMajor,
        m: 2,
        n: 2,
    };
    ctx.ger_batched(
        DType::F32,
        &shape,
        1.0,
        VectorBatch::new(&x_refs, 1),
        VectorBatch::new(&y_refs, 1),
        MatrixBatch::new(&a_refs, 2),
    )
    .unwrap();
    assert_eq!(a.to_vec::<f32>().unwrap(), vec![64.0, 128.0, 64.0, 128.0]);
}

#[test]
fn test_default_runtime_is_cuda() {
    if !is_cuda_available() {
        return;
    }
    let ctx = Context::<devq::DefaultRuntime>::open(CudaDevice::new(0)).unwrap();
    let x = DeviceBuffer::from_slice(&ctx, &[2.0f64]).unwrap();
    assert_eq!(x.to_vec::<f64>().unwrap(), vec![2.0]);
}
