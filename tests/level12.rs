//! dot, gemv, ger and their small-batch variants

mod common;

use common::{Ctx, assert_allclose_f64, commands_since, create_context_with, create_emulated_context};
use devq::config::DispatchConfig;
use devq::prelude::*;
use devq::runtime::emulated::{Fault, QueueCommand};

type Buffer = DeviceBuffer<EmulatedRuntime>;

fn buffers(ctx: &Ctx, items: &[Vec<f64>]) -> Vec<Buffer> {
    items
        .iter()
        .map(|h| DeviceBuffer::from_slice(ctx, h).unwrap())
        .collect()
}

fn small_geometry(ctx: &Ctx, start: usize) -> Vec<(&'static str, (u32, u32, u32))> {
    commands_since(ctx, start)
        .into_iter()
        .filter_map(|c| match c {
            QueueCommand::Launch {
                name,
                geometry: Some(g),
            } => Some((name, g.grid)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_dot() {
    let ctx = create_emulated_context();
    let x = DeviceBuffer::from_slice(&ctx, &[1.0f32, 2.0, 3.0]).unwrap();
    let y = DeviceBuffer::from_slice(&ctx, &[4.0f32, 5.0, 6.0]).unwrap();
    let z = DeviceBuffer::zeroed(&ctx, 4).unwrap();
    ctx.dot(DType::F32, 3, Vector::new(x.at(0), 1), Vector::new(y.at(0), 1), z.at(0))
        .unwrap();
    assert_eq!(z.to_vec::<f32>().unwrap(), vec![32.0]);
}

#[test]
fn test_dot_strided_with_offsets() {
    let ctx = create_emulated_context();
    let x = DeviceBuffer::from_slice(&ctx, &[9.0f64, 1.0, 9.0, 2.0, 9.0, 3.0]).unwrap();
    let y = DeviceBuffer::from_slice(&ctx, &[1.0f64, 1.0, 1.0]).unwrap();
    let z = DeviceBuffer::zeroed(&ctx, 16).unwrap();
    // x starts at element 1 with increment 2; the result goes to element 1 of z.
    ctx.dot(DType::F64, 3, Vector::new(x.at(8), 2), Vector::new(y.at(0), 1), z.at(8))
        .unwrap();
    assert_eq!(z.to_vec::<f64>().unwrap(), vec![0.0, 6.0]);
}

#[test]
fn test_dot_half_is_unavailable() {
    let ctx = create_emulated_context();
    let x = DeviceBuffer::zeroed(&ctx, 8).unwrap();
    let err = ctx
        .dot(DType::F16, 2, Vector::new(x.at(0), 1), Vector::new(x.at(0), 1), x.at(0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapabilityUnavailable);
}

#[test]
fn test_gemv_row_major() {
    let ctx = create_emulated_context();
    let a = DeviceBuffer::from_slice(&ctx, &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let x = DeviceBuffer::from_slice(&ctx, &[1.0f64, 1.0, 1.0]).unwrap();
    let y = DeviceBuffer::from_slice(&ctx, &[10.0f64, 20.0]).unwrap();
    let shape = GemvShape {
        order: Order::RowMajor,
        trans: Transpose::NoTrans,
        m: 2,
        n: 3,
    };
    ctx.gemv(
        DType::F64,
        &shape,
        2.0,
        Matrix::new(a.at(0), 3),
        Vector::new(x.at(0), 1),
        1.0,
        Vector::new(y.at(0), 1),
    )
    .unwrap();
    // 2 * [6, 15] + [10, 20]
    assert_eq!(y.to_vec::<f64>().unwrap(), vec![22.0, 50.0]);
}

#[test]
fn test_gemv_transposed() {
    let ctx = create_emulated_context();
    let a = DeviceBuffer::from_slice(&ctx, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let x = DeviceBuffer::from_slice(&ctx, &[1.0f32, 1.0]).unwrap();
    let y = DeviceBuffer::zeroed(&ctx, 12).unwrap();
    let shape = GemvShape {
        order: Order::RowMajor,
        trans: Transpose::Trans,
        m: 2,
        n: 3,
    };
    ctx.gemv(
        DType::F32,
        &shape,
        1.0,
        Matrix::new(a.at(0), 3),
        Vector::new(x.at(0), 1),
        0.0,
        Vector::new(y.at(0), 1),
    )
    .unwrap();
    assert_eq!(y.to_vec::<f32>().unwrap(), vec![5.0, 7.0, 9.0]);
}

#[test]
fn test_gemv_col_major_matches_row_major() {
    let ctx = create_emulated_context();
    // The same 2x3 matrix in both orders.
    let a_row = DeviceBuffer::from_slice(&ctx, &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let a_col = DeviceBuffer::from_slice(&ctx, &[1.0f64, 4.0, 2.0, 5.0, 3.0, 6.0]).unwrap();
    let x = DeviceBuffer::from_slice(&ctx, &[1.0f64, -1.0, 2.0]).unwrap();
    let y_row = DeviceBuffer::zeroed(&ctx, 16).unwrap();
    let y_col = DeviceBuffer::zeroed(&ctx, 16).unwrap();

    for (order, a, ld, y) in [
        (Order::RowMajor, &a_row, 3, &y_row),
        (Order::ColMajor, &a_col, 2, &y_col),
    ] {
        let shape = GemvShape {
            order,
            trans: Transpose::NoTrans,
            m: 2,
            n: 3,
        };
        ctx.gemv(
            DType::F64,
            &shape,
            1.0,
            Matrix::new(a.at(0), ld),
            Vector::new(x.at(0), 1),
            0.0,
            Vector::new(y.at(0), 1),
        )
        .unwrap();
    }
    assert_eq!(y_row.to_vec::<f64>().unwrap(), vec![5.0, 11.0]);
    assert_eq!(y_col.to_vec::<f64>().unwrap(), vec![5.0, 11.0]);
}

#[test]
fn test_ger_row_major() {
    let ctx = create_emulated_context();
    let x = DeviceBuffer::from_slice(&ctx, &[1.0f64, 2.0]).unwrap();
    let y = DeviceBuffer::from_slice(&ctx, &[1.0f64, 2.0, 3.0]).unwrap();
    let a = DeviceBuffer::from_slice(&ctx, &[1.0f64; 6]).unwrap();
    let shape = GerShape {
        order: Order::RowMajor,
        m: 2,
        n: 3,
    };
    ctx.ger(
        DType::F64,
        &shape,
        2.0,
        Vector::new(x.at(0), 1),
        Vector::new(y.at(0), 1),
        Matrix::new(a.at(0), 3),
    )
    .unwrap();
    assert_eq!(
        a.to_vec::<f64>().unwrap(),
        vec![3.0, 5.0, 7.0, 5.0, 9.0, 13.0]
    );
}

#[test]
fn test_ger_col_major() {
    let ctx = create_emulated_context();
    let x = DeviceBuffer::from_slice(&ctx, &[1.0f32, 2.0]).unwrap();
    let y = DeviceBuffer::from_slice(&ctx, &[1.0f32, 2.0, 3.0]).unwrap();
    let a = DeviceBuffer::zeroed(&ctx, 24).unwrap();
    let shape = GerShape {
        order: Order::ColMajor,
        m: 2,
        n: 3,
    };
    ctx.ger(
        DType::F32,
        &shape,
        1.0,
        Vector::new(x.at(0), 1),
        Vector::new(y.at(0), 1),
        Matrix::new(a.at(0), 2),
    )
    .unwrap();
    assert_eq!(
        a.to_vec::<f32>().unwrap(),
        vec![1.0, 2.0, 2.0, 4.0, 3.0, 6.0]
    );
}

// ============================================================================
// Small-batch kernels
// ============================================================================

#[test]
fn test_gemv_batched() {
    let ctx = create_emulated_context();
    let batch = 3;
    let a_host: Vec<Vec<f64>> = (0..batch)
        .map(|p| (0..6).map(|i| (i + p) as f64).collect())
        .collect();
    let x_host: Vec<Vec<f64>> = (0..batch).map(|p| vec![1.0, p as f64, 1.0]).collect();
    let y_host: Vec<Vec<f64>> = (0..batch).map(|p| vec![p as f64, 1.0]).collect();
    let a = buffers(&ctx, &a_host);
    let x = buffers(&ctx, &x_host);
    let y = buffers(&ctx, &y_host);
    let a_refs: Vec<_> = a.iter().map(|b| b.at(0)).collect();
    let x_refs: Vec<_> = x.iter().map(|b| b.at(0)).collect();
    let y_refs: Vec<_> = y.iter().map(|b| b.at(0)).collect();

    let shape = GemvShape {
        order: Order::RowMajor,
        trans: Transpose::NoTrans,
        m: 2,
        n: 3,
    };
    let start = ctx.queue().command_count();
    ctx.gemv_batched(
        DType::F64,
        &shape,
        1.0,
        MatrixBatch::new(&a_refs, 3),
        VectorBatch::new(&x_refs, 1),
        1.0,
        VectorBatch::new(&y_refs, 1),
    )
    .unwrap();

    let launched = small_geometry(&ctx, start);
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].0, "gemv_batched_small");

    for p in 0..batch {
        let a = &a_host[p];
        let x = &x_host[p];
        let expected: Vec<f64> = (0..2)
            .map(|i| y_host[p][i] + (0..3).map(|j| a[i * 3 + j] * x[j]).sum::<f64>())
            .collect();
        assert_allclose_f64(
            &y[p].to_vec::<f64>().unwrap(),
            &expected,
            1e-12,
            1e-12,
            &format!("gemv item {p}"),
        );
    }
}

#[test]
fn test_gemv_batched_rejects_scale_factors() {
    let ctx = create_emulated_context();
    let buf = DeviceBuffer::zeroed(&ctx, 64).unwrap();
    let refs = [buf.at(0)];
    let shape = GemvShape {
        order: Order::RowMajor,
        trans: Transpose::NoTrans,
        m: 2,
        n: 2,
    };
    let err = ctx
        .gemv_batched(
            DType::F64,
            &shape,
            2.0,
            MatrixBatch::new(&refs, 2),
            VectorBatch::new(&refs, 1),
            1.0,
            VectorBatch::new(&refs, 1),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedParameters);
    assert_eq!(err.kind().code(), 4);
}

#[test]
fn test_ger_batched_clamps_grid() {
    let ctx = create_context_with(
        EmulatedDevice::new(0).with_grid_limit(2),
        DispatchConfig::default(),
    );
    let batch = 5;
    let x_host: Vec<Vec<f64>> = (0..batch).map(|p| vec![1.0, p as f64]).collect();
    let y_host: Vec<Vec<f64>> = (0..batch).map(|_| vec![1.0, 2.0]).collect();
    let a_host: Vec<Vec<f64>> = (0..batch).map(|_| vec![1.0; 4]).collect();
    let x = buffers(&ctx, &x_host);
    let y = buffers(&ctx, &y_host);
    let a = buffers(&ctx, &a_host);
    let x_refs: Vec<_> = x.iter().map(|b| b.at(0)).collect();
    let y_refs: Vec<_> = y.iter().map(|b| b.at(0)).collect();
    let a_refs: Vec<_> = a.iter().map(|b| b.at(0)).collect();

    let shape = GerShape {
        order: Order::RowMajor,
        m: 2,
        n: 2,
    };
    let start = ctx.queue().command_count();
    ctx.ger_batched(
        DType::F64,
        &shape,
        0.5,
        VectorBatch::new(&x_refs, 1),
        VectorBatch::new(&y_refs, 1),
        MatrixBatch::new(&a_refs, 2),
    )
    .unwrap();

    let launched = small_geometry(&ctx, start);
    assert_eq!(launched, vec![("ger_batched_small", (1, 1, 2))]);

    // Every item is updated even though the batch axis was clamped.
    for p in 0..batch {
        let x = &x_host[p];
        let expected: Vec<f64> = (0..2)
            .flat_map(|i| (0..2).map(move |j| (i, j)))
            .map(|(i, j)| 1.0 + 0.5 * x[i] * [1.0, 2.0][j])
            .collect();
        assert_eq!(a[p].to_vec::<f64>().unwrap(), expected, "ger item {p}");
    }
}

#[test]
fn test_ger_batched_rejects_integer_dtype() {
    let ctx = create_emulated_context();
    let buf = DeviceBuffer::zeroed(&ctx, 64).unwrap();
    let refs = [buf.at(0)];
    let shape = GerShape {
        order: Order::ColMajor,
        m: 2,
        n: 2,
    };
    let err = ctx
        .ger_batched(
            DType::I32,
            &shape,
            1.0,
            VectorBatch::new(&refs, 1),
            VectorBatch::new(&refs, 1),
            MatrixBatch::new(&refs, 2),
        )
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedDType { .. }));
    assert_eq!(err.kind(), ErrorKind::UnsupportedParameters);
}

#[test]
fn test_gemv_batched_shared_output_accumulates() {
    let ctx = create_emulated_context();
    let a = buffers(&ctx, &[vec![1.0, 2.0], vec![3.0, 4.0]]);
    let x = DeviceBuffer::from_slice(&ctx, &[1.0f64, 1.0]).unwrap();
    let y = DeviceBuffer::from_slice(&ctx, &[0.5f64]).unwrap();
    let a_refs: Vec<_> = a.iter().map(|b| b.at(0)).collect();
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
    // 0.5 + (1 + 2) + (3 + 4)
    assert_eq!(y.to_vec::<f64>().unwrap(), vec![10.5]);
}

#[test]
fn test_ger_batched_shared_output_accumulates() {
    let ctx = create_emulated_context();
    let x = DeviceBuffer::from_slice(&ctx, &[1.0f64, 2.0]).unwrap();
    let y = DeviceBuffer::from_slice(&ctx, &[1.0f64, 1.0]).unwrap();
    let a = DeviceBuffer::zeroed(&ctx, 4 * 8).unwrap();
    let x_refs = [x.at(0); 3];
    let y_refs = [y.at(0); 3];
    let a_refs = [a.at(0); 3];
    let shape = GerShape {
        order: Order::ColMajor,
        m: 2,
        n: 2,
    };
    ctx.ger_batched(
        DType::F64,
        &shape,
        1.0,
        VectorBatch::new(&x_refs, 1),
        VectorBatch::new(&y_refs, 1),
        MatrixBatch::new(&a_refs, 2),
    )
    .unwrap();
    assert_eq!(a.to_vec::<f64>().unwrap(), vec![3.0, 6.0, 3.0, 6.0]);
}

#[test]
fn test_gemv_batched_failed_launch_releases_scratch() {
    let ctx = create_emulated_context();
    let a = buffers(&ctx, &[vec![1.0; 4], vec![2.0; 4]]);
    let x = buffers(&ctx, &[vec![1.0; 2], vec![1.0; 2]]);
    let y = buffers(&ctx, &[vec![0.0; 2], vec![0.0; 2]]);
    let a_refs: Vec<_> = a.iter().map(|b| b.at(0)).collect();
    let x_refs: Vec<_> = x.iter().map(|b| b.at(0)).collect();
    let y_refs: Vec<_> = y.iter().map(|b| b.at(0)).collect();
    ctx.setup_blas().unwrap();
    let live = ctx.queue().live_allocations();
    let y_state = y[0].hazard_state();

    ctx.queue().inject(Fault::Launch);
    let shape = GemvShape {
        order: Order::ColMajor,
        trans: Transpose::NoTrans,
        m: 2,
        n: 2,
    };
    let err = ctx
        .gemv_batched(
            DType::F64,
            &shape,
            1.0,
            MatrixBatch::new(&a_refs, 2),
            VectorBatch::new(&x_refs, 1),
            1.0,
            VectorBatch::new(&y_refs, 1),
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BackendExecution);
    assert_eq!(ctx.queue().live_allocations(), live);
    assert_eq!(y[0].hazard_state(), y_state);
}

#[test]
fn test_ger_batched_failed_launch_releases_scratch() {
    let ctx = create_emulated_context();
    let x = buffers(&ctx, &[vec![1.0, 2.0], vec![3.0, 4.0]]);
    let y = buffers(&ctx, &[vec![1.0, 1.0], vec![1.0, 1.0]]);
    let a = buffers(&ctx, &[vec![0.0; 4], vec![0.0; 4]]);
    let x_refs: Vec<_> = x.iter().map(|b| b.at(0)).collect();
    let y_refs: Vec<_> = y.iter().map(|b| b.at(0)).collect();
    let a_refs: Vec<_> = a.iter().map(|b| b.at(0)).collect();
    ctx.setup_blas().unwrap();
    let live = ctx.queue().live_allocations();
    let bytes = ctx.queue().live_bytes();

    ctx.queue().inject(Fault::Launch);
    let shape = GerShape {
        order: Order::RowMajor,
        m: 2,
        n: 2,
    };
    let err = ctx
        .ger_batched(
            DType::F64,
            &shape,
            1.0,
            VectorBatch::new(&x_refs, 1),
            VectorBatch::new(&y_refs, 1),
            MatrixBatch::new(&a_refs, 2),
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BackendExecution);
    assert_eq!(ctx.queue().live_allocations(), live);
    assert_eq!(ctx.queue().live_bytes(), bytes);

    // The same call goes through once the fault is consumed.
    ctx.ger_batched(
        DType::F64,
        &shape,
        1.0,
        VectorBatch::new(&x_refs, 1),
        VectorBatch::new(&y_refs, 1),
        MatrixBatch::new(&a_refs, 2),
    )
    .unwrap();
    assert_eq!(a[1].to_vec::<f64>().unwrap(), vec![3.0, 3.0, 4.0, 4.0]);
}
