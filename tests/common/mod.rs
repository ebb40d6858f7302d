//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use devq::config::DispatchConfig;
use devq::prelude::*;
use devq::runtime::emulated::QueueCommand;

/// Shared handle to an emulated context
pub type Ctx = Arc<Context<EmulatedRuntime>>;

/// Open an emulated context with default configuration
pub fn create_emulated_context() -> Ctx {
    Context::open_with_config(EmulatedDevice::new(0), DispatchConfig::default())
        .expect("open emulated context")
}

/// Open an emulated context on a customized device
pub fn create_context_with(device: EmulatedDevice, config: DispatchConfig) -> Ctx {
    Context::open_with_config(device, config).expect("open emulated context")
}

/// Commands enqueued on `ctx` since the log had `start` entries
pub fn commands_since(ctx: &Ctx, start: usize) -> Vec<QueueCommand> {
    ctx.queue().commands()[start..].to_vec()
}

/// Names of the library calls and kernels in `commands`
pub fn launches(commands: &[QueueCommand]) -> Vec<&'static str> {
    commands
        .iter()
        .filter_map(|c| match c {
            QueueCommand::Launch { name, .. } => Some(*name),
            _ => None,
        })
        .collect()
}

/// Event ids of every `Record` in `commands`, in order
pub fn records(commands: &[QueueCommand]) -> Vec<u64> {
    commands
        .iter()
        .filter_map(|c| match c {
            QueueCommand::Record { event } => Some(*event),
            _ => None,
        })
        .collect()
}

/// Event ids of every `Wait` in `commands`, in order
pub fn waits(commands: &[QueueCommand]) -> Vec<u64> {
    commands
        .iter()
        .filter_map(|c| match c {
            QueueCommand::Wait { event } => Some(*event),
            _ => None,
        })
        .collect()
}

/// Assert two f64 slices are close within tolerance
///
/// Uses the formula: |a - b| <= atol + rtol * |b|
pub fn assert_allclose_f64(a: &[f64], b: &[f64], rtol: f64, atol: f64, msg: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch", msg);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        assert!(
            diff <= tol,
            "{}: element {} differs: {} vs {} (diff={}, tol={})",
            msg,
            i,
            x,
            y,
            diff,
            tol
        );
    }
}

/// Assert two f32 slices are close within tolerance
pub fn assert_allclose_f32(a: &[f32], b: &[f32], rtol: f32, atol: f32, msg: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch", msg);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        assert!(
            diff <= tol,
            "{}: element {} differs: {} vs {} (diff={}, tol={})",
            msg,
            i,
            x,
            y,
            diff,
            tol
        );
    }
}

/// Element (r, c) of a matrix stored in `order` with leading dimension `ld`
pub fn at(order: Order, data: &[f64], ld: usize, r: usize, c: usize) -> f64 {
    match order {
        Order::RowMajor => data[r * ld + c],
        Order::ColMajor => data[r + c * ld],
    }
}

/// Host gemm over the same storage conventions as the dispatch layer
///
/// Returns C in `order` with leading dimension `ldc`.
#[allow(clippy::too_many_arguments)]
pub fn reference_gemm(
    shape: &GemmShape,
    alpha: f64,
    a: &[f64],
    lda: usize,
    b: &[f64],
    ldb: usize,
    beta: f64,
    c: &[f64],
    ldc: usize,
) -> Vec<f64> {
    let ta = shape.trans_a.is_transposed();
    let tb = shape.trans_b.is_transposed();
    let mut out = c.to_vec();
    for i in 0..shape.m {
        for j in 0..shape.n {
            let mut acc = 0.0;
            for l in 0..shape.k {
                let a_il = if ta {
                    at(shape.order, a, lda, l, i)
                } else {
                    at(shape.order, a, lda, i, l)
                };
                let b_lj = if tb {
                    at(shape.order, b, ldb, j, l)
                } else {
                    at(shape.order, b, ldb, l, j)
                };
                acc += a_il * b_lj;
            }
            let idx = match shape.order {
                Order::RowMajor => i * ldc + j,
                Order::ColMajor => i + j * ldc,
            };
            out[idx] = alpha * acc + beta * c[idx];
        }
    }
    out
}

/// Deterministic test values in [-2, 2)
pub fn ramp(len: usize, seed: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (((i * 7 + seed * 13) % 16) as f32 - 8.0) / 4.0)
        .collect()
}

/// Run `f` on every rank of an in-process world of `ndev` contexts.
///
/// Each rank opens its own context on its own thread and joins the world
/// before `f` runs. Results are returned in rank order.
pub fn run_world<T, F>(ndev: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize, &Ctx, &Communicator<EmulatedRuntime>) -> T + Sync,
{
    let id = {
        let ctx = create_emulated_context();
        CliqueId::generate(&ctx).expect("clique id")
    };
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..ndev)
            .map(|rank| {
                let f = &f;
                scope.spawn(move || {
                    let ctx = create_context_with(EmulatedDevice::new(rank), DispatchConfig::default());
                    let comm = Communicator::new(&ctx, &id, ndev, rank).expect("join world");
                    f(rank, &ctx, &comm)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}
