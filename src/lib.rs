//! # devq
//!
//! **Hazard-tracked dispatch of BLAS and collective operations onto ordered
//! device queues.**
//!
//! devq sits between a caller holding device buffers and the vendor numeric
//! and collective libraries. Every operation is validated on the host, then
//! issued inside its context's critical section between per-buffer fence
//! waits and records, so operations on the same buffers execute in issue
//! order even though the queue runs them asynchronously.
//!
//! ## Features
//!
//! - **Hazard tracking**: per-buffer read and write fences, inserted on the
//!   queue instead of blocking the host
//! - **BLAS dispatch**: dot, gemv, ger, gemm (including F16 storage with F32
//!   compute), pointer-batched and strided-batched gemm, small-batch gemv/ger
//!   kernels; row-major requests are rewritten to column-major
//! - **Collectives**: reduce, all-reduce, reduce-scatter, broadcast and
//!   all-gather over a fixed world of contexts
//! - **Status codes**: every error has a stable non-zero integer code
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use devq::prelude::*;
//!
//! let ctx = Context::<CudaRuntime>::open(CudaDevice::new(0))?;
//! let a = DeviceBuffer::from_slice(&ctx, &a_host)?;
//! let b = DeviceBuffer::from_slice(&ctx, &b_host)?;
//! let c = DeviceBuffer::zeroed(&ctx, m * n * 4)?;
//!
//! let shape = GemmShape::new(Order::RowMajor, m, n, k);
//! ctx.gemm(DType::F32, &shape, 1.0, Matrix::new(a.at(0), k), Matrix::new(b.at(0), n), 0.0,
//!          Matrix::new(c.at(0), n))?;
//! let c_host: Vec<f32> = c.to_vec()?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cuda`: NVIDIA backend (cuBLAS, NVRTC kernels, NCCL)
//!
//! The [`emulated`](runtime::emulated) runtime is always compiled. It is a
//! host-memory reference model of a device queue for tests and for checking
//! dispatch decisions, not a CPU compute backend.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blas;
pub mod collective;
pub mod config;
pub mod dtype;
pub mod error;
pub mod runtime;
mod validate;

pub use error::{Error, ErrorKind, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::blas::{
        GemmShape, GemvShape, GerShape, Matrix, MatrixBatch, Order, StridedMatrix, Transpose,
        Vector, VectorBatch,
    };
    pub use crate::collective::{CliqueId, Communicator, ReduceOp};
    pub use crate::config::DispatchConfig;
    pub use crate::dtype::{DType, Element};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::runtime::{BufferRef, Context, Device, DeviceBuffer, HazardMode, Runtime};

    pub use crate::runtime::emulated::{EmulatedDevice, EmulatedRuntime};

    #[cfg(feature = "cuda")]
    pub use crate::runtime::cuda::{CudaDevice, CudaRuntime};
}

/// Runtime backed by real hardware
///
/// Only defined with the `cuda` feature. The emulated runtime is a host
/// reference model for tests and is never picked as a default.
#[cfg(feature = "cuda")]
pub type DefaultRuntime = runtime::cuda::CudaRuntime;
