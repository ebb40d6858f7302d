//! Numeric-library handle abstraction
//!
//! The call descriptors here are already normalized: column-major, 32-bit
//! dimensions, raw device addresses with offsets applied. All validation has
//! happened by the time a backend sees them. Field names follow the BLAS
//! argument names.

#![allow(missing_docs)]

use super::Runtime;
use crate::blas::Transpose;
use crate::dtype::DType;
use crate::error::Result;

/// Entry points the loaded numeric library provides
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlasCapabilities {
    /// Reduced-precision gemm (F16 storage, F32 compute)
    pub gemm_ex: bool,
    /// Native strided-batched gemm for F32/F64
    pub strided_batched: bool,
    /// Native strided-batched gemm for F16
    pub strided_batched_half: bool,
}

impl BlasCapabilities {
    /// Every entry point available
    pub const ALL: Self = Self {
        gemm_ex: true,
        strided_batched: true,
        strided_batched_half: true,
    };

    /// Only the single-call and pointer-batched entry points
    pub const BASIC: Self = Self {
        gemm_ex: false,
        strided_batched: false,
        strided_batched_half: false,
    };
}

/// `result = x . y`, result written to device memory
#[derive(Copy, Clone, Debug)]
pub struct DotCall {
    /// Element count
    pub n: i32,
    /// Address of x
    pub x: u64,
    /// Increment of x
    pub incx: i32,
    /// Address of y
    pub y: u64,
    /// Increment of y
    pub incy: i32,
    /// Address of the single output element
    pub result: u64,
}

/// `y = alpha * op(A) * x + beta * y` with A stored `m x n`
#[derive(Copy, Clone, Debug)]
pub struct GemvCall {
    pub trans: Transpose,
    pub m: i32,
    pub n: i32,
    pub alpha: f64,
    pub a: u64,
    pub lda: i32,
    pub x: u64,
    pub incx: i32,
    pub beta: f64,
    pub y: u64,
    pub incy: i32,
}

/// `C = alpha * op(A) * op(B) + beta * C` with C `m x n` and inner dimension k
///
/// For `gemm_batched`, `a`, `b` and `c` are the addresses of device arrays of
/// per-item operand pointers instead of operands.
#[derive(Copy, Clone, Debug)]
pub struct GemmCall {
    pub trans_a: Transpose,
    pub trans_b: Transpose,
    pub m: i32,
    pub n: i32,
    pub k: i32,
    pub alpha: f64,
    pub a: u64,
    pub lda: i32,
    pub b: u64,
    pub ldb: i32,
    pub beta: f64,
    pub c: u64,
    pub ldc: i32,
}

/// `A += alpha * x * y^T` with A stored `m x n`
#[derive(Copy, Clone, Debug)]
pub struct GerCall {
    pub m: i32,
    pub n: i32,
    pub alpha: f64,
    pub x: u64,
    pub incx: i32,
    pub y: u64,
    pub incy: i32,
    pub a: u64,
    pub lda: i32,
}

/// Element strides between consecutive items of a strided batch
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Strides {
    pub a: i64,
    pub b: i64,
    pub c: i64,
}

/// Device addresses of three equal-length pointer arrays
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PointerArrays {
    pub first: u64,
    pub second: u64,
    pub third: u64,
}

/// Batched `y_p += op(A_p) * x_p` over small items
///
/// `arrays` holds (A, x, y) pointers. `rows`/`cols` describe the stored A.
#[derive(Copy, Clone, Debug)]
pub struct SmallGemvCall {
    pub trans: Transpose,
    pub rows: i32,
    pub cols: i32,
    pub arrays: PointerArrays,
    pub lda: i32,
    pub incx: i32,
    pub incy: i32,
    pub batch: i32,
}

/// Batched `A_p += alpha * x_p * y_p^T` over small items
///
/// `arrays` holds (x, y, A) pointers.
#[derive(Copy, Clone, Debug)]
pub struct SmallGerCall {
    pub rows: i32,
    pub cols: i32,
    pub alpha: f64,
    pub arrays: PointerArrays,
    pub incx: i32,
    pub incy: i32,
    pub lda: i32,
    pub batch: i32,
}

/// Grid and block extents for a custom kernel launch
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub grid: (u32, u32, u32),
    pub block: (u32, u32, u32),
}

/// Per-context numeric-library handle
///
/// Created by `Context::setup_blas` the first time a context needs it, bound to
/// the context's queue, and dropped on teardown. Dropping must release the
/// library handle and every kernel program compiled in `create`.
///
/// # Safety
///
/// The `unsafe` entry points take raw device addresses. Callers guarantee
/// every address and footprint lies inside live allocations of the queue the
/// handle was created on.
pub trait BlasBackend<R: Runtime>: Sized + Send + Sync {
    /// Create the handle, bind it to `queue` and prepare the small-batch kernels.
    ///
    /// On error nothing created so far may outlive the call.
    fn create(queue: &R::Queue) -> Result<Self>;

    /// Entry points available in the loaded library on this device.
    fn capabilities(&self) -> BlasCapabilities;

    /// Dot product (F32/F64), result left in device memory.
    unsafe fn dot(&self, dtype: DType, call: &DotCall) -> Result<()>;

    /// Matrix-vector product (F32/F64).
    unsafe fn gemv(&self, dtype: DType, call: &GemvCall) -> Result<()>;

    /// Matrix-matrix product. F16 uses the reduced-precision path.
    unsafe fn gemm(&self, dtype: DType, call: &GemmCall) -> Result<()>;

    /// Rank-1 update (F32/F64).
    unsafe fn ger(&self, dtype: DType, call: &GerCall) -> Result<()>;

    /// One vendor call over `batch` items whose operands are listed in
    /// device pointer arrays (F32/F64).
    unsafe fn gemm_batched(&self, dtype: DType, call: &GemmCall, batch: i32) -> Result<()>;

    /// One vendor call over `batch` items spaced by constant strides.
    unsafe fn gemm_strided_batched(
        &self,
        dtype: DType,
        call: &GemmCall,
        strides: &Strides,
        batch: i32,
    ) -> Result<()>;

    /// Custom small-batch gemv kernel (F32/F64, unit scale factors).
    unsafe fn gemv_batched_small(
        &self,
        dtype: DType,
        call: &SmallGemvCall,
        launch: &LaunchGeometry,
    ) -> Result<()>;

    /// Custom small-batch ger kernel (F32/F64).
    unsafe fn ger_batched_small(
        &self,
        dtype: DType,
        call: &SmallGerCall,
        launch: &LaunchGeometry,
    ) -> Result<()>;
}
