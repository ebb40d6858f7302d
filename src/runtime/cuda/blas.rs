//! cuBLAS handle bound to a context's stream

use std::ffi::c_void;
use std::sync::Arc;

use cudarc::cublas::sys::{
    self as cublas, cublasComputeType_t, cublasGemmAlgo_t, cublasHandle_t, cublasOperation_t,
    cublasPointerMode_t, cublasStatus_t, cudaDataType_t,
};
use cudarc::driver::safe::CudaStream;

use super::CudaRuntime;
use super::kernels::SmallKernels;
use super::queue::CudaQueue;
use crate::blas::Transpose;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::traits::{
    BlasBackend, BlasCapabilities, DotCall, GemmCall, GemvCall, GerCall, LaunchGeometry,
    SmallGemvCall, SmallGerCall, Strides,
};

/// First library version with `cublasGemmEx` and strided-batched gemm
const VERSION_GEMM_EX: i32 = 8000;
/// First library version with half-precision strided-batched gemm
const VERSION_STRIDED_HALF: i32 = 9010;
/// Compute capability (major * 10 + minor) required for F16 arithmetic
const MIN_HALF_ARCH: u32 = 53;

/// Map a library status to `Ok` or the matching error kind.
fn check(call: &'static str, status: cublasStatus_t) -> Result<()> {
    match status {
        cublasStatus_t::CUBLAS_STATUS_SUCCESS => Ok(()),
        cublasStatus_t::CUBLAS_STATUS_ARCH_MISMATCH => Err(Error::DeviceUnsupported {
            call,
            message: format!("{status:?}"),
        }),
        cublasStatus_t::CUBLAS_STATUS_NOT_SUPPORTED => {
            Err(Error::capability(call, format!("{status:?}")))
        }
        cublasStatus_t::CUBLAS_STATUS_ALLOC_FAILED => Err(Error::OutOfMemory { size: 0 }),
        other => Err(Error::backend(call, format!("{other:?}"))),
    }
}

fn op(trans: Transpose) -> cublasOperation_t {
    match trans {
        Transpose::NoTrans => cublasOperation_t::CUBLAS_OP_N,
        Transpose::Trans => cublasOperation_t::CUBLAS_OP_T,
        Transpose::ConjTrans => cublasOperation_t::CUBLAS_OP_C,
    }
}

fn cptr<T>(addr: u64) -> *const T {
    addr as *const T
}

fn mptr<T>(addr: u64) -> *mut T {
    addr as *mut T
}

/// cuBLAS handle plus the compiled small-batch kernels
pub struct CudaBlas {
    handle: cublasHandle_t,
    stream: Arc<CudaStream>,
    capabilities: BlasCapabilities,
    kernels: SmallKernels,
}

// SAFETY: the handle is only used while the owning context's gate is held.
unsafe impl Send for CudaBlas {}
// SAFETY: see above.
unsafe impl Sync for CudaBlas {}

impl std::fmt::Debug for CudaBlas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaBlas")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Drop for CudaBlas {
    fn drop(&mut self) {
        // SAFETY: created by cublasCreate and destroyed once.
        let status = unsafe { cublas::cublasDestroy_v2(self.handle) };
        if status != cublasStatus_t::CUBLAS_STATUS_SUCCESS {
            log::warn!("cublasDestroy failed: {status:?}");
        }
    }
}

impl CudaBlas {
    /// Raw library handle
    pub fn handle(&self) -> cublasHandle_t {
        self.handle
    }

    fn detect(handle: cublasHandle_t, queue: &CudaQueue) -> Result<BlasCapabilities> {
        let mut version = 0i32;
        // SAFETY: valid handle and out-pointer.
        check("cublasGetVersion", unsafe {
            cublas::cublasGetVersion_v2(handle, &mut version)
        })?;
        let (major, minor) = queue.device().compute_capability()?;
        let half_arch = major * 10 + minor >= MIN_HALF_ARCH;
        log::debug!("cuBLAS {version} on sm_{major}{minor}");
        Ok(BlasCapabilities {
            gemm_ex: version >= VERSION_GEMM_EX && half_arch,
            strided_batched: version >= VERSION_GEMM_EX,
            strided_batched_half: version >= VERSION_STRIDED_HALF && half_arch,
        })
    }
}

impl BlasBackend<CudaRuntime> for CudaBlas {
    fn create(queue: &CudaQueue) -> Result<Self> {
        let mut handle: cublasHandle_t = std::ptr::null_mut();
        // SAFETY: valid out-pointer; the queue's context is bound by the caller.
        check("cublasCreate", unsafe { cublas::cublasCreate_v2(&mut handle) })?;

        let setup = || -> Result<(BlasCapabilities, SmallKernels)> {
            // SAFETY: the stream outlives the handle through the stored Arc.
            check("cublasSetStream", unsafe {
                cublas::cublasSetStream_v2(handle, queue.cu_stream() as _)
            })?;
            let capabilities = Self::detect(handle, queue)?;
            let kernels = SmallKernels::compile(queue.context())?;
            Ok((capabilities, kernels))
        };

        match setup() {
            Ok((capabilities, kernels)) => Ok(Self {
                handle,
                stream: Arc::clone(queue.stream()),
                capabilities,
                kernels,
            }),
            Err(e) => {
                // SAFETY: the handle was created above and is not used again.
                unsafe { cublas::cublasDestroy_v2(handle) };
                Err(e)
            }
        }
    }

    fn capabilities(&self) -> BlasCapabilities {
        self.capabilities
    }

    unsafe fn dot(&self, dtype: DType, call: &DotCall) -> Result<()> {
        if !matches!(dtype, DType::F32 | DType::F64) {
            return Err(Error::unsupported_dtype(dtype, "dot"));
        }
        let h = self.handle;
        let device_mode = cublasPointerMode_t::CUBLAS_POINTER_MODE_DEVICE;
        let host_mode = cublasPointerMode_t::CUBLAS_POINTER_MODE_HOST;
        // SAFETY: the result lives in device memory, so the handle is switched
        // to device pointer mode for this call only.
        unsafe {
            check("cublasSetPointerMode", cublas::cublasSetPointerMode_v2(h, device_mode))?;
            let status = if dtype == DType::F32 {
                cublas::cublasSdot_v2(
                    h,
                    call.n,
                    cptr(call.x),
                    call.incx,
                    cptr(call.y),
                    call.incy,
                    mptr(call.result),
                )
            } else {
                cublas::cublasDdot_v2(
                    h,
                    call.n,
                    cptr(call.x),
                    call.incx,
                    cptr(call.y),
                    call.incy,
                    mptr(call.result),
                )
            };
            let restore = cublas::cublasSetPointerMode_v2(h, host_mode);
            check("cublasDot", status)?;
            check("cublasSetPointerMode", restore)
        }
    }

    unsafe fn gemv(&self, dtype: DType, call: &GemvCall) -> Result<()> {
        let h = self.handle;
        let t = op(call.trans);
        // SAFETY: addresses are validated by the caller.
        let status = unsafe {
            match dtype {
                DType::F32 => {
                    let (alpha, beta) = (call.alpha as f32, call.beta as f32);
                    cublas::cublasSgemv_v2(
                        h, t, call.m, call.n, &alpha, cptr(call.a), call.lda, cptr(call.x),
                        call.incx, &beta, mptr(call.y), call.incy,
                    )
                }
                DType::F64 => cublas::cublasDgemv_v2(
                    h, t, call.m, call.n, &call.alpha, cptr(call.a), call.lda, cptr(call.x),
                    call.incx, &call.beta, mptr(call.y), call.incy,
                ),
                other => return Err(Error::unsupported_dtype(other, "gemv")),
            }
        };
        check("cublasGemv", status)
    }

    unsafe fn gemm(&self, dtype: DType, call: &GemmCall) -> Result<()> {
        let h = self.handle;
        let (ta, tb) = (op(call.trans_a), op(call.trans_b));
        // SAFETY: addresses are validated by the caller.
        let status = unsafe {
            match dtype {
                DType::F32 => {
                    let (alpha, beta) = (call.alpha as f32, call.beta as f32);
                    cublas::cublasSgemm_v2(
                        h, ta, tb, call.m, call.n, call.k, &alpha, cptr(call.a), call.lda,
                        cptr(call.b), call.ldb, &beta, mptr(call.c), call.ldc,
                    )
                }
                DType::F64 => cublas::cublasDgemm_v2(
                    h, ta, tb, call.m, call.n, call.k, &call.alpha, cptr(call.a), call.lda,
                    cptr(call.b), call.ldb, &call.beta, mptr(call.c), call.ldc,
                ),
                DType::F16 => {
                    if !self.capabilities.gemm_ex {
                        return Err(Error::capability("gemm_ex", "requires cuBLAS 8.0 and sm_53"));
                    }
                    let (alpha, beta) = (call.alpha as f32, call.beta as f32);
                    let half = cudaDataType_t::CUDA_R_16F;
                    cublas::cublasGemmEx(
                        h,
                        ta,
                        tb,
                        call.m,
                        call.n,
                        call.k,
                        &alpha as *const f32 as *const c_void,
                        cptr(call.a),
                        half,
                        call.lda,
                        cptr(call.b),
                        half,
                        call.ldb,
                        &beta as *const f32 as *const c_void,
                        mptr(call.c),
                        half,
                        call.ldc,
                        cublasComputeType_t::CUBLAS_COMPUTE_32F,
                        cublasGemmAlgo_t::CUBLAS_GEMM_DEFAULT,
                    )
                }
                other => return Err(Error::unsupported_dtype(other, "gemm")),
            }
        };
        check("cublasGemm", status)
    }

    unsafe fn ger(&self, dtype: DType, call: &GerCall) -> Result<()> {
        let h = self.handle;
        // SAFETY: addresses are validated by the caller.
        let status = unsafe {
            match dtype {
                DType::F32 => {
                    let alpha = call.alpha as f32;
                    cublas::cublasSger_v2(
                        h, call.m, call.n, &alpha, cptr(call.x), call.incx, cptr(call.y),
                        call.incy, mptr(call.a), call.lda,
                    )
                }
                DType::F64 => cublas::cublasDger_v2(
                    h, call.m, call.n, &call.alpha, cptr(call.x), call.incx, cptr(call.y),
                    call.incy, mptr(call.a), call.lda,
                ),
                other => return Err(Error::unsupported_dtype(other, "ger")),
            }
        };
        check("cublasGer", status)
    }

    unsafe fn gemm_batched(&self, dtype: DType, call: &GemmCall, batch: i32) -> Result<()> {
        let h = self.handle;
        let (ta, tb) = (op(call.trans_a), op(call.trans_b));
        // SAFETY: `a`, `b` and `c` are device arrays of `batch` operand pointers.
        let status = unsafe {
            match dtype {
                DType::F32 => {
                    let (alpha, beta) = (call.alpha as f32, call.beta as f32);
                    cublas::cublasSgemmBatched(
                        h, ta, tb, call.m, call.n, call.k, &alpha, cptr(call.a), call.lda,
                        cptr(call.b), call.ldb, &beta, cptr(call.c), call.ldc, batch,
                    )
                }
                DType::F64 => cublas::cublasDgemmBatched(
                    h, ta, tb, call.m, call.n, call.k, &call.alpha, cptr(call.a), call.lda,
                    cptr(call.b), call.ldb, &call.beta, cptr(call.c), call.ldc, batch,
                ),
                other => return Err(Error::unsupported_dtype(other, "gemm_batched")),
            }
        };
        check("cublasGemmBatched", status)
    }

    unsafe fn gemm_strided_batched(
        &self,
        dtype: DType,
        call: &GemmCall,
        strides: &Strides,
        batch: i32,
    ) -> Result<()> {
        let h = self.handle;
        let (ta, tb) = (op(call.trans_a), op(call.trans_b));
        // SAFETY: the footprint of every item is validated by the caller.
        let status = unsafe {
            match dtype {
                DType::F32 if self.capabilities.strided_batched => {
                    let (alpha, beta) = (call.alpha as f32, call.beta as f32);
                    cublas::cublasSgemmStridedBatched(
                        h, ta, tb, call.m, call.n, call.k, &alpha, cptr(call.a), call.lda,
                        strides.a, cptr(call.b), call.ldb, strides.b, &beta, mptr(call.c),
                        call.ldc, strides.c, batch,
                    )
                }
                DType::F64 if self.capabilities.strided_batched => {
                    cublas::cublasDgemmStridedBatched(
                        h, ta, tb, call.m, call.n, call.k, &call.alpha, cptr(call.a), call.lda,
                        strides.a, cptr(call.b), call.ldb, strides.b, &call.beta, mptr(call.c),
                        call.ldc, strides.c, batch,
                    )
                }
                DType::F16 if self.capabilities.strided_batched_half => {
                    let (alpha, beta) = (call.alpha as f32, call.beta as f32);
                    let half = cudaDataType_t::CUDA_R_16F;
                    cublas::cublasGemmStridedBatchedEx(
                        h,
                        ta,
                        tb,
                        call.m,
                        call.n,
                        call.k,
                        &alpha as *const f32 as *const c_void,
                        cptr(call.a),
                        half,
                        call.lda,
                        strides.a,
                        cptr(call.b),
                        half,
                        call.ldb,
                        strides.b,
                        &beta as *const f32 as *const c_void,
                        mptr(call.c),
                        half,
                        call.ldc,
                        strides.c,
                        batch,
                        cublasComputeType_t::CUBLAS_COMPUTE_32F,
                        cublasGemmAlgo_t::CUBLAS_GEMM_DEFAULT,
                    )
                }
                DType::F32 | DType::F64 | DType::F16 => {
                    return Err(Error::capability(
                        "gemm_strided_batched",
                        "not in this library version",
                    ));
                }
                other => return Err(Error::unsupported_dtype(other, "gemm_strided_batched")),
            }
        };
        check("cublasGemmStridedBatched", status)
    }

    unsafe fn gemv_batched_small(
        &self,
        dtype: DType,
        call: &SmallGemvCall,
        launch: &LaunchGeometry,
    ) -> Result<()> {
        // SAFETY: forwarded caller guarantee.
        unsafe { self.kernels.gemv(&self.stream, dtype, call, launch) }
    }

    unsafe fn ger_batched_small(
        &self,
        dtype: DType,
        call: &SmallGerCall,
        launch: &LaunchGeometry,
    ) -> Result<()> {
        // SAFETY: forwarded caller guarantee.
        unsafe { self.kernels.ger(&self.stream, dtype, call, launch) }
    }
}
