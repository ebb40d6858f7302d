//! Small-batch gemv and ger kernels
//!
//! Compiled from source with NVRTC when a context first sets up its numeric
//! library, and released with the handle. Batch items run on different
//! threads and their outputs may alias, so every update of an output element
//! is an atomic add. All axes use grid-stride loops so a clamped grid still
//! covers the full batch.

use std::sync::Arc;

use cudarc::driver::PushKernelArg;
use cudarc::driver::safe::{CudaContext, CudaFunction, CudaModule, CudaStream, LaunchConfig};

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::traits::{LaunchGeometry, SmallGemvCall, SmallGerCall};

const SOURCE: &str = r#"
__device__ inline void atom_add(float* addr, float v) {
    atomicAdd(addr, v);
}

__device__ inline void atom_add(double* addr, double v) {
#if __CUDA_ARCH__ >= 600
    atomicAdd(addr, v);
#else
    unsigned long long* bits = (unsigned long long*)addr;
    unsigned long long old = *bits;
    unsigned long long assumed;
    do {
        assumed = old;
        old = atomicCAS(bits, assumed,
                        __double_as_longlong(v + __longlong_as_double(assumed)));
    } while (assumed != old);
#endif
}

template <typename T>
__device__ void gemv_batched(int trans, int rows, int cols,
                             const T* const* a, const T* const* x, T* const* y,
                             int lda, int incx, int incy, int batch) {
    const int out_len = trans ? cols : rows;
    const int in_len = trans ? rows : cols;
    for (int p = blockIdx.y * blockDim.y + threadIdx.y; p < batch; p += gridDim.y * blockDim.y) {
        const T* ap = a[p];
        const T* xp = x[p];
        T* yp = y[p];
        for (int i = blockIdx.x * blockDim.x + threadIdx.x; i < out_len; i += gridDim.x * blockDim.x) {
            T acc = 0;
            for (int j = 0; j < in_len; ++j) {
                const T aij = trans ? ap[j + (long long)i * lda] : ap[i + (long long)j * lda];
                acc += aij * xp[(long long)j * incx];
            }
            atom_add(&yp[(long long)i * incy], acc);
        }
    }
}

template <typename T>
__device__ void ger_batched(int rows, int cols, T alpha,
                            const T* const* x, const T* const* y, T* const* a,
                            int incx, int incy, int lda, int batch) {
    for (int p = blockIdx.z * blockDim.z + threadIdx.z; p < batch; p += gridDim.z * blockDim.z) {
        const T* xp = x[p];
        const T* yp = y[p];
        T* ap = a[p];
        for (int j = blockIdx.y * blockDim.y + threadIdx.y; j < cols; j += gridDim.y * blockDim.y) {
            const T yj = alpha * yp[(long long)j * incy];
            for (int i = blockIdx.x * blockDim.x + threadIdx.x; i < rows; i += gridDim.x * blockDim.x) {
                atom_add(&ap[i + (long long)j * lda], xp[(long long)i * incx] * yj);
            }
        }
    }
}

#define GEMV(NAME, T)                                                              \
extern "C" __global__ void NAME(int trans, int rows, int cols,                     \
                                const T* const* a, const T* const* x, T* const* y, \
                                int lda, int incx, int incy, int batch) {          \
    gemv_batched<T>(trans, rows, cols, a, x, y, lda, incx, incy, batch);           \
}

#define GER(NAME, T)                                                               \
extern "C" __global__ void NAME(int rows, int cols, T alpha,                       \
                                const T* const* x, const T* const* y, T* const* a, \
                                int incx, int incy, int lda, int batch) {          \
    ger_batched<T>(rows, cols, alpha, x, y, a, incx, incy, lda, batch);            \
}

GEMV(devq_gemv_batched_f32, float)
GEMV(devq_gemv_batched_f64, double)
GER(devq_ger_batched_f32, float)
GER(devq_ger_batched_f64, double)
"#;

/// Loaded small-batch kernel program
pub(crate) struct SmallKernels {
    _module: Arc<CudaModule>,
    gemv_f32: CudaFunction,
    gemv_f64: CudaFunction,
    ger_f32: CudaFunction,
    ger_f64: CudaFunction,
}

fn config(launch: &LaunchGeometry) -> LaunchConfig {
    LaunchConfig {
        grid_dim: launch.grid,
        block_dim: launch.block,
        shared_mem_bytes: 0,
    }
}

fn function(module: &Arc<CudaModule>, name: &str) -> Result<CudaFunction> {
    module
        .load_function(name)
        .map_err(|e| Error::backend("kernel load", format!("{name}: {e:?}")))
}

impl SmallKernels {
    /// Compile and load the kernel program on `context`.
    pub(crate) fn compile(context: &Arc<CudaContext>) -> Result<Self> {
        let ptx = cudarc::nvrtc::compile_ptx(SOURCE)
            .map_err(|e| Error::backend("kernel compile", format!("{e:?}")))?;
        let module = context
            .load_module(ptx)
            .map_err(|e| Error::backend("kernel load", format!("{e:?}")))?;
        log::debug!("compiled small-batch kernels");
        Ok(Self {
            gemv_f32: function(&module, "devq_gemv_batched_f32")?,
            gemv_f64: function(&module, "devq_gemv_batched_f64")?,
            ger_f32: function(&module, "devq_ger_batched_f32")?,
            ger_f64: function(&module, "devq_ger_batched_f64")?,
            _module: module,
        })
    }

    /// # Safety
    ///
    /// The pointer arrays and every operand they list must be live on `stream`.
    pub(crate) unsafe fn gemv(
        &self,
        stream: &Arc<CudaStream>,
        dtype: DType,
        call: &SmallGemvCall,
        launch: &LaunchGeometry,
    ) -> Result<()> {
        let func = match dtype {
            DType::F32 => &self.gemv_f32,
            DType::F64 => &self.gemv_f64,
            other => return Err(Error::unsupported_dtype(other, "gemv_batched")),
        };
        let trans = call.trans.is_transposed() as i32;
        let arrays = call.arrays;

        let mut builder = stream.launch_builder(func);
        builder.arg(&trans);
        builder.arg(&call.rows);
        builder.arg(&call.cols);
        builder.arg(&arrays.first);
        builder.arg(&arrays.second);
        builder.arg(&arrays.third);
        builder.arg(&call.lda);
        builder.arg(&call.incx);
        builder.arg(&call.incy);
        builder.arg(&call.batch);
        // SAFETY: argument list matches the kernel signature.
        unsafe { builder.launch(config(launch)) }
            .map(|_| ())
            .map_err(|e| Error::backend("gemv_batched kernel", format!("{e:?}")))
    }

    /// # Safety
    ///
    /// The pointer arrays and every operand they list must be live on `stream`.
    pub(crate) unsafe fn ger(
        &self,
        stream: &Arc<CudaStream>,
        dtype: DType,
        call: &SmallGerCall,
        launch: &LaunchGeometry,
    ) -> Result<()> {
        let arrays = call.arrays;
        let alpha_f32 = call.alpha as f32;
        let (func, f32_alpha) = match dtype {
            DType::F32 => (&self.ger_f32, true),
            DType::F64 => (&self.ger_f64, false),
            other => return Err(Error::unsupported_dtype(other, "ger_batched")),
        };

        let mut builder = stream.launch_builder(func);
        builder.arg(&call.rows);
        builder.arg(&call.cols);
        if f32_alpha {
            builder.arg(&alpha_f32);
        } else {
            builder.arg(&call.alpha);
        }
        builder.arg(&arrays.first);
        builder.arg(&arrays.second);
        builder.arg(&arrays.third);
        builder.arg(&call.incx);
        builder.arg(&call.incy);
        builder.arg(&call.lda);
        builder.arg(&call.batch);
        // SAFETY: argument list matches the kernel signature.
        unsafe { builder.launch(config(launch)) }
            .map(|_| ())
            .map_err(|e| Error::backend("ger_batched kernel", format!("{e:?}")))
    }
}
