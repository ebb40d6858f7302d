//! Reference numeric library for the emulated queue
//!
//! Column-major like the vendor interface. Products accumulate in f64 with
//! the inner index ascending, so a result depends only on the logical
//! operands and not on how they were laid out. `beta = 0` never reads C.

use std::sync::Arc;

use super::EmulatedRuntime;
use super::memory::Memory;
use super::queue::{EmulatedQueue, Fault, QueueInner};
use crate::blas::Transpose;
use crate::dtype::dispatch::dispatch_float;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::runtime::traits::{
    BlasBackend, BlasCapabilities, DotCall, GemmCall, GemvCall, GerCall, LaunchGeometry,
    SmallGemvCall, SmallGerCall, Strides,
};

/// Threads per block accepted by a launch
const MAX_BLOCK_THREADS: u32 = 1024;

/// Numeric-library handle of an emulated context
pub struct EmulatedBlas {
    queue: Arc<QueueInner>,
    capabilities: BlasCapabilities,
}

impl std::fmt::Debug for EmulatedBlas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedBlas")
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

fn elem_addr<T: Element>(base: u64, index: usize) -> u64 {
    base + (index * std::mem::size_of::<T>()) as u64
}

/// Load `count` consecutive elements as f64.
fn load<T: Element>(mem: &Memory, addr: u64, count: usize) -> Result<Vec<f64>> {
    let bytes = mem.read(addr, count * std::mem::size_of::<T>())?;
    let values: Vec<T> = bytemuck::pod_collect_to_vec(bytes);
    Ok(values.into_iter().map(Element::to_f64).collect())
}

fn matrix_span(rows: usize, cols: usize, ld: usize) -> usize {
    if rows == 0 || cols == 0 {
        0
    } else {
        ld * (cols - 1) + rows
    }
}

fn vector_span(n: usize, inc: usize) -> usize {
    if n == 0 { 0 } else { (n - 1) * inc + 1 }
}

fn dot<T: Element>(mem: &mut Memory, call: &DotCall) -> Result<()> {
    let (n, incx, incy) = (call.n as usize, call.incx as usize, call.incy as usize);
    let x = load::<T>(mem, call.x, vector_span(n, incx))?;
    let y = load::<T>(mem, call.y, vector_span(n, incy))?;
    let acc = (0..n).fold(0.0, |acc, i| acc + x[i * incx] * y[i * incy]);
    mem.store(call.result, T::from_f64(acc))
}

#[allow(clippy::too_many_arguments)]
fn gemv_item<T: Element>(
    mem: &mut Memory,
    trans: Transpose,
    (m, n, lda): (usize, usize, usize),
    alpha: f64,
    beta: f64,
    (a, x, y): (u64, u64, u64),
    incx: usize,
    incy: usize,
) -> Result<()> {
    let (x_len, y_len) = if trans.is_transposed() { (m, n) } else { (n, m) };
    let a = load::<T>(mem, a, matrix_span(m, n, lda))?;
    let x = load::<T>(mem, x, vector_span(x_len, incx))?;
    for i in 0..y_len {
        let mut acc = 0.0;
        for j in 0..x_len {
            let a_ij = if trans.is_transposed() {
                a[j + i * lda]
            } else {
                a[i + j * lda]
            };
            acc += a_ij * x[j * incx];
        }
        let dst = elem_addr::<T>(y, i * incy);
        let out = if beta == 0.0 {
            alpha * acc
        } else {
            alpha * acc + beta * mem.load::<T>(dst)?.to_f64()
        };
        mem.store(dst, T::from_f64(out))?;
    }
    Ok(())
}

fn ger_item<T: Element>(
    mem: &mut Memory,
    (m, n, lda): (usize, usize, usize),
    alpha: f64,
    (x, y, a): (u64, u64, u64),
    incx: usize,
    incy: usize,
) -> Result<()> {
    let x = load::<T>(mem, x, vector_span(m, incx))?;
    let y = load::<T>(mem, y, vector_span(n, incy))?;
    for j in 0..n {
        for i in 0..m {
            let dst = elem_addr::<T>(a, i + j * lda);
            let out = mem.load::<T>(dst)?.to_f64() + alpha * x[i * incx] * y[j * incy];
            mem.store(dst, T::from_f64(out))?;
        }
    }
    Ok(())
}

fn gemm_item<T: Element>(mem: &mut Memory, call: &GemmCall, (a, b, c): (u64, u64, u64)) -> Result<()> {
    let (m, n, k) = (call.m as usize, call.n as usize, call.k as usize);
    let (lda, ldb, ldc) = (call.lda as usize, call.ldb as usize, call.ldc as usize);
    let ta = call.trans_a.is_transposed();
    let tb = call.trans_b.is_transposed();

    let (ar, ac) = if ta { (k, m) } else { (m, k) };
    let (br, bc) = if tb { (n, k) } else { (k, n) };
    let a = load::<T>(mem, a, matrix_span(ar, ac, lda))?;
    let b = load::<T>(mem, b, matrix_span(br, bc, ldb))?;

    for j in 0..n {
        for i in 0..m {
            let mut acc = 0.0;
            for l in 0..k {
                let a_il = if ta { a[l + i * lda] } else { a[i + l * lda] };
                let b_lj = if tb { b[j + l * ldb] } else { b[l + j * ldb] };
                acc += a_il * b_lj;
            }
            let dst = elem_addr::<T>(c, i + j * ldc);
            let out = if call.beta == 0.0 {
                call.alpha * acc
            } else {
                call.alpha * acc + call.beta * mem.load::<T>(dst)?.to_f64()
            };
            mem.store(dst, T::from_f64(out))?;
        }
    }
    Ok(())
}

fn pointers(mem: &Memory, arrays: [u64; 3], batch: usize) -> Result<Vec<(u64, u64, u64)>> {
    let [first, second, third] = arrays;
    let first: Vec<u64> = bytemuck::pod_collect_to_vec(mem.read(first, batch * 8)?);
    let second: Vec<u64> = bytemuck::pod_collect_to_vec(mem.read(second, batch * 8)?);
    let third: Vec<u64> = bytemuck::pod_collect_to_vec(mem.read(third, batch * 8)?);
    Ok((0..batch).map(|p| (first[p], second[p], third[p])).collect())
}

fn check_block(name: &'static str, launch: &LaunchGeometry) -> Result<()> {
    let (x, y, z) = launch.block;
    if x * y * z > MAX_BLOCK_THREADS {
        return Err(Error::backend(
            name,
            format!("invalid configuration argument: block {:?}", launch.block),
        ));
    }
    Ok(())
}

impl BlasBackend<EmulatedRuntime> for EmulatedBlas {
    fn create(queue: &EmulatedQueue) -> Result<Self> {
        let inner = queue.inner();
        if inner.lock().take_fault(Fault::BlasSetup) {
            return Err(Error::backend("handle create", "library not initialized"));
        }
        Ok(Self {
            queue: Arc::clone(inner),
            capabilities: inner.device.capabilities(),
        })
    }

    fn capabilities(&self) -> BlasCapabilities {
        self.capabilities
    }

    unsafe fn dot(&self, dtype: DType, call: &DotCall) -> Result<()> {
        self.queue.launch("dot", None, |mem| {
            dispatch_float!(dtype, T => { dot::<T>(mem, call) }, "dot")
        })
    }

    unsafe fn gemv(&self, dtype: DType, call: &GemvCall) -> Result<()> {
        self.queue.launch("gemv", None, |mem| {
            dispatch_float!(dtype, T => {
                gemv_item::<T>(
                    mem,
                    call.trans,
                    (call.m as usize, call.n as usize, call.lda as usize),
                    call.alpha,
                    call.beta,
                    (call.a, call.x, call.y),
                    call.incx as usize,
                    call.incy as usize,
                )
            }, "gemv")
        })
    }

    unsafe fn gemm(&self, dtype: DType, call: &GemmCall) -> Result<()> {
        if dtype == DType::F16 && !self.capabilities.gemm_ex {
            return Err(Error::capability("gemm_ex", "not in this library version"));
        }
        let name = if dtype == DType::F16 { "gemm_ex" } else { "gemm" };
        self.queue.launch(name, None, |mem| {
            dispatch_float!(dtype, T => { gemm_item::<T>(mem, call, (call.a, call.b, call.c)) }, "gemm")
        })
    }

    unsafe fn ger(&self, dtype: DType, call: &GerCall) -> Result<()> {
        self.queue.launch("ger", None, |mem| {
            dispatch_float!(dtype, T => {
                ger_item::<T>(
                    mem,
                    (call.m as usize, call.n as usize, call.lda as usize),
                    call.alpha,
                    (call.x, call.y, call.a),
                    call.incx as usize,
                    call.incy as usize,
                )
            }, "ger")
        })
    }

    unsafe fn gemm_batched(&self, dtype: DType, call: &GemmCall, batch: i32) -> Result<()> {
        self.queue.launch("gemm_batched", None, |mem| {
            let items = pointers(mem, [call.a, call.b, call.c], batch as usize)?;
            dispatch_float!(dtype, T => {
                for item in items {
                    gemm_item::<T>(mem, call, item)?;
                }
                Ok(())
            }, "gemm_batched")
        })
    }

    unsafe fn gemm_strided_batched(
        &self,
        dtype: DType,
        call: &GemmCall,
        strides: &Strides,
        batch: i32,
    ) -> Result<()> {
        let available = match dtype {
            DType::F16 => self.capabilities.strided_batched_half,
            _ => self.capabilities.strided_batched,
        };
        if !available {
            return Err(Error::capability(
                "gemm_strided_batched",
                "not in this library version",
            ));
        }
        let elsize = dtype.size_in_bytes() as u64;
        self.queue.launch("gemm_strided_batched", None, |mem| {
            dispatch_float!(dtype, T => {
                for p in 0..batch as u64 {
                    let item = (
                        call.a + p * strides.a as u64 * elsize,
                        call.b + p * strides.b as u64 * elsize,
                        call.c + p * strides.c as u64 * elsize,
                    );
                    gemm_item::<T>(mem, call, item)?;
                }
                Ok(())
            }, "gemm_strided_batched")
        })
    }

    unsafe fn gemv_batched_small(
        &self,
        dtype: DType,
        call: &SmallGemvCall,
        launch: &LaunchGeometry,
    ) -> Result<()> {
        check_block("gemv_batched_small", launch)?;
        self.queue
            .launch("gemv_batched_small", Some(*launch), |mem| {
                let arrays = [call.arrays.first, call.arrays.second, call.arrays.third];
                let items = pointers(mem, arrays, call.batch as usize)?;
                dispatch_float!(dtype, T => {
                    for item in items {
                        gemv_item::<T>(
                            mem,
                            call.trans,
                            (call.rows as usize, call.cols as usize, call.lda as usize),
                            1.0,
                            1.0,
                            item,
                            call.incx as usize,
                            call.incy as usize,
                        )?;
                    }
                    Ok(())
                }, "gemv_batched_small")
            })
    }

    unsafe fn ger_batched_small(
        &self,
        dtype: DType,
        call: &SmallGerCall,
        launch: &LaunchGeometry,
    ) -> Result<()> {
        check_block("ger_batched_small", launch)?;
        self.queue
            .launch("ger_batched_small", Some(*launch), |mem| {
                let arrays = [call.arrays.first, call.arrays.second, call.arrays.third];
                let items = pointers(mem, arrays, call.batch as usize)?;
                dispatch_float!(dtype, T => {
                    for item in items {
                        ger_item::<T>(
                            mem,
                            (call.rows as usize, call.cols as usize, call.lda as usize),
                            call.alpha,
                            item,
                            call.incx as usize,
                            call.incy as usize,
                        )?;
                    }
                    Ok(())
                }, "ger_batched_small")
            })
    }
}
