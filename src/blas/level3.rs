//! Matrix-matrix operations
//!
//! Pointer-batched gemm picks between two strategies per call:
//!
//! - per-item loop: one vendor call per item, when an item's M*N*K exceeds
//!   the configured cube (650^3 by default). Such items already saturate the
//!   queue, so staging a pointer array is not worth it.
//! - pointer arrays: one vendor batched call reading three device arrays of
//!   per-item operand pointers from a scratch allocation.

use super::normalize::{GemmProblem, MatOperand, normalize};
use super::{GemmShape, Matrix, MatrixBatch, StridedMatrix};
use crate::config::DispatchConfig;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::traits::{GemmCall, Strides};
use crate::runtime::{
    BlasBackend, BufferRef, Context, DeviceBuffer, Gate, HazardMode, Runtime, ScratchPointers,
    fenced,
};
use crate::validate::{
    check_batch_lengths, check_dims, check_operand, check_products, int, matrix_elements,
};

fn check_gemm_dims(m: usize, n: usize, k: usize, lda: usize, ldb: usize, ldc: usize) -> Result<()> {
    check_dims(&[
        ("M", m),
        ("N", n),
        ("K", k),
        ("lda", lda),
        ("ldb", ldb),
        ("ldc", ldc),
    ])?;
    check_products(&[("M*N", m, n), ("M*K", m, k), ("K*N", k, n)])
}

/// Does a pointer batch of this item volume use the per-item loop?
pub(crate) fn uses_item_loop(m: usize, n: usize, k: usize, config: &DispatchConfig) -> bool {
    m as u128 * n as u128 * k as u128 > config.batch_loop_volume()
}

/// Element counts of (A, B, C) for a column-major problem.
fn footprints<T>(p: &GemmProblem<T>, ldc: usize) -> Result<(usize, usize, usize)> {
    let (ar, ac) = p.a_stored();
    let (br, bc) = p.b_stored();
    Ok((
        matrix_elements("A", ar, ac, p.a.ld)?,
        matrix_elements("B", br, bc, p.b.ld)?,
        matrix_elements("C", p.m, p.n, ldc)?,
    ))
}

fn gemm_call<T>(p: &GemmProblem<T>, alpha: f64, beta: f64, ldc: usize) -> GemmCall {
    GemmCall {
        trans_a: p.a.trans,
        trans_b: p.b.trans,
        m: int(p.m),
        n: int(p.n),
        k: int(p.k),
        alpha,
        a: 0,
        lda: int(p.a.ld),
        b: 0,
        ldb: int(p.b.ld),
        beta,
        c: 0,
        ldc: int(ldc),
    }
}

/// Validated operands of a pointer batch, already in column-major order.
struct PointerBatch<'a, R: Runtime> {
    a: Vec<BufferRef<'a, R>>,
    b: Vec<BufferRef<'a, R>>,
    c: Vec<BufferRef<'a, R>>,
}

impl<'a, R: Runtime> PointerBatch<'a, R> {
    fn len(&self) -> usize {
        self.c.len()
    }

    fn item_accesses(&self, i: usize) -> [(&'a DeviceBuffer<R>, HazardMode); 3] {
        [
            (self.a[i].buffer, HazardMode::Read),
            (self.b[i].buffer, HazardMode::Read),
            (self.c[i].buffer, HazardMode::All),
        ]
    }

    fn accesses(&self) -> Vec<(&'a DeviceBuffer<R>, HazardMode)> {
        let mut accesses = Vec::with_capacity(3 * self.len());
        accesses.extend(self.a.iter().map(|r| (r.buffer, HazardMode::Read)));
        accesses.extend(self.b.iter().map(|r| (r.buffer, HazardMode::Read)));
        accesses.extend(self.c.iter().map(|r| (r.buffer, HazardMode::All)));
        accesses
    }
}

fn addrs<R: Runtime>(items: &[BufferRef<'_, R>]) -> Vec<u64> {
    items.iter().map(BufferRef::addr).collect()
}

fn strided_items<'a, R: Runtime>(
    first: BufferRef<'a, R>,
    stride_bytes: usize,
    batch: usize,
) -> Vec<BufferRef<'a, R>> {
    (0..batch).map(|i| first.advance(i * stride_bytes)).collect()
}

impl<R: Runtime> Context<R> {
    /// `C = alpha * op(A) * op(B) + beta * C`
    ///
    /// F32 and F64 use the native entry points. F16 uses the reduced-precision
    /// path (F16 storage, F32 compute) and fails with `CapabilityUnavailable`
    /// when the loaded library lacks it.
    #[allow(clippy::too_many_arguments)]
    pub fn gemm(
        &self,
        dtype: DType,
        shape: &GemmShape,
        alpha: f64,
        a: Matrix<'_, R>,
        b: Matrix<'_, R>,
        beta: f64,
        c: Matrix<'_, R>,
    ) -> Result<()> {
        if !matches!(dtype, DType::F16 | DType::F32 | DType::F64) {
            return Err(Error::unsupported_dtype(dtype, "gemm"));
        }
        check_gemm_dims(shape.m, shape.n, shape.k, a.ld, b.ld, c.ld)?;

        let p = normalize(shape.order, problem(shape, a.data, a.ld, b.data, b.ld));
        let (a_elems, b_elems, c_elems) = footprints(&p, c.ld)?;
        check_operand(self, "A", &p.a.data, dtype, a_elems)?;
        check_operand(self, "B", &p.b.data, dtype, b_elems)?;
        check_operand(self, "C", &c.data, dtype, c_elems)?;

        let call = GemmCall {
            a: p.a.data.addr(),
            b: p.b.data.addr(),
            c: c.data.addr(),
            ..gemm_call(&p, alpha, beta, c.ld)
        };

        let gate = self.enter_blas()?;
        let blas = gate.blas()?;
        if dtype == DType::F16 && !blas.capabilities().gemm_ex {
            return Err(Error::capability(
                "gemm",
                "the loaded library has no reduced-precision gemm entry point",
            ));
        }
        fenced(
            &gate,
            &[
                (p.a.data.buffer, HazardMode::Read),
                (p.b.data.buffer, HazardMode::Read),
                (c.data.buffer, HazardMode::All),
            ],
            || unsafe { blas.gemm(dtype, &call) },
        )
    }

    /// `C_p = alpha * op(A_p) * op(B_p) + beta * C_p` for every batch item
    /// (F32/F64).
    #[allow(clippy::too_many_arguments)]
    pub fn gemm_batched(
        &self,
        dtype: DType,
        shape: &GemmShape,
        alpha: f64,
        a: MatrixBatch<'_, R>,
        b: MatrixBatch<'_, R>,
        beta: f64,
        c: MatrixBatch<'_, R>,
    ) -> Result<()> {
        match dtype {
            DType::F32 | DType::F64 => {}
            DType::F16 => {
                return Err(Error::capability(
                    "gemm_batched",
                    "no half-precision pointer-batched entry point",
                ));
            }
            other => return Err(Error::unsupported_dtype(other, "gemm_batched")),
        }
        check_gemm_dims(shape.m, shape.n, shape.k, a.ld, b.ld, c.ld)?;
        let batch = check_batch_lengths(
            "gemm_batched",
            &[a.items.len(), b.items.len(), c.items.len()],
        )?;

        let p = normalize(shape.order, problem(shape, a.items, a.ld, b.items, b.ld));
        let (a_elems, b_elems, c_elems) = footprints(&p, c.ld)?;
        for i in 0..batch {
            check_operand(self, "A", &p.a.data[i], dtype, a_elems)?;
            check_operand(self, "B", &p.b.data[i], dtype, b_elems)?;
            check_operand(self, "C", &c.items[i], dtype, c_elems)?;
        }
        if batch == 0 {
            return Ok(());
        }

        let call = gemm_call(&p, alpha, beta, c.ld);
        let items = PointerBatch {
            a: p.a.data.to_vec(),
            b: p.b.data.to_vec(),
            c: c.items.to_vec(),
        };
        let gate = self.enter_blas()?;
        self.dispatch_pointer_batch(&gate, dtype, &call, &items, (p.m, p.n, p.k))
    }

    /// Strided-batched gemm: item `p` of each operand starts `p * stride`
    /// elements after item 0.
    ///
    /// Issues one native strided call when the loaded library has one for
    /// `dtype`. Otherwise F32/F64 fall back to the pointer-batched path and
    /// F16 fails with `CapabilityUnavailable`.
    #[allow(clippy::too_many_arguments)]
    pub fn gemm_strided_batched(
        &self,
        dtype: DType,
        shape: &GemmShape,
        alpha: f64,
        a: StridedMatrix<'_, R>,
        b: StridedMatrix<'_, R>,
        beta: f64,
        c: StridedMatrix<'_, R>,
        batch: usize,
    ) -> Result<()> {
        if !matches!(dtype, DType::F16 | DType::F32 | DType::F64) {
            return Err(Error::unsupported_dtype(dtype, "gemm_strided_batched"));
        }
        check_gemm_dims(shape.m, shape.n, shape.k, a.ld, b.ld, c.ld)?;
        check_dims(&[("batch", batch)])?;

        let p = normalize(
            shape.order,
            problem(shape, (a.data, a.stride), a.ld, (b.data, b.stride), b.ld),
        );
        let (a_elems, b_elems, c_elems) = footprints(&p, c.ld)?;
        let strided_elements = |stride: usize, elems: usize| -> Result<usize> {
            if batch == 0 {
                return Ok(0);
            }
            (batch - 1)
                .checked_mul(stride)
                .and_then(|v| v.checked_add(elems))
                .ok_or_else(|| Error::overflow("stride*batch", stride as u128 * batch as u128))
        };
        let ((a_ref, a_stride), (b_ref, b_stride)) = (p.a.data, p.b.data);
        check_operand(self, "A", &a_ref, dtype, strided_elements(a_stride, a_elems)?)?;
        check_operand(self, "B", &b_ref, dtype, strided_elements(b_stride, b_elems)?)?;
        check_operand(self, "C", &c.data, dtype, strided_elements(c.stride, c_elems)?)?;
        if batch == 0 {
            return Ok(());
        }

        let base = gemm_call(&p, alpha, beta, c.ld);
        let gate = self.enter_blas()?;
        let blas = gate.blas()?;
        let caps = blas.capabilities();
        let native = match dtype {
            DType::F16 => caps.strided_batched_half,
            _ => caps.strided_batched,
        };

        if native {
            log::debug!(
                "gemm_strided_batched {dtype}: one strided call over {batch} items"
            );
            let call = GemmCall {
                a: a_ref.addr(),
                b: b_ref.addr(),
                c: c.data.addr(),
                ..base
            };
            let strides = Strides {
                a: a_stride as i64,
                b: b_stride as i64,
                c: c.stride as i64,
            };
            return fenced(
                &gate,
                &[
                    (a_ref.buffer, HazardMode::Read),
                    (b_ref.buffer, HazardMode::Read),
                    (c.data.buffer, HazardMode::All),
                ],
                || unsafe { blas.gemm_strided_batched(dtype, &call, &strides, int(batch)) },
            );
        }

        if dtype == DType::F16 {
            return Err(Error::capability(
                "gemm_strided_batched",
                "the loaded library has no half-precision strided-batched gemm",
            ));
        }

        let elsize = dtype.size_in_bytes();
        let items = PointerBatch {
            a: strided_items(a_ref, a_stride * elsize, batch),
            b: strided_items(b_ref, b_stride * elsize, batch),
            c: strided_items(c.data, c.stride * elsize, batch),
        };
        self.dispatch_pointer_batch(&gate, dtype, &base, &items, (p.m, p.n, p.k))
    }

    fn dispatch_pointer_batch(
        &self,
        gate: &Gate<'_, R>,
        dtype: DType,
        base: &GemmCall,
        items: &PointerBatch<'_, R>,
        (m, n, k): (usize, usize, usize),
    ) -> Result<()> {
        let blas = gate.blas()?;
        let batch = items.len();

        if uses_item_loop(m, n, k, self.config()) {
            log::debug!("gemm_batched {dtype}: {m}x{n}x{k} x {batch}, one call per item");
            for i in 0..batch {
                let call = GemmCall {
                    a: items.a[i].addr(),
                    b: items.b[i].addr(),
                    c: items.c[i].addr(),
                    ..*base
                };
                fenced(gate, &items.item_accesses(i), || unsafe {
                    blas.gemm(dtype, &call)
                })?;
            }
            return Ok(());
        }

        log::debug!("gemm_batched {dtype}: {m}x{n}x{k} x {batch}, pointer arrays");
        fenced(gate, &items.accesses(), || {
            let scratch = ScratchPointers::stage(
                gate.queue(),
                &addrs(&items.a),
                &addrs(&items.b),
                &addrs(&items.c),
            )?;
            let arrays = scratch.arrays();
            let call = GemmCall {
                a: arrays.first,
                b: arrays.second,
                c: arrays.third,
                ..*base
            };
            unsafe { blas.gemm_batched(dtype, &call, int(batch)) }
        })
    }
}

fn problem<T>(shape: &GemmShape, a: T, lda: usize, b: T, ldb: usize) -> GemmProblem<T> {
    GemmProblem {
        m: shape.m,
        n: shape.n,
        k: shape.k,
        a: MatOperand {
            data: a,
            ld: lda,
            trans: shape.trans_a,
        },
        b: MatOperand {
            data: b,
            ld: ldb,
            trans: shape.trans_b,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_loop_threshold() {
        let config = DispatchConfig::default();
        assert!(!uses_item_loop(650, 650, 650, &config));
        assert!(uses_item_loop(651, 650, 650, &config));
        assert!(uses_item_loop(1024, 1024, 1024, &config));
        assert!(!uses_item_loop(8, 8, 8, &config));
    }
}
