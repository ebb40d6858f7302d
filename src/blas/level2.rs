//! Matrix-vector operations and their small-batch kernels

use super::launch::{gemv_launch, ger_launch};
use super::normalize::{GemvProblem, GerProblem, normalize};
use super::{GemvShape, GerShape, Matrix, MatrixBatch, Vector, VectorBatch};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::traits::{GemvCall, GerCall, SmallGemvCall, SmallGerCall};
use crate::runtime::{
    BlasBackend, BufferRef, Context, DeviceBuffer, HazardMode, Runtime, ScratchPointers, fenced,
};
use crate::validate::{
    check_batch_lengths, check_dims, check_operand, check_products, int, matrix_elements,
    require_sd, vector_elements,
};

fn check_level2_dims(m: usize, n: usize, lda: usize, incx: usize, incy: usize) -> Result<()> {
    check_dims(&[
        ("M", m),
        ("N", n),
        ("lda", lda),
        ("incX", incx),
        ("incY", incy),
    ])?;
    check_products(&[("M*N", m, n)])
}

fn addrs<R: Runtime>(items: &[BufferRef<'_, R>]) -> Vec<u64> {
    items.iter().map(BufferRef::addr).collect()
}

impl<R: Runtime> Context<R> {
    /// `y = alpha * op(A) * x + beta * y`
    #[allow(clippy::too_many_arguments)]
    pub fn gemv(
        &self,
        dtype: DType,
        shape: &GemvShape,
        alpha: f64,
        a: Matrix<'_, R>,
        x: Vector<'_, R>,
        beta: f64,
        y: Vector<'_, R>,
    ) -> Result<()> {
        require_sd(dtype, "gemv")?;
        check_level2_dims(shape.m, shape.n, a.ld, x.inc, y.inc)?;

        let p = normalize(
            shape.order,
            GemvProblem {
                trans: shape.trans,
                m: shape.m,
                n: shape.n,
            },
        );
        let (x_len, y_len) = p.vector_lengths();
        check_operand(self, "A", &a.data, dtype, matrix_elements("A", p.m, p.n, a.ld)?)?;
        check_operand(self, "x", &x.data, dtype, vector_elements("x", x_len, x.inc)?)?;
        check_operand(self, "y", &y.data, dtype, vector_elements("y", y_len, y.inc)?)?;

        let call = GemvCall {
            trans: p.trans,
            m: int(p.m),
            n: int(p.n),
            alpha,
            a: a.data.addr(),
            lda: int(a.ld),
            x: x.data.addr(),
            incx: int(x.inc),
            beta,
            y: y.data.addr(),
            incy: int(y.inc),
        };

        let gate = self.enter_blas()?;
        let blas = gate.blas()?;
        fenced(
            &gate,
            &[
                (a.data.buffer, HazardMode::Read),
                (x.data.buffer, HazardMode::Read),
                (y.data.buffer, HazardMode::All),
            ],
            || unsafe { blas.gemv(dtype, &call) },
        )
    }

    /// `A += alpha * x * y^T`
    pub fn ger(
        &self,
        dtype: DType,
        shape: &GerShape,
        alpha: f64,
        x: Vector<'_, R>,
        y: Vector<'_, R>,
        a: Matrix<'_, R>,
    ) -> Result<()> {
        require_sd(dtype, "ger")?;
        check_level2_dims(shape.m, shape.n, a.ld, x.inc, y.inc)?;

        let p = normalize(
            shape.order,
            GerProblem {
                m: shape.m,
                n: shape.n,
                x,
                y,
            },
        );
        check_operand(self, "x", &p.x.data, dtype, vector_elements("x", p.m, p.x.inc)?)?;
        check_operand(self, "y", &p.y.data, dtype, vector_elements("y", p.n, p.y.inc)?)?;
        check_operand(self, "A", &a.data, dtype, matrix_elements("A", p.m, p.n, a.ld)?)?;

        let call = GerCall {
            m: int(p.m),
            n: int(p.n),
            alpha,
            x: p.x.data.addr(),
            incx: int(p.x.inc),
            y: p.y.data.addr(),
            incy: int(p.y.inc),
            a: a.data.addr(),
            lda: int(a.ld),
        };

        let gate = self.enter_blas()?;
        let blas = gate.blas()?;
        fenced(
            &gate,
            &[
                (p.x.data.buffer, HazardMode::Read),
                (p.y.data.buffer, HazardMode::Read),
                (a.data.buffer, HazardMode::All),
            ],
            || unsafe { blas.ger(dtype, &call) },
        )
    }

    /// `y_p += op(A_p) * x_p` for every batch item, through the small-batch
    /// kernel.
    ///
    /// Only `alpha = 1` and `beta = 1` are supported; anything else is
    /// `UnsupportedParameters`.
    #[allow(clippy::too_many_arguments)]
    pub fn gemv_batched(
        &self,
        dtype: DType,
        shape: &GemvShape,
        alpha: f64,
        a: MatrixBatch<'_, R>,
        x: VectorBatch<'_, R>,
        beta: f64,
        y: VectorBatch<'_, R>,
    ) -> Result<()> {
        if alpha != 1.0 || beta != 1.0 {
            return Err(Error::unsupported(
                "gemv_batched",
                format!("only alpha = 1 and beta = 1 are supported, got alpha = {alpha}, beta = {beta}"),
            ));
        }
        require_sd(dtype, "gemv_batched")?;
        check_level2_dims(shape.m, shape.n, a.ld, x.inc, y.inc)?;
        let batch = check_batch_lengths(
            "gemv_batched",
            &[a.items.len(), x.items.len(), y.items.len()],
        )?;

        let p = normalize(
            shape.order,
            GemvProblem {
                trans: shape.trans,
                m: shape.m,
                n: shape.n,
            },
        );
        let (x_len, y_len) = p.vector_lengths();
        let a_elems = matrix_elements("A", p.m, p.n, a.ld)?;
        let x_elems = vector_elements("x", x_len, x.inc)?;
        let y_elems = vector_elements("y", y_len, y.inc)?;
        for i in 0..batch {
            check_operand(self, "A", &a.items[i], dtype, a_elems)?;
            check_operand(self, "x", &x.items[i], dtype, x_elems)?;
            check_operand(self, "y", &y.items[i], dtype, y_elems)?;
        }
        if batch == 0 || y_len == 0 || x_len == 0 {
            return Ok(());
        }

        let launch = gemv_launch(y_len, batch, self.grid_cap())?;
        log::debug!(
            "gemv_batched {dtype}: {} x {} x {batch}, grid {:?} block {:?}",
            p.m,
            p.n,
            launch.grid,
            launch.block
        );

        let mut accesses: Vec<(&DeviceBuffer<R>, HazardMode)> = Vec::with_capacity(3 * batch);
        accesses.extend(a.items.iter().map(|r| (r.buffer, HazardMode::Read)));
        accesses.extend(x.items.iter().map(|r| (r.buffer, HazardMode::Read)));
        accesses.extend(y.items.iter().map(|r| (r.buffer, HazardMode::All)));

        let gate = self.enter_blas()?;
        let blas = gate.blas()?;
        fenced(&gate, &accesses, || {
            let scratch = ScratchPointers::stage(
                gate.queue(),
                &addrs(a.items),
                &addrs(x.items),
                &addrs(y.items),
            )?;
            let call = SmallGemvCall {
                trans: p.trans,
                rows: int(p.m),
                cols: int(p.n),
                arrays: scratch.arrays(),
                lda: int(a.ld),
                incx: int(x.inc),
                incy: int(y.inc),
                batch: int(batch),
            };
            unsafe { blas.gemv_batched_small(dtype, &call, &launch) }
        })
    }

    /// `A_p += alpha * x_p * y_p^T` for every batch item, through the
    /// small-batch kernel.
    pub fn ger_batched(
        &self,
        dtype: DType,
        shape: &GerShape,
        alpha: f64,
        x: VectorBatch<'_, R>,
        y: VectorBatch<'_, R>,
        a: MatrixBatch<'_, R>,
    ) -> Result<()> {
        require_sd(dtype, "ger_batched")?;
        check_level2_dims(shape.m, shape.n, a.ld, x.inc, y.inc)?;
        let batch = check_batch_lengths(
            "ger_batched",
            &[x.items.len(), y.items.len(), a.items.len()],
        )?;

        let p = normalize(
            shape.order,
            GerProblem {
                m: shape.m,
                n: shape.n,
                x,
                y,
            },
        );
        let x_elems = vector_elements("x", p.m, p.x.inc)?;
        let y_elems = vector_elements("y", p.n, p.y.inc)?;
        let a_elems = matrix_elements("A", p.m, p.n, a.ld)?;
        for i in 0..batch {
            check_operand(self, "x", &p.x.items[i], dtype, x_elems)?;
            check_operand(self, "y", &p.y.items[i], dtype, y_elems)?;
            check_operand(self, "A", &a.items[i], dtype, a_elems)?;
        }
        if batch == 0 || p.m == 0 || p.n == 0 {
            return Ok(());
        }

        let launch = ger_launch(p.m, p.n, p.x.inc == 1, batch, self.grid_cap())?;
        log::debug!(
            "ger_batched {dtype}: {} x {} x {batch}, grid {:?} block {:?}",
            p.m,
            p.n,
            launch.grid,
            launch.block
        );

        let mut accesses: Vec<(&DeviceBuffer<R>, HazardMode)> = Vec::with_capacity(3 * batch);
        accesses.extend(p.x.items.iter().map(|r| (r.buffer, HazardMode::Read)));
        accesses.extend(p.y.items.iter().map(|r| (r.buffer, HazardMode::Read)));
        accesses.extend(a.items.iter().map(|r| (r.buffer, HazardMode::All)));

        let gate = self.enter_blas()?;
        let blas = gate.blas()?;
        fenced(&gate, &accesses, || {
            let scratch = ScratchPointers::stage(
                gate.queue(),
                &addrs(p.x.items),
                &addrs(p.y.items),
                &addrs(a.items),
            )?;
            let call = SmallGerCall {
                rows: int(p.m),
                cols: int(p.n),
                alpha,
                arrays: scratch.arrays(),
                incx: int(p.x.inc),
                incy: int(p.y.inc),
                lda: int(a.ld),
                batch: int(batch),
            };
            unsafe { blas.ger_batched_small(dtype, &call, &launch) }
        })
    }
}
