//! Vector-vector operations

use super::Vector;
use crate::dtype::DType;
use crate::error::Result;
use crate::runtime::traits::DotCall;
use crate::runtime::{BlasBackend, BufferRef, Context, HazardMode, Runtime, fenced};
use crate::validate::{check_dims, check_operand, int, require_sd, vector_elements};

impl<R: Runtime> Context<R> {
    /// `z = x . y` over `n` elements, written to device memory at `z`.
    ///
    /// The result stays on the device; read it back through the buffer.
    pub fn dot(
        &self,
        dtype: DType,
        n: usize,
        x: Vector<'_, R>,
        y: Vector<'_, R>,
        z: BufferRef<'_, R>,
    ) -> Result<()> {
        require_sd(dtype, "dot")?;
        check_dims(&[("N", n), ("incX", x.inc), ("incY", y.inc)])?;
        check_operand(self, "x", &x.data, dtype, vector_elements("x", n, x.inc)?)?;
        check_operand(self, "y", &y.data, dtype, vector_elements("y", n, y.inc)?)?;
        check_operand(self, "z", &z, dtype, 1)?;

        let call = DotCall {
            n: int(n),
            x: x.data.addr(),
            incx: int(x.inc),
            y: y.data.addr(),
            incy: int(y.inc),
            result: z.addr(),
        };

        let gate = self.enter_blas()?;
        let blas = gate.blas()?;
        fenced(
            &gate,
            &[
                (x.data.buffer, HazardMode::Read),
                (y.data.buffer, HazardMode::Read),
                (z.buffer, HazardMode::Write),
            ],
            || unsafe { blas.dot(dtype, &call) },
        )
    }
}
