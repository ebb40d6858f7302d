//! Hazard-tracked BLAS dispatch
//!
//! Entry points are methods on [`Context`](crate::runtime::Context):
//!
//! | Operation | Method | Strategy |
//! |-----------|--------|----------|
//! | dot | `dot` | one vendor call |
//! | gemv / ger / gemm | `gemv`, `ger`, `gemm` | one vendor call |
//! | batched gemm | `gemm_batched` | per-item loop or one pointer-array call |
//! | strided-batched gemm | `gemm_strided_batched` | one strided call, else pointer-array path |
//! | batched gemv / ger | `gemv_batched`, `ger_batched` | custom small-batch kernel |
//!
//! Every call follows the same sequence: validate (no device state touched),
//! enter the context's critical section, wait on every operand, issue, record
//! every operand, exit. Offsets are in bytes and must be element-aligned.
//! Row-major requests are rewritten to column-major before dispatch.

mod launch;
mod level1;
mod level2;
mod level3;
mod normalize;

pub use launch::{gemv_launch, ger_launch};

use crate::error::{Error, Result};
use crate::runtime::{BufferRef, Runtime};

/// Matrix storage order
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Order {
    /// C order: consecutive elements of a row are adjacent
    RowMajor,
    /// Fortran order: consecutive elements of a column are adjacent
    ColMajor,
}

impl TryFrom<i32> for Order {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            101 => Ok(Self::RowMajor),
            102 => Ok(Self::ColMajor),
            other => Err(Error::invalid_arg(
                "order",
                format!("unrecognized order code {other}"),
            )),
        }
    }
}

/// Transpose flag of a matrix operand
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Transpose {
    /// op(A) = A
    NoTrans,
    /// op(A) = A^T
    Trans,
    /// op(A) = A^H (same as `Trans` for real types)
    ConjTrans,
}

impl Transpose {
    /// Does this flag transpose the operand?
    #[inline]
    pub const fn is_transposed(self) -> bool {
        !matches!(self, Self::NoTrans)
    }

    /// `NoTrans` becomes `Trans`, anything else becomes `NoTrans`.
    #[inline]
    pub const fn toggled(self) -> Self {
        match self {
            Self::NoTrans => Self::Trans,
            Self::Trans | Self::ConjTrans => Self::NoTrans,
        }
    }
}

impl TryFrom<i32> for Transpose {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            111 => Ok(Self::NoTrans),
            112 => Ok(Self::Trans),
            113 => Ok(Self::ConjTrans),
            other => Err(Error::invalid_arg(
                "trans",
                format!("unrecognized transpose code {other}"),
            )),
        }
    }
}

// ============================================================================
// Shapes
// ============================================================================

/// Logical shape of `C (m x n) = op(A) (m x k) * op(B) (k x n)`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GemmShape {
    /// Storage order of A, B and C
    pub order: Order,
    /// Transpose flag of A
    pub trans_a: Transpose,
    /// Transpose flag of B
    pub trans_b: Transpose,
    /// Rows of C
    pub m: usize,
    /// Columns of C
    pub n: usize,
    /// Inner dimension
    pub k: usize,
}

impl GemmShape {
    /// Untransposed product of the given order
    pub fn new(order: Order, m: usize, n: usize, k: usize) -> Self {
        Self {
            order,
            trans_a: Transpose::NoTrans,
            trans_b: Transpose::NoTrans,
            m,
            n,
            k,
        }
    }

    /// Same shape with transpose flags
    pub fn transposed(mut self, trans_a: Transpose, trans_b: Transpose) -> Self {
        self.trans_a = trans_a;
        self.trans_b = trans_b;
        self
    }
}

/// Logical shape of `y = op(A) * x` with A stored `m x n`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GemvShape {
    /// Storage order of A
    pub order: Order,
    /// Transpose flag of A
    pub trans: Transpose,
    /// Rows of A
    pub m: usize,
    /// Columns of A
    pub n: usize,
}

/// Logical shape of `A += alpha * x * y^T` with A stored `m x n`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GerShape {
    /// Storage order of A
    pub order: Order,
    /// Rows of A (length of x)
    pub m: usize,
    /// Columns of A (length of y)
    pub n: usize,
}

// ============================================================================
// Operands
// ============================================================================

/// A matrix operand: first element plus leading dimension (in elements)
pub struct Matrix<'a, R: Runtime> {
    /// Buffer and byte offset of the first element
    pub data: BufferRef<'a, R>,
    /// Leading dimension
    pub ld: usize,
}

/// A vector operand: first element plus increment (in elements)
pub struct Vector<'a, R: Runtime> {
    /// Buffer and byte offset of the first element
    pub data: BufferRef<'a, R>,
    /// Increment between consecutive elements, at least 1
    pub inc: usize,
}

/// A strided batch of matrices inside one buffer
pub struct StridedMatrix<'a, R: Runtime> {
    /// Buffer and byte offset of item 0
    pub data: BufferRef<'a, R>,
    /// Leading dimension
    pub ld: usize,
    /// Elements between the first elements of consecutive items
    pub stride: usize,
}

/// A batch of matrices sharing one leading dimension
pub struct MatrixBatch<'a, R: Runtime> {
    /// One operand per batch item
    pub items: &'a [BufferRef<'a, R>],
    /// Leading dimension shared by all items
    pub ld: usize,
}

/// A batch of vectors sharing one increment
pub struct VectorBatch<'a, R: Runtime> {
    /// One operand per batch item
    pub items: &'a [BufferRef<'a, R>],
    /// Increment shared by all items
    pub inc: usize,
}

macro_rules! impl_copy_operand {
    ($($ty:ident),*) => {
        $(
            impl<R: Runtime> Clone for $ty<'_, R> {
                fn clone(&self) -> Self {
                    *self
                }
            }

            impl<R: Runtime> Copy for $ty<'_, R> {}
        )*
    };
}

impl_copy_operand!(Matrix, Vector, StridedMatrix, MatrixBatch, VectorBatch);

impl<'a, R: Runtime> Matrix<'a, R> {
    /// Matrix at `data` with leading dimension `ld`
    pub fn new(data: BufferRef<'a, R>, ld: usize) -> Self {
        Self { data, ld }
    }
}

impl<'a, R: Runtime> Vector<'a, R> {
    /// Vector at `data` with increment `inc`
    pub fn new(data: BufferRef<'a, R>, inc: usize) -> Self {
        Self { data, inc }
    }
}

impl<'a, R: Runtime> StridedMatrix<'a, R> {
    /// Strided batch at `data`
    pub fn new(data: BufferRef<'a, R>, ld: usize, stride: usize) -> Self {
        Self { data, ld, stride }
    }
}

impl<'a, R: Runtime> MatrixBatch<'a, R> {
    /// Batch over `items`
    pub fn new(items: &'a [BufferRef<'a, R>], ld: usize) -> Self {
        Self { items, ld }
    }
}

impl<'a, R: Runtime> VectorBatch<'a, R> {
    /// Batch over `items`
    pub fn new(items: &'a [BufferRef<'a, R>], inc: usize) -> Self {
        Self { items, inc }
    }
}
