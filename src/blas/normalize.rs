//! Row-major to column-major rewriting
//!
//! The vendor interface is column-major. A row-major matrix read in
//! column-major order is its transpose, so a row-major request is the
//! column-major request for the transposed problem:
//!
//! - gemm: `C^T = op(B)^T * op(A)^T` swaps A and B (with their leading
//!   dimensions and transpose flags) and swaps m and n.
//! - gemv: A^T is stored `n x m`, so m and n swap and the flag toggles.
//! - ger: `A^T += alpha * y * x^T` swaps m and n and swaps x and y.
//!
//! Operand payloads are generic so single, batched and strided requests share
//! the same rewrite.

use super::{Order, Transpose};

/// A problem that can be restated in column-major coordinates
pub(crate) trait ColumnMajor: Sized {
    /// The same problem, with row-major storage reinterpreted as column-major.
    fn transpose_layout(self) -> Self;
}

/// Rewrite `problem` into column-major coordinates.
pub(crate) fn normalize<P: ColumnMajor>(order: Order, problem: P) -> P {
    match order {
        Order::ColMajor => problem,
        Order::RowMajor => problem.transpose_layout(),
    }
}

/// A matrix operand with its leading dimension and transpose flag
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MatOperand<T> {
    pub(crate) data: T,
    pub(crate) ld: usize,
    pub(crate) trans: Transpose,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct GemmProblem<T> {
    pub(crate) m: usize,
    pub(crate) n: usize,
    pub(crate) k: usize,
    pub(crate) a: MatOperand<T>,
    pub(crate) b: MatOperand<T>,
}

impl<T> GemmProblem<T> {
    /// (rows, cols) of A as stored
    pub(crate) fn a_stored(&self) -> (usize, usize) {
        if self.a.trans.is_transposed() {
            (self.k, self.m)
        } else {
            (self.m, self.k)
        }
    }

    /// (rows, cols) of B as stored
    pub(crate) fn b_stored(&self) -> (usize, usize) {
        if self.b.trans.is_transposed() {
            (self.n, self.k)
        } else {
            (self.k, self.n)
        }
    }
}

impl<T> ColumnMajor for GemmProblem<T> {
    fn transpose_layout(self) -> Self {
        Self {
            m: self.n,
            n: self.m,
            k: self.k,
            a: self.b,
            b: self.a,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct GemvProblem {
    pub(crate) trans: Transpose,
    pub(crate) m: usize,
    pub(crate) n: usize,
}

impl GemvProblem {
    /// (x length, y length)
    pub(crate) fn vector_lengths(&self) -> (usize, usize) {
        if self.trans.is_transposed() {
            (self.m, self.n)
        } else {
            (self.n, self.m)
        }
    }
}

impl ColumnMajor for GemvProblem {
    fn transpose_layout(self) -> Self {
        Self {
            trans: self.trans.toggled(),
            m: self.n,
            n: self.m,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct GerProblem<V> {
    pub(crate) m: usize,
    pub(crate) n: usize,
    pub(crate) x: V,
    pub(crate) y: V,
}

impl<V> ColumnMajor for GerProblem<V> {
    fn transpose_layout(self) -> Self {
        Self {
            m: self.n,
            n: self.m,
            x: self.y,
            y: self.x,
        }
    }
}
