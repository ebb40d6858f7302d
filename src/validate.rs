//! Shape, overflow and footprint checks run before the critical section
//!
//! Shared by the linear-algebra and collective entry points. Nothing here
//! touches device state.

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::{BufferRef, Context, Runtime};

/// Values handed to the vendor interface must stay below this bound.
pub(crate) const INT_LIMIT: u128 = i32::MAX as u128;

/// Reject any value at or above the 32-bit limit.
pub(crate) fn check_dims(dims: &[(&'static str, usize)]) -> Result<()> {
    for &(what, value) in dims {
        if value as u128 >= INT_LIMIT {
            return Err(Error::overflow(what, value as u128));
        }
    }
    Ok(())
}

/// Reject any pairwise product at or above the 32-bit limit.
pub(crate) fn check_products(products: &[(&'static str, usize, usize)]) -> Result<()> {
    for &(what, lhs, rhs) in products {
        let value = lhs as u128 * rhs as u128;
        if value >= INT_LIMIT {
            return Err(Error::overflow(what, value));
        }
    }
    Ok(())
}

/// Narrow a value that passed `check_dims`.
#[inline]
pub(crate) fn int(value: usize) -> i32 {
    debug_assert!((value as u128) < INT_LIMIT);
    value as i32
}

/// Element count of a column-major `rows x cols` matrix with leading dimension `ld`.
pub(crate) fn matrix_elements(
    operand: &'static str,
    rows: usize,
    cols: usize,
    ld: usize,
) -> Result<usize> {
    if ld < rows.max(1) {
        return Err(Error::invalid_arg(
            operand,
            format!("leading dimension {ld} is smaller than {} rows", rows.max(1)),
        ));
    }
    if rows == 0 || cols == 0 {
        return Ok(0);
    }
    (cols - 1)
        .checked_mul(ld)
        .and_then(|v| v.checked_add(rows))
        .ok_or_else(|| Error::overflow(operand, ld as u128 * cols as u128))
}

/// Element count spanned by `n` elements with increment `inc`.
pub(crate) fn vector_elements(operand: &'static str, n: usize, inc: usize) -> Result<usize> {
    if inc == 0 {
        return Err(Error::invalid_arg(operand, "increment must be at least 1"));
    }
    if n == 0 {
        return Ok(0);
    }
    (n - 1)
        .checked_mul(inc)
        .and_then(|v| v.checked_add(1))
        .ok_or_else(|| Error::overflow(operand, n as u128 * inc as u128))
}

/// Check that `data` lives on `context`, is element-aligned and holds
/// `elements` elements of `dtype` past its offset.
pub(crate) fn check_operand<R: Runtime>(
    context: &Context<R>,
    operand: &'static str,
    data: &BufferRef<'_, R>,
    dtype: DType,
    elements: usize,
) -> Result<()> {
    if !data.buffer.belongs_to(context) {
        return Err(Error::ContextMismatch { operand });
    }
    if data.offset % dtype.size_in_bytes() != 0 {
        return Err(Error::invalid_arg(
            operand,
            format!(
                "offset {} is not a multiple of the {} element width",
                data.offset, dtype
            ),
        ));
    }
    let required = dtype.bytes_for(elements)?;
    check_fits(operand, data, required)
}

/// Check that `required` bytes fit in `data`'s buffer past its offset.
pub(crate) fn check_fits<R: Runtime>(
    operand: &'static str,
    data: &BufferRef<'_, R>,
    required: usize,
) -> Result<()> {
    let size = data.buffer.size();
    if data.offset > size || required > size - data.offset {
        return Err(Error::OutOfBounds {
            operand,
            offset: data.offset,
            required,
            size,
        });
    }
    Ok(())
}

/// Floating types with a vendor entry point for the single-precision and
/// double-precision families.
pub(crate) fn require_sd(dtype: DType, op: &'static str) -> Result<()> {
    match dtype {
        DType::F32 | DType::F64 => Ok(()),
        DType::F16 => Err(Error::capability(
            op,
            "no half-precision entry point for this operation",
        )),
        other => Err(Error::unsupported_dtype(other, op)),
    }
}

/// Batch operand lists must all have the same length.
pub(crate) fn check_batch_lengths(op: &'static str, lengths: &[usize]) -> Result<usize> {
    let batch = lengths.first().copied().unwrap_or(0);
    if lengths.iter().any(|&len| len != batch) {
        return Err(Error::invalid_arg(
            "batch",
            format!("{op}: operand lists have different lengths {lengths:?}"),
        ));
    }
    check_dims(&[("batch", batch)])?;
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_dims_at_limit_overflow() {
        let limit = i32::MAX as usize;
        assert!(check_dims(&[("M", limit - 1)]).is_ok());
        let err = check_dims(&[("M", limit)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overflow);
    }

    #[test]
    fn test_products() {
        // 46341^2 > 2^31 - 1
        assert!(check_products(&[("M*N", 46_340, 46_340)]).is_ok());
        let err = check_products(&[("M*N", 46_341, 46_341)]).unwrap_err();
        assert!(matches!(err, Error::Overflow { what: "M*N", .. }));
    }

    #[test]
    fn test_matrix_elements() {
        assert_eq!(matrix_elements("A", 3, 4, 3).unwrap(), 12);
        assert_eq!(matrix_elements("A", 3, 4, 5).unwrap(), 18);
        assert_eq!(matrix_elements("A", 0, 4, 1).unwrap(), 0);
        assert_eq!(
            matrix_elements("A", 3, 4, 2).unwrap_err().kind(),
            ErrorKind::InvalidValue
        );
    }

    #[test]
    fn test_vector_elements() {
        assert_eq!(vector_elements("x", 4, 1).unwrap(), 4);
        assert_eq!(vector_elements("x", 4, 3).unwrap(), 10);
        assert_eq!(vector_elements("x", 0, 3).unwrap(), 0);
        assert!(vector_elements("x", 4, 0).is_err());
    }

    #[test]
    fn test_batch_lengths() {
        assert_eq!(check_batch_lengths("gemm", &[3, 3, 3]).unwrap(), 3);
        assert!(check_batch_lengths("gemm", &[3, 2, 3]).is_err());
    }

    #[test]
    fn test_require_sd() {
        assert!(require_sd(DType::F32, "dot").is_ok());
        assert_eq!(
            require_sd(DType::F16, "dot").unwrap_err().kind(),
            ErrorKind::CapabilityUnavailable
        );
        assert_eq!(
            require_sd(DType::I8, "dot").unwrap_err().kind(),
            ErrorKind::UnsupportedParameters
        );
    }

    proptest::proptest! {
        #[test]
        fn prop_products_match_wide_arithmetic(m in 0usize..1 << 20, n in 0usize..1 << 20) {
            let fits = (m as u128 * n as u128) < INT_LIMIT;
            proptest::prop_assert_eq!(check_products(&[("M*N", m, n)]).is_ok(), fits);
        }

        #[test]
        fn prop_dims_reject_from_limit(extra in 0usize..1 << 16) {
            let at = i32::MAX as usize + extra;
            proptest::prop_assert!(check_dims(&[("N", at)]).is_err());
            proptest::prop_assert!(check_dims(&[("N", at - extra - 1)]).is_ok());
        }
    }
}
