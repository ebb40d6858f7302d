//! Element type system
//!
//! `DType` is the closed set of element types an operation may name. Foreign
//! callers that speak integer type codes convert with `DType::try_from(code)`;
//! an unrecognized code is an `InvalidArgument` error, never a fallback.

pub(crate) mod dispatch;
mod element;

pub use element::Element;

use crate::error::{Error, Result};
use std::fmt;

// ============================================================================
// DType Enum
// ============================================================================

/// Element types understood by the dispatch layer
///
/// # Discriminant Values
///
/// Discriminants are stable and grouped by kind:
/// floats 0-9, signed ints 10-19, unsigned ints 20-29.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u8)]
pub enum DType {
    /// 64-bit floating point
    F64 = 0,
    /// 32-bit floating point
    F32 = 1,
    /// 16-bit floating point (IEEE 754)
    F16 = 2,
    /// 64-bit signed integer
    I64 = 10,
    /// 32-bit signed integer
    I32 = 11,
    /// 8-bit signed integer ("byte")
    I8 = 13,
    /// 64-bit unsigned integer
    U64 = 20,
    /// 32-bit unsigned integer
    U32 = 21,
    /// 8-bit unsigned integer
    U8 = 23,
}

impl DType {
    /// Size of one element in bytes
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::F64 | Self::I64 | Self::U64 => 8,
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::F16 => 2,
            Self::I8 | Self::U8 => 1,
        }
    }

    /// Returns true for floating point types
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F64 | Self::F32 | Self::F16)
    }

    /// Short name used in kernel names and log lines
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::F64 => "f64",
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::I64 => "i64",
            Self::I32 => "i32",
            Self::I8 => "i8",
            Self::U64 => "u64",
            Self::U32 => "u32",
            Self::U8 => "u8",
        }
    }

    /// Integer type code (numpy-compatible numbering)
    pub const fn code(self) -> i32 {
        match self {
            Self::I8 => 1,
            Self::U8 => 2,
            Self::I32 => 5,
            Self::U32 => 6,
            Self::I64 => 7,
            Self::U64 => 8,
            Self::F32 => 11,
            Self::F64 => 12,
            Self::F16 => 23,
        }
    }

    /// Byte count of `count` elements, or an overflow error.
    pub fn bytes_for(self, count: usize) -> Result<usize> {
        count
            .checked_mul(self.size_in_bytes())
            .ok_or_else(|| Error::overflow("count*elsize", count as u128 * self.size_in_bytes() as u128))
    }
}

impl TryFrom<i32> for DType {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        Ok(match code {
            1 => Self::I8,
            2 => Self::U8,
            5 => Self::I32,
            6 => Self::U32,
            7 => Self::I64,
            8 => Self::U64,
            11 => Self::F32,
            12 => Self::F64,
            23 => Self::F16,
            other => {
                return Err(Error::invalid_arg(
                    "dtype",
                    format!("unrecognized element type code {other}"),
                ));
            }
        })
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}
