//! Element trait for mapping Rust types to DType

use super::DType;
use bytemuck::Pod;
use half::f16;

/// Trait for host types that mirror a `DType`
///
/// Used by the emulated queue to interpret device bytes, and by buffer
/// helpers to move typed slices in and out of device memory.
///
/// # Bounds
/// - `Pod` - byte reinterpretation through bytemuck
/// - `PartialOrd` - max/min reductions
pub trait Element: Copy + Send + Sync + Pod + PartialOrd + 'static {
    /// The corresponding DType for this Rust type
    const DTYPE: DType;

    /// Convert to f64 for generic numeric work
    fn to_f64(self) -> f64;

    /// Convert from f64 to this type
    fn from_f64(v: f64) -> Self;

    /// Sum of two elements (wrapping for integers)
    fn add(self, other: Self) -> Self;

    /// Product of two elements (wrapping for integers)
    fn mul(self, other: Self) -> Self;
}

macro_rules! impl_element_int {
    ($($t:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const DTYPE: DType = DType::$dtype;

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }

                #[inline]
                fn from_f64(v: f64) -> Self {
                    v as $t
                }

                #[inline]
                fn add(self, other: Self) -> Self {
                    self.wrapping_add(other)
                }

                #[inline]
                fn mul(self, other: Self) -> Self {
                    self.wrapping_mul(other)
                }
            }
        )*
    };
}

impl_element_int!(i8 => I8, u8 => U8, i32 => I32, u32 => U32, i64 => I64, u64 => U64);

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    #[inline]
    fn add(self, other: Self) -> Self {
        self + other
    }

    #[inline]
    fn mul(self, other: Self) -> Self {
        self * other
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    #[inline]
    fn add(self, other: Self) -> Self {
        self + other
    }

    #[inline]
    fn mul(self, other: Self) -> Self {
        self * other
    }
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f64()
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        f16::from_f64(v)
    }

    // Half arithmetic goes through f32, like the device path.
    #[inline]
    fn add(self, other: Self) -> Self {
        f16::from_f32(self.to_f32() + other.to_f32())
    }

    #[inline]
    fn mul(self, other: Self) -> Self {
        f16::from_f32(self.to_f32() * other.to_f32())
    }
}
