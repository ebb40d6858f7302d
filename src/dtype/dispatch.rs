//! Macros for monomorphizing over a runtime `DType`

/// Run `$body` with `$T` bound to the host type of `$dtype`.
///
/// # Example
///
/// ```ignore
/// dispatch_dtype!(dtype, T => {
///     let values: Vec<T> = bytemuck::pod_collect_to_vec(bytes);
///     ...
/// })
/// ```
macro_rules! dispatch_dtype {
    ($dtype:expr, $T:ident => $body:block) => {
        match $dtype {
            $crate::dtype::DType::F64 => {
                type $T = f64;
                $body
            }
            $crate::dtype::DType::F32 => {
                type $T = f32;
                $body
            }
            $crate::dtype::DType::F16 => {
                type $T = half::f16;
                $body
            }
            $crate::dtype::DType::I64 => {
                type $T = i64;
                $body
            }
            $crate::dtype::DType::I32 => {
                type $T = i32;
                $body
            }
            $crate::dtype::DType::I8 => {
                type $T = i8;
                $body
            }
            $crate::dtype::DType::U64 => {
                type $T = u64;
                $body
            }
            $crate::dtype::DType::U32 => {
                type $T = u32;
                $body
            }
            $crate::dtype::DType::U8 => {
                type $T = u8;
                $body
            }
        }
    };
}

/// Like `dispatch_dtype!`, restricted to floating types. Any other dtype
/// returns `UnsupportedDType` for `$error_op`.
macro_rules! dispatch_float {
    ($dtype:expr, $T:ident => $body:block, $error_op:expr) => {
        match $dtype {
            $crate::dtype::DType::F64 => {
                type $T = f64;
                $body
            }
            $crate::dtype::DType::F32 => {
                type $T = f32;
                $body
            }
            $crate::dtype::DType::F16 => {
                type $T = half::f16;
                $body
            }
            other => Err($crate::error::Error::unsupported_dtype(other, $error_op)),
        }
    };
}

pub(crate) use {dispatch_dtype, dispatch_float};
