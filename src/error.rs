//! Error types for devq
//!
//! Every failure maps to one [`ErrorKind`], and every kind has a stable
//! non-zero integer code so callers that need a status-code surface can use
//! [`status`].

use crate::dtype::DType;
use thiserror::Error;

/// Result type alias using devq's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Diagnostic stored on a context after a successful collective.
pub const NO_ERROR: &str = "no error";

/// Errors that can occur while validating or dispatching an operation
#[derive(Error, Debug)]
pub enum Error {
    /// A dimension, increment or product does not fit the backend's 32-bit integer width
    #[error("Passed-in sizes would overflow the backend interface: {what} = {value}")]
    Overflow {
        /// The quantity that overflowed (e.g. "M*N")
        what: &'static str,
        /// Its value
        value: u128,
    },

    /// The operation exists but the loaded backend or hardware does not provide it
    #[error("{operation} is not available: {reason}")]
    CapabilityUnavailable {
        /// The operation being attempted
        operation: &'static str,
        /// Why it is unavailable
        reason: String,
    },

    /// The requested footprint does not fit in a buffer
    #[error(
        "Out of bounds on '{operand}': {required} bytes required past offset {offset}, buffer holds {size}"
    )]
    OutOfBounds {
        /// The operand name
        operand: &'static str,
        /// Byte offset into the buffer
        offset: usize,
        /// Bytes required starting at `offset`
        required: usize,
        /// Total size of the buffer in bytes
        size: usize,
    },

    /// A buffer or communicator belongs to a different context than the operation
    #[error("Operand '{operand}' does not belong to the context of this operation")]
    ContextMismatch {
        /// The operand name
        operand: &'static str,
    },

    /// The parameters are valid but not supported by the chosen code path
    #[error("Unsupported parameters for '{operation}': {reason}")]
    UnsupportedParameters {
        /// The operation being attempted
        operation: &'static str,
        /// Description of the unsupported combination
        reason: String,
    },

    /// Unsupported dtype for an operation
    #[error("Unsupported dtype {dtype:?} for operation '{op}'")]
    UnsupportedDType {
        /// The unsupported dtype
        dtype: DType,
        /// The operation name
        op: &'static str,
    },

    /// Invalid argument provided to an operation
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Out of memory
    #[error("Out of memory: failed to allocate {size} bytes")]
    OutOfMemory {
        /// Requested size in bytes
        size: usize,
    },

    /// A fence (queue event) could not be created, recorded or waited on
    #[error("Hazard fence failed: {0}")]
    Fence(String),

    /// The native numeric call or kernel launch failed
    #[error("{call} failed: {message}")]
    Backend {
        /// The backend entry point
        call: &'static str,
        /// The backend's own message
        message: String,
    },

    /// The native call rejected the device architecture
    #[error("{call} is not supported on this device: {message}")]
    DeviceUnsupported {
        /// The backend entry point
        call: &'static str,
        /// The backend's own message
        message: String,
    },

    /// A collective call failed
    #[error("Communication error: {0}")]
    Communication(String),

    /// CUDA driver error
    #[cfg(feature = "cuda")]
    #[error("CUDA error: {0}")]
    Cuda(#[from] cudarc::driver::DriverError),
}

/// Error classification shared by all entry points
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A dimension or product would not fit the backend's integer width
    Overflow,
    /// The operation is not available in the loaded backend or on the hardware
    CapabilityUnavailable,
    /// Offset plus footprint exceeds a buffer, or a cross-context mismatch
    OutOfBounds,
    /// An element type the operation has no form for, or non-unit scale
    /// factors on the small-batch kernel path
    UnsupportedParameters,
    /// Scratch or buffer allocation failed
    ResourceExhaustion,
    /// The native call failed
    BackendExecution,
    /// Architecture mismatch reported by the native call
    DeviceUnsupported,
    /// A collective failed; see `Context::comm_error`
    Communication,
    /// Unrecognized enumeration code or malformed argument
    InvalidValue,
}

impl ErrorKind {
    /// Integer status code for this kind. Zero is reserved for success.
    pub const fn code(self) -> i32 {
        match self {
            ErrorKind::Overflow => 1,
            ErrorKind::CapabilityUnavailable => 2,
            ErrorKind::OutOfBounds => 3,
            ErrorKind::UnsupportedParameters => 4,
            ErrorKind::ResourceExhaustion => 5,
            ErrorKind::BackendExecution => 6,
            ErrorKind::DeviceUnsupported => 7,
            ErrorKind::Communication => 8,
            ErrorKind::InvalidValue => 9,
        }
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Overflow { .. } => ErrorKind::Overflow,
            Error::CapabilityUnavailable { .. } => ErrorKind::CapabilityUnavailable,
            Error::OutOfBounds { .. } | Error::ContextMismatch { .. } => ErrorKind::OutOfBounds,
            Error::UnsupportedParameters { .. } | Error::UnsupportedDType { .. } => {
                ErrorKind::UnsupportedParameters
            }
            Error::InvalidArgument { .. } => ErrorKind::InvalidValue,
            Error::OutOfMemory { .. } => ErrorKind::ResourceExhaustion,
            Error::Fence(_) | Error::Backend { .. } => ErrorKind::BackendExecution,
            Error::DeviceUnsupported { .. } => ErrorKind::DeviceUnsupported,
            Error::Communication(_) => ErrorKind::Communication,
            #[cfg(feature = "cuda")]
            Error::Cuda(_) => ErrorKind::BackendExecution,
        }
    }

    /// Create an overflow error
    pub fn overflow(what: &'static str, value: u128) -> Self {
        Self::Overflow { what, value }
    }

    /// Create a capability-unavailable error
    pub fn capability(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::CapabilityUnavailable {
            operation,
            reason: reason.into(),
        }
    }

    /// Create an unsupported-parameters error
    pub fn unsupported(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::UnsupportedParameters {
            operation,
            reason: reason.into(),
        }
    }

    /// Create an unsupported dtype error
    pub fn unsupported_dtype(dtype: DType, op: &'static str) -> Self {
        Self::UnsupportedDType { dtype, op }
    }

    /// Create an invalid argument error
    pub fn invalid_arg(arg: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            arg,
            reason: reason.into(),
        }
    }

    /// Create a backend execution error
    pub fn backend(call: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            call,
            message: message.into(),
        }
    }
}

/// Integer status of a result: 0 on success, the kind's code otherwise.
pub fn status<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.kind().code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_and_nonzero() {
        let kinds = [
            ErrorKind::Overflow,
            ErrorKind::CapabilityUnavailable,
            ErrorKind::OutOfBounds,
            ErrorKind::UnsupportedParameters,
            ErrorKind::ResourceExhaustion,
            ErrorKind::BackendExecution,
            ErrorKind::DeviceUnsupported,
            ErrorKind::Communication,
            ErrorKind::InvalidValue,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.code()).collect();
        assert!(codes.iter().all(|&c| c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_status() {
        let ok: Result<()> = Ok(());
        assert_eq!(status(&ok), 0);

        let err: Result<()> = Err(Error::ContextMismatch { operand: "x" });
        assert_eq!(status(&err), ErrorKind::OutOfBounds.code());

        let err: Result<()> = Err(Error::unsupported_dtype(DType::I32, "gemm"));
        assert_eq!(status(&err), ErrorKind::UnsupportedParameters.code());
        assert_eq!(status(&err), 4);
    }

    #[test]
    fn test_device_unsupported_is_distinct_from_backend() {
        let arch = Error::DeviceUnsupported {
            call: "cublasSgemm_v2",
            message: "CUBLAS_STATUS_ARCH_MISMATCH".into(),
        };
        assert_eq!(arch.kind(), ErrorKind::DeviceUnsupported);
        assert_eq!(
            Error::backend("cublasSgemm_v2", "boom").kind(),
            ErrorKind::BackendExecution
        );
    }
}
