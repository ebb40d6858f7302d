//! Core trait for device backends

use super::{BlasBackend, CollectiveBackend, Device, ExecutionQueue};
use crate::error::Result;

/// Core trait for device backends
///
/// `Runtime` ties together everything a context needs from a backend. The
/// dispatch layer is generic over it, so the same validation, hazard tracking
/// and dispatch policy drive every backend.
///
/// # Associated Types
///
/// - `Device`: identifies a specific accelerator
/// - `Queue`: the single ordered execution queue a context owns
/// - `Blas`: numeric-library handle plus the small-batch kernels
/// - `Comm`: one participant of a collective world
pub trait Runtime: Sized + Send + Sync + 'static {
    /// Device identifier type
    type Device: Device;

    /// Ordered execution queue
    type Queue: ExecutionQueue;

    /// Numeric-library handle, created lazily per context
    type Blas: BlasBackend<Self>;

    /// Collective communicator
    type Comm: CollectiveBackend<Self>;

    /// Human-readable name of this runtime
    fn name() -> &'static str;

    /// Open the execution queue a new context will own.
    fn open_queue(device: &Self::Device) -> Result<Self::Queue>;
}
