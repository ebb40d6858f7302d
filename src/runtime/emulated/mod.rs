//! Emulated runtime
//!
//! A reference device that runs every enqueued command on the host, in issue
//! order, and keeps a log of what was enqueued. It exercises the dispatch
//! layer without hardware:
//!
//! - [`EmulatedQueue`] logs allocations, copies, fence records and waits,
//!   library calls and kernel launches ([`QueueCommand`]), and can be armed
//!   with one-shot failures ([`Fault`]).
//! - [`EmulatedBlas`] is a column-major reference library with configurable
//!   capabilities.
//! - [`EmulatedComm`] connects contexts of the same process into a world.
//!
//! ```
//! use devq::prelude::*;
//! use devq::runtime::emulated::{EmulatedDevice, EmulatedRuntime};
//!
//! let ctx = Context::<EmulatedRuntime>::open(EmulatedDevice::new(0))?;
//! let x = DeviceBuffer::from_slice(&ctx, &[1.0f32, 2.0, 3.0])?;
//! let y = DeviceBuffer::from_slice(&ctx, &[4.0f32, 5.0, 6.0])?;
//! let z = DeviceBuffer::zeroed(&ctx, 4)?;
//! ctx.dot(DType::F32, 3, Vector::new(x.at(0), 1), Vector::new(y.at(0), 1), z.at(0))?;
//! assert_eq!(z.to_vec::<f32>()?, vec![32.0]);
//! # Ok::<(), devq::Error>(())
//! ```

mod blas;
mod comm;
mod device;
mod memory;
mod queue;

pub use blas::EmulatedBlas;
pub use comm::EmulatedComm;
pub use device::EmulatedDevice;
pub use queue::{EmulatedEvent, EmulatedQueue, Fault, QueueCommand};

use crate::error::Result;
use crate::runtime::Runtime;

/// Emulated runtime
#[derive(Clone, Debug, Default)]
pub struct EmulatedRuntime;

impl Runtime for EmulatedRuntime {
    type Device = EmulatedDevice;
    type Queue = EmulatedQueue;
    type Blas = EmulatedBlas;
    type Comm = EmulatedComm;

    fn name() -> &'static str {
        "emulated"
    }

    fn open_queue(device: &Self::Device) -> Result<Self::Queue> {
        Ok(EmulatedQueue::new(device))
    }
}
