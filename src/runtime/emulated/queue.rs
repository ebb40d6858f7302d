//! Emulated ordered execution queue
//!
//! Work runs on the calling thread at enqueue time, which is a valid
//! schedule of an in-order queue. Every command is appended to a log so
//! tests can observe exactly what an operation enqueued: allocations, copies,
//! fence records and waits, library calls and kernel launches.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::device::EmulatedDevice;
use super::memory::Memory;
use crate::error::{Error, Result};
use crate::runtime::ExecutionQueue;
use crate::runtime::traits::LaunchGeometry;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// One command as the queue saw it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueCommand {
    /// Device allocation
    Alloc {
        /// Returned address
        ptr: u64,
        /// Size in bytes
        size: usize,
    },
    /// Device release
    Free {
        /// Released address
        ptr: u64,
    },
    /// Host-to-device copy
    CopyIn {
        /// Destination address
        dst: u64,
        /// Bytes copied
        len: usize,
    },
    /// Device-to-host copy
    CopyOut {
        /// Source address
        src: u64,
        /// Bytes copied
        len: usize,
    },
    /// Fence recorded at the tail of the queue
    Record {
        /// Event identity
        event: u64,
    },
    /// Later work waits for the fence
    Wait {
        /// Event identity
        event: u64,
    },
    /// Numeric-library call or custom kernel
    Launch {
        /// Entry point name
        name: &'static str,
        /// Grid and block of custom kernels
        geometry: Option<LaunchGeometry>,
    },
    /// Native collective
    Collective {
        /// Collective name
        name: &'static str,
    },
}

/// A one-shot failure armed on a queue
///
/// The next command of the matching kind fails, then the fault is gone.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Next allocation runs out of memory
    Allocation,
    /// Next fence creation fails
    EventCreate,
    /// Next fence record fails
    EventRecord,
    /// Next library call or kernel launch fails
    Launch,
    /// Next library call reports an architecture mismatch
    ArchMismatch,
    /// Next numeric-library handle creation fails
    BlasSetup,
    /// Next collective fails
    Collective,
}

/// Fence object of the emulated queue
#[derive(Debug)]
pub struct EmulatedEvent {
    id: u64,
}

impl EmulatedEvent {
    /// Identity used in the command log
    pub fn id(&self) -> u64 {
        self.id
    }
}

pub(crate) struct QueueState {
    pub(crate) memory: Memory,
    commands: Vec<QueueCommand>,
    faults: Vec<Fault>,
}

impl QueueState {
    pub(crate) fn log(&mut self, command: QueueCommand) {
        log::trace!("emulated queue: {command:?}");
        self.commands.push(command);
    }

    /// Consume an armed `fault`, if there is one.
    pub(crate) fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|&f| f == fault) {
            Some(i) => {
                self.faults.remove(i);
                true
            }
            None => false,
        }
    }
}

pub(crate) struct QueueInner {
    pub(crate) device: EmulatedDevice,
    state: Mutex<QueueState>,
}

impl QueueInner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock()
    }

    /// Run a library call or kernel on device memory.
    pub(crate) fn launch<F>(
        &self,
        name: &'static str,
        geometry: Option<LaunchGeometry>,
        body: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Memory) -> Result<()>,
    {
        let mut state = self.lock();
        if state.take_fault(Fault::ArchMismatch) {
            return Err(Error::DeviceUnsupported {
                call: name,
                message: "architecture mismatch".into(),
            });
        }
        if state.take_fault(Fault::Launch) {
            return Err(Error::backend(name, "execution failed"));
        }
        if let Some(g) = &geometry {
            let limit = self.device.grid_limit();
            if g.grid.1 > limit || g.grid.2 > limit {
                return Err(Error::backend(
                    name,
                    format!("invalid configuration argument: grid {:?}", g.grid),
                ));
            }
        }
        state.log(QueueCommand::Launch { name, geometry });
        body(&mut state.memory)
    }
}

/// Ordered queue of an emulated context
pub struct EmulatedQueue {
    inner: Arc<QueueInner>,
}

impl EmulatedQueue {
    pub(crate) fn new(device: &EmulatedDevice) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                device: device.clone(),
                state: Mutex::new(QueueState {
                    memory: Memory::default(),
                    commands: Vec::new(),
                    faults: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<QueueInner> {
        &self.inner
    }

    /// Arm a one-shot failure.
    pub fn inject(&self, fault: Fault) {
        self.inner.lock().faults.push(fault);
    }

    /// Every command enqueued so far, in issue order
    pub fn commands(&self) -> Vec<QueueCommand> {
        self.inner.lock().commands.clone()
    }

    /// Number of commands enqueued so far
    pub fn command_count(&self) -> usize {
        self.inner.lock().commands.len()
    }

    /// Remove and return the logged commands. Logging continues afterwards
    /// from an empty log.
    pub fn take_commands(&self) -> Vec<QueueCommand> {
        std::mem::take(&mut self.inner.lock().commands)
    }

    /// Allocations not yet released
    pub fn live_allocations(&self) -> usize {
        self.inner.lock().memory.live_allocations()
    }

    /// Bytes not yet released
    pub fn live_bytes(&self) -> usize {
        self.inner.lock().memory.live_bytes()
    }
}

impl ExecutionQueue for EmulatedQueue {
    type Event = EmulatedEvent;

    fn bind(&self) -> Result<()> {
        Ok(())
    }

    fn allocate(&self, size_bytes: usize) -> Result<u64> {
        if size_bytes == 0 {
            return Ok(0);
        }
        let mut state = self.inner.lock();
        let over_limit = self
            .inner
            .device
            .memory_limit()
            .is_some_and(|limit| state.memory.live_bytes() + size_bytes > limit);
        if over_limit || state.take_fault(Fault::Allocation) {
            return Err(Error::OutOfMemory { size: size_bytes });
        }
        let ptr = state.memory.allocate(size_bytes);
        state.log(QueueCommand::Alloc {
            ptr,
            size: size_bytes,
        });
        Ok(ptr)
    }

    fn deallocate(&self, ptr: u64, _size_bytes: usize) {
        if ptr == 0 {
            return;
        }
        let mut state = self.inner.lock();
        if state.memory.free(ptr).is_none() {
            log::warn!("emulated queue: double free of 0x{ptr:x}");
            return;
        }
        state.log(QueueCommand::Free { ptr });
    }

    fn copy_to_device(&self, src: &[u8], dst: u64) -> Result<()> {
        let mut state = self.inner.lock();
        state.memory.write(dst, src)?;
        state.log(QueueCommand::CopyIn {
            dst,
            len: src.len(),
        });
        Ok(())
    }

    fn copy_from_device(&self, src: u64, dst: &mut [u8]) -> Result<()> {
        let mut state = self.inner.lock();
        dst.copy_from_slice(state.memory.read(src, dst.len())?);
        state.log(QueueCommand::CopyOut {
            src,
            len: dst.len(),
        });
        Ok(())
    }

    fn create_event(&self) -> Result<Self::Event> {
        if self.inner.lock().take_fault(Fault::EventCreate) {
            return Err(Error::Fence("event creation failed".into()));
        }
        Ok(EmulatedEvent {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn record_event(&self, event: &Self::Event) -> Result<()> {
        let mut state = self.inner.lock();
        if state.take_fault(Fault::EventRecord) {
            return Err(Error::Fence(format!("recording event {} failed", event.id)));
        }
        state.log(QueueCommand::Record { event: event.id });
        Ok(())
    }

    fn wait_event(&self, event: &Self::Event) -> Result<()> {
        self.inner.lock().log(QueueCommand::Wait { event: event.id });
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }

    fn max_grid_extent(&self) -> u32 {
        self.inner.device.grid_limit()
    }
}
