//! Per-buffer read/write hazard tracking
//!
//! Each buffer keeps at most two fences: one recorded after the last
//! operation that read it, one recorded after the last operation that wrote
//! it. A reader waits on the write fence; a writer waits on both. Waiting
//! inserts a queue-level dependency and never blocks the host thread.

use super::buffer::DeviceBuffer;
use super::gate::Gate;
use super::{ExecutionQueue, Runtime};
use crate::error::Result;

/// How an operation accesses a buffer
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HazardMode {
    /// Read only: ordered after the last writer
    Read,
    /// Write only: ordered after the last readers and writer
    Write,
    /// Read and write: ordered after the last readers and writer
    All,
}

impl HazardMode {
    /// Does this access read the buffer?
    #[inline]
    pub const fn reads(self) -> bool {
        matches!(self, Self::Read | Self::All)
    }

    /// Does this access write the buffer?
    #[inline]
    pub const fn writes(self) -> bool {
        matches!(self, Self::Write | Self::All)
    }
}

/// Which fences a buffer currently carries
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HazardState {
    /// A read has been recorded on this buffer
    pub reader: bool,
    /// A write has been recorded on this buffer
    pub writer: bool,
}

pub(crate) struct Hazards<E> {
    read: Option<E>,
    write: Option<E>,
}

impl<E> Default for Hazards<E> {
    fn default() -> Self {
        Self {
            read: None,
            write: None,
        }
    }
}

impl<E> Hazards<E> {
    pub(crate) fn state(&self) -> HazardState {
        HazardState {
            reader: self.read.is_some(),
            writer: self.write.is_some(),
        }
    }

    pub(crate) fn wait<Q: ExecutionQueue<Event = E>>(&self, queue: &Q, mode: HazardMode) -> Result<()> {
        if mode.writes() {
            if let Some(event) = &self.read {
                queue.wait_event(event)?;
            }
        }
        if let Some(event) = &self.write {
            queue.wait_event(event)?;
        }
        Ok(())
    }

    pub(crate) fn record<Q: ExecutionQueue<Event = E>>(
        &mut self,
        queue: &Q,
        mode: HazardMode,
    ) -> Result<()> {
        if mode.reads() {
            record_into(&mut self.read, queue)?;
        }
        if mode.writes() {
            record_into(&mut self.write, queue)?;
        }
        Ok(())
    }
}

fn record_into<Q: ExecutionQueue>(slot: &mut Option<Q::Event>, queue: &Q) -> Result<()> {
    if slot.is_none() {
        *slot = Some(queue.create_event()?);
    }
    if let Some(event) = slot {
        queue.record_event(event)?;
    }
    Ok(())
}

/// Run `issue` between the waits and the records of `accesses`.
///
/// Waits are inserted in order before `issue`; records are inserted only if
/// `issue` succeeded. Errors propagate with the gate still held by the caller,
/// so the critical section is exited on every path.
pub(crate) fn fenced<R, T, F>(
    gate: &Gate<'_, R>,
    accesses: &[(&DeviceBuffer<R>, HazardMode)],
    issue: F,
) -> Result<T>
where
    R: Runtime,
    F: FnOnce() -> Result<T>,
{
    for (buffer, mode) in accesses {
        buffer.wait(gate, *mode)?;
    }
    let value = issue()?;
    for (buffer, mode) in accesses {
        buffer.record(gate, *mode)?;
    }
    Ok(value)
}
