//! Device memory ranges with hazard state
//!
//! A `DeviceBuffer` owns one allocation on its context's queue and carries
//! the fences of the operations that last touched it. Operations never own
//! buffers; they borrow them through [`BufferRef`] (buffer + byte offset).

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use super::context::Context;
use super::gate::Gate;
use super::hazard::{HazardMode, HazardState, Hazards};
use super::{ExecutionQueue, Runtime};
use crate::dtype::Element;
use crate::error::{Error, Result};

type EventOf<R> = <<R as Runtime>::Queue as ExecutionQueue>::Event;

/// A contiguous range of device memory owned by one context
///
/// Dropping a buffer enters its context to release the memory, so a buffer
/// must not be dropped while the same thread holds that context's gate.
pub struct DeviceBuffer<R: Runtime> {
    context: Arc<Context<R>>,
    ptr: u64,
    size: usize,
    hazards: Mutex<Hazards<EventOf<R>>>,
}

impl<R: Runtime> fmt::Debug for DeviceBuffer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("context", &self.context.id())
            .field("ptr", &format_args!("0x{:x}", self.ptr))
            .field("size", &self.size)
            .finish()
    }
}

impl<R: Runtime> DeviceBuffer<R> {
    /// Allocate `size` bytes on `context`. Contents are unspecified.
    pub fn alloc(context: &Arc<Context<R>>, size: usize) -> Result<Self> {
        let ptr = {
            let _gate = context.enter()?;
            context.queue().allocate(size)?
        };
        Ok(Self {
            context: Arc::clone(context),
            ptr,
            size,
            hazards: Mutex::new(Hazards::default()),
        })
    }

    /// Allocate `size` zero bytes on `context`.
    pub fn zeroed(context: &Arc<Context<R>>, size: usize) -> Result<Self> {
        let buffer = Self::alloc(context, size)?;
        buffer.write_bytes(0, &vec![0u8; size])?;
        Ok(buffer)
    }

    /// Allocate a buffer holding `data`.
    pub fn from_slice<T: Element>(context: &Arc<Context<R>>, data: &[T]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = Self::alloc(context, bytes.len())?;
        buffer.write_bytes(0, bytes)?;
        Ok(buffer)
    }

    /// Size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Device address of the first byte
    #[inline]
    pub fn ptr(&self) -> u64 {
        self.ptr
    }

    /// The owning context
    #[inline]
    pub fn context(&self) -> &Arc<Context<R>> {
        &self.context
    }

    /// Does this buffer live on `context`?
    #[inline]
    pub fn belongs_to(&self, context: &Context<R>) -> bool {
        self.context.id() == context.id()
    }

    /// Borrow this buffer at a byte offset.
    #[inline]
    pub fn at(&self, offset: usize) -> BufferRef<'_, R> {
        BufferRef {
            buffer: self,
            offset,
        }
    }

    /// Fences currently carried by this buffer
    pub fn hazard_state(&self) -> HazardState {
        self.hazards.lock().state()
    }

    /// Make the queue wait for earlier operations that conflict with `mode`.
    ///
    /// Must be called inside the critical section, before the operation is
    /// enqueued.
    pub fn wait(&self, gate: &Gate<'_, R>, mode: HazardMode) -> Result<()> {
        self.check_gate(gate)?;
        self.hazards.lock().wait(gate.queue(), mode)
    }

    /// Record this operation's access so later operations can order after it.
    ///
    /// Must be called inside the critical section, right after the operation
    /// was enqueued.
    pub fn record(&self, gate: &Gate<'_, R>, mode: HazardMode) -> Result<()> {
        self.check_gate(gate)?;
        self.hazards.lock().record(gate.queue(), mode)
    }

    /// Copy `data` into the buffer at byte `offset`.
    pub fn write<T: Element>(&self, offset: usize, data: &[T]) -> Result<()> {
        self.write_bytes(offset, bytemuck::cast_slice(data))
    }

    /// Read `count` elements starting at byte `offset`.
    ///
    /// Waits for every earlier write to the buffer to complete.
    pub fn read<T: Element>(&self, offset: usize, count: usize) -> Result<Vec<T>> {
        let len = T::DTYPE.bytes_for(count)?;
        self.check_range("read", offset, len)?;
        let mut out = vec![<T as bytemuck::Zeroable>::zeroed(); count];
        if len == 0 {
            return Ok(out);
        }
        let gate = self.context.enter()?;
        self.wait(&gate, HazardMode::Read)?;
        gate.queue()
            .copy_from_device(self.ptr + offset as u64, bytemuck::cast_slice_mut(&mut out))?;
        self.record(&gate, HazardMode::Read)?;
        Ok(out)
    }

    /// Read the whole buffer as elements of `T`.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.read(0, self.size / std::mem::size_of::<T>())
    }

    fn write_bytes(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_range("write", offset, bytes.len())?;
        if bytes.is_empty() {
            return Ok(());
        }
        let gate = self.context.enter()?;
        self.wait(&gate, HazardMode::Write)?;
        gate.queue().copy_to_device(bytes, self.ptr + offset as u64)?;
        self.record(&gate, HazardMode::Write)
    }

    fn check_range(&self, operand: &'static str, offset: usize, len: usize) -> Result<()> {
        if offset > self.size || len > self.size - offset {
            return Err(Error::OutOfBounds {
                operand,
                offset,
                required: len,
                size: self.size,
            });
        }
        Ok(())
    }

    fn check_gate(&self, gate: &Gate<'_, R>) -> Result<()> {
        if !self.belongs_to(gate.context()) {
            return Err(Error::ContextMismatch { operand: "buffer" });
        }
        Ok(())
    }
}

impl<R: Runtime> Drop for DeviceBuffer<R> {
    fn drop(&mut self) {
        match self.context.enter() {
            Ok(_gate) => self.context.queue().deallocate(self.ptr, self.size),
            Err(e) => log::warn!("leaking device buffer 0x{:x}: {}", self.ptr, e),
        }
    }
}

/// A buffer plus a byte offset: one operand of an operation
pub struct BufferRef<'a, R: Runtime> {
    /// The buffer
    pub buffer: &'a DeviceBuffer<R>,
    /// Byte offset of the operand's first element
    pub offset: usize,
}

impl<R: Runtime> Clone for BufferRef<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: Runtime> Copy for BufferRef<'_, R> {}

impl<R: Runtime> fmt::Debug for BufferRef<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferRef")
            .field("buffer", self.buffer)
            .field("offset", &self.offset)
            .finish()
    }
}

impl<'a, R: Runtime> BufferRef<'a, R> {
    /// Device address of the operand
    #[inline]
    pub fn addr(&self) -> u64 {
        self.buffer.ptr() + self.offset as u64
    }

    /// The same buffer, `bytes` further in.
    #[inline]
    pub fn advance(&self, bytes: usize) -> Self {
        Self {
            buffer: self.buffer,
            offset: self.offset + bytes,
        }
    }
}
