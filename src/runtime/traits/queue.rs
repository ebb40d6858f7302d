//! Ordered execution queue owned by a context

use crate::error::Result;

/// An ordered device execution queue
///
/// Work enqueued on the queue executes in issue order. Fences are expressed
/// with events: `record_event` marks the current tail of the queue and
/// `wait_event` makes all later work wait for the marked point, without
/// blocking the host thread.
pub trait ExecutionQueue: Send + Sync + 'static {
    /// Fence object recorded on and waited by the queue
    type Event: Send + Sync;

    /// Make this queue's device context current on the calling thread.
    ///
    /// Called every time a thread enters the context's critical section.
    fn bind(&self) -> Result<()>;

    /// Allocate `size_bytes` of device memory, ordered on this queue.
    ///
    /// Returns `Err(OutOfMemory)` when the device cannot satisfy the request.
    /// A zero-byte request returns the null address 0.
    fn allocate(&self, size_bytes: usize) -> Result<u64>;

    /// Release memory obtained from `allocate`, ordered after all work
    /// already enqueued.
    fn deallocate(&self, ptr: u64, size_bytes: usize);

    /// Copy host bytes to device memory. `src` may be dropped on return.
    fn copy_to_device(&self, src: &[u8], dst: u64) -> Result<()>;

    /// Copy device memory to the host, waiting for all prior work.
    fn copy_from_device(&self, src: u64, dst: &mut [u8]) -> Result<()>;

    /// Create a fence that has not been recorded yet.
    fn create_event(&self) -> Result<Self::Event>;

    /// Record `event` at the current tail of the queue.
    fn record_event(&self, event: &Self::Event) -> Result<()>;

    /// Make later work on this queue wait for the last recording of `event`.
    fn wait_event(&self, event: &Self::Event) -> Result<()>;

    /// Block the host until all enqueued work has completed.
    fn synchronize(&self) -> Result<()>;

    /// Largest grid extent the device accepts on the y and z axes.
    fn max_grid_extent(&self) -> u32;
}
