//! Short-lived device staging for operand pointer arrays

use super::ExecutionQueue;
use super::traits::PointerArrays;
use crate::error::Result;

const POINTER_BYTES: u64 = std::mem::size_of::<u64>() as u64;

/// A device allocation holding three equal-length pointer arrays
///
/// Allocated and populated in one step, released when dropped, so every exit
/// path of a batched dispatch (including `?` returns) frees it. The release
/// is ordered on the queue after the call that consumes the arrays.
pub(crate) struct ScratchPointers<'q, Q: ExecutionQueue> {
    queue: &'q Q,
    ptr: u64,
    size: usize,
    len: usize,
}

impl<'q, Q: ExecutionQueue> ScratchPointers<'q, Q> {
    /// Stage `first`, `second` and `third` back to back.
    pub(crate) fn stage(queue: &'q Q, first: &[u64], second: &[u64], third: &[u64]) -> Result<Self> {
        debug_assert!(first.len() == second.len() && second.len() == third.len());
        let len = first.len();
        let mut host = Vec::with_capacity(3 * len);
        host.extend_from_slice(first);
        host.extend_from_slice(second);
        host.extend_from_slice(third);

        let bytes: &[u8] = bytemuck::cast_slice(&host);
        let ptr = queue.allocate(bytes.len())?;
        let scratch = Self {
            queue,
            ptr,
            size: bytes.len(),
            len,
        };
        log::trace!("staged {} x 3 operand pointers at 0x{:x}", len, ptr);
        queue.copy_to_device(bytes, ptr)?;
        Ok(scratch)
    }

    /// Device addresses of the three arrays
    pub(crate) fn arrays(&self) -> PointerArrays {
        let region = self.len as u64 * POINTER_BYTES;
        PointerArrays {
            first: self.ptr,
            second: self.ptr + region,
            third: self.ptr + 2 * region,
        }
    }
}

impl<Q: ExecutionQueue> Drop for ScratchPointers<'_, Q> {
    fn drop(&mut self) {
        self.queue.deallocate(self.ptr, self.size);
    }
}
