//! Stream-backed execution queue
//!
//! Each context owns one non-blocking stream on its device. Allocation is
//! stream ordered (`cuMemAllocAsync` / `cuMemFreeAsync`), so a buffer freed
//! while kernels still read it is only reclaimed after they finish.

use std::sync::Arc;

use cudarc::driver::safe::{CudaContext, CudaStream};
use cudarc::driver::sys::{self, CUresult};

use super::device::CudaDevice;
use crate::error::{Error, Result};
use crate::runtime::ExecutionQueue;

/// Map a driver status to `Ok` or a backend error naming `call`.
pub(crate) fn check(call: &'static str, result: CUresult) -> Result<()> {
    if result == CUresult::CUDA_SUCCESS {
        Ok(())
    } else {
        Err(Error::backend(call, format!("{result:?}")))
    }
}

/// Check if the CUDA context on the current thread is valid.
///
/// # Safety
///
/// Calls the driver API directly.
#[inline]
unsafe fn is_cuda_context_valid() -> bool {
    let mut ctx: sys::CUcontext = std::ptr::null_mut();
    // SAFETY: cuCtxGetCurrent only writes the provided pointer.
    let result = unsafe { sys::cuCtxGetCurrent(&mut ctx) };
    result == CUresult::CUDA_SUCCESS && !ctx.is_null()
}

/// Fence recorded on a [`CudaQueue`]
pub struct CudaEvent {
    event: sys::CUevent,
    context: Arc<CudaContext>,
}

// SAFETY: a CUevent handle may be recorded and waited from any thread once
// the owning context is bound, which every caller does through the gate.
unsafe impl Send for CudaEvent {}
// SAFETY: see above; the handle itself is never mutated through `&self`.
unsafe impl Sync for CudaEvent {}

impl Drop for CudaEvent {
    fn drop(&mut self) {
        if self.context.bind_to_thread().is_err() {
            return;
        }
        // SAFETY: the event was created by cuEventCreate and is destroyed once.
        let result = unsafe { sys::cuEventDestroy_v2(self.event) };
        if result != CUresult::CUDA_SUCCESS {
            log::warn!("cuEventDestroy failed: {result:?}");
        }
    }
}

impl std::fmt::Debug for CudaEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaEvent").finish_non_exhaustive()
    }
}

/// The ordered queue of a CUDA context
pub struct CudaQueue {
    device: CudaDevice,
    context: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    max_grid: u32,
}

impl std::fmt::Debug for CudaQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaQueue")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl CudaQueue {
    pub(crate) fn new(device: &CudaDevice) -> Result<Self> {
        let context = CudaContext::new(device.index)?;
        context.bind_to_thread()?;
        let stream = context.new_stream()?;
        let max_grid = device.max_grid_extent()?;
        Ok(Self {
            device: device.clone(),
            context,
            stream,
            max_grid,
        })
    }

    /// Driver context of the queue's device
    pub fn context(&self) -> &Arc<CudaContext> {
        &self.context
    }

    /// Underlying stream
    pub fn stream(&self) -> &Arc<CudaStream> {
        &self.stream
    }

    pub(crate) fn device(&self) -> &CudaDevice {
        &self.device
    }

    pub(crate) fn cu_stream(&self) -> sys::CUstream {
        self.stream.cu_stream()
    }
}

impl ExecutionQueue for CudaQueue {
    type Event = CudaEvent;

    fn bind(&self) -> Result<()> {
        self.context.bind_to_thread()?;
        Ok(())
    }

    fn allocate(&self, size_bytes: usize) -> Result<u64> {
        if size_bytes == 0 {
            return Ok(0);
        }
        let mut ptr: u64 = 0;
        // SAFETY: the stream belongs to the bound context; `ptr` is a valid out-pointer.
        let result = unsafe { sys::cuMemAllocAsync(&mut ptr, size_bytes, self.cu_stream()) };
        if result == CUresult::CUDA_SUCCESS {
            return Ok(ptr);
        }

        // Pending stream-ordered frees may release enough memory.
        let _ = self.stream.synchronize();
        // SAFETY: as above.
        let result = unsafe { sys::cuMemAllocAsync(&mut ptr, size_bytes, self.cu_stream()) };
        if result == CUresult::CUDA_SUCCESS {
            Ok(ptr)
        } else {
            log::warn!("cuMemAllocAsync of {size_bytes} bytes failed: {result:?}");
            Err(Error::OutOfMemory { size: size_bytes })
        }
    }

    fn deallocate(&self, ptr: u64, _size_bytes: usize) {
        if ptr == 0 {
            return;
        }
        // SAFETY: `ptr` came from cuMemAllocAsync on this stream.
        unsafe {
            if !is_cuda_context_valid() {
                // Reclaimed by the driver with the context.
                return;
            }
            let result = sys::cuMemFreeAsync(ptr, self.cu_stream());
            if result != CUresult::CUDA_SUCCESS {
                log::warn!("cuMemFreeAsync failed for ptr 0x{ptr:x}: {result:?}");
            }
        }
    }

    fn copy_to_device(&self, src: &[u8], dst: u64) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        // SAFETY: `dst` covers `src.len()` bytes; the stream is synchronized
        // before `src` can be released by the caller.
        unsafe {
            check(
                "cuMemcpyHtoDAsync",
                sys::cuMemcpyHtoDAsync_v2(
                    dst,
                    src.as_ptr() as *const std::ffi::c_void,
                    src.len(),
                    self.cu_stream(),
                ),
            )?;
        }
        self.synchronize()
    }

    fn copy_from_device(&self, src: u64, dst: &mut [u8]) -> Result<()> {
        if dst.is_empty() {
            return Ok(());
        }
        // SAFETY: `src` covers `dst.len()` bytes; synchronized before returning.
        unsafe {
            check(
                "cuMemcpyDtoHAsync",
                sys::cuMemcpyDtoHAsync_v2(
                    dst.as_mut_ptr() as *mut std::ffi::c_void,
                    src,
                    dst.len(),
                    self.cu_stream(),
                ),
            )?;
        }
        self.synchronize()
    }

    fn create_event(&self) -> Result<CudaEvent> {
        let mut event: sys::CUevent = std::ptr::null_mut();
        let flags = sys::CUevent_flags::CU_EVENT_DISABLE_TIMING as u32;
        // SAFETY: `event` is a valid out-pointer.
        let result = unsafe { sys::cuEventCreate(&mut event, flags) };
        if result != CUresult::CUDA_SUCCESS {
            return Err(Error::Fence(format!("cuEventCreate: {result:?}")));
        }
        Ok(CudaEvent {
            event,
            context: Arc::clone(&self.context),
        })
    }

    fn record_event(&self, event: &CudaEvent) -> Result<()> {
        // SAFETY: both handles are live and belong to this context.
        let result = unsafe { sys::cuEventRecord(event.event, self.cu_stream()) };
        if result != CUresult::CUDA_SUCCESS {
            return Err(Error::Fence(format!("cuEventRecord: {result:?}")));
        }
        Ok(())
    }

    fn wait_event(&self, event: &CudaEvent) -> Result<()> {
        // SAFETY: both handles are live and belong to this context.
        let result = unsafe { sys::cuStreamWaitEvent(self.cu_stream(), event.event, 0) };
        if result != CUresult::CUDA_SUCCESS {
            return Err(Error::Fence(format!("cuStreamWaitEvent: {result:?}")));
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        self.stream.synchronize()?;
        Ok(())
    }

    fn max_grid_extent(&self) -> u32 {
        self.max_grid
    }
}
