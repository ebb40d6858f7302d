//! NCCL communicator bound to a context's stream

use std::ffi::{CStr, c_void};

use cudarc::nccl::sys::{self as nccl, ncclComm_t, ncclDataType_t, ncclRedOp_t, ncclResult_t};

use super::CudaRuntime;
use super::queue::CudaQueue;
use crate::collective::ReduceOp;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::{CLIQUE_ID_BYTES, CollectiveBackend};

fn check(result: ncclResult_t) -> Result<()> {
    if result == ncclResult_t::ncclSuccess {
        return Ok(());
    }
    // SAFETY: ncclGetErrorString returns a static NUL-terminated string.
    let message = unsafe { CStr::from_ptr(nccl::ncclGetErrorString(result)) };
    Err(Error::Communication(message.to_string_lossy().into_owned()))
}

fn data_type(dtype: DType) -> ncclDataType_t {
    match dtype {
        DType::I8 => ncclDataType_t::ncclInt8,
        DType::U8 => ncclDataType_t::ncclUint8,
        DType::I32 => ncclDataType_t::ncclInt32,
        DType::U32 => ncclDataType_t::ncclUint32,
        DType::I64 => ncclDataType_t::ncclInt64,
        DType::U64 => ncclDataType_t::ncclUint64,
        DType::F16 => ncclDataType_t::ncclFloat16,
        DType::F32 => ncclDataType_t::ncclFloat32,
        DType::F64 => ncclDataType_t::ncclFloat64,
    }
}

fn red_op(op: ReduceOp) -> ncclRedOp_t {
    match op {
        ReduceOp::Sum => ncclRedOp_t::ncclSum,
        ReduceOp::Prod => ncclRedOp_t::ncclProd,
        ReduceOp::Max => ncclRedOp_t::ncclMax,
        ReduceOp::Min => ncclRedOp_t::ncclMin,
    }
}

/// One NCCL rank
pub struct NcclComm {
    comm: ncclComm_t,
    stream: nccl::cudaStream_t,
}

// SAFETY: a communicator is only used under its context's gate.
unsafe impl Send for NcclComm {}
// SAFETY: see above.
unsafe impl Sync for NcclComm {}

impl std::fmt::Debug for NcclComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NcclComm").finish_non_exhaustive()
    }
}

impl Drop for NcclComm {
    fn drop(&mut self) {
        // SAFETY: created by ncclCommInitRank and destroyed once.
        if let Err(e) = check(unsafe { nccl::ncclCommDestroy(self.comm) }) {
            log::warn!("ncclCommDestroy failed: {e}");
        }
    }
}

impl CollectiveBackend<CudaRuntime> for NcclComm {
    fn unique_id(_queue: &CudaQueue) -> Result<[u8; CLIQUE_ID_BYTES]> {
        let mut id = nccl::ncclUniqueId {
            internal: [0; CLIQUE_ID_BYTES],
        };
        // SAFETY: valid out-pointer.
        check(unsafe { nccl::ncclGetUniqueId(&mut id) })?;
        let mut bytes = [0u8; CLIQUE_ID_BYTES];
        for (dst, &src) in bytes.iter_mut().zip(id.internal.iter()) {
            *dst = src as u8;
        }
        Ok(bytes)
    }

    fn init_rank(
        queue: &CudaQueue,
        id: &[u8; CLIQUE_ID_BYTES],
        ndev: usize,
        rank: usize,
    ) -> Result<Self> {
        let mut unique = nccl::ncclUniqueId {
            internal: [0; CLIQUE_ID_BYTES],
        };
        for (dst, &src) in unique.internal.iter_mut().zip(id.iter()) {
            *dst = src as _;
        }
        let mut comm: ncclComm_t = std::ptr::null_mut();
        // SAFETY: valid out-pointer; the queue's context is bound by the caller.
        check(unsafe { nccl::ncclCommInitRank(&mut comm, ndev as i32, unique, rank as i32) })?;
        Ok(Self {
            comm,
            stream: queue.cu_stream() as _,
        })
    }

    fn count(&self) -> Result<usize> {
        let mut count = 0i32;
        // SAFETY: valid communicator and out-pointer.
        check(unsafe { nccl::ncclCommCount(self.comm, &mut count) })?;
        Ok(count as usize)
    }

    fn user_rank(&self) -> Result<usize> {
        let mut rank = 0i32;
        // SAFETY: valid communicator and out-pointer.
        check(unsafe { nccl::ncclCommUserRank(self.comm, &mut rank) })?;
        Ok(rank as usize)
    }

    unsafe fn reduce(
        &self,
        send: u64,
        recv: Option<u64>,
        count: usize,
        dtype: DType,
        op: ReduceOp,
        root: usize,
    ) -> Result<()> {
        let recv = recv.map_or(std::ptr::null_mut(), |addr| addr as *mut c_void);
        // SAFETY: footprints are validated by the caller.
        check(unsafe {
            nccl::ncclReduce(
                send as *const c_void,
                recv,
                count,
                data_type(dtype),
                red_op(op),
                root as i32,
                self.comm,
                self.stream,
            )
        })
    }

    unsafe fn all_reduce(
        &self,
        send: u64,
        recv: u64,
        count: usize,
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()> {
        // SAFETY: footprints are validated by the caller.
        check(unsafe {
            nccl::ncclAllReduce(
                send as *const c_void,
                recv as *mut c_void,
                count,
                data_type(dtype),
                red_op(op),
                self.comm,
                self.stream,
            )
        })
    }

    unsafe fn reduce_scatter(
        &self,
        send: u64,
        recv: u64,
        recv_count: usize,
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()> {
        // SAFETY: footprints are validated by the caller.
        check(unsafe {
            nccl::ncclReduceScatter(
                send as *const c_void,
                recv as *mut c_void,
                recv_count,
                data_type(dtype),
                red_op(op),
                self.comm,
                self.stream,
            )
        })
    }

    unsafe fn broadcast(&self, buf: u64, count: usize, dtype: DType, root: usize) -> Result<()> {
        // SAFETY: footprint is validated by the caller.
        check(unsafe {
            nccl::ncclBcast(
                buf as *mut c_void,
                count,
                data_type(dtype),
                root as i32,
                self.comm,
                self.stream,
            )
        })
    }

    unsafe fn all_gather(&self, send: u64, recv: u64, send_count: usize, dtype: DType) -> Result<()> {
        // SAFETY: footprints are validated by the caller.
        check(unsafe {
            nccl::ncclAllGather(
                send as *const c_void,
                recv as *mut c_void,
                send_count,
                data_type(dtype),
                self.comm,
                self.stream,
            )
        })
    }
}
