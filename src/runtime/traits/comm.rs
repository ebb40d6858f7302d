//! Collective communicator abstraction

use super::Runtime;
use crate::collective::ReduceOp;
use crate::dtype::DType;
use crate::error::Result;

/// Size of the opaque clique identifier shared by all participants
pub const CLIQUE_ID_BYTES: usize = 128;

/// One participant of a collective world, bound to a context's queue
///
/// Every operation is enqueued on the queue the communicator was created on.
/// Failures are reported as `Error::Communication` carrying the backend's
/// message.
///
/// # Safety
///
/// The `unsafe` operations take raw device addresses; callers guarantee the
/// footprints implied by `count` and `dtype` are inside live allocations.
pub trait CollectiveBackend<R: Runtime>: Sized + Send + Sync {
    /// Generate an identifier unique on this host.
    fn unique_id(queue: &R::Queue) -> Result<[u8; CLIQUE_ID_BYTES]>;

    /// Join the world named by `id` as participant `rank` of `ndev`.
    ///
    /// Blocks until every participant has joined.
    fn init_rank(
        queue: &R::Queue,
        id: &[u8; CLIQUE_ID_BYTES],
        ndev: usize,
        rank: usize,
    ) -> Result<Self>;

    /// Number of participants in the world.
    fn count(&self) -> Result<usize>;

    /// This participant's rank.
    fn user_rank(&self) -> Result<usize>;

    /// Reduce into `recv` on `root`. `recv` is `None` on other ranks.
    unsafe fn reduce(
        &self,
        send: u64,
        recv: Option<u64>,
        count: usize,
        dtype: DType,
        op: ReduceOp,
        root: usize,
    ) -> Result<()>;

    /// Reduce into `recv` on every rank.
    unsafe fn all_reduce(
        &self,
        send: u64,
        recv: u64,
        count: usize,
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()>;

    /// Reduce `count * ndev` elements and leave block `rank` in `recv`.
    unsafe fn reduce_scatter(
        &self,
        send: u64,
        recv: u64,
        recv_count: usize,
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()>;

    /// Copy `count` elements of `buf` from `root` to every rank, in place.
    unsafe fn broadcast(&self, buf: u64, count: usize, dtype: DType, root: usize) -> Result<()>;

    /// Concatenate every rank's `send_count` elements into `recv`, in rank order.
    unsafe fn all_gather(&self, send: u64, recv: u64, send_count: usize, dtype: DType)
    -> Result<()>;
}
