//! Multi-device collectives over a fixed world of contexts
//!
//! A world is `ndev` contexts, usually one per device, that agree on a
//! [`CliqueId`] out of band and then each construct a [`Communicator`] with
//! their own rank. Construction blocks until every rank has joined, so a rank
//! that never calls [`Communicator::new`] deadlocks the others.
//!
//! Every rank must issue the same collectives in the same order. This layer
//! cannot detect a mismatch; the affected call simply never completes.
//!
//! # Example
//!
//! ```ignore
//! let id = CliqueId::generate(&ctx0)?;
//! // share `id.as_bytes()` with every rank, then on rank r:
//! let comm = Communicator::new(&ctx_r, &id, ndev, r)?;
//! comm.all_reduce(src.at(0), dest.at(0), n, DType::F32, ReduceOp::Sum)?;
//! ```

mod ops;

use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use crate::error::{Error, NO_ERROR, Result};
use crate::runtime::{CLIQUE_ID_BYTES, CollectiveBackend, Context, Runtime};

/// Reduction applied by `reduce`, `all_reduce` and `reduce_scatter`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    /// Elementwise sum
    Sum,
    /// Elementwise product
    Prod,
    /// Elementwise maximum
    Max,
    /// Elementwise minimum
    Min,
}

impl ReduceOp {
    /// Integer code of this operation
    pub const fn code(self) -> i32 {
        match self {
            Self::Sum => 0,
            Self::Prod => 1,
            Self::Max => 2,
            Self::Min => 3,
        }
    }
}

impl TryFrom<i32> for ReduceOp {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::Sum),
            1 => Ok(Self::Prod),
            2 => Ok(Self::Max),
            3 => Ok(Self::Min),
            other => Err(Error::invalid_arg(
                "op",
                format!("unrecognized reduce operation code {other}"),
            )),
        }
    }
}

/// Opaque 128-byte name of a world, shared by every participant
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct CliqueId([u8; CLIQUE_ID_BYTES]);

impl CliqueId {
    /// Generate an identifier unique on this host.
    pub fn generate<R: Runtime>(context: &Context<R>) -> Result<Self> {
        match R::Comm::unique_id(context.queue()) {
            Ok(bytes) => {
                context.set_comm_error(NO_ERROR);
                Ok(Self(bytes))
            }
            Err(e) => {
                record_failure(context, &e);
                Err(e)
            }
        }
    }

    /// Rebuild an identifier received from another process.
    pub fn from_bytes(bytes: [u8; CLIQUE_ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Raw bytes, for out-of-band distribution
    pub fn as_bytes(&self) -> &[u8; CLIQUE_ID_BYTES] {
        &self.0
    }
}

impl fmt::Debug for CliqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CliqueId(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// One participant of a collective world
///
/// Bound to the context it was created on; every collective is enqueued on
/// that context's queue and ordered against its other work by the buffers'
/// hazard state. Holds a reference to the context, so the context outlives
/// the communicator.
pub struct Communicator<R: Runtime> {
    comm: ManuallyDrop<R::Comm>,
    context: Arc<Context<R>>,
}

impl<R: Runtime> Communicator<R> {
    /// Join the world named by `id` as rank `rank` of `ndev`.
    ///
    /// Every rank of the world must call this concurrently; the call returns
    /// once all of them have joined.
    pub fn new(context: &Arc<Context<R>>, id: &CliqueId, ndev: usize, rank: usize) -> Result<Self> {
        if ndev == 0 {
            return Err(Error::invalid_arg("ndev", "a world needs at least one rank"));
        }
        if rank >= ndev {
            return Err(Error::invalid_arg(
                "rank",
                format!("rank {rank} is outside a world of {ndev}"),
            ));
        }

        let comm = {
            let _gate = context.enter()?;
            R::Comm::init_rank(context.queue(), &id.0, ndev, rank)
        };
        match comm {
            Ok(comm) => {
                context.set_comm_error(NO_ERROR);
                log::debug!(
                    "context {}: joined world {:?} as rank {rank} of {ndev}",
                    context.id(),
                    id
                );
                Ok(Self {
                    comm: ManuallyDrop::new(comm),
                    context: Arc::clone(context),
                })
            }
            Err(e) => {
                record_failure(context, &e);
                Err(e)
            }
        }
    }

    /// Number of ranks in the world, queried from the backend.
    pub fn count(&self) -> Result<usize> {
        self.track(self.comm.count())
    }

    /// This participant's rank, queried from the backend.
    pub fn rank(&self) -> Result<usize> {
        self.track(self.comm.user_rank())
    }

    /// The context this communicator is bound to
    pub fn context(&self) -> &Arc<Context<R>> {
        &self.context
    }

    /// Leave the world and release the context reference.
    pub fn destroy(self) {
        drop(self);
    }

    /// Store the outcome of a backend call as the context's diagnostic.
    fn track<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.context.set_comm_error(NO_ERROR),
            Err(e) => record_failure(&self.context, e),
        }
        result
    }
}

impl<R: Runtime> fmt::Debug for Communicator<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("context", &self.context.id())
            .finish_non_exhaustive()
    }
}

impl<R: Runtime> Drop for Communicator<R> {
    fn drop(&mut self) {
        let _gate = match self.context.enter() {
            Ok(gate) => Some(gate),
            Err(e) => {
                log::warn!(
                    "context {}: destroying communicator unbound: {}",
                    self.context.id(),
                    e
                );
                None
            }
        };
        // SAFETY: `comm` is never touched again after this point.
        unsafe { ManuallyDrop::drop(&mut self.comm) };
    }
}

fn record_failure<R: Runtime>(context: &Context<R>, error: &Error) {
    let message = match error {
        Error::Communication(message) => message.clone(),
        other => other.to_string(),
    };
    log::warn!("context {}: collective failed: {}", context.id(), message);
    context.set_comm_error(message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_op_codes() {
        for op in [ReduceOp::Sum, ReduceOp::Prod, ReduceOp::Max, ReduceOp::Min] {
            assert_eq!(ReduceOp::try_from(op.code()).unwrap(), op);
        }
        assert!(ReduceOp::try_from(4).is_err());
        assert!(ReduceOp::try_from(-1).is_err());
    }

    #[test]
    fn test_clique_id_bytes() {
        let mut bytes = [0u8; CLIQUE_ID_BYTES];
        bytes[0] = 0xab;
        let id = CliqueId::from_bytes(bytes);
        assert_eq!(id.as_bytes()[0], 0xab);
        assert_eq!(format!("{id:?}"), "CliqueId(ab00000000000000..)");
    }
}
