//! The five collectives
//!
//! Each call validates against the communicator's context and the world size
//! queried at call time, then enqueues one native collective between the
//! hazard waits and records of its buffers. Sources are tracked as reads and
//! destinations as writes; the in-place broadcast buffer is a read on every
//! rank.

use super::{Communicator, ReduceOp};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::{BufferRef, CollectiveBackend, DeviceBuffer, HazardMode, Runtime, fenced};
use crate::validate::{check_dims, check_operand};

fn scaled(what: &'static str, count: usize, ndev: usize) -> Result<usize> {
    count
        .checked_mul(ndev)
        .ok_or_else(|| Error::overflow(what, count as u128 * ndev as u128))
}

impl<R: Runtime> Communicator<R> {
    fn check_root(&self, root: usize, ndev: usize) -> Result<()> {
        if root >= ndev {
            return Err(Error::invalid_arg(
                "root",
                format!("root {root} is outside a world of {ndev}"),
            ));
        }
        Ok(())
    }

    /// Enter the context, fence `accesses` around `call` and store the
    /// outcome as the context's diagnostic.
    fn issue<F>(&self, accesses: &[(&DeviceBuffer<R>, HazardMode)], call: F) -> Result<()>
    where
        F: FnOnce(&R::Comm) -> Result<()>,
    {
        let result = self
            .context
            .enter()
            .and_then(|gate| fenced(&gate, accesses, || call(&*self.comm)));
        self.track(result)
    }

    /// Reduce `count` elements of every rank's `src` into `dest` on `root`.
    ///
    /// Only the root supplies a destination; `dest` is ignored on other ranks,
    /// which leave their memory untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn reduce(
        &self,
        src: BufferRef<'_, R>,
        dest: Option<BufferRef<'_, R>>,
        count: usize,
        dtype: DType,
        op: ReduceOp,
        root: usize,
    ) -> Result<()> {
        check_dims(&[("count", count)])?;
        let ndev = self.count()?;
        self.check_root(root, ndev)?;
        let is_root = self.rank()? == root;

        check_operand(&self.context, "src", &src, dtype, count)?;
        let dest = if is_root {
            let dest = dest.ok_or_else(|| {
                Error::invalid_arg("dest", "the root of a reduce must supply a destination")
            })?;
            check_operand(&self.context, "dest", &dest, dtype, count)?;
            Some(dest)
        } else {
            None
        };

        let mut accesses = vec![(src.buffer, HazardMode::Read)];
        if let Some(dest) = dest {
            accesses.push((dest.buffer, HazardMode::Write));
        }
        self.issue(&accesses, |comm| unsafe {
            comm.reduce(
                src.addr(),
                dest.map(|d| d.addr()),
                count,
                dtype,
                op,
                root,
            )
        })
    }

    /// Reduce `count` elements of every rank's `src` into every rank's `dest`.
    pub fn all_reduce(
        &self,
        src: BufferRef<'_, R>,
        dest: BufferRef<'_, R>,
        count: usize,
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()> {
        check_dims(&[("count", count)])?;
        check_operand(&self.context, "src", &src, dtype, count)?;
        check_operand(&self.context, "dest", &dest, dtype, count)?;

        self.issue(
            &[
                (src.buffer, HazardMode::Read),
                (dest.buffer, HazardMode::Write),
            ],
            |comm| unsafe { comm.all_reduce(src.addr(), dest.addr(), count, dtype, op) },
        )
    }

    /// Reduce `recv_count * ndev` elements of every rank's `src` and leave
    /// block `rank` of the result in `dest`.
    pub fn reduce_scatter(
        &self,
        src: BufferRef<'_, R>,
        dest: BufferRef<'_, R>,
        recv_count: usize,
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()> {
        let ndev = self.count()?;
        let send_count = scaled("count*ndev", recv_count, ndev)?;
        check_dims(&[("count", recv_count), ("count*ndev", send_count)])?;
        check_operand(&self.context, "src", &src, dtype, send_count)?;
        check_operand(&self.context, "dest", &dest, dtype, recv_count)?;

        self.issue(
            &[
                (src.buffer, HazardMode::Read),
                (dest.buffer, HazardMode::Write),
            ],
            |comm| unsafe { comm.reduce_scatter(src.addr(), dest.addr(), recv_count, dtype, op) },
        )
    }

    /// Copy `count` elements of `array` on `root` into `array` on every other
    /// rank, in place.
    pub fn broadcast(
        &self,
        array: BufferRef<'_, R>,
        count: usize,
        dtype: DType,
        root: usize,
    ) -> Result<()> {
        check_dims(&[("count", count)])?;
        let ndev = self.count()?;
        self.check_root(root, ndev)?;
        check_operand(&self.context, "array", &array, dtype, count)?;

        // Every rank fences the buffer as a read, the root and receivers alike.
        self.issue(&[(array.buffer, HazardMode::Read)], |comm| unsafe {
            comm.broadcast(array.addr(), count, dtype, root)
        })
    }

    /// Concatenate `send_count` elements of every rank's `src` into every
    /// rank's `dest`, in rank order.
    pub fn all_gather(
        &self,
        src: BufferRef<'_, R>,
        dest: BufferRef<'_, R>,
        send_count: usize,
        dtype: DType,
    ) -> Result<()> {
        let ndev = self.count()?;
        let recv_count = scaled("count*ndev", send_count, ndev)?;
        check_dims(&[("count", send_count), ("count*ndev", recv_count)])?;
        check_operand(&self.context, "src", &src, dtype, send_count)?;
        check_operand(&self.context, "dest", &dest, dtype, recv_count)?;

        self.issue(
            &[
                (src.buffer, HazardMode::Read),
                (dest.buffer, HazardMode::Write),
            ],
            |comm| unsafe { comm.all_gather(src.addr(), dest.addr(), send_count, dtype) },
        )
    }
}
