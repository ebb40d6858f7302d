//! Scoped critical section around a context's enqueue sequences

use parking_lot::MutexGuard;

use super::Runtime;
use super::context::{BlasSlot, Context, HandleId, create_blas};
use crate::error::{Error, Result};

pub(crate) struct GateState<R: Runtime> {
    pub(crate) blas: Option<BlasSlot<R>>,
}

impl<R: Runtime> Default for GateState<R> {
    fn default() -> Self {
        Self { blas: None }
    }
}

/// Proof that the caller is inside a context's critical section
///
/// Obtained from [`Context::enter`]. Every wait, vendor call and record of an
/// operation happens while one gate is alive; dropping the gate exits the
/// critical section on every path, including early returns through `?`.
pub struct Gate<'a, R: Runtime> {
    context: &'a Context<R>,
    state: MutexGuard<'a, GateState<R>>,
}

impl<'a, R: Runtime> Gate<'a, R> {
    pub(crate) fn new(context: &'a Context<R>, state: MutexGuard<'a, GateState<R>>) -> Self {
        Self { context, state }
    }

    /// The context this gate belongs to
    #[inline]
    pub fn context(&self) -> &'a Context<R> {
        self.context
    }

    /// The context's queue
    #[inline]
    pub fn queue(&self) -> &'a R::Queue {
        self.context.queue()
    }

    pub(crate) fn ensure_blas(&mut self) -> Result<HandleId> {
        if let Some(slot) = &self.state.blas {
            return Ok(slot.id);
        }
        let slot = create_blas(self.context)?;
        let id = slot.id;
        self.state.blas = Some(slot);
        Ok(id)
    }

    pub(crate) fn blas(&self) -> Result<&R::Blas> {
        self.state
            .blas
            .as_ref()
            .map(|slot| &slot.backend)
            .ok_or_else(|| Error::backend("blas", "numeric-library handle is not set up"))
    }

    pub(crate) fn take_blas(&mut self) -> Option<BlasSlot<R>> {
        self.state.blas.take()
    }
}

impl<R: Runtime> Drop for Gate<'_, R> {
    fn drop(&mut self) {
        log::trace!("exit context {}", self.context.id());
    }
}
