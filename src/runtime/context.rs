//! Device context: one ordered queue, one critical section, lazy handles
//!
//! # Handle lifecycle
//!
//! The numeric-library handle is owned by the context's gate state. It is
//! created the first time a linear-algebra entry point (or `setup_blas`)
//! needs it and lives until `teardown_blas` or until the context is dropped.
//! A failed setup leaves the context exactly as it was.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::gate::{Gate, GateState};
use super::{BlasBackend, BlasCapabilities, Device, ExecutionQueue, Runtime};
use crate::config::DispatchConfig;
use crate::error::{NO_ERROR, Result};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one numeric-library handle
///
/// Stays the same for as long as the handle lives; a new handle after a
/// teardown gets a new identity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct BlasSlot<R: Runtime> {
    pub(crate) id: HandleId,
    pub(crate) backend: R::Blas,
}

/// A device context
///
/// Owns exactly one ordered execution queue and the critical section that
/// serializes enqueue sequences on it. Buffers and communicators hold an
/// `Arc` to the context they were created on.
pub struct Context<R: Runtime> {
    id: u64,
    // Declared before `queue` so the handle is released before the queue.
    state: Mutex<GateState<R>>,
    comm_error: Mutex<String>,
    queue: R::Queue,
    device: R::Device,
    config: DispatchConfig,
}

impl<R: Runtime> fmt::Debug for Context<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("runtime", &R::name())
            .field("device", &self.device.name())
            .finish_non_exhaustive()
    }
}

impl<R: Runtime> Context<R> {
    /// Open a context on `device` with configuration from the environment.
    pub fn open(device: R::Device) -> Result<Arc<Self>> {
        Self::open_with_config(device, DispatchConfig::from_env())
    }

    /// Open a context on `device` with an explicit configuration.
    pub fn open_with_config(device: R::Device, config: DispatchConfig) -> Result<Arc<Self>> {
        let queue = R::open_queue(&device)?;
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("opened {} context {} on {}", R::name(), id, device.name());
        Ok(Arc::new(Self {
            id,
            state: Mutex::new(GateState::default()),
            comm_error: Mutex::new(NO_ERROR.to_string()),
            queue,
            device,
            config,
        }))
    }

    /// Process-unique identity of this context
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The device this context runs on
    #[inline]
    pub fn device(&self) -> &R::Device {
        &self.device
    }

    /// The context's ordered execution queue
    #[inline]
    pub fn queue(&self) -> &R::Queue {
        &self.queue
    }

    /// Dispatch configuration
    #[inline]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Enter the critical section. Dropping the returned gate exits it.
    ///
    /// Not re-entrant: a thread holding a gate must drop it before entering
    /// the same context again.
    pub fn enter(&self) -> Result<Gate<'_, R>> {
        let state = self.state.lock();
        // The guard is released if binding fails.
        self.queue.bind()?;
        log::trace!("enter context {}", self.id);
        Ok(Gate::new(self, state))
    }

    /// Enter the critical section with the numeric-library handle set up.
    pub(crate) fn enter_blas(&self) -> Result<Gate<'_, R>> {
        let mut gate = self.enter()?;
        gate.ensure_blas()?;
        Ok(gate)
    }

    /// Create the numeric-library handle if it does not exist yet.
    ///
    /// Idempotent: a second call returns the identity of the existing handle
    /// without recreating it.
    pub fn setup_blas(&self) -> Result<HandleId> {
        let mut gate = self.enter()?;
        gate.ensure_blas()
    }

    /// Destroy the numeric-library handle and its kernel programs.
    ///
    /// No-op when no handle exists.
    pub fn teardown_blas(&self) -> Result<()> {
        let mut gate = self.enter()?;
        if let Some(slot) = gate.take_blas() {
            log::debug!("context {}: destroying blas handle {:?}", self.id, slot.id);
            drop(slot);
        }
        Ok(())
    }

    /// Identity of the current numeric-library handle, if any
    pub fn blas_handle_id(&self) -> Option<HandleId> {
        self.state.lock().blas.as_ref().map(|slot| slot.id)
    }

    /// Entry points of the loaded numeric library. Sets the handle up if needed.
    pub fn blas_capabilities(&self) -> Result<BlasCapabilities> {
        let gate = self.enter_blas()?;
        let caps = gate.blas()?.capabilities();
        Ok(caps)
    }

    /// Diagnostic left by the last collective issued through this context
    pub fn comm_error(&self) -> String {
        self.comm_error.lock().clone()
    }

    pub(crate) fn set_comm_error(&self, message: impl Into<String>) {
        *self.comm_error.lock() = message.into();
    }

    /// Block until all work enqueued on this context has completed.
    pub fn synchronize(&self) -> Result<()> {
        let _gate = self.enter()?;
        self.queue.synchronize()
    }

    /// Grid cap for custom launches on this context
    pub(crate) fn grid_cap(&self) -> u32 {
        self.config.max_grid_extent.min(self.queue.max_grid_extent())
    }
}

pub(crate) fn create_blas<R: Runtime>(context: &Context<R>) -> Result<BlasSlot<R>> {
    let backend = R::Blas::create(&context.queue)?;
    let id = HandleId::next();
    log::debug!(
        "context {}: created blas handle {:?} ({:?})",
        context.id,
        id,
        backend.capabilities()
    );
    Ok(BlasSlot { id, backend })
}
