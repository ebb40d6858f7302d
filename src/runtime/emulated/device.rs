//! Emulated device description

use crate::config::MAX_GRID_EXTENT;
use crate::runtime::{BlasCapabilities, Device};

/// A reference device
///
/// Describes what the emulated numeric library reports and the limits the
/// emulated queue enforces. Every context opened on it gets its own memory.
#[derive(Clone, Debug)]
pub struct EmulatedDevice {
    id: usize,
    capabilities: BlasCapabilities,
    grid_limit: u32,
    memory_limit: Option<usize>,
}

impl EmulatedDevice {
    /// Device `id` with every library entry point and a 65535 grid limit
    pub fn new(id: usize) -> Self {
        Self {
            id,
            capabilities: BlasCapabilities::ALL,
            grid_limit: MAX_GRID_EXTENT,
            memory_limit: None,
        }
    }

    /// Report `capabilities` from the numeric library.
    pub fn with_capabilities(mut self, capabilities: BlasCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Reject launches whose y or z grid extent exceeds `limit`.
    pub fn with_grid_limit(mut self, limit: u32) -> Self {
        self.grid_limit = limit;
        self
    }

    /// Fail allocations once `bytes` are live.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Entry points the numeric library reports
    pub fn capabilities(&self) -> BlasCapabilities {
        self.capabilities
    }

    /// Largest accepted grid extent
    pub fn grid_limit(&self) -> u32 {
        self.grid_limit
    }

    /// Live-byte limit, if any
    pub fn memory_limit(&self) -> Option<usize> {
        self.memory_limit
    }
}

impl Default for EmulatedDevice {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Device for EmulatedDevice {
    fn id(&self) -> usize {
        self.id
    }

    fn name(&self) -> String {
        format!("emulated:{}", self.id)
    }
}
