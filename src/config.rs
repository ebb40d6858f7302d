//! Dispatch tuning knobs
//!
//! Defaults reproduce the fixed policy; each knob can be overridden through an
//! environment variable when a context is opened with [`DispatchConfig::from_env`].

/// Cube edge above which pointer-batched gemm issues one vendor call per item.
pub const BATCH_LOOP_CUBE_EDGE: u64 = 650;
/// Largest grid extent a launch may use on any axis.
pub const MAX_GRID_EXTENT: u32 = 65_535;

/// Small-batch gemv: lanes per block on the output axis when rows < `GEMV_WIDE_ROWS`.
pub const GEMV_NARROW_LANES: u32 = 32;
/// Small-batch gemv: lanes per block on the output axis for wide problems.
pub const GEMV_WIDE_LANES: u32 = 512;
/// Row count at which gemv switches to wide blocks.
pub const GEMV_WIDE_ROWS: usize = 512;
/// Small-batch gemv: maximum batch lanes per block.
pub const GEMV_BATCH_LANES: u32 = 16;

/// Small-batch ger: lanes on the contiguous axis.
pub const GER_CONTIGUOUS_LANES: u32 = 32;
/// Small-batch ger: lanes on the strided axis once a block is full.
pub const GER_STRIDED_LANES: u32 = 16;
/// Small-batch ger: threads per block before the strided axis is split.
pub const GER_BLOCK_THREADS: u32 = 512;

const ENV_BATCH_LOOP_CUBE: &str = "DEVQ_BATCH_LOOP_CUBE";
const ENV_MAX_GRID_EXTENT: &str = "DEVQ_MAX_GRID_EXTENT";

/// Per-context dispatch configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Items with M*N*K above `batch_loop_cube_edge^3` use the per-item loop.
    pub batch_loop_cube_edge: u64,
    /// Grid cap; the effective cap is the minimum of this and the device limit.
    pub max_grid_extent: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_loop_cube_edge: BATCH_LOOP_CUBE_EDGE,
            max_grid_extent: MAX_GRID_EXTENT,
        }
    }
}

impl DispatchConfig {
    /// Defaults, overridden by `DEVQ_BATCH_LOOP_CUBE` and `DEVQ_MAX_GRID_EXTENT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(edge) = env_positive::<u64>(ENV_BATCH_LOOP_CUBE) {
            config.batch_loop_cube_edge = edge;
        }
        if let Some(extent) = env_positive::<u32>(ENV_MAX_GRID_EXTENT) {
            config.max_grid_extent = extent;
        }
        config
    }

    /// Volume above which pointer-batched gemm loops per item.
    pub fn batch_loop_volume(&self) -> u128 {
        let edge = self.batch_loop_cube_edge as u128;
        edge * edge * edge
    }
}

fn env_positive<T>(name: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => Some(v),
        _ => {
            log::warn!("ignoring {name}={raw:?}: expected a positive integer");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.batch_loop_volume(), 650u128 * 650 * 650);
        assert_eq!(config.max_grid_extent, 65_535);
    }
}
