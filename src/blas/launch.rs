//! Launch geometry for the small-batch kernels

use crate::config::{
    GEMV_BATCH_LANES, GEMV_NARROW_LANES, GEMV_WIDE_LANES, GEMV_WIDE_ROWS, GER_BLOCK_THREADS,
    GER_CONTIGUOUS_LANES, GER_STRIDED_LANES,
};
use crate::error::{Error, Result};
use crate::runtime::traits::LaunchGeometry;

#[inline]
fn div_ceil(a: u64, b: u64) -> u64 {
    a.div_ceil(b)
}

/// Grid for batched gemv: x covers the output rows, y covers the batch.
///
/// Blocks favor the output axis (32 lanes, or 512 once there are at least
/// 512 outputs) and give the rest to up to 16 batch items. When the grid
/// would exceed `cap` blocks, the batch axis is clamped; the kernel strides
/// over the remaining items.
pub fn gemv_launch(out_len: usize, batch: usize, cap: u32) -> Result<LaunchGeometry> {
    let (ls0, ls1) = if out_len < GEMV_WIDE_ROWS {
        (GEMV_NARROW_LANES, (batch as u64).min(GEMV_BATCH_LANES as u64).max(1) as u32)
    } else {
        (GEMV_WIDE_LANES, 1)
    };
    let gs0 = div_ceil(out_len as u64, ls0 as u64).max(1);
    let mut gs1 = div_ceil(batch as u64, ls1 as u64).max(1);
    let cap = cap as u64;

    if gs0 * gs1 > cap {
        gs1 = cap / gs0;
        if gs1 == 0 {
            return Err(Error::overflow("gemv grid", gs0 as u128));
        }
    }

    Ok(LaunchGeometry {
        grid: (gs0 as u32, gs1 as u32, 1),
        block: (ls0, ls1, 1),
    })
}

/// Grid for batched ger: x covers rows, y covers columns, z covers the batch.
///
/// `contiguous_rows` selects the axis that gets up to 32 lanes (the one whose
/// source vector has unit increment); the other axis is limited to 16 lanes
/// once a block would exceed 512 threads. When the grid would exceed `cap`
/// blocks the batch axis is clamped; if rows and columns alone exceed it the
/// input is too large.
pub fn ger_launch(
    rows: usize,
    cols: usize,
    contiguous_rows: bool,
    batch: usize,
    cap: u32,
) -> Result<LaunchGeometry> {
    let mut ls = [rows.max(1) as u64, cols.max(1) as u64, 1];
    let mut gs = [1u64, 1, batch.max(1) as u64];
    let (fast, slow) = if contiguous_rows { (0, 1) } else { (1, 0) };

    if ls[fast] > GER_CONTIGUOUS_LANES as u64 {
        gs[fast] = div_ceil(ls[fast], GER_CONTIGUOUS_LANES as u64);
        ls[fast] = GER_CONTIGUOUS_LANES as u64;
    }
    if ls[fast] * ls[slow] > GER_BLOCK_THREADS as u64 {
        gs[slow] = div_ceil(ls[slow], GER_STRIDED_LANES as u64);
        ls[slow] = GER_STRIDED_LANES as u64;
    }

    let cap = cap as u64;
    let plane = gs[0] * gs[1];
    if plane * gs[2] > cap {
        if plane > cap {
            return Err(Error::overflow("ger grid (input too large)", plane as u128));
        }
        gs[2] = cap / plane;
    }

    Ok(LaunchGeometry {
        grid: (gs[0] as u32, gs[1] as u32, gs[2] as u32),
        block: (ls[0] as u32, ls[1] as u32, ls[2] as u32),
    })
}
