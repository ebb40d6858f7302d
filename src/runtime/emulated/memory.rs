//! Host-backed device memory

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dtype::Element;
use crate::error::{Error, Result};

/// Allocations are aligned like device allocations.
const ALIGN: u64 = 256;

// Addresses are unique across every emulated context in the process, so an
// address from another context faults instead of aliasing.
static NEXT_ADDR: AtomicU64 = AtomicU64::new(0x1_0000);

#[derive(Default)]
pub(crate) struct Memory {
    blocks: BTreeMap<u64, Vec<u8>>,
    live_bytes: usize,
}

impl Memory {
    pub(crate) fn allocate(&mut self, size: usize) -> u64 {
        let span = (size as u64).div_ceil(ALIGN).max(1) * ALIGN + ALIGN;
        let ptr = NEXT_ADDR.fetch_add(span, Ordering::Relaxed);
        self.blocks.insert(ptr, vec![0; size]);
        self.live_bytes += size;
        ptr
    }

    pub(crate) fn free(&mut self, ptr: u64) -> Option<usize> {
        let block = self.blocks.remove(&ptr)?;
        self.live_bytes -= block.len();
        Some(block.len())
    }

    pub(crate) fn live_allocations(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    fn locate(&self, addr: u64, len: usize) -> Result<(u64, usize)> {
        let (&base, block) = self
            .blocks
            .range(..=addr)
            .next_back()
            .ok_or_else(|| illegal(addr, len))?;
        let start = (addr - base) as usize;
        if start > block.len() || len > block.len() - start {
            return Err(illegal(addr, len));
        }
        Ok((base, start))
    }

    pub(crate) fn read(&self, addr: u64, len: usize) -> Result<&[u8]> {
        if len == 0 {
            return Ok(&[]);
        }
        let (base, start) = self.locate(addr, len)?;
        Ok(&self.blocks[&base][start..start + len])
    }

    pub(crate) fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let (base, start) = self.locate(addr, bytes.len())?;
        let block = self
            .blocks
            .get_mut(&base)
            .ok_or_else(|| illegal(addr, bytes.len()))?;
        block[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn load<T: Element>(&self, addr: u64) -> Result<T> {
        let bytes = self.read(addr, std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub(crate) fn store<T: Element>(&mut self, addr: u64, value: T) -> Result<()> {
        self.write(addr, bytemuck::bytes_of(&value))
    }
}

fn illegal(addr: u64, len: usize) -> Error {
    Error::backend(
        "emulated",
        format!("illegal address: {len} bytes at 0x{addr:x}"),
    )
}
