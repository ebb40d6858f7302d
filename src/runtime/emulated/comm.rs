//! In-process collectives between emulated contexts
//!
//! Ranks of one world meet in a shared clique keyed by the 128-byte id. Every
//! collective is one exchange: each rank publishes its contribution, all ranks
//! pass a barrier, each rank copies every contribution, and a second barrier
//! keeps slots stable until everyone has read them. A rank that never issues
//! the matching call leaves the others blocked, like a real world.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier, OnceLock, Weak};

use parking_lot::Mutex;
use rand::Rng;

use super::EmulatedRuntime;
use super::queue::{EmulatedQueue, Fault, QueueCommand, QueueInner};
use crate::collective::ReduceOp;
use crate::dtype::dispatch::dispatch_dtype;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::runtime::{CLIQUE_ID_BYTES, CollectiveBackend};

type CliqueKey = [u8; CLIQUE_ID_BYTES];

struct Clique {
    ndev: usize,
    barrier: Barrier,
    joined: Mutex<Vec<bool>>,
    slots: Mutex<Vec<Vec<u8>>>,
}

impl Clique {
    /// Publish `contribution` as `rank` and return every rank's contribution.
    fn exchange(&self, rank: usize, contribution: Vec<u8>) -> Vec<Vec<u8>> {
        self.slots.lock()[rank] = contribution;
        self.barrier.wait();
        let all = self.slots.lock().clone();
        self.barrier.wait();
        all
    }
}

fn registry() -> &'static Mutex<HashMap<CliqueKey, Weak<Clique>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<CliqueKey, Weak<Clique>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn join(id: &CliqueKey, ndev: usize, rank: usize) -> Result<Arc<Clique>> {
    let clique = {
        let mut registry = registry().lock();
        registry.retain(|_, clique| clique.strong_count() > 0);
        match registry.get(id).and_then(Weak::upgrade) {
            Some(clique) => clique,
            None => {
                let clique = Arc::new(Clique {
                    ndev,
                    barrier: Barrier::new(ndev),
                    joined: Mutex::new(vec![false; ndev]),
                    slots: Mutex::new(vec![Vec::new(); ndev]),
                });
                registry.insert(*id, Arc::downgrade(&clique));
                clique
            }
        }
    };

    if clique.ndev != ndev {
        return Err(Error::Communication(format!(
            "invalid argument: world has {} ranks, rank {rank} expected {ndev}",
            clique.ndev
        )));
    }
    {
        let mut joined = clique.joined.lock();
        if joined[rank] {
            return Err(Error::Communication(format!(
                "invalid argument: rank {rank} joined twice"
            )));
        }
        joined[rank] = true;
    }
    clique.barrier.wait();
    Ok(clique)
}

/// One rank of an in-process world
pub struct EmulatedComm {
    queue: Arc<QueueInner>,
    clique: Arc<Clique>,
    rank: usize,
}

impl std::fmt::Debug for EmulatedComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedComm")
            .field("rank", &self.rank)
            .field("ndev", &self.clique.ndev)
            .finish()
    }
}

fn reduce_into<T: Element>(acc: &mut [T], other: &[T], op: ReduceOp) {
    for (a, &b) in acc.iter_mut().zip(other) {
        *a = match op {
            ReduceOp::Sum => a.add(b),
            ReduceOp::Prod => a.mul(b),
            ReduceOp::Max => {
                if b > *a {
                    b
                } else {
                    *a
                }
            }
            ReduceOp::Min => {
                if b < *a {
                    b
                } else {
                    *a
                }
            }
        };
    }
}

/// Reduce equal-length byte contributions elementwise, in rank order.
fn reduce_all(contributions: &[Vec<u8>], dtype: DType, op: ReduceOp) -> Vec<u8> {
    dispatch_dtype!(dtype, T => {
        let mut acc: Vec<T> = bytemuck::pod_collect_to_vec(&contributions[0]);
        for other in &contributions[1..] {
            let other: Vec<T> = bytemuck::pod_collect_to_vec(other);
            reduce_into(&mut acc, &other, op);
        }
        bytemuck::cast_slice(&acc).to_vec()
    })
}

impl EmulatedComm {
    /// Check the armed faults and log the collective.
    fn begin(&self, name: &'static str) -> Result<()> {
        let mut state = self.queue.lock();
        if state.take_fault(Fault::Collective) {
            return Err(Error::Communication("unhandled system error".into()));
        }
        state.log(QueueCommand::Collective { name });
        Ok(())
    }

    fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let state = self.queue.lock();
        Ok(state.memory.read(addr, len)?.to_vec())
    }

    fn write(&self, addr: u64, bytes: &[u8]) -> Result<()> {
        self.queue.lock().memory.write(addr, bytes)
    }
}

impl CollectiveBackend<EmulatedRuntime> for EmulatedComm {
    fn unique_id(_queue: &EmulatedQueue) -> Result<CliqueKey> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let mut id = [0u8; CLIQUE_ID_BYTES];
        rand::rng().fill(&mut id[..]);
        // The counter makes ids unique on this host even if two draws collide.
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        id[..8].copy_from_slice(&n.to_le_bytes());
        id[8..12].copy_from_slice(&std::process::id().to_le_bytes());
        Ok(id)
    }

    fn init_rank(queue: &EmulatedQueue, id: &CliqueKey, ndev: usize, rank: usize) -> Result<Self> {
        let clique = join(id, ndev, rank)?;
        Ok(Self {
            queue: Arc::clone(queue.inner()),
            clique,
            rank,
        })
    }

    fn count(&self) -> Result<usize> {
        Ok(self.clique.ndev)
    }

    fn user_rank(&self) -> Result<usize> {
        Ok(self.rank)
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
        self.begin("reduce")?;
        let len = count * dtype.size_in_bytes();
        let all = self.clique.exchange(self.rank, self.read(send, len)?);
        if self.rank == root {
            let recv = recv.ok_or_else(|| {
                Error::Communication("invalid argument: root has no receive buffer".into())
            })?;
            self.write(recv, &reduce_all(&all, dtype, op))?;
        }
        Ok(())
    }

    unsafe fn all_reduce(
        &self,
        send: u64,
        recv: u64,
        count: usize,
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()> {
        self.begin("all_reduce")?;
        let len = count * dtype.size_in_bytes();
        let all = self.clique.exchange(self.rank, self.read(send, len)?);
        self.write(recv, &reduce_all(&all, dtype, op))
    }

    unsafe fn reduce_scatter(
        &self,
        send: u64,
        recv: u64,
        recv_count: usize,
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()> {
        self.begin("reduce_scatter")?;
        let block = recv_count * dtype.size_in_bytes();
        let all = self
            .clique
            .exchange(self.rank, self.read(send, block * self.clique.ndev)?);
        let reduced = reduce_all(&all, dtype, op);
        self.write(recv, &reduced[self.rank * block..(self.rank + 1) * block])
    }

    unsafe fn broadcast(&self, buf: u64, count: usize, dtype: DType, root: usize) -> Result<()> {
        self.begin("broadcast")?;
        let len = count * dtype.size_in_bytes();
        let contribution = if self.rank == root {
            self.read(buf, len)?
        } else {
            Vec::new()
        };
        let all = self.clique.exchange(self.rank, contribution);
        if self.rank != root {
            self.write(buf, &all[root])?;
        }
        Ok(())
    }

    unsafe fn all_gather(&self, send: u64, recv: u64, send_count: usize, dtype: DType) -> Result<()> {
        self.begin("all_gather")?;
        let len = send_count * dtype.size_in_bytes();
        let all = self.clique.exchange(self.rank, self.read(send, len)?);
        self.write(recv, &all.concat())
    }
}
