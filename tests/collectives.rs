//! Collectives across an in-process world of emulated contexts

mod common;

use common::{create_emulated_context, run_world};
use devq::prelude::*;
use devq::runtime::HazardState;
use devq::runtime::emulated::{Fault, QueueCommand};

const WORLD: usize = 4;

#[test]
fn test_world_size_and_rank() {
    let seen = run_world(WORLD, |rank, _, comm| {
        (comm.count().unwrap(), comm.rank().unwrap(), rank)
    });
    for (count, rank, expected) in seen {
        assert_eq!(count, WORLD);
        assert_eq!(rank, expected);
    }
}

#[test]
fn test_reduce_to_root() {
    let out = run_world(WORLD, |rank, ctx, comm| {
        let src = DeviceBuffer::from_slice(ctx, &[(rank + 1) as f32; 4]).unwrap();
        let dest = DeviceBuffer::from_slice(ctx, &[-1.0f32; 4]).unwrap();
        comm.reduce(src.at(0), Some(dest.at(0)), 4, DType::F32, ReduceOp::Sum, 0)
            .unwrap();
        dest.to_vec::<f32>().unwrap()
    });
    assert_eq!(out[0], vec![10.0; 4]);
    for dest in &out[1..] {
        assert_eq!(dest, &vec![-1.0; 4]);
    }
}

#[test]
fn test_reduce_root_needs_destination() {
    let out = run_world(1, |_, ctx, comm| {
        let src = DeviceBuffer::from_slice(ctx, &[1.0f32]).unwrap();
        comm.reduce(src.at(0), None, 1, DType::F32, ReduceOp::Sum, 0)
            .unwrap_err()
            .kind()
    });
    assert_eq!(out, vec![ErrorKind::InvalidValue]);
}

#[test]
fn test_all_reduce_matches_reduce_then_broadcast() {
    let out = run_world(WORLD, |rank, ctx, comm| {
        let host: Vec<f64> = (0..6).map(|i| (i * (rank + 1)) as f64 - 2.0).collect();
        let src = DeviceBuffer::from_slice(ctx, &host).unwrap();
        let all = DeviceBuffer::zeroed(ctx, 6 * 8).unwrap();
        let staged = DeviceBuffer::zeroed(ctx, 6 * 8).unwrap();

        comm.all_reduce(src.at(0), all.at(0), 6, DType::F64, ReduceOp::Sum)
            .unwrap();
        comm.reduce(src.at(0), Some(staged.at(0)), 6, DType::F64, ReduceOp::Sum, 2)
            .unwrap();
        comm.broadcast(staged.at(0), 6, DType::F64, 2).unwrap();

        (all.to_vec::<f64>().unwrap(), staged.to_vec::<f64>().unwrap())
    });
    let expected: Vec<f64> = (0..6).map(|i| (i * 10) as f64 - 8.0).collect();
    for (all, staged) in out {
        assert_eq!(all, expected);
        assert_eq!(staged, expected);
    }
}

#[test]
fn test_reduce_scatter_then_all_gather_matches_all_reduce() {
    const BLOCK: usize = 2;
    let out = run_world(WORLD, |rank, ctx, comm| {
        let host: Vec<f32> = (0..BLOCK * WORLD).map(|i| (i + rank) as f32).collect();
        let src = DeviceBuffer::from_slice(ctx, &host).unwrap();
        let block = DeviceBuffer::zeroed(ctx, BLOCK * 4).unwrap();
        let gathered = DeviceBuffer::zeroed(ctx, BLOCK * WORLD * 4).unwrap();
        let reduced = DeviceBuffer::zeroed(ctx, BLOCK * WORLD * 4).unwrap();

        comm.reduce_scatter(src.at(0), block.at(0), BLOCK, DType::F32, ReduceOp::Sum)
            .unwrap();
        let mine = block.to_vec::<f32>().unwrap();
        comm.all_gather(block.at(0), gathered.at(0), BLOCK, DType::F32)
            .unwrap();
        comm.all_reduce(src.at(0), reduced.at(0), BLOCK * WORLD, DType::F32, ReduceOp::Sum)
            .unwrap();

        (
            mine,
            gathered.to_vec::<f32>().unwrap(),
            reduced.to_vec::<f32>().unwrap(),
        )
    });
    for (rank, (mine, gathered, reduced)) in out.into_iter().enumerate() {
        assert_eq!(gathered, reduced);
        assert_eq!(mine, reduced[rank * BLOCK..(rank + 1) * BLOCK].to_vec());
    }
}

#[test]
fn test_all_reduce_max_and_min() {
    let out = run_world(2, |rank, ctx, comm| {
        let host = if rank == 0 { [1i32, 9, -4] } else { [5i32, 2, -7] };
        let src = DeviceBuffer::from_slice(ctx, &host).unwrap();
        let max = DeviceBuffer::zeroed(ctx, 12).unwrap();
        let min = DeviceBuffer::zeroed(ctx, 12).unwrap();
        comm.all_reduce(src.at(0), max.at(0), 3, DType::I32, ReduceOp::Max)
            .unwrap();
        comm.all_reduce(src.at(0), min.at(0), 3, DType::I32, ReduceOp::Min)
            .unwrap();
        (max.to_vec::<i32>().unwrap(), min.to_vec::<i32>().unwrap())
    });
    for (max, min) in out {
        assert_eq!(max, vec![5, 9, -4]);
        assert_eq!(min, vec![1, 2, -7]);
    }
}

#[test]
fn test_root_outside_world() {
    let out = run_world(WORLD, |_, ctx, comm| {
        let buf = DeviceBuffer::zeroed(ctx, 16).unwrap();
        let before = ctx.queue().command_count();
        let err = comm.broadcast(buf.at(0), 4, DType::F32, WORLD).unwrap_err();
        (err.kind(), ctx.queue().command_count() - before)
    });
    for (kind, enqueued) in out {
        assert_eq!(kind, ErrorKind::InvalidValue);
        assert_eq!(enqueued, 0);
    }
}

#[test]
fn test_undersized_gather_destination() {
    let out = run_world(2, |_, ctx, comm| {
        let src = DeviceBuffer::zeroed(ctx, 8).unwrap();
        // Two ranks of 2 elements need 16 bytes.
        let dest = DeviceBuffer::zeroed(ctx, 12).unwrap();
        comm.all_gather(src.at(0), dest.at(0), 2, DType::F32).unwrap_err()
    });
    for err in out {
        assert!(matches!(err, Error::OutOfBounds { operand: "dest", .. }));
    }
}

#[test]
fn test_buffer_from_other_context() {
    let out = run_world(1, |_, ctx, comm| {
        let other = create_emulated_context();
        let src = DeviceBuffer::zeroed(&other, 8).unwrap();
        let dest = DeviceBuffer::zeroed(ctx, 8).unwrap();
        comm.all_reduce(src.at(0), dest.at(0), 2, DType::F32, ReduceOp::Sum)
            .unwrap_err()
    });
    assert!(matches!(out[0], Error::ContextMismatch { operand: "src" }));
}

#[test]
fn test_collective_is_fenced() {
    let out = run_world(2, |_, ctx, comm| {
        let src = DeviceBuffer::from_slice(ctx, &[1.0f32, 2.0]).unwrap();
        let dest = DeviceBuffer::zeroed(ctx, 8).unwrap();
        let start = ctx.queue().command_count();
        comm.all_reduce(src.at(0), dest.at(0), 2, DType::F32, ReduceOp::Sum)
            .unwrap();
        let cmds = ctx.queue().commands()[start..].to_vec();
        (cmds, src.hazard_state(), dest.hazard_state())
    });
    for (cmds, src, dest) in out {
        let at = cmds
            .iter()
            .position(|c| matches!(c, QueueCommand::Collective { name: "all_reduce" }))
            .expect("all_reduce enqueued");
        assert!(cmds[..at].iter().all(|c| matches!(c, QueueCommand::Wait { .. })));
        assert!(cmds[at + 1..].iter().all(|c| matches!(c, QueueCommand::Record { .. })));
        assert_eq!(src, HazardState { reader: true, writer: true });
        assert_eq!(dest, HazardState { reader: false, writer: true });
    }
}

#[test]
fn test_comm_error_tracks_last_collective() {
    let out = run_world(1, |_, ctx, comm| {
        let src = DeviceBuffer::from_slice(ctx, &[1.0f32, 2.0]).unwrap();
        let dest = DeviceBuffer::zeroed(ctx, 8).unwrap();

        ctx.queue().inject(Fault::Collective);
        let err = comm
            .all_reduce(src.at(0), dest.at(0), 2, DType::F32, ReduceOp::Sum)
            .unwrap_err();
        let failed = ctx.comm_error();

        comm.all_reduce(src.at(0), dest.at(0), 2, DType::F32, ReduceOp::Sum)
            .unwrap();
        (err.kind(), failed, ctx.comm_error(), dest.to_vec::<f32>().unwrap())
    });
    let (kind, failed, recovered, dest) = &out[0];
    assert_eq!(*kind, ErrorKind::Communication);
    assert_eq!(kind.code(), 8);
    assert_eq!(failed, "unhandled system error");
    assert_eq!(recovered, "no error");
    assert_eq!(dest, &vec![1.0, 2.0]);
}

#[test]
fn test_clique_id_round_trip() {
    let ctx = create_emulated_context();
    let id = CliqueId::generate(&ctx).unwrap();
    assert_eq!(CliqueId::from_bytes(*id.as_bytes()), id);
    assert_ne!(CliqueId::generate(&ctx).unwrap(), id);
    assert_eq!(ctx.comm_error(), "no error");
}

#[test]
fn test_rank_outside_world() {
    let ctx = create_emulated_context();
    let id = CliqueId::generate(&ctx).unwrap();
    let err = Communicator::new(&ctx, &id, 2, 2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
}

#[test]
fn test_broadcast_reads_on_every_rank() {
    let out = run_world(2, |rank, ctx, comm| {
        let array = DeviceBuffer::from_slice(ctx, &[rank as f32 + 1.0; 3]).unwrap();
        let before = array.hazard_state();
        comm.broadcast(array.at(0), 3, DType::F32, 0).unwrap();
        let after = array.hazard_state();
        (before, after, array.to_vec::<f32>().unwrap())
    });
    for (before, after, data) in out {
        assert_eq!(before, HazardState { reader: false, writer: true });
        assert_eq!(after, HazardState { reader: true, writer: true });
        assert_eq!(data, vec![1.0; 3]);
    }
}

#[test]
fn test_non_root_reduce_leaves_destination_untracked() {
    let out = run_world(2, |_, ctx, comm| {
        let src = DeviceBuffer::from_slice(ctx, &[1.0f64, 2.0]).unwrap();
        let dest = DeviceBuffer::from_slice(ctx, &[0.0f64; 2]).unwrap();
        let before = dest.hazard_state();
        comm.reduce(src.at(0), Some(dest.at(0)), 2, DType::F64, ReduceOp::Sum, 1)
            .unwrap();
        (before, dest.hazard_state(), src.hazard_state())
    });
    let (before, after, src) = out[0];
    assert_eq!(after, before);
    assert_eq!(src, HazardState { reader: true, writer: true });
    // The root's destination is written, never read.
    let (_, root_dest, _) = out[1];
    assert_eq!(root_dest, HazardState { reader: false, writer: true });
}
