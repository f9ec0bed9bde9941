//! Edge-flux exchange with upstream and downstream neighbors of one octant.
//!
//! Payload along axis `a` is the full edge buffer perpendicular to `a`:
//! `nang · ng · A · B` doubles, `A` and `B` being the other two local
//! extents. Sender and receiver agree on the length by construction.

use crate::accel::buffers::Buffers;
use crate::accel::context::{Context, Transfer, Wait};
use crate::algs::communicator::Communicator;
use crate::data::memory::Memory;
use crate::sweep_error::SweepError;
use crate::topology::octant::Octant;
use crate::topology::rank_info::{Axis, Neighbor, RankInfo};

/// Doubles exchanged across the face perpendicular to `axis`.
pub fn edge_len(nang: usize, ng: usize, rank: &RankInfo, axis: Axis) -> usize {
    let [a, b] = rank.face_extents(axis);
    nang * ng * a * b
}

/// Fill the three device edge buffers for `octant`.
///
/// Faces on the global boundary get a `zero_buffer` launch (vacuum); every
/// other face blocks on the upstream neighbor, then uploads synchronously.
pub fn recv_boundaries<C: Communicator + ?Sized>(
    octant: Octant,
    rank: &RankInfo,
    memory: &mut Memory,
    buffers: &Buffers<'_>,
    ctx: &Context,
    comm: &C,
) -> Result<(), SweepError> {
    for axis in Axis::ALL {
        let device = buffers.edge(axis);
        match rank.upstream(axis, octant.step(axis)) {
            Neighbor::External => ctx.zero_buffer(device, device.len())?,
            Neighbor::Rank(peer) => {
                let host = memory.edge_mut(axis).as_mut_slice();
                comm.recv(peer, host)?;
                log::trace!(
                    "rank {}: octant {} received {} doubles on {} from rank {peer}",
                    rank.rank,
                    octant.index(),
                    host.len(),
                    axis.name()
                );
                ctx.queue().enqueue_write(device, host, Transfer::Blocking)?;
            }
        }
    }
    Ok(())
}

/// Read the edge buffers back and forward them downstream.
///
/// `flux_i` and `flux_j` are read non-blocking; the blocking `flux_k` read
/// drains the in-order queue past both, and the handles are waited before
/// anything is sent.
pub fn send_boundaries<C: Communicator + ?Sized>(
    octant: Octant,
    rank: &RankInfo,
    memory: &mut Memory,
    buffers: &Buffers<'_>,
    ctx: &Context,
    comm: &C,
) -> Result<(), SweepError> {
    let queue = ctx.queue();
    let pending_i = queue.enqueue_read(&buffers.flux_i);
    let pending_j = queue.enqueue_read(&buffers.flux_j);
    queue.read_into(&buffers.flux_k, memory.flux_k.as_mut_slice())?;

    for (axis, handle) in [(Axis::X, pending_i), (Axis::Y, pending_j)] {
        let data = handle.wait()?;
        let host = memory.edge_mut(axis).as_mut_slice();
        if data.len() != host.len() {
            return Err(SweepError::LengthMismatch {
                op: "read edge buffer",
                expected: host.len(),
                found: data.len(),
            });
        }
        host.copy_from_slice(&data);
    }

    for axis in Axis::ALL {
        if let Neighbor::Rank(peer) = rank.downstream(axis, octant.step(axis)) {
            let host = memory.edge(axis).as_slice();
            log::trace!(
                "rank {}: octant {} sending {} doubles on {} to rank {peer}",
                rank.rank,
                octant.index(),
                host.len(),
                axis.name()
            );
            comm.send(peer, host)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::context::DeviceConfig;
    use crate::algs::communicator::{LocalWorld, NoComm};
    use crate::problem::Problem;

    #[test]
    fn edge_lengths_use_the_other_two_extents() {
        let p = Problem::cube([8, 6, 4], [2, 3, 1], 3, 2);
        let r = RankInfo::for_rank(&p, 0);
        assert_eq!(edge_len(3, 2, &r, Axis::X), 3 * 2 * 2 * 4);
        assert_eq!(edge_len(3, 2, &r, Axis::Y), 3 * 2 * 4 * 4);
        assert_eq!(edge_len(3, 2, &r, Axis::Z), 3 * 2 * 4 * 2);
    }

    #[test]
    fn single_rank_zeroes_every_face() {
        let p = Problem::cube([3, 2, 2], [1, 1, 1], 2, 1);
        let r = RankInfo::for_rank(&p, 0);
        let mut m = Memory::allocate(&p, &r);
        let ctx = Context::new(&DeviceConfig::default()).unwrap();
        let b = Buffers::allocate(&ctx, &m).unwrap();
        for axis in Axis::ALL {
            let junk = vec![7.0; b.edge(axis).len()];
            ctx.queue()
                .enqueue_write(b.edge(axis), &junk, Transfer::Blocking)
                .unwrap();
        }
        for octant in Octant::all() {
            recv_boundaries(octant, &r, &mut m, &b, &ctx, &NoComm).unwrap();
            send_boundaries(octant, &r, &mut m, &b, &ctx, &NoComm).unwrap();
            for axis in Axis::ALL {
                assert!(m.edge(axis).as_slice().iter().all(|v| *v == 0.0));
            }
        }
    }

    #[test]
    fn downstream_neighbor_gets_the_edge() {
        let p = Problem::cube([4, 2, 2], [2, 1, 1], 2, 1);
        let world = LocalWorld::new(2);
        let ctx = Context::new(&DeviceConfig::default()).unwrap();
        let (r0, r1) = (RankInfo::for_rank(&p, 0), RankInfo::for_rank(&p, 1));
        let mut m0 = Memory::allocate(&p, &r0);
        let mut m1 = Memory::allocate(&p, &r1);
        let b0 = Buffers::allocate(&ctx, &m0).unwrap();
        let b1 = Buffers::allocate(&ctx, &m1).unwrap();

        let edge: Vec<f64> = (0..b0.flux_i.len()).map(|v| v as f64).collect();
        ctx.queue()
            .enqueue_write(&b0.flux_i, &edge, Transfer::Blocking)
            .unwrap();
        let octant = Octant::new(0);
        send_boundaries(octant, &r0, &mut m0, &b0, &ctx, &world.comm(0)).unwrap();
        recv_boundaries(octant, &r1, &mut m1, &b1, &ctx, &world.comm(1)).unwrap();
        ctx.finish().unwrap();

        let mut device = vec![0.0; b1.flux_i.len()];
        ctx.queue().read_into(&b1.flux_i, &mut device).unwrap();
        assert_eq!(device, edge);
        assert_eq!(m1.flux_i.as_slice(), edge.as_slice());
        assert_eq!(world.undelivered(), 0);
    }
}
