//! Run under the MPI launcher with `--features mpi-support`; a plain
//! `cargo test` is a one-rank world.
#![cfg(feature = "mpi-support")]

use kba_sweep::prelude::*;

#[test]
fn halo_traffic_uses_the_cartesian_topology() {
    let comm = MpiComm::new().unwrap();
    let size = comm.size();
    let p = Problem::cube([2 * size, 2, 2], [size, 1, 1], 1, 1);
    assert!(!comm.has_topology());
    let comm = comm.with_grid(&CartGrid::new(&p)).unwrap();
    assert!(comm.has_topology());

    let info = RankInfo::new(&p, &comm).unwrap();
    assert_eq!(info.coords, [comm.rank(), 0, 0]);
    // forward along x: every rank but the last sends, every rank but the first receives
    let mut buf = [0.0; 3];
    if let Neighbor::Rank(from) = info.down(Axis::X) {
        comm.recv(from, &mut buf).unwrap();
        assert_eq!(buf, [from as f64; 3]);
    }
    if let Neighbor::Rank(to) = info.up(Axis::X) {
        comm.send(to, &[comm.rank() as f64; 3]).unwrap();
    }
    comm.barrier().unwrap();
}
