mod util;
use kba_sweep::prelude::*;
use util::*;

#[test]
fn one_inner_matches_the_serial_diamond_difference_sweep() {
    let mut p = Problem::cube([4, 4, 4], [1, 1, 1], 4, 1);
    p.material.sigma_t = 1.0;
    p.material.source = 1.0;
    let ctx = device();
    let mut solver = Solver::new(&p, &ctx, &NoComm).unwrap();
    let outcome = solver.time_step(0).unwrap();
    assert_eq!((outcome.outers, outcome.inners), (1, 1));

    let want = serial_reference(&p);
    let got = &solver.memory().scalar_flux;
    assert_eq!(got.dims(), [1, 4, 4, 4]);
    let diff = max_rel_diff(got.as_slice(), want.as_slice());
    assert!(diff < 1e-12, "max relative difference {diff:e}");
}

#[test]
fn several_groups_match_the_serial_sweep() {
    let p = Problem::cube([3, 5, 2], [1, 1, 1], 6, 3);
    let ctx = device();
    let mut solver = Solver::new(&p, &ctx, &NoComm).unwrap();
    solver.time_step(0).unwrap();
    let want = serial_reference(&p);
    let diff = max_rel_diff(solver.memory().scalar_flux.as_slice(), want.as_slice());
    assert!(diff < 1e-12, "max relative difference {diff:e}");
}

#[test]
fn interior_cells_see_more_flux_than_corners() {
    let p = Problem::cube([4, 4, 4], [1, 1, 1], 4, 1);
    let ctx = device();
    let mut solver = Solver::new(&p, &ctx, &NoComm).unwrap();
    solver.time_step(0).unwrap();
    let phi = &solver.memory().scalar_flux;
    assert!(phi[[0, 1, 1, 1]] > phi[[0, 0, 0, 0]]);
    // the problem is symmetric under reflection of every axis
    assert!((phi[[0, 0, 0, 0]] - phi[[0, 3, 3, 3]]).abs() < 1e-14);
    assert!((phi[[0, 1, 2, 1]] - phi[[0, 2, 1, 2]]).abs() < 1e-14);
}
