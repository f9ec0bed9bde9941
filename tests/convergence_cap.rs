mod util;
use kba_sweep::prelude::*;
use serial_test::serial;
use util::*;

#[test]
fn inner_cap_reports_non_convergence_without_failing() {
    let mut p = Problem::cube([4, 4, 4], [1, 1, 1], 4, 2);
    p.material.scatter_ratio = 0.9;
    p.iitm = 1;
    p.oitm = 1;
    let ctx = device();
    let mut solver = Solver::new(&p, &ctx, &NoComm).unwrap();
    let summary = solver.run().unwrap();
    assert!(!summary.converged);
    assert_eq!((summary.outers, summary.inners), (1, 1));
    assert!(summary.final_diff > p.outer_tolerance());
    assert!(summary.flux_linf.is_finite() && summary.flux_linf > 0.0);
    assert!(summary.to_string().contains("no (iteration cap)"));
}

#[test]
fn generous_caps_converge() {
    let mut p = Problem::cube([4, 4, 4], [1, 1, 1], 4, 2);
    p.material.scatter_ratio = 0.9;
    p.iitm = 200;
    p.oitm = 50;
    let ctx = device();
    let mut solver = Solver::new(&p, &ctx, &NoComm).unwrap();
    let summary = solver.run().unwrap();
    assert!(summary.converged, "{summary}");
    assert!(summary.inners >= 2);
    assert!(summary.final_diff <= p.outer_tolerance());
}

#[test]
#[serial]
fn every_rank_agrees_on_the_cap() {
    let mut p = Problem::cube([4, 4, 2], [2, 2, 1], 2, 1);
    p.material.scatter_ratio = 0.9;
    p.iitm = 1;
    p.oitm = 2;
    let summaries = run_ranks(&p, |comm, ctx| {
        Solver::new(&p, ctx, comm).unwrap().run().unwrap()
    });
    assert_eq!(summaries.len(), 4);
    for s in &summaries {
        assert!(!s.converged);
        assert_eq!((s.outers, s.inners), (2, 2));
        assert_eq!(s.final_diff, summaries[0].final_diff);
        assert_eq!(s.flux_linf, summaries[0].flux_linf);
    }
}

#[test]
fn more_time_steps_accumulate_iterations() {
    let mut p = Problem::cube([2, 2, 2], [1, 1, 1], 2, 1);
    p.iitm = 1;
    p.oitm = 1;
    p.dt = 0.25;
    p.tf = 1.0;
    let ctx = device();
    let summary = Solver::new(&p, &ctx, &NoComm).unwrap().run().unwrap();
    assert_eq!(summary.steps, 4);
    assert_eq!((summary.outers, summary.inners), (4, 4));
}
