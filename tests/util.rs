#![allow(dead_code)]
use std::time::Duration;

use kba_sweep::prelude::*;

/// Device used by every test rank: two compute threads.
pub fn device() -> Context {
    Context::new(&DeviceConfig {
        device_index: 0,
        threads: 2,
    })
    .expect("host device")
}

/// Run `f` once per rank of `problem`'s decomposition, each on its own thread
/// with its own device context. Results come back in rank order.
pub fn run_ranks<T, F>(problem: &Problem, f: F) -> Vec<T>
where
    F: Fn(&LocalComm, &Context) -> T + Sync,
    T: Send,
{
    let world = LocalWorld::new(problem.num_ranks()).with_timeout(Duration::from_secs(30));
    std::thread::scope(|s| {
        let handles: Vec<_> = world
            .comms()
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || {
                    let ctx = device();
                    f(&comm, &ctx)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Full run on every rank; returns rank 0's summary and gathered scalar flux.
pub fn solve_gathered(problem: &Problem) -> (RunSummary, NdArray<4>) {
    run_ranks(problem, |comm, ctx| {
        let mut solver = Solver::new(problem, ctx, comm).expect("setup");
        let summary = solver.run().expect("run");
        let flux = solver.gather_scalar_flux().expect("gather");
        flux.map(|f| (summary, f))
    })
    .into_iter()
    .next()
    .flatten()
    .expect("rank 0 gathers the flux")
}

/// Largest relative difference, absolute where the reference is zero.
pub fn max_rel_diff(got: &[f64], want: &[f64]) -> f64 {
    assert_eq!(got.len(), want.len());
    got.iter()
        .zip(want)
        .map(|(g, w)| {
            if w.abs() > 0.0 {
                ((g - w) / w).abs()
            } else {
                (g - w).abs()
            }
        })
        .fold(0.0, f64::max)
}

/// Serial diamond-difference sweep of one inner iteration from zero flux:
/// isotropic source, vacuum boundaries, incoming angular flux zero.
/// Returns the scalar flux `[ng, nx, ny, nz]`.
pub fn serial_reference(problem: &Problem) -> NdArray<4> {
    assert_eq!(problem.num_ranks(), 1);
    let physics = Physics::new(problem).expect("physics");
    let q = &physics.quadrature;
    let m = &physics.material;
    let (nx, ny, nz, nang, ng) = (problem.nx, problem.ny, problem.nz, problem.nang, problem.ng);
    let [dx, dy, dz] = problem.spacing();
    let vdelt = m.velocity_delta(problem.dt);
    let mut phi = NdArray::zeros([ng, nx, ny, nz]);

    for oct in Octant::all() {
        let [si, sj, sk] = oct.steps();
        let order = |n: usize, s: Step| -> Vec<usize> {
            if s.is_reversed() {
                (0..n).rev().collect()
            } else {
                (0..n).collect()
            }
        };
        for g in 0..ng {
            for a in 0..nang {
                let cx = 2.0 * q.mu[a] / dx;
                let cy = 2.0 * q.eta[a] / dy;
                let cz = 2.0 * q.xi[a] / dz;
                let mut pi = vec![0.0; ny * nz];
                let mut pj = vec![0.0; nx * nz];
                let mut pk = vec![0.0; nx * ny];
                for &k in &order(nz, sk) {
                    for &j in &order(ny, sj) {
                        for &i in &order(nx, si) {
                            let (ii, jj, kk) = (j + ny * k, i + nx * k, i + nx * j);
                            let psi = (m.source[g] + cx * pi[ii] + cy * pj[jj] + cz * pk[kk])
                                / (m.sigma_t[g] + vdelt[g] + cx + cy + cz);
                            pi[ii] = 2.0 * psi - pi[ii];
                            pj[jj] = 2.0 * psi - pj[jj];
                            pk[kk] = 2.0 * psi - pk[kk];
                            phi[[g, i, j, k]] += q.weights[a] * psi;
                        }
                    }
                }
            }
        }
    }
    phi
}
