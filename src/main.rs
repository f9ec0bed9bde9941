//! `kba-sweep <problem.json>`
//!
//! With `mpi-support`, run one process per rank under the MPI launcher.
//! Otherwise every rank of the decomposition runs as a thread of this process.
//! The device thread count comes from `KBA_SWEEP_THREADS`; log verbosity from
//! `RUST_LOG`.

use kba_sweep::prelude::*;

fn solve<C: Communicator + ?Sized>(
    problem: &Problem,
    ctx: &Context,
    comm: &C,
) -> Result<Option<RunSummary>, SweepError> {
    let mut solver = Solver::new(problem, ctx, comm)?;
    let summary = solver.run()?;
    Ok((comm.rank() == 0).then_some(summary))
}

#[cfg(feature = "mpi-support")]
fn run_ranks(problem: &Problem, device: DeviceConfig) -> Result<Option<RunSummary>, SweepError> {
    let comm = MpiComm::new()?;
    if comm.size() != problem.num_ranks() {
        return Err(SweepError::RankCountMismatch {
            expected: problem.num_ranks(),
            found: comm.size(),
        });
    }
    let comm = comm.with_grid(&CartGrid::new(problem))?;
    let ctx = Context::new(&device)?;
    solve(problem, &ctx, &comm)
}

#[cfg(not(feature = "mpi-support"))]
fn run_ranks(problem: &Problem, mut device: DeviceConfig) -> Result<Option<RunSummary>, SweepError> {
    let ranks = problem.num_ranks();
    if device.threads == 0 {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        device.threads = (cores / ranks).max(1);
    }
    log::info!("running {ranks} ranks as threads, {} device threads each", device.threads);
    let world = LocalWorld::new(ranks);
    let summaries = world.run(|comm| {
        let ctx = Context::new(&device)?;
        solve(problem, &ctx, comm)
    })?;
    Ok(summaries.into_iter().flatten().next())
}

fn run() -> Result<(), SweepError> {
    let Some(path) = std::env::args().nth(1) else {
        return Err(SweepError::Io {
            path: String::new(),
            message: "usage: kba-sweep <problem.json>".to_string(),
        });
    };
    let problem = Problem::from_path(&path)?;
    log::info!(
        "{}x{}x{} cells on {}x{}x{} ranks, nang={} ng={} cmom={}, {} steps",
        problem.nx,
        problem.ny,
        problem.nz,
        problem.npex,
        problem.npey,
        problem.npez,
        problem.nang,
        problem.ng,
        problem.cmom,
        problem.nsteps()
    );
    if let Some(summary) = run_ranks(&problem, DeviceConfig::from_env())? {
        println!("{summary}");
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run() {
        log::error!("{e}");
        std::process::exit(e.exit_code());
    }
}
