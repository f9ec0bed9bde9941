//! Time-step, outer and inner iteration control for one rank.
//!
//! Each time step runs up to `oitm` outer iterations. An outer iteration
//! rebuilds the outer source and runs up to `iitm` inner iterations; an inner
//! iteration adds within-group scattering, sweeps all eight octants and
//! integrates the angular flux. Convergence is judged on the global maximum
//! relative change of the scalar flux. Reaching a cap is reported, never an
//! error.

use std::fmt;
use std::time::{Duration, Instant};

use crate::accel::buffers::Buffers;
use crate::accel::context::{Context, Transfer};
use crate::accel::kernels::ReduceFluxArgs;
use crate::accel::program::KernelArgs;
use crate::algs::communicator::{Communicator, max_or_inf};
use crate::algs::gather::gather_scalar_flux;
use crate::algs::source::{compute_inner_source, compute_outer_source};
use crate::algs::sweep::Sweeper;
use crate::data::layout::NdArray;
use crate::data::memory::Memory;
use crate::physics::Physics;
use crate::problem::{Problem, TOLR};
use crate::sweep_error::SweepError;
use crate::topology::planes::Planes;
use crate::topology::rank_info::RankInfo;

/// `max |φ/φ_old − 1|`, falling back to `|φ − φ_old|` where `|φ_old| ≤ TOLR`.
///
/// A NaN difference (an infinite or NaN flux on either side) counts as
/// infinitely far from converged.
pub fn max_relative_diff(new: &[f64], old: &[f64]) -> f64 {
    new.iter()
        .zip(old)
        .map(|(n, o)| {
            if o.abs() > TOLR {
                (n / o - 1.0).abs()
            } else {
                (n - o).abs()
            }
        })
        .fold(0.0, max_or_inf)
}

/// Result of one time step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepOutcome {
    pub outers: usize,
    pub inners: usize,
    pub converged: bool,
    /// Last outer relative change.
    pub diff: f64,
}

/// Run summary printed by rank 0.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub ranks: usize,
    pub steps: usize,
    pub outers: usize,
    pub inners: usize,
    /// Every time step met the outer tolerance.
    pub converged: bool,
    /// Outer relative change of the final iteration.
    pub final_diff: f64,
    /// Global L∞ norm of the final scalar flux.
    pub flux_linf: f64,
    pub setup: Duration,
    pub solve: Duration,
    pub sweep: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "kba-sweep: {} ranks, {} time steps", self.ranks, self.steps)?;
        writeln!(f, "  outer iterations : {}", self.outers)?;
        writeln!(f, "  inner iterations : {}", self.inners)?;
        writeln!(
            f,
            "  converged        : {}",
            if self.converged { "yes" } else { "no (iteration cap)" }
        )?;
        writeln!(f, "  final outer diff : {:.6e}", self.final_diff)?;
        writeln!(f, "  max scalar flux  : {:.12e}", self.flux_linf)?;
        write!(
            f,
            "  time (s)         : setup {:.4}  solve {:.4}  sweep {:.4}",
            self.setup.as_secs_f64(),
            self.solve.as_secs_f64(),
            self.sweep.as_secs_f64()
        )
    }
}

/// One rank's solver state.
pub struct Solver<'a, C: Communicator + ?Sized> {
    problem: &'a Problem,
    ctx: &'a Context,
    comm: &'a C,
    rank: RankInfo,
    planes: Planes,
    physics: Physics,
    memory: Memory,
    buffers: Buffers<'a>,
    setup: Duration,
    sweep_time: Duration,
}

impl<'a, C: Communicator + ?Sized> Solver<'a, C> {
    /// Validate, discover this rank's tile, allocate host and device memory
    /// and upload the constant tables.
    pub fn new(problem: &'a Problem, ctx: &'a Context, comm: &'a C) -> Result<Self, SweepError> {
        let start = Instant::now();
        problem.validate()?;
        let rank = RankInfo::new(problem, comm)?;
        let physics = Physics::new(problem)?;
        let mut memory = Memory::allocate(problem, &rank);
        memory.load_physics(problem, &physics)?;
        let buffers = Buffers::allocate(ctx, &memory)?;
        buffers.upload_tables(ctx, &memory)?;
        let planes = Planes::new(rank.nx, rank.ny, rank.nz);
        log::debug!(
            "rank {} at {:?}: {}x{}x{} cells, {} planes, {} host bytes",
            rank.rank,
            rank.coords,
            rank.nx,
            rank.ny,
            rank.nz,
            planes.len(),
            memory.footprint_bytes()
        );
        Ok(Self {
            problem,
            ctx,
            comm,
            rank,
            planes,
            physics,
            memory,
            buffers,
            setup: start.elapsed(),
            sweep_time: Duration::ZERO,
        })
    }

    pub fn rank(&self) -> &RankInfo {
        &self.rank
    }

    pub fn planes(&self) -> &Planes {
        &self.planes
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn buffers(&self) -> &Buffers<'a> {
        &self.buffers
    }

    pub fn physics(&self) -> &Physics {
        &self.physics
    }

    /// Run every time step.
    pub fn run(&mut self) -> Result<RunSummary, SweepError> {
        let start = Instant::now();
        let steps = self.problem.nsteps();
        let mut summary = RunSummary {
            ranks: self.comm.size(),
            steps,
            converged: true,
            setup: self.setup,
            ..RunSummary::default()
        };
        for step in 0..steps {
            let outcome = self.time_step(step)?;
            summary.outers += outcome.outers;
            summary.inners += outcome.inners;
            summary.converged &= outcome.converged;
            summary.final_diff = outcome.diff;
            self.buffers.swap_angular_flux();
            std::mem::swap(
                &mut self.memory.angular_flux_in,
                &mut self.memory.angular_flux_out,
            );
        }
        summary.flux_linf = self.comm.all_reduce_max(self.memory.scalar_flux.max_abs())?;
        summary.solve = start.elapsed();
        summary.sweep = self.sweep_time;
        Ok(summary)
    }

    /// Outer iterations of one time step.
    pub fn time_step(&mut self, step: usize) -> Result<StepOutcome, SweepError> {
        let mut outcome = StepOutcome::default();
        let tolerance = self.problem.outer_tolerance();
        for outer in 1..=self.problem.oitm {
            self.memory
                .old_outer_scalar_flux
                .copy_from(&self.memory.scalar_flux)?;
            compute_outer_source(&self.physics.material, &mut self.memory);
            let (inners, inner_converged) = self.inner_iterations()?;

            let local = max_relative_diff(
                self.memory.scalar_flux.as_slice(),
                self.memory.old_outer_scalar_flux.as_slice(),
            );
            let diff = self.comm.all_reduce_max(local)?;
            if self.problem.check_finite {
                self.check_finite()?;
            }
            outcome.outers = outer;
            outcome.inners += inners;
            outcome.diff = diff;
            log::debug!(
                "step {step} outer {outer}: {inners} inners, diff {diff:.3e}, inners converged: {inner_converged}"
            );
            if diff <= tolerance && inner_converged {
                outcome.converged = true;
                break;
            }
        }
        if !outcome.converged && self.rank.rank == 0 {
            log::warn!(
                "step {step}: outer iterations hit the cap of {} (diff {:.3e})",
                self.problem.oitm,
                outcome.diff
            );
        }
        Ok(outcome)
    }

    /// Inner iterations; returns the count and whether the tolerance was met.
    fn inner_iterations(&mut self) -> Result<(usize, bool), SweepError> {
        let epsi = self.problem.epsi;
        for inner in 1..=self.problem.iitm {
            self.memory
                .old_inner_scalar_flux
                .copy_from(&self.memory.scalar_flux)?;
            self.sweep_once()?;
            let local = max_relative_diff(
                self.memory.scalar_flux.as_slice(),
                self.memory.old_inner_scalar_flux.as_slice(),
            );
            let diff = self.comm.all_reduce_max(local)?;
            log::trace!("inner {inner}: diff {diff:.3e}");
            if diff <= epsi {
                return Ok((inner, true));
            }
        }
        Ok((self.problem.iitm, false))
    }

    /// One inner pass: source, upload, eight-octant sweep, angular
    /// integration and read-back of the scalar flux.
    pub fn sweep_once(&mut self) -> Result<(), SweepError> {
        let start = Instant::now();
        compute_inner_source(&self.physics.material, &mut self.memory);
        self.ctx.queue().enqueue_write(
            &self.buffers.source,
            self.memory.source.as_slice(),
            Transfer::Blocking,
        )?;
        Sweeper::new(self.problem, &self.rank, &self.planes, self.ctx, self.comm)
            .sweep(&mut self.memory, &self.buffers)?;
        self.reduce_flux()?;
        self.sweep_time += start.elapsed();
        Ok(())
    }

    fn reduce_flux(&mut self) -> Result<(), SweepError> {
        let b = &self.buffers;
        let args = ReduceFluxArgs {
            nang: self.problem.nang,
            ng: self.problem.ng,
            cmom: self.problem.cmom,
            num_cells: self.rank.num_cells(),
            weights: b.weights.clone(),
            scat_coeff: b.scat_coeff.clone(),
            angular_flux: b.angular_flux_out.clone(),
            scalar_flux: b.scalar_flux.clone(),
            moments: b.scalar_flux_moments.clone(),
        };
        let queue = self.ctx.queue();
        queue.enqueue_kernel(
            &self.ctx.kernels().reduce_flux,
            KernelArgs::ReduceFlux(args),
            [self.problem.ng, self.rank.num_cells()],
        )?;
        queue.read_into(&b.scalar_flux, self.memory.scalar_flux.as_mut_slice())?;
        if let (Some(device), Some(host)) = (
            &b.scalar_flux_moments,
            self.memory.scalar_flux_moments.as_mut(),
        ) {
            queue.read_into(device, host.as_mut_slice())?;
        }
        Ok(())
    }

    /// Fail on every rank if any rank holds a non-finite scalar flux. The
    /// reported cell is a global linear index.
    fn check_finite(&self) -> Result<(), SweepError> {
        let p = self.problem;
        let r = &self.rank;
        let [ng, nx, ny, _] = self.memory.scalar_flux.dims();
        let local = self
            .memory
            .scalar_flux
            .as_slice()
            .iter()
            .position(|v| !v.is_finite())
            .map(|at| {
                let (g, c) = (at % ng, at / ng);
                let (i, j, k) = (c % nx, (c / nx) % ny, c / (nx * ny));
                let cell = (r.ilb + i) + p.nx * ((r.jlb + j) + p.ny * (r.klb + k));
                (g * p.nx * p.ny * p.nz + cell) as f64
            })
            .unwrap_or(-1.0);
        let found = self.comm.all_reduce_max(local)?;
        if found < 0.0 {
            return Ok(());
        }
        let cells = p.nx * p.ny * p.nz;
        let code = found as usize;
        log::error!("non-finite scalar flux in group {} cell {}", code / cells, code % cells);
        Err(SweepError::NonFinite {
            group: code / cells,
            cell: code % cells,
        })
    }

    /// Global scalar flux on rank 0, `None` elsewhere.
    pub fn gather_scalar_flux(&self) -> Result<Option<NdArray<4>>, SweepError> {
        gather_scalar_flux(self.problem, &self.memory.scalar_flux, self.comm)
    }
}
