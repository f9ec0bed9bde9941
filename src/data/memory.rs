//! Host-side memory plan for one rank.
//!
//! Shapes (leftmost fastest):
//!
//! | array | shape |
//! |---|---|
//! | `angular_flux_in/out` | `[nang, ng, nx, ny, nz, 8]` |
//! | `flux_i` / `flux_j` / `flux_k` | `[nang, ng, ny, nz]` / `[nang, ng, nx, nz]` / `[nang, ng, nx, ny]` |
//! | `scalar_flux`, `old_*_scalar_flux` | `[ng, nx, ny, nz]` |
//! | `scalar_flux_moments` | `[cmom-1, ng, nx, ny, nz]`, absent when `cmom == 1` |
//! | `outer_source`, `source` | `[cmom, ng, nx, ny, nz]` |
//! | `mu`, `eta`, `xi`, `weights` | `[nang]` |
//! | `scat_coeff` | `[nang, cmom, 8]` |
//! | `mat_cross_section`, `velocity_delta` | `[ng]` |
//!
//! Each array is one contiguous allocation released when `Memory` drops.

use crate::data::layout::NdArray;
use crate::physics::Physics;
use crate::problem::Problem;
use crate::sweep_error::SweepError;
use crate::topology::octant::Octant;
use crate::topology::rank_info::{Axis, RankInfo};

#[derive(Debug)]
pub struct Memory {
    pub angular_flux_in: NdArray<6>,
    pub angular_flux_out: NdArray<6>,
    pub flux_i: NdArray<4>,
    pub flux_j: NdArray<4>,
    pub flux_k: NdArray<4>,
    pub scalar_flux: NdArray<4>,
    pub old_inner_scalar_flux: NdArray<4>,
    pub old_outer_scalar_flux: NdArray<4>,
    pub scalar_flux_moments: Option<NdArray<5>>,
    pub outer_source: NdArray<5>,
    pub source: NdArray<5>,
    pub mu: NdArray<1>,
    pub eta: NdArray<1>,
    pub xi: NdArray<1>,
    pub weights: NdArray<1>,
    pub scat_coeff: NdArray<3>,
    pub mat_cross_section: NdArray<1>,
    pub velocity_delta: NdArray<1>,
}

impl Memory {
    /// Allocate every array for `rank`'s tile.
    pub fn allocate(problem: &Problem, rank: &RankInfo) -> Self {
        let (nang, ng, cmom) = (problem.nang, problem.ng, problem.cmom);
        let (nx, ny, nz) = (rank.nx, rank.ny, rank.nz);
        Self {
            angular_flux_in: NdArray::zeros([nang, ng, nx, ny, nz, Octant::COUNT]),
            angular_flux_out: NdArray::zeros([nang, ng, nx, ny, nz, Octant::COUNT]),
            flux_i: NdArray::zeros([nang, ng, ny, nz]),
            flux_j: NdArray::zeros([nang, ng, nx, nz]),
            flux_k: NdArray::zeros([nang, ng, nx, ny]),
            scalar_flux: NdArray::zeros([ng, nx, ny, nz]),
            old_inner_scalar_flux: NdArray::zeros([ng, nx, ny, nz]),
            old_outer_scalar_flux: NdArray::zeros([ng, nx, ny, nz]),
            scalar_flux_moments: (cmom > 1).then(|| NdArray::zeros([cmom - 1, ng, nx, ny, nz])),
            outer_source: NdArray::zeros([cmom, ng, nx, ny, nz]),
            source: NdArray::zeros([cmom, ng, nx, ny, nz]),
            mu: NdArray::zeros([nang]),
            eta: NdArray::zeros([nang]),
            xi: NdArray::zeros([nang]),
            weights: NdArray::zeros([nang]),
            scat_coeff: NdArray::zeros([nang, cmom, Octant::COUNT]),
            mat_cross_section: NdArray::zeros([ng]),
            velocity_delta: NdArray::zeros([ng]),
        }
    }

    /// Copy the collaborator's tables into the host arrays.
    pub fn load_physics(&mut self, problem: &Problem, physics: &Physics) -> Result<(), SweepError> {
        let q = &physics.quadrature;
        let nang = problem.nang;
        let ng = problem.ng;
        self.mu = NdArray::from_vec([nang], q.mu.clone())?;
        self.eta = NdArray::from_vec([nang], q.eta.clone())?;
        self.xi = NdArray::from_vec([nang], q.xi.clone())?;
        self.weights = NdArray::from_vec([nang], q.weights.clone())?;
        self.scat_coeff.copy_from(&physics.scat_coeff)?;
        self.mat_cross_section = NdArray::from_vec([ng], physics.material.sigma_t.clone())?;
        self.velocity_delta =
            NdArray::from_vec([ng], physics.material.velocity_delta(problem.dt))?;
        Ok(())
    }

    /// Host mirror of the edge buffer perpendicular to `axis`.
    pub fn edge(&self, axis: Axis) -> &NdArray<4> {
        match axis {
            Axis::X => &self.flux_i,
            Axis::Y => &self.flux_j,
            Axis::Z => &self.flux_k,
        }
    }

    pub fn edge_mut(&mut self, axis: Axis) -> &mut NdArray<4> {
        match axis {
            Axis::X => &mut self.flux_i,
            Axis::Y => &mut self.flux_j,
            Axis::Z => &mut self.flux_k,
        }
    }

    /// Bytes held by this plan.
    pub fn footprint_bytes(&self) -> usize {
        let moments = self.scalar_flux_moments.as_ref().map_or(0, NdArray::len);
        let n = self.angular_flux_in.len()
            + self.angular_flux_out.len()
            + self.flux_i.len()
            + self.flux_j.len()
            + self.flux_k.len()
            + 3 * self.scalar_flux.len()
            + moments
            + self.outer_source.len()
            + self.source.len()
            + 4 * self.mu.len()
            + self.scat_coeff.len()
            + 2 * self.mat_cross_section.len();
        n * std::mem::size_of::<f64>()
    }
}
