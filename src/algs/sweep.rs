//! KBA wavefront sweep of one rank over the eight octants.
//!
//! Per octant: receive upstream edges, enqueue one `sweep_plane` launch per
//! diagonal plane in ascending order, then read back and forward the
//! downstream edges. The in-order queue guarantees plane `p` finishes before
//! plane `p + 1` starts and before the edges are read back.

use crate::accel::buffers::Buffers;
use crate::accel::context::Context;
use crate::accel::kernels::{SweepGeometry, SweepPlaneArgs, SweepTables};
use crate::accel::program::KernelArgs;
use crate::algs::communicator::Communicator;
use crate::algs::halo::{recv_boundaries, send_boundaries};
use crate::data::memory::Memory;
use crate::problem::Problem;
use crate::sweep_error::SweepError;
use crate::topology::octant::Octant;
use crate::topology::planes::{Plane, Planes};
use crate::topology::rank_info::RankInfo;

/// Drives the sweep of one rank's tile.
pub struct Sweeper<'a, C: Communicator + ?Sized> {
    rank: &'a RankInfo,
    planes: &'a Planes,
    geometry: SweepGeometry,
    ctx: &'a Context,
    comm: &'a C,
}

impl<'a, C: Communicator + ?Sized> Sweeper<'a, C> {
    pub fn new(
        problem: &Problem,
        rank: &'a RankInfo,
        planes: &'a Planes,
        ctx: &'a Context,
        comm: &'a C,
    ) -> Self {
        debug_assert_eq!(planes.extents(), rank.extents());
        Self {
            rank,
            planes,
            geometry: SweepGeometry::new(problem, rank),
            ctx,
            comm,
        }
    }

    pub fn geometry(&self) -> &SweepGeometry {
        &self.geometry
    }

    /// Enqueue the launch for one plane of `octant`; global size
    /// `(nang·ng, cells in plane)`.
    pub fn sweep_plane(
        &self,
        octant: Octant,
        plane: &Plane,
        buffers: &Buffers<'_>,
    ) -> Result<(), SweepError> {
        let nag = self.geometry.nang * self.geometry.ng;
        let args = SweepPlaneArgs {
            geometry: self.geometry,
            octant,
            cells: plane.cells.clone(),
            tables: SweepTables {
                mu: buffers.mu.clone(),
                eta: buffers.eta.clone(),
                xi: buffers.xi.clone(),
                scat_coeff: buffers.scat_coeff.clone(),
                sigma_t: buffers.mat_cross_section.clone(),
                velocity_delta: buffers.velocity_delta.clone(),
            },
            source: buffers.source.clone(),
            flux_in: buffers.angular_flux_in.clone(),
            flux_out: buffers.angular_flux_out.clone(),
            edges: [
                buffers.flux_i.clone(),
                buffers.flux_j.clone(),
                buffers.flux_k.clone(),
            ],
        };
        log::trace!(
            "rank {}: octant {} plane {} ({} cells)",
            self.rank.rank,
            octant.index(),
            plane.index,
            plane.num_cells()
        );
        self.ctx.queue().enqueue_kernel(
            &self.ctx.kernels().sweep_plane,
            KernelArgs::SweepPlane(args),
            [nag, plane.num_cells()],
        )
    }

    /// Sweep one octant: halo in, every plane, halo out.
    pub fn sweep_octant(
        &self,
        octant: Octant,
        memory: &mut Memory,
        buffers: &Buffers<'_>,
    ) -> Result<(), SweepError> {
        recv_boundaries(octant, self.rank, memory, buffers, self.ctx, self.comm)?;
        for plane in self.planes.iter() {
            self.sweep_plane(octant, plane, buffers)?;
        }
        send_boundaries(octant, self.rank, memory, buffers, self.ctx, self.comm)?;
        log::debug!(
            "rank {}: octant {} swept over {} planes",
            self.rank.rank,
            octant.index(),
            self.planes.len()
        );
        Ok(())
    }

    /// All eight octants, strictly in sequence.
    pub fn sweep(&self, memory: &mut Memory, buffers: &Buffers<'_>) -> Result<(), SweepError> {
        for octant in Octant::all() {
            self.sweep_octant(octant, memory, buffers)?;
        }
        Ok(())
    }
}
