//! Compute kernels.
//!
//! Each kernel runs over a two-dimensional global range on the device pool.
//! `sweep_plane` uses `(angle·group, cell-in-plane)`: work items of one plane
//! read and write disjoint angular-flux entries and disjoint edge entries, so
//! the results are computed in parallel and scattered afterwards.

use std::sync::Arc;

use rayon::prelude::*;

use crate::accel::context::DeviceBuffer;
use crate::accel::program::{KernelArgs, NdRange};
use crate::accel::status;
use crate::data::layout::Layout;
use crate::problem::Problem;
use crate::sweep_error::SweepError;
use crate::topology::octant::Octant;
use crate::topology::planes::CellIndex;
use crate::topology::rank_info::RankInfo;

fn invalid_args(op: &'static str) -> SweepError {
    SweepError::Device {
        op,
        code: status::INVALID_KERNEL_ARGS,
    }
}

fn invalid_range(op: &'static str) -> SweepError {
    SweepError::Device {
        op,
        code: status::INVALID_GLOBAL_WORK_SIZE,
    }
}

#[derive(Debug)]
pub struct ZeroArgs {
    pub buf: DeviceBuffer,
    pub n: usize,
}

/// Write zeros to the first `n` elements of a buffer.
pub fn zero_buffer(args: &KernelArgs, global: NdRange) -> Result<(), SweepError> {
    let KernelArgs::Zero(ZeroArgs { buf, n }) = args else {
        return Err(invalid_args("zero_buffer"));
    };
    if global != [*n, 1] {
        return Err(invalid_range("zero_buffer"));
    }
    if *n > buf.len() {
        return Err(SweepError::Device {
            op: "zero_buffer",
            code: status::INVALID_VALUE,
        });
    }
    buf.write()[..*n].par_iter_mut().for_each(|v| *v = 0.0);
    Ok(())
}

/// Sizes and spacing shared by every plane launch of a sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepGeometry {
    pub nang: usize,
    pub ng: usize,
    pub cmom: usize,
    /// Local `(nx, ny, nz)`.
    pub extents: [usize; 3],
    /// `(2/dx, 2/dy, 2/dz)`.
    pub dd: [f64; 3],
}

impl SweepGeometry {
    pub fn new(problem: &Problem, rank: &RankInfo) -> Self {
        Self {
            nang: problem.nang,
            ng: problem.ng,
            cmom: problem.cmom,
            extents: rank.extents(),
            dd: problem.spacing().map(|h| 2.0 / h),
        }
    }
}

/// Read-only tables of a sweep launch.
#[derive(Clone, Debug)]
pub struct SweepTables {
    pub mu: DeviceBuffer,
    pub eta: DeviceBuffer,
    pub xi: DeviceBuffer,
    pub scat_coeff: DeviceBuffer,
    pub sigma_t: DeviceBuffer,
    pub velocity_delta: DeviceBuffer,
}

#[derive(Debug)]
pub struct SweepPlaneArgs {
    pub geometry: SweepGeometry,
    pub octant: Octant,
    pub cells: Arc<[CellIndex]>,
    pub tables: SweepTables,
    pub source: DeviceBuffer,
    pub flux_in: DeviceBuffer,
    pub flux_out: DeviceBuffer,
    /// `flux_i`, `flux_j`, `flux_k`.
    pub edges: [DeviceBuffer; 3],
}

struct CellUpdate {
    psi_at: usize,
    psi: f64,
    edge_at: [usize; 3],
    edge: [f64; 3],
}

/// Diamond-difference update of every `(angle, group, cell)` of one plane.
pub fn sweep_plane(args: &KernelArgs, global: NdRange) -> Result<(), SweepError> {
    let KernelArgs::SweepPlane(a) = args else {
        return Err(invalid_args("sweep_plane"));
    };
    let SweepGeometry {
        nang,
        ng,
        cmom,
        extents,
        dd,
    } = a.geometry;
    let [nx, ny, nz] = extents;
    let nag = nang * ng;
    if global != [nag, a.cells.len()] {
        return Err(invalid_range("sweep_plane"));
    }

    let psi_l = Layout::new([nang, ng, nx, ny, nz, Octant::COUNT]);
    let src_l = Layout::new([cmom, ng, nx, ny, nz]);
    let ec_l = Layout::new([nang, cmom, Octant::COUNT]);
    let edge_l = [
        Layout::new([nang, ng, ny, nz]),
        Layout::new([nang, ng, nx, nz]),
        Layout::new([nang, ng, nx, ny]),
    ];
    let oct = a.octant.index();

    let mut flux_out = a.flux_out.write();
    let mut fi = a.edges[0].write();
    let mut fj = a.edges[1].write();
    let mut fk = a.edges[2].write();
    if flux_out.len() != psi_l.len()
        || [fi.len(), fj.len(), fk.len()] != edge_l.map(|l| l.len())
    {
        return Err(invalid_args("sweep_plane"));
    }

    let updates: Vec<CellUpdate> = {
        let mu = a.tables.mu.read();
        let eta = a.tables.eta.read();
        let xi = a.tables.xi.read();
        let ec = a.tables.scat_coeff.read();
        let sigma_t = a.tables.sigma_t.read();
        let vdelt = a.tables.velocity_delta.read();
        let source = a.source.read();
        let flux_in = a.flux_in.read();
        let (mu, eta, xi, ec) = (&mu[..], &eta[..], &xi[..], &ec[..]);
        let (sigma_t, vdelt, source, flux_in) = (&sigma_t[..], &vdelt[..], &source[..], &flux_in[..]);
        let edges_in: [&[f64]; 3] = [&fi[..], &fj[..], &fk[..]];
        let cells = &a.cells[..];
        let octant = a.octant;

        (0..nag * cells.len())
            .into_par_iter()
            .map(|w| {
                let (ag, c) = (w % nag, w / nag);
                let (ang, g) = (ag % nang, ag / nang);
                let [i, j, k] = octant.remap(cells[c].as_usize(), extents);

                let mut s = source[src_l.offset([0, g, i, j, k])];
                for l in 1..cmom {
                    s += ec[ec_l.offset([ang, l, oct])] * source[src_l.offset([l, g, i, j, k])];
                }

                let edge_at = [
                    edge_l[0].offset([ang, g, j, k]),
                    edge_l[1].offset([ang, g, i, k]),
                    edge_l[2].offset([ang, g, i, j]),
                ];
                let coeff = [mu[ang] * dd[0], eta[ang] * dd[1], xi[ang] * dd[2]];
                let psi_at = psi_l.offset([ang, g, i, j, k, oct]);

                let mut psi = s;
                for d in 0..3 {
                    psi += coeff[d] * edges_in[d][edge_at[d]];
                }
                let vd = vdelt[g];
                if vd != 0.0 {
                    psi += vd * flux_in[psi_at];
                }
                psi /= sigma_t[g] + vd + coeff[0] + coeff[1] + coeff[2];

                let edge = [0, 1, 2].map(|d| 2.0 * psi - edges_in[d][edge_at[d]]);
                CellUpdate {
                    psi_at,
                    psi,
                    edge_at,
                    edge,
                }
            })
            .collect()
    };

    for u in updates {
        flux_out[u.psi_at] = u.psi;
        fi[u.edge_at[0]] = u.edge[0];
        fj[u.edge_at[1]] = u.edge[1];
        fk[u.edge_at[2]] = u.edge[2];
    }
    Ok(())
}

#[derive(Debug)]
pub struct ReduceFluxArgs {
    pub nang: usize,
    pub ng: usize,
    pub cmom: usize,
    pub num_cells: usize,
    pub weights: DeviceBuffer,
    pub scat_coeff: DeviceBuffer,
    pub angular_flux: DeviceBuffer,
    pub scalar_flux: DeviceBuffer,
    pub moments: Option<DeviceBuffer>,
}

/// Angular integration of the outgoing angular flux over `(group, cell)`.
///
/// Summation runs octant-major, then angle, so results do not depend on the
/// rank layout.
pub fn reduce_flux(args: &KernelArgs, global: NdRange) -> Result<(), SweepError> {
    let KernelArgs::ReduceFlux(a) = args else {
        return Err(invalid_args("reduce_flux"));
    };
    let (nang, ng, cmom, ncell) = (a.nang, a.ng, a.cmom, a.num_cells);
    if global != [ng, ncell] {
        return Err(invalid_range("reduce_flux"));
    }
    let psi_l = Layout::new([nang, ng, ncell, Octant::COUNT]);
    let ec_l = Layout::new([nang, cmom, Octant::COUNT]);

    let w = a.weights.read();
    let ec = a.scat_coeff.read();
    let psi = a.angular_flux.read();
    if psi.len() != psi_l.len() {
        return Err(invalid_args("reduce_flux"));
    }
    let (w, ec, psi) = (&w[..], &ec[..], &psi[..]);

    {
        let mut phi = a.scalar_flux.write();
        if phi.len() != ng * ncell {
            return Err(invalid_args("reduce_flux"));
        }
        phi.par_chunks_mut(ng).enumerate().for_each(|(c, out)| {
            for (g, v) in out.iter_mut().enumerate() {
                let mut acc = 0.0;
                for oct in 0..Octant::COUNT {
                    for ang in 0..nang {
                        acc += w[ang] * psi[psi_l.offset([ang, g, c, oct])];
                    }
                }
                *v = acc;
            }
        });
    }

    if let Some(moments) = &a.moments {
        let nm = cmom - 1;
        let mut m = moments.write();
        if m.len() != nm * ng * ncell {
            return Err(invalid_args("reduce_flux"));
        }
        m.par_chunks_mut(nm * ng).enumerate().for_each(|(c, out)| {
            for g in 0..ng {
                for l in 1..cmom {
                    let mut acc = 0.0;
                    for oct in 0..Octant::COUNT {
                        for ang in 0..nang {
                            acc += ec[ec_l.offset([ang, l, oct])]
                                * w[ang]
                                * psi[psi_l.offset([ang, g, c, oct])];
                        }
                    }
                    out[(l - 1) + nm * g] = acc;
                }
            }
        });
    }
    Ok(())
}
