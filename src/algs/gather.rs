//! Assemble the global scalar flux on rank 0.

use itertools::iproduct;

use crate::algs::communicator::Communicator;
use crate::data::layout::{Layout, NdArray};
use crate::problem::Problem;
use crate::sweep_error::SweepError;
use crate::topology::rank_info::RankInfo;

/// Gather every rank's `[ng, nx_r, ny_r, nz_r]` scalar flux into the global
/// `[ng, nx, ny, nz]` array on rank 0. Other ranks get `None`.
pub fn gather_scalar_flux<C: Communicator + ?Sized>(
    problem: &Problem,
    local: &NdArray<4>,
    comm: &C,
) -> Result<Option<NdArray<4>>, SweepError> {
    let Some(all) = comm.gather_to_root(local.as_slice())? else {
        return Ok(None);
    };
    let per_rank = local.len();
    let ranks = comm.size();
    if all.len() != per_rank * ranks {
        return Err(SweepError::LengthMismatch {
            op: "gather scalar flux",
            expected: per_rank * ranks,
            found: all.len(),
        });
    }

    let ng = problem.ng;
    let mut global = NdArray::zeros([ng, problem.nx, problem.ny, problem.nz]);
    for (r, chunk) in all.chunks_exact(per_rank).enumerate() {
        let info = RankInfo::for_rank(problem, r);
        let view = Layout::new([ng, info.nx, info.ny, info.nz]);
        for (k, j, i, g) in iproduct!(0..info.nz, 0..info.ny, 0..info.nx, 0..ng) {
            global[[g, info.ilb + i, info.jlb + j, info.klb + k]] = chunk[view.offset([g, i, j, k])];
        }
    }
    Ok(Some(global))
}
