//! Cartesian rank decomposition and neighbor discovery.
//!
//! The rank grid `(npex, npey, npez)` is non-periodic and numbered like an MPI
//! Cartesian communicator without reordering: the last dimension varies
//! fastest. Each rank owns exactly one tile of `nx/npex × ny/npey × nz/npez`
//! cells.

use crate::algs::communicator::Communicator;
use crate::problem::Problem;
use crate::sweep_error::SweepError;

/// Spatial axis of the structured grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

/// Sweep direction along one axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Step {
    /// Increasing index (`+1`): upstream is the lower face.
    Plus,
    /// Decreasing index (`-1`): upstream is the upper face.
    Minus,
}

impl Step {
    #[inline]
    pub fn sign(self) -> i32 {
        match self {
            Step::Plus => 1,
            Step::Minus => -1,
        }
    }

    #[inline]
    pub fn is_reversed(self) -> bool {
        self == Step::Minus
    }
}

/// Neighbor across one face of a rank's tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Neighbor {
    /// The face lies on the global boundary.
    External,
    Rank(usize),
}

impl Neighbor {
    pub fn rank(self) -> Option<usize> {
        match self {
            Neighbor::External => None,
            Neighbor::Rank(r) => Some(r),
        }
    }
}

/// Shape of the rank grid with MPI Cartesian numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CartGrid {
    pub dims: [usize; 3],
}

impl CartGrid {
    pub fn new(problem: &Problem) -> Self {
        Self {
            dims: [problem.npex, problem.npey, problem.npez],
        }
    }

    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Coordinates of `rank` (last dimension fastest).
    pub fn coords_of(&self, rank: usize) -> [usize; 3] {
        let [_, py, pz] = self.dims;
        [rank / (py * pz), (rank / pz) % py, rank % pz]
    }

    /// Rank at `coords`.
    pub fn rank_of(&self, coords: [usize; 3]) -> usize {
        let [_, py, pz] = self.dims;
        (coords[0] * py + coords[1]) * pz + coords[2]
    }

    /// Step `coords` by ±1 along `axis`, clamping at the grid boundary.
    pub fn clamped_step(&self, coords: [usize; 3], axis: Axis, up: bool) -> [usize; 3] {
        let a = axis.index();
        let mut c = coords;
        if up {
            if c[a] + 1 < self.dims[a] {
                c[a] += 1;
            }
        } else if c[a] > 0 {
            c[a] -= 1;
        }
        c
    }
}

/// Per-rank subdomain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankInfo {
    pub rank: usize,
    /// `(rx, ry, rz)`.
    pub coords: [usize; 3],
    /// Local extents `(nx_r, ny_r, nz_r)`.
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub ilb: usize,
    pub iub: usize,
    pub jlb: usize,
    pub jub: usize,
    pub klb: usize,
    pub kub: usize,
    pub xup: Neighbor,
    pub xdown: Neighbor,
    pub yup: Neighbor,
    pub ydown: Neighbor,
    pub zup: Neighbor,
    pub zdown: Neighbor,
}

impl RankInfo {
    /// Build this rank's subdomain using the communicator's Cartesian topology.
    ///
    /// # Errors
    /// `RankCountMismatch` when the job size differs from `npex·npey·npez`.
    pub fn new<C: Communicator + ?Sized>(problem: &Problem, comm: &C) -> Result<Self, SweepError> {
        let grid = CartGrid::new(problem);
        if comm.size() != grid.size() {
            return Err(SweepError::RankCountMismatch {
                expected: grid.size(),
                found: comm.size(),
            });
        }
        let rank = comm.rank();
        let coords = comm.cart_coords(&grid, rank)?;
        let mut neighbours = [Neighbor::External; 6];
        for axis in Axis::ALL {
            for (slot, up) in [(0usize, true), (1usize, false)] {
                let c = grid.clamped_step(coords, axis, up);
                let r = comm.cart_rank(&grid, c)?;
                neighbours[2 * axis.index() + slot] = if r == rank {
                    Neighbor::External
                } else {
                    Neighbor::Rank(r)
                };
            }
        }
        Ok(Self::assemble(problem, rank, coords, neighbours))
    }

    /// Communicator-free construction for an arbitrary rank.
    pub fn for_rank(problem: &Problem, rank: usize) -> Self {
        let grid = CartGrid::new(problem);
        let coords = grid.coords_of(rank);
        let mut neighbours = [Neighbor::External; 6];
        for axis in Axis::ALL {
            for (slot, up) in [(0usize, true), (1usize, false)] {
                let c = grid.clamped_step(coords, axis, up);
                if c != coords {
                    neighbours[2 * axis.index() + slot] = Neighbor::Rank(grid.rank_of(c));
                }
            }
        }
        Self::assemble(problem, rank, coords, neighbours)
    }

    fn assemble(
        problem: &Problem,
        rank: usize,
        coords: [usize; 3],
        [xup, xdown, yup, ydown, zup, zdown]: [Neighbor; 6],
    ) -> Self {
        let nx = problem.nx / problem.npex;
        let ny = problem.ny / problem.npey;
        let nz = problem.nz / problem.npez;
        Self {
            rank,
            coords,
            nx,
            ny,
            nz,
            ilb: coords[0] * nx,
            iub: (coords[0] + 1) * nx,
            jlb: coords[1] * ny,
            jub: (coords[1] + 1) * ny,
            klb: coords[2] * nz,
            kub: (coords[2] + 1) * nz,
            xup,
            xdown,
            yup,
            ydown,
            zup,
            zdown,
        }
    }

    /// Number of local cells.
    pub fn num_cells(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Local extents as an array.
    pub fn extents(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    /// Neighbor on the `+1` side of `axis`.
    pub fn up(&self, axis: Axis) -> Neighbor {
        match axis {
            Axis::X => self.xup,
            Axis::Y => self.yup,
            Axis::Z => self.zup,
        }
    }

    /// Neighbor on the `-1` side of `axis`.
    pub fn down(&self, axis: Axis) -> Neighbor {
        match axis {
            Axis::X => self.xdown,
            Axis::Y => self.ydown,
            Axis::Z => self.zdown,
        }
    }

    /// Where edge fluxes come from when sweeping `axis` in direction `step`.
    pub fn upstream(&self, axis: Axis, step: Step) -> Neighbor {
        match step {
            Step::Plus => self.down(axis),
            Step::Minus => self.up(axis),
        }
    }

    /// Where edge fluxes go after sweeping `axis` in direction `step`.
    pub fn downstream(&self, axis: Axis, step: Step) -> Neighbor {
        match step {
            Step::Plus => self.up(axis),
            Step::Minus => self.down(axis),
        }
    }

    /// Whether the upstream face for `step` lies on the global boundary,
    /// judged from the bounds alone.
    pub fn upstream_face_is_global(&self, problem: &Problem, axis: Axis, step: Step) -> bool {
        let (lb, ub, n) = match axis {
            Axis::X => (self.ilb, self.iub, problem.nx),
            Axis::Y => (self.jlb, self.jub, problem.ny),
            Axis::Z => (self.klb, self.kub, problem.nz),
        };
        match step {
            Step::Plus => lb == 0,
            Step::Minus => ub == n,
        }
    }

    /// The two local extents of the face perpendicular to `axis`.
    pub fn face_extents(&self, axis: Axis) -> [usize; 2] {
        match axis {
            Axis::X => [self.ny, self.nz],
            Axis::Y => [self.nx, self.nz],
            Axis::Z => [self.nx, self.ny],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn corner_rank_has_external_lower_faces() {
        let p = Problem::cube([8, 8, 8], [2, 2, 2], 4, 1);
        let r = RankInfo::for_rank(&p, 0);
        assert_eq!(r.coords, [0, 0, 0]);
        assert_eq!(r.xdown, Neighbor::External);
        assert_eq!(r.ydown, Neighbor::External);
        assert_eq!(r.zdown, Neighbor::External);
        assert_eq!(r.xup, Neighbor::Rank(4));
        assert_eq!(r.yup, Neighbor::Rank(2));
        assert_eq!(r.zup, Neighbor::Rank(1));
        assert_eq!((r.ilb, r.iub), (0, 4));
        assert!(r.upstream_face_is_global(&p, Axis::X, Step::Plus));
        assert!(!r.upstream_face_is_global(&p, Axis::X, Step::Minus));
    }

    #[test]
    fn upstream_and_downstream_follow_step() {
        let p = Problem::cube([8, 4, 4], [2, 1, 1], 4, 1);
        let r1 = RankInfo::for_rank(&p, 1);
        assert_eq!(r1.upstream(Axis::X, Step::Plus), Neighbor::Rank(0));
        assert_eq!(r1.downstream(Axis::X, Step::Plus), Neighbor::External);
        assert_eq!(r1.upstream(Axis::X, Step::Minus), Neighbor::External);
        assert_eq!(r1.downstream(Axis::X, Step::Minus), Neighbor::Rank(0));
        assert_eq!(r1.face_extents(Axis::X), [4, 4]);
    }

    proptest! {
        #[test]
        fn prop_decomposition_tiles_the_domain(
            px in 1usize..4, py in 1usize..4, pz in 1usize..4,
            cx in 1usize..4, cy in 1usize..4, cz in 1usize..4,
        ) {
            let p = Problem::cube([px * cx, py * cy, pz * cz], [px, py, pz], 1, 1);
            let mut owner = vec![usize::MAX; p.nx * p.ny * p.nz];
            let mut total = 0usize;
            for rank in 0..p.num_ranks() {
                let r = RankInfo::for_rank(&p, rank);
                total += r.num_cells();
                for k in r.klb..r.kub {
                    for j in r.jlb..r.jub {
                        for i in r.ilb..r.iub {
                            let g = i + p.nx * (j + p.ny * k);
                            prop_assert_eq!(owner[g], usize::MAX, "cell owned twice");
                            owner[g] = rank;
                        }
                    }
                }
                // Neighbor relation is symmetric.
                for axis in Axis::ALL {
                    if let Neighbor::Rank(n) = r.up(axis) {
                        prop_assert_eq!(RankInfo::for_rank(&p, n).down(axis), Neighbor::Rank(rank));
                    }
                }
            }
            prop_assert_eq!(total, p.nx * p.ny * p.nz);
            prop_assert!(owner.iter().all(|&o| o != usize::MAX));
        }

        #[test]
        fn prop_cart_numbering_roundtrips(px in 1usize..5, py in 1usize..5, pz in 1usize..5) {
            let grid = CartGrid { dims: [px, py, pz] };
            for rank in 0..grid.size() {
                prop_assert_eq!(grid.rank_of(grid.coords_of(rank)), rank);
            }
        }
    }
}
