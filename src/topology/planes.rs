//! Diagonal plane decomposition of a rank's tile.
//!
//! Cells with equal `i + j + k` have no upwind dependency on one another, so
//! each plane is one parallel launch. The decomposition is shared by all eight
//! octants; reversed axes are handled by remapping indices inside the kernel.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use itertools::iproduct;
use static_assertions::assert_eq_size;

/// Local cell index `(i, j, k)` as stored in a plane's cell list.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
pub struct CellIndex {
    pub i: u32,
    pub j: u32,
    pub k: u32,
}

assert_eq_size!(CellIndex, [u32; 3]);

impl CellIndex {
    #[inline]
    pub fn new(i: usize, j: usize, k: usize) -> Self {
        Self {
            i: i as u32,
            j: j as u32,
            k: k as u32,
        }
    }

    #[inline]
    pub fn as_usize(self) -> [usize; 3] {
        [self.i as usize, self.j as usize, self.k as usize]
    }
}

/// One diagonal plane; the cell list is shared with in-flight launches.
#[derive(Clone, Debug)]
pub struct Plane {
    pub index: usize,
    pub cells: Arc<[CellIndex]>,
}

impl Plane {
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }
}

/// All planes of an `nx × ny × nz` tile, ordered by `i + j + k`.
#[derive(Clone, Debug)]
pub struct Planes {
    extents: [usize; 3],
    planes: Vec<Plane>,
}

impl Planes {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        let count = if nx == 0 || ny == 0 || nz == 0 {
            0
        } else {
            nx + ny + nz - 2
        };
        let mut lists: Vec<Vec<CellIndex>> = vec![Vec::new(); count];
        for (k, j, i) in iproduct!(0..nz, 0..ny, 0..nx) {
            lists[i + j + k].push(CellIndex::new(i, j, k));
        }
        let planes = lists
            .into_iter()
            .enumerate()
            .map(|(index, cells)| Plane {
                index,
                cells: cells.into(),
            })
            .collect();
        Self {
            extents: [nx, ny, nz],
            planes,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.planes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn extents(&self) -> [usize; 3] {
        self.extents
    }

    pub fn get(&self, p: usize) -> Option<&Plane> {
        self.planes.get(p)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plane> {
        self.planes.iter()
    }

    /// Σ |plane_p|.
    pub fn total_cells(&self) -> usize {
        self.planes.iter().map(Plane::num_cells).sum()
    }

    /// Widest plane; bounds the parallelism of a single launch.
    pub fn max_width(&self) -> usize {
        self.planes.iter().map(Plane::num_cells).max().unwrap_or(0)
    }
}

impl std::ops::Index<usize> for Planes {
    type Output = Plane;

    fn index(&self, p: usize) -> &Plane {
        &self.planes[p]
    }
}
