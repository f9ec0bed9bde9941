//! Octants of the direction sphere and their sweep steps.

use crate::topology::rank_info::{Axis, Step};

/// One of the eight sign combinations of `(μ, η, ξ)`.
///
/// Bit 0, 1 and 2 select the step along `x`, `y` and `z`: a clear bit sweeps
/// the axis forward (`+1`), a set bit backward (`-1`). Octant 0 therefore
/// sweeps every axis forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Octant(u8);

impl Octant {
    pub const COUNT: usize = 8;

    /// # Panics
    /// Panics if `index >= 8`.
    pub fn new(index: usize) -> Self {
        assert!(index < Self::COUNT, "octant index {index} out of range");
        Octant(index as u8)
    }

    /// All octants in sweep order.
    pub fn all() -> impl Iterator<Item = Octant> {
        (0..Self::COUNT as u8).map(Octant)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn step(self, axis: Axis) -> Step {
        if self.0 & (1 << axis.index()) == 0 {
            Step::Plus
        } else {
            Step::Minus
        }
    }

    /// `(istep, jstep, kstep)`.
    #[inline]
    pub fn steps(self) -> [Step; 3] {
        [self.step(Axis::X), self.step(Axis::Y), self.step(Axis::Z)]
    }

    /// Signs applied to the first-octant cosines.
    #[inline]
    pub fn signs(self) -> [f64; 3] {
        self.steps().map(|s| s.sign() as f64)
    }

    /// Map a plane-local index to the real local index for this octant.
    #[inline]
    pub fn remap(self, [i, j, k]: [usize; 3], [nx, ny, nz]: [usize; 3]) -> [usize; 3] {
        let [si, sj, sk] = self.steps();
        [
            if si.is_reversed() { nx - 1 - i } else { i },
            if sj.is_reversed() { ny - 1 - j } else { j },
            if sk.is_reversed() { nz - 1 - k } else { k },
        ]
    }
}
