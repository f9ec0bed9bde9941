//! Typed multi-dimensional views over flat `f64` storage.
//!
//! Every array in the solver is stored with the **leftmost index varying
//! fastest** (angle-major). `Layout<N>` fixes the strides once at
//! construction so the rest of the crate never computes a linear index by
//! hand. Kernels rely on this order: `(angle, group)` is the fast axis of
//! every launch.

use std::ops::{Index, IndexMut};

use crate::sweep_error::SweepError;

/// Shape and strides of an `N`-dimensional, leftmost-fastest array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout<const N: usize> {
    dims: [usize; N],
    strides: [usize; N],
}

impl<const N: usize> Layout<N> {
    /// Build the layout for `dims`, leftmost dimension contiguous.
    pub fn new(dims: [usize; N]) -> Self {
        let mut strides = [0usize; N];
        let mut acc = 1usize;
        for (stride, &d) in strides.iter_mut().zip(dims.iter()) {
            *stride = acc;
            acc *= d;
        }
        Self { dims, strides }
    }

    #[inline]
    pub fn dims(&self) -> [usize; N] {
        self.dims
    }

    #[inline]
    pub fn strides(&self) -> [usize; N] {
        self.strides
    }

    /// Total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Linear offset of `idx`. Bounds are checked in debug builds only.
    #[inline]
    pub fn offset(&self, idx: [usize; N]) -> usize {
        let mut off = 0usize;
        for d in 0..N {
            debug_assert!(
                idx[d] < self.dims[d],
                "index {} out of bounds for dimension {} of extent {}",
                idx[d],
                d,
                self.dims[d]
            );
            off += idx[d] * self.strides[d];
        }
        off
    }

    /// Checked variant of [`offset`](Self::offset).
    pub fn try_offset(&self, idx: [usize; N]) -> Option<usize> {
        idx.iter()
            .zip(self.dims.iter())
            .all(|(i, d)| i < d)
            .then(|| self.offset(idx))
    }
}

/// Owned, contiguous `N`-dimensional array of `f64` with a fixed [`Layout`].
#[derive(Clone, Debug, PartialEq)]
pub struct NdArray<const N: usize> {
    layout: Layout<N>,
    data: Vec<f64>,
}

impl<const N: usize> NdArray<N> {
    /// One contiguous allocation of `dims.product()` elements.
    pub fn zeros(dims: [usize; N]) -> Self {
        let layout = Layout::new(dims);
        Self {
            data: vec![0.0; layout.len()],
            layout,
        }
    }

    /// Wrap existing data; `data.len()` must match the layout.
    pub fn from_vec(dims: [usize; N], data: Vec<f64>) -> Result<Self, SweepError> {
        let layout = Layout::new(dims);
        if data.len() != layout.len() {
            return Err(SweepError::LengthMismatch {
                op: "NdArray::from_vec",
                expected: layout.len(),
                found: data.len(),
            });
        }
        Ok(Self { layout, data })
    }

    #[inline]
    pub fn layout(&self) -> &Layout<N> {
        &self.layout
    }

    #[inline]
    pub fn dims(&self) -> [usize; N] {
        self.layout.dims()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn fill(&mut self, v: f64) {
        self.data.fill(v);
    }

    /// Copy every element of `other`; shapes must agree.
    pub fn copy_from(&mut self, other: &NdArray<N>) -> Result<(), SweepError> {
        if self.layout != other.layout {
            return Err(SweepError::LengthMismatch {
                op: "NdArray::copy_from",
                expected: self.len(),
                found: other.len(),
            });
        }
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// Largest absolute value (the L∞ norm); zero for an empty array.
    /// L∞ norm; a NaN entry makes it `+∞`.
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0f64, |m, v| {
            if v.is_nan() { f64::INFINITY } else { m.max(v.abs()) }
        })
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }
}

impl<const N: usize> Index<[usize; N]> for NdArray<N> {
    type Output = f64;

    #[inline]
    fn index(&self, idx: [usize; N]) -> &f64 {
        &self.data[self.layout.offset(idx)]
    }
}

impl<const N: usize> IndexMut<[usize; N]> for NdArray<N> {
    #[inline]
    fn index_mut(&mut self, idx: [usize; N]) -> &mut f64 {
        let off = self.layout.offset(idx);
        &mut self.data[off]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leftmost_dimension_is_contiguous() {
        let l = Layout::new([4, 2, 3]);
        assert_eq!(l.strides(), [1, 4, 8]);
        assert_eq!(l.len(), 24);
        assert_eq!(l.offset([0, 0, 0]), 0);
        assert_eq!(l.offset([1, 0, 0]), 1);
        assert_eq!(l.offset([0, 1, 0]), 4);
        assert_eq!(l.offset([3, 1, 2]), 3 + 4 + 16);
        assert_eq!(l.try_offset([4, 0, 0]), None);
    }

    #[test]
    fn angular_flux_shape_puts_octant_last() {
        // [nang, ng, nx, ny, nz, 8]
        let l = Layout::new([3, 2, 2, 2, 2, 8]);
        assert_eq!(l.offset([0, 0, 0, 0, 0, 1]), 3 * 2 * 2 * 2 * 2);
        assert_eq!(l.offset([2, 1, 0, 0, 0, 0]), 2 + 3);
    }

    #[test]
    fn index_roundtrips_through_storage() {
        let mut a = NdArray::zeros([2, 3]);
        a[[1, 2]] = 7.0;
        assert_eq!(a.as_slice()[1 + 2 * 2], 7.0);
        assert_eq!(a.max_abs(), 7.0);
        let mut b = NdArray::zeros([2, 3]);
        b.copy_from(&a).unwrap();
        assert_eq!(b, a);
        let c = NdArray::<2>::zeros([3, 2]);
        assert!(b.copy_from(&c).is_err());
        b[[0, 1]] = f64::NAN;
        assert_eq!(b.max_abs(), f64::INFINITY);
    }

    #[test]
    fn from_vec_checks_length() {
        assert!(NdArray::from_vec([2, 2], vec![0.0; 3]).is_err());
        let a = NdArray::from_vec([2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(a[[1, 1]], 4.0);
    }
}
