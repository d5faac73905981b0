//! Strided layout metadata shared by device arrays and their adaptors.
//!
//! All layouts are column-major: the first index varies fastest.

use smallvec::SmallVec;

use devarray_traits::{DeviceError, Result};

/// Per-dimension extents.
pub type Dims = SmallVec<[usize; 4]>;

/// Per-dimension element strides.
pub type Strides = SmallVec<[isize; 4]>;

/// How an array's elements can be addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStyle {
    /// A flat logical index maps to storage in O(1).
    Linear,
    /// Elements must be addressed through N-dimensional coordinates.
    Cartesian,
}

impl IndexStyle {
    /// Style a kernel needs when both sides take part in one launch.
    #[inline]
    pub fn combine(self, other: IndexStyle) -> IndexStyle {
        match (self, other) {
            (IndexStyle::Linear, IndexStyle::Linear) => IndexStyle::Linear,
            _ => IndexStyle::Cartesian,
        }
    }
}

/// Column-major strides for `dims`.
pub fn col_major_strides(dims: &[usize]) -> Strides {
    let mut strides = Strides::with_capacity(dims.len());
    let mut step = 1isize;
    for &d in dims {
        strides.push(step);
        step *= d.max(1) as isize;
    }
    strides
}

/// Number of elements in an array of shape `dims`.
#[inline]
pub fn total_len(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// Shape, strides and base offset of an array in its storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StridedLayout {
    dims: Dims,
    strides: Strides,
    offset: usize,
}

impl StridedLayout {
    /// Dense column-major layout starting at offset 0.
    pub fn col_major(dims: &[usize]) -> Self {
        Self {
            dims: Dims::from_slice(dims),
            strides: col_major_strides(dims),
            offset: 0,
        }
    }

    /// Layout from raw parts.
    ///
    /// Callers are responsible for keeping every addressed element inside the
    /// underlying storage.
    pub fn from_parts(dims: Dims, strides: Strides, offset: usize) -> Self {
        debug_assert_eq!(dims.len(), strides.len());
        Self {
            dims,
            strides,
            offset,
        }
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        total_len(&self.dims)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(|&d| d == 0)
    }

    /// Whether the elements occupy one dense column-major run.
    ///
    /// Strides of extent-1 dimensions are irrelevant and ignored.
    pub fn is_contiguous(&self) -> bool {
        if self.is_empty() {
            return true;
        }
        let mut expected = 1isize;
        for (&d, &s) in self.dims.iter().zip(self.strides.iter()) {
            if d != 1 && s != expected {
                return false;
            }
            expected *= d as isize;
        }
        true
    }

    /// Addressing capability of this layout.
    #[inline]
    pub fn index_style(&self) -> IndexStyle {
        if self.is_contiguous() {
            IndexStyle::Linear
        } else {
            IndexStyle::Cartesian
        }
    }

    /// Storage offset of the element at `coords`, without bounds checks.
    #[inline]
    pub fn offset_of(&self, coords: &[usize]) -> usize {
        let mut idx = self.offset as isize;
        for (&c, &s) in coords.iter().zip(self.strides.iter()) {
            idx += c as isize * s;
        }
        idx as usize
    }

    /// Storage offset of the element at `index`, rejecting out-of-range indices.
    pub fn checked_offset_of(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.dims.len()
            || index.iter().zip(self.dims.iter()).any(|(&i, &d)| i >= d)
        {
            return Err(DeviceError::IndexOutOfBounds {
                index: index.iter().map(|&i| i as isize).collect(),
                dims: self.dims.to_vec(),
            });
        }
        Ok(self.offset_of(index))
    }

    /// Column-major coordinates of flat position `linear` within this shape.
    pub fn coords_of(&self, mut linear: usize, out: &mut [usize]) {
        for (c, &d) in out.iter_mut().zip(self.dims.iter()) {
            let d = d.max(1);
            *c = linear % d;
            linear /= d;
        }
    }

    /// Layout with dimensions reordered by `perm`.
    pub fn permute(&self, perm: &[usize]) -> Result<Self> {
        let rank = self.dims.len();
        let mut seen: SmallVec<[bool; 4]> = SmallVec::from_elem(false, rank);
        let valid = perm.len() == rank
            && perm.iter().all(|&p| {
                if p >= rank || seen[p] {
                    return false;
                }
                seen[p] = true;
                true
            });
        if !valid {
            return Err(DeviceError::InvalidPermutation {
                perm: perm.to_vec(),
                rank,
            });
        }
        Ok(Self {
            dims: perm.iter().map(|&p| self.dims[p]).collect(),
            strides: perm.iter().map(|&p| self.strides[p]).collect(),
            offset: self.offset,
        })
    }

    /// Layout viewing the same elements under a new shape.
    ///
    /// Only dense layouts can be reshaped.
    pub fn reshape(&self, dims: &[usize]) -> Result<Self> {
        let expected = total_len(dims);
        if expected != self.len() {
            return Err(DeviceError::LengthMismatch {
                expected,
                got: self.len(),
            });
        }
        if !self.is_contiguous() {
            return Err(DeviceError::NonContiguousReshape);
        }
        Ok(Self {
            dims: Dims::from_slice(dims),
            strides: col_major_strides(dims),
            offset: self.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_col_major_strides() {
        assert_eq!(col_major_strides(&[2, 3, 4]).as_slice(), &[1, 2, 6]);
        assert!(col_major_strides(&[]).is_empty());
    }

    #[test]
    fn test_contiguity() {
        let l = StridedLayout::col_major(&[3, 4]);
        assert!(l.is_contiguous());
        assert_eq!(l.index_style(), IndexStyle::Linear);

        let t = l.permute(&[1, 0]).unwrap();
        assert_eq!(t.dims(), &[4, 3]);
        assert_eq!(t.strides(), &[3, 1]);
        assert!(!t.is_contiguous());
        assert_eq!(t.index_style(), IndexStyle::Cartesian);
    }

    #[test]
    fn test_permute_with_unit_dim_stays_contiguous() {
        let l = StridedLayout::col_major(&[1, 5]);
        let t = l.permute(&[1, 0]).unwrap();
        assert!(t.is_contiguous());
    }

    #[test]
    fn test_permute_rejects_non_bijection() {
        let l = StridedLayout::col_major(&[2, 3, 4]);
        assert!(matches!(
            l.permute(&[0, 0, 1]),
            Err(DeviceError::InvalidPermutation { .. })
        ));
        assert!(l.permute(&[0, 1]).is_err());
        assert!(l.permute(&[0, 1, 3]).is_err());
    }

    #[test]
    fn test_offsets_and_coords() {
        let l = StridedLayout::col_major(&[2, 3, 4]);
        assert_eq!(l.offset_of(&[1, 2, 3]), 1 + 2 * 2 + 3 * 6);
        let mut coords = [0usize; 3];
        l.coords_of(23, &mut coords);
        assert_eq!(coords, [1, 2, 3]);
        l.coords_of(0, &mut coords);
        assert_eq!(coords, [0, 0, 0]);
    }

    #[test]
    fn test_checked_offset_bounds() {
        let l = StridedLayout::col_major(&[2, 3]);
        assert_eq!(l.checked_offset_of(&[1, 2]).unwrap(), 5);
        assert!(matches!(
            l.checked_offset_of(&[2, 0]),
            Err(DeviceError::IndexOutOfBounds { .. })
        ));
        assert!(l.checked_offset_of(&[0]).is_err());
    }

    #[test]
    fn test_reshape() {
        let l = StridedLayout::col_major(&[2, 6]);
        let r = l.reshape(&[3, 4]).unwrap();
        assert_eq!(r.strides(), &[1, 3]);
        assert!(matches!(
            l.reshape(&[5]),
            Err(DeviceError::LengthMismatch {
                expected: 5,
                got: 12
            })
        ));
        let t = l.permute(&[1, 0]).unwrap();
        assert!(matches!(
            t.reshape(&[12]),
            Err(DeviceError::NonContiguousReshape)
        ));
    }

    #[test]
    fn test_empty_layout() {
        let l = StridedLayout::col_major(&[0, 3]);
        assert!(l.is_empty());
        assert_eq!(l.len(), 0);
        assert!(l.is_contiguous());
    }

    #[test]
    fn test_style_combine() {
        use IndexStyle::*;
        assert_eq!(Linear.combine(Linear), Linear);
        assert_eq!(Linear.combine(Cartesian), Cartesian);
        assert_eq!(Cartesian.combine(Linear), Cartesian);
    }
}
