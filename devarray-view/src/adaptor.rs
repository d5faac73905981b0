//! Transparent adaptor layers over device-resident values.
//!
//! Each adaptor shares its parent's storage and backend and only rewrites
//! the layout. Adaptors are generic over the parent, so they nest:
//! `OffsetView<PermutedDims<&DeviceArray<T>>>` is still device-resident.

use smallvec::SmallVec;

use devarray_traits::{BackendHandle, DeviceError, Result};

use crate::guard::assert_scalar_allowed;
use crate::layout::{IndexStyle, StridedLayout};
use crate::residency::{device_residency, Classify, DeviceResident, DeviceResidentMut, Residency};

macro_rules! impl_adaptor_residency {
    ($name:ident) => {
        impl<A: DeviceResident> DeviceResident for $name<A> {
            type Elem = A::Elem;

            #[inline]
            fn backend(&self) -> &BackendHandle {
                self.parent.backend()
            }

            #[inline]
            fn layout(&self) -> &StridedLayout {
                &self.layout
            }

            #[inline]
            fn as_ptr(&self) -> *const Self::Elem {
                self.parent.as_ptr()
            }
        }

        impl<A: DeviceResidentMut> DeviceResidentMut for $name<A> {
            #[inline]
            fn as_mut_ptr(&mut self) -> *mut Self::Elem {
                self.parent.as_mut_ptr()
            }
        }

        impl<A: DeviceResident> Classify for $name<A> {
            fn residency(&self) -> Residency<'_> {
                device_residency(self)
            }
        }
    };
}

// ============================================================================
// OffsetView
// ============================================================================

/// Same elements with a shifted index origin.
///
/// `at(origin)` addresses the parent's first element. The shift only affects
/// host-side element access; kernels see the parent's positions.
#[derive(Debug, Clone)]
pub struct OffsetView<A> {
    parent: A,
    layout: StridedLayout,
    origin: SmallVec<[isize; 4]>,
}

impl<A: DeviceResident> OffsetView<A> {
    pub fn new(parent: A, origin: &[isize]) -> Result<Self> {
        if origin.len() != parent.layout().ndim() {
            return Err(DeviceError::LengthMismatch {
                expected: parent.layout().ndim(),
                got: origin.len(),
            });
        }
        Ok(Self {
            layout: parent.layout().clone(),
            origin: SmallVec::from_slice(origin),
            parent,
        })
    }

    /// First index along each dimension.
    pub fn origin(&self) -> &[isize] {
        &self.origin
    }

    fn to_positional(&self, index: &[isize]) -> Result<SmallVec<[usize; 4]>> {
        let dims = self.layout.dims();
        let out_of_bounds = || DeviceError::IndexOutOfBounds {
            index: index.to_vec(),
            dims: dims.to_vec(),
        };
        if index.len() != dims.len() {
            return Err(out_of_bounds());
        }
        index
            .iter()
            .zip(self.origin.iter())
            .zip(dims.iter())
            .map(|((&i, &o), &d)| {
                match i.checked_sub(o) {
                    Some(p) if p >= 0 && (p as usize) < d => Ok(p as usize),
                    _ => Err(out_of_bounds()),
                }
            })
            .collect()
    }

    /// Read the element at shifted `index`.
    pub fn at(&self, index: &[isize]) -> Result<A::Elem> {
        assert_scalar_allowed("getindex")?;
        let pos = self.to_positional(index)?;
        // SAFETY: positions were bounds-checked against the layout.
        Ok(unsafe { *self.parent.as_ptr().add(self.layout.offset_of(&pos)) })
    }
}

impl<A: DeviceResidentMut> OffsetView<A> {
    /// Write the element at shifted `index`.
    pub fn set_at(&mut self, index: &[isize], value: A::Elem) -> Result<()> {
        assert_scalar_allowed("setindex")?;
        let pos = self.to_positional(index)?;
        let offset = self.layout.offset_of(&pos);
        // SAFETY: positions were bounds-checked against the layout.
        unsafe { *self.parent.as_mut_ptr().add(offset) = value };
        Ok(())
    }
}

impl_adaptor_residency!(OffsetView);

// ============================================================================
// Reshaped
// ============================================================================

/// Same elements under a different shape of equal length.
///
/// Only linearly addressable parents can be reshaped; the result is linear.
#[derive(Debug, Clone)]
pub struct Reshaped<A> {
    parent: A,
    layout: StridedLayout,
}

impl<A: DeviceResident> Reshaped<A> {
    pub fn new(parent: A, dims: &[usize]) -> Result<Self> {
        if parent.index_style() != IndexStyle::Linear {
            return Err(DeviceError::NonContiguousReshape);
        }
        let layout = parent.layout().reshape(dims)?;
        Ok(Self { parent, layout })
    }
}

impl_adaptor_residency!(Reshaped);

// ============================================================================
// PermutedDims
// ============================================================================

/// Same elements with dimensions reordered.
///
/// Dimension `d` of the view is dimension `perm[d]` of the parent.
#[derive(Debug, Clone)]
pub struct PermutedDims<A> {
    parent: A,
    layout: StridedLayout,
    perm: SmallVec<[usize; 4]>,
}

impl<A: DeviceResident> PermutedDims<A> {
    pub fn new(parent: A, perm: &[usize]) -> Result<Self> {
        let layout = parent.layout().permute(perm)?;
        Ok(Self {
            parent,
            layout,
            perm: SmallVec::from_slice(perm),
        })
    }

    pub fn perm(&self) -> &[usize] {
        &self.perm
    }
}

impl_adaptor_residency!(PermutedDims);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::with_scalar_access_allowed;
    use crate::DeviceArray;
    use devarray_cpu::CpuBackend;

    fn matrix() -> DeviceArray<i32> {
        let backend = BackendHandle::new(CpuBackend::new());
        // [[0, 2, 4], [1, 3, 5]] in column-major storage
        DeviceArray::from_vec(&backend, &[2, 3], (0..6).collect()).unwrap()
    }

    #[test]
    fn test_permuted_view_reads_transposed() {
        let a = matrix();
        let t = a.permute(&[1, 0]).unwrap();
        assert_eq!(t.dims(), &[3, 2]);
        assert_eq!(t.index_style(), IndexStyle::Cartesian);
        assert_eq!(t.perm(), &[1, 0]);
        with_scalar_access_allowed(|| {
            assert_eq!(t.get(&[2, 1]).unwrap(), a.get(&[1, 2]).unwrap());
        });
    }

    #[test]
    fn test_identity_permutation_stays_linear() {
        let a = matrix();
        let p = a.permute(&[0, 1]).unwrap();
        assert_eq!(p.index_style(), IndexStyle::Linear);
    }

    #[test]
    fn test_reshape_requires_linear_parent() {
        let a = matrix();
        let r = a.reshape(&[3, 2]).unwrap();
        assert_eq!(r.index_style(), IndexStyle::Linear);
        assert_eq!(r.to_vec(), a.to_vec());

        let t = a.permute(&[1, 0]).unwrap();
        assert!(matches!(
            Reshaped::new(&t, &[6]),
            Err(DeviceError::NonContiguousReshape)
        ));
        assert!(matches!(
            a.reshape(&[4]),
            Err(DeviceError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_offset_view_shifts_origin() {
        let a = matrix();
        let o = a.with_origin(&[-1, 1]).unwrap();
        assert_eq!(o.index_style(), IndexStyle::Linear);
        with_scalar_access_allowed(|| {
            assert_eq!(o.at(&[-1, 1]).unwrap(), 0);
            assert_eq!(o.at(&[0, 3]).unwrap(), 5);
            assert!(matches!(
                o.at(&[1, 1]),
                Err(DeviceError::IndexOutOfBounds { .. })
            ));
            assert!(o.at(&[-1, 0]).is_err());
        });
        assert!(a.with_origin(&[0]).is_err());
    }

    #[test]
    fn test_offset_view_extreme_indices_are_out_of_bounds() {
        let a = matrix();
        let o = a.with_origin(&[isize::MAX, isize::MIN]).unwrap();
        with_scalar_access_allowed(|| {
            assert!(matches!(
                o.at(&[isize::MIN, 0]),
                Err(DeviceError::IndexOutOfBounds { .. })
            ));
            assert!(matches!(
                o.at(&[isize::MAX, isize::MAX]),
                Err(DeviceError::IndexOutOfBounds { .. })
            ));
            assert_eq!(o.at(&[isize::MAX, isize::MIN + 2]).unwrap(), 4);
        });
    }

    #[test]
    fn test_nested_adaptors_write_through() {
        let mut a = matrix();
        {
            let t = a.permute_mut(&[1, 0]).unwrap();
            let mut o = OffsetView::new(t, &[1, 1]).unwrap();
            with_scalar_access_allowed(|| o.set_at(&[3, 2], 99)).unwrap();
            assert_eq!(o.backend().id().name(), "cpu");
        }
        // view (2, 1) of the transpose is parent (1, 2)
        assert_eq!(a.to_vec(), vec![0, 1, 2, 3, 4, 99]);
    }

    #[test]
    fn test_adaptor_access_is_guarded() {
        let a = matrix();
        let t = a.permute(&[1, 0]).unwrap();
        crate::guard::store(crate::guard::ScalarPolicy::Disallowed);
        assert!(matches!(
            t.get(&[0, 0]),
            Err(DeviceError::ScalarAccessDisallowed { .. })
        ));
    }
}
