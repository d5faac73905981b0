//! Owned device arrays.

use std::fmt;

use devarray_traits::{check_element, BackendHandle, DeviceError, Element, Result};

use crate::adaptor::{OffsetView, PermutedDims, Reshaped};
use crate::layout::{total_len, StridedLayout};
use crate::residency::{device_residency, Classify, DeviceResident, DeviceResidentMut, Residency};

/// Dense column-major array resident on one backend.
///
/// Storage is allocated through the host allocator; backends that own
/// separate device memory mirror it at dispatch time.
#[derive(Clone)]
pub struct DeviceArray<T: Element> {
    data: Vec<T>,
    layout: StridedLayout,
    backend: BackendHandle,
}

impl<T: Element> DeviceArray<T> {
    /// Allocate an array of `dims` filled with `T::default()`.
    pub fn new(backend: &BackendHandle, dims: &[usize]) -> Result<Self> {
        check_element::<T>()?;
        Ok(Self {
            data: vec![T::default(); total_len(dims)],
            layout: StridedLayout::col_major(dims),
            backend: backend.clone(),
        })
    }

    /// Upload `data`, interpreted in column-major order.
    pub fn from_vec(backend: &BackendHandle, dims: &[usize], data: Vec<T>) -> Result<Self> {
        check_element::<T>()?;
        let expected = total_len(dims);
        if data.len() != expected {
            return Err(DeviceError::LengthMismatch {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            layout: StridedLayout::col_major(dims),
            backend: backend.clone(),
        })
    }

    /// Upload an array whose element at each coordinate is `f(coords)`.
    pub fn from_fn(
        backend: &BackendHandle,
        dims: &[usize],
        mut f: impl FnMut(&[usize]) -> T,
    ) -> Result<Self> {
        check_element::<T>()?;
        let layout = StridedLayout::col_major(dims);
        let mut coords = vec![0usize; dims.len()];
        let data = (0..layout.len())
            .map(|i| {
                layout.coords_of(i, &mut coords);
                f(&coords)
            })
            .collect();
        Ok(Self {
            data,
            layout,
            backend: backend.clone(),
        })
    }

    /// Dimensions reordered by `perm`.
    pub fn permute(&self, perm: &[usize]) -> Result<PermutedDims<&Self>> {
        PermutedDims::new(self, perm)
    }

    /// Writable view with dimensions reordered by `perm`.
    pub fn permute_mut(&mut self, perm: &[usize]) -> Result<PermutedDims<&mut Self>> {
        PermutedDims::new(self, perm)
    }

    /// The same elements under a new shape.
    pub fn reshape(&self, dims: &[usize]) -> Result<Reshaped<&Self>> {
        Reshaped::new(self, dims)
    }

    /// Writable view of the same elements under a new shape.
    pub fn reshape_mut(&mut self, dims: &[usize]) -> Result<Reshaped<&mut Self>> {
        Reshaped::new(self, dims)
    }

    /// View whose first index along each dimension is `origin[d]`.
    pub fn with_origin(&self, origin: &[isize]) -> Result<OffsetView<&Self>> {
        OffsetView::new(self, origin)
    }

    /// Writable view whose first index along each dimension is `origin[d]`.
    pub fn with_origin_mut(&mut self, origin: &[isize]) -> Result<OffsetView<&mut Self>> {
        OffsetView::new(self, origin)
    }

    /// Overwrite every element from `data` (column-major).
    ///
    /// A bulk transfer; never consults the scalar-access guard.
    pub fn copy_from_slice(&mut self, data: &[T]) -> Result<()> {
        if data.len() != self.data.len() {
            return Err(DeviceError::LengthMismatch {
                expected: self.data.len(),
                got: data.len(),
            });
        }
        self.data.copy_from_slice(data);
        Ok(())
    }

    /// Download into an owned vector, consuming the array.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl<T: Element> DeviceResident for DeviceArray<T> {
    type Elem = T;

    #[inline]
    fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    #[inline]
    fn layout(&self) -> &StridedLayout {
        &self.layout
    }

    #[inline]
    fn as_ptr(&self) -> *const T {
        self.data.as_ptr()
    }

    fn to_vec(&self) -> Vec<T> {
        self.data.clone()
    }
}

impl<T: Element> DeviceResidentMut for DeviceArray<T> {
    #[inline]
    fn as_mut_ptr(&mut self) -> *mut T {
        self.data.as_mut_ptr()
    }
}

impl<T: Element> Classify for DeviceArray<T> {
    fn residency(&self) -> Residency<'_> {
        device_residency(self)
    }
}

impl<T: Element> fmt::Debug for DeviceArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceArray")
            .field("eltype", &T::type_name())
            .field("dims", &self.layout.dims())
            .field("backend", &self.backend.id())
            .finish()
    }
}
