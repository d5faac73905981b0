//! Lowering of broadcast operands into kernel-side accessors.
//!
//! An [`Operand`] is what callers put into a broadcast; an [`Access`] is what
//! the kernel body reads from. Lowering happens once per launch and is where
//! broadcast preprocessing happens: every stretched dimension gets stride 0,
//! so the kernel never branches on shapes.

use std::marker::PhantomData;

use devarray_traits::{DeviceError, Element, Result};
use devarray_view::layout::{Dims, Strides};
use devarray_view::{
    Classify, DeviceArray, DeviceResident, IndexStyle, OffsetView, PermutedDims, Ref0, Reshaped,
    Scalar, StridedLayout,
};

/// Where one kernel invocation is in the launch.
#[derive(Debug, Clone, Copy)]
pub struct Position<'a> {
    /// Flat column-major index into the launch shape.
    pub linear: usize,
    /// Coordinates of `linear`; empty when every side is linearly addressable.
    pub coords: &'a [usize],
}

/// Kernel-side reader for one operand.
pub trait Access: Sync {
    type Item;

    /// Whether this reader can use `Position::linear` directly.
    fn index_style(&self) -> IndexStyle;

    /// Read the operand at `pos`.
    ///
    /// # Safety
    ///
    /// The operand this reader was lowered from must still be alive, `pos`
    /// must lie inside the launch shape, and `pos.coords` must be present
    /// unless `index_style()` is `Linear`.
    unsafe fn load(&self, pos: &Position<'_>) -> Self::Item;

    /// Read the `i`-th element of the operand in its own column-major order.
    ///
    /// # Safety
    ///
    /// The operand must still be alive and `i` must be below its length.
    unsafe fn load_flat(&self, i: usize) -> Self::Item;
}

/// A value that can take part in a broadcast or map.
pub trait Operand: Classify {
    type Item;
    type Access: Access<Item = Self::Item>;

    /// Reader aligned to a launch of shape `dest_dims`.
    fn access(&self, dest_dims: &[usize]) -> Result<Self::Access>;

    /// Reader over this operand's own elements, for flat traversal.
    fn flat_access(&self) -> Result<Self::Access>;
}

impl<O: Operand + ?Sized> Operand for &O {
    type Item = O::Item;
    type Access = O::Access;

    #[inline]
    fn access(&self, dest_dims: &[usize]) -> Result<Self::Access> {
        (**self).access(dest_dims)
    }

    #[inline]
    fn flat_access(&self) -> Result<Self::Access> {
        (**self).flat_access()
    }
}

/// Storage offset of column-major position `i` in a shape, without a table.
#[inline]
fn offset_of_linear(mut i: usize, dims: &[usize], strides: &[isize]) -> isize {
    let mut off = 0isize;
    for (&d, &s) in dims.iter().zip(strides.iter()) {
        let d = d.max(1);
        off += (i % d) as isize * s;
        i /= d;
    }
    off
}

#[inline]
fn offset_of_coords(coords: &[usize], strides: &[isize]) -> isize {
    coords
        .iter()
        .zip(strides.iter())
        .map(|(&c, &s)| c as isize * s)
        .sum()
}

// ============================================================================
// Strided device data
// ============================================================================

/// Reader over strided device memory.
#[derive(Debug)]
pub struct StridedAccess<T> {
    ptr: *const T,
    offset: usize,
    dims: Dims,
    strides: Strides,
    style: IndexStyle,
}

// SAFETY: the reader only performs shared reads of `T`.
unsafe impl<T: Sync> Send for StridedAccess<T> {}
unsafe impl<T: Sync> Sync for StridedAccess<T> {}

impl<T: Element> StridedAccess<T> {
    /// Reader for `src` stretched to `dest_dims`.
    ///
    /// Fails with `ShapeMismatch` unless every extent of `src` is 1 or equals
    /// the launch extent. Missing trailing dimensions count as 1.
    pub fn broadcast<A>(src: &A, dest_dims: &[usize]) -> Result<Self>
    where
        A: DeviceResident<Elem = T> + ?Sized,
    {
        let layout = src.layout();
        let src_dims = layout.dims();
        let mismatch = || DeviceError::ShapeMismatch {
            expected: dest_dims.to_vec(),
            got: src_dims.to_vec(),
        };
        if src_dims.iter().skip(dest_dims.len()).any(|&d| d != 1) {
            return Err(mismatch());
        }

        let mut strides = Strides::with_capacity(dest_dims.len());
        let mut stretched = false;
        for (d, &extent) in dest_dims.iter().enumerate() {
            let own = src_dims.get(d).copied().unwrap_or(1);
            let stride = layout.strides().get(d).copied().unwrap_or(0);
            if own == extent {
                strides.push(stride);
            } else if own == 1 {
                stretched = true;
                strides.push(0);
            } else {
                return Err(mismatch());
            }
        }

        let style = if !stretched && layout.is_contiguous() {
            IndexStyle::Linear
        } else {
            IndexStyle::Cartesian
        };
        Ok(Self {
            ptr: src.as_ptr(),
            offset: layout.offset(),
            dims: Dims::from_slice(dest_dims),
            strides,
            style,
        })
    }

    /// Reader over `src` in its own shape.
    pub fn flat<A>(src: &A) -> Self
    where
        A: DeviceResident<Elem = T> + ?Sized,
    {
        let layout = src.layout();
        Self {
            ptr: src.as_ptr(),
            offset: layout.offset(),
            dims: Dims::from_slice(layout.dims()),
            strides: Strides::from_slice(layout.strides()),
            style: layout.index_style(),
        }
    }

    /// Strides after broadcast preprocessing; 0 on stretched dimensions.
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }
}

impl<T: Element> Access for StridedAccess<T> {
    type Item = T;

    #[inline]
    fn index_style(&self) -> IndexStyle {
        self.style
    }

    #[inline]
    unsafe fn load(&self, pos: &Position<'_>) -> T {
        let off = match self.style {
            IndexStyle::Linear => pos.linear as isize,
            IndexStyle::Cartesian => offset_of_coords(pos.coords, &self.strides),
        };
        unsafe { *self.ptr.offset(self.offset as isize + off) }
    }

    #[inline]
    unsafe fn load_flat(&self, i: usize) -> T {
        let off = match self.style {
            IndexStyle::Linear => i as isize,
            IndexStyle::Cartesian => offset_of_linear(i, &self.dims, &self.strides),
        };
        unsafe { *self.ptr.offset(self.offset as isize + off) }
    }
}

macro_rules! impl_strided_operand {
    (impl[$($g:tt)*] $ty:ty, $elem:ty) => {
        impl<$($g)*> Operand for $ty {
            type Item = $elem;
            type Access = StridedAccess<$elem>;

            #[inline]
            fn access(&self, dest_dims: &[usize]) -> Result<Self::Access> {
                StridedAccess::broadcast(self, dest_dims)
            }

            #[inline]
            fn flat_access(&self) -> Result<Self::Access> {
                Ok(StridedAccess::flat(self))
            }
        }
    };
}

impl_strided_operand!(impl[T: Element] DeviceArray<T>, T);
impl_strided_operand!(impl[A: DeviceResident] OffsetView<A>, A::Elem);
impl_strided_operand!(impl[A: DeviceResident] Reshaped<A>, A::Elem);
impl_strided_operand!(impl[A: DeviceResident] PermutedDims<A>, A::Elem);

// Host arrays are accepted as operands only so the classifier can reject
// them with a precise error.
macro_rules! impl_host_array_operand {
    ($ty:ty) => {
        impl<T: Element> Operand for $ty {
            type Item = T;
            type Access = StridedAccess<T>;

            fn access(&self, _dest_dims: &[usize]) -> Result<Self::Access> {
                Err(DeviceError::NotDeviceResident(self.type_label()))
            }

            fn flat_access(&self) -> Result<Self::Access> {
                Err(DeviceError::NotDeviceResident(self.type_label()))
            }
        }
    };
}

impl_host_array_operand!([T]);
impl_host_array_operand!(Vec<T>);

// ============================================================================
// Host scalars
// ============================================================================

/// Reader returning the same host value everywhere.
#[derive(Debug, Clone, Copy)]
pub struct ScalarAccess<T>(T);

impl<T: Copy + Sync> Access for ScalarAccess<T> {
    type Item = T;

    #[inline]
    fn index_style(&self) -> IndexStyle {
        IndexStyle::Linear
    }

    #[inline]
    unsafe fn load(&self, _pos: &Position<'_>) -> T {
        self.0
    }

    #[inline]
    unsafe fn load_flat(&self, _i: usize) -> T {
        self.0
    }
}

impl<T: Copy + Sync> Operand for Scalar<T> {
    type Item = T;
    type Access = ScalarAccess<T>;

    fn access(&self, _dest_dims: &[usize]) -> Result<Self::Access> {
        Ok(ScalarAccess(self.0))
    }

    fn flat_access(&self) -> Result<Self::Access> {
        Ok(ScalarAccess(self.0))
    }
}

// ============================================================================
// Zero-dimensional boxes
// ============================================================================

/// Read-only handle to a whole device array inside a kernel.
///
/// Handed to the element function for every position when the array is
/// wrapped in [`Ref0`].
#[derive(Debug, Clone, Copy)]
pub struct KernelRef<'a, T> {
    ptr: *const T,
    layout: &'a StridedLayout,
    _marker: PhantomData<&'a T>,
}

// SAFETY: a `KernelRef` only reads through `ptr`, which outlives `'a`.
unsafe impl<T: Sync> Send for KernelRef<'_, T> {}
unsafe impl<T: Sync> Sync for KernelRef<'_, T> {}

impl<'a, T: Element> KernelRef<'a, T> {
    fn new<A: DeviceResident<Elem = T> + ?Sized>(src: &'a A) -> Self {
        Self {
            ptr: src.as_ptr(),
            layout: src.layout(),
            _marker: PhantomData,
        }
    }

    pub fn dims(&self) -> &'a [usize] {
        self.layout.dims()
    }

    pub fn len(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// Element at `index`, or `None` when out of bounds.
    pub fn get(&self, index: &[usize]) -> Option<T> {
        let offset = self.layout.checked_offset_of(index).ok()?;
        // SAFETY: the offset was bounds-checked against the layout.
        Some(unsafe { *self.ptr.add(offset) })
    }

    /// Element at column-major position `i`, or `None` when out of bounds.
    pub fn get_linear(&self, i: usize) -> Option<T> {
        if i >= self.len() {
            return None;
        }
        let off = offset_of_linear(i, self.layout.dims(), self.layout.strides());
        // SAFETY: `i` is below the length, so the offset is inside the layout.
        Some(unsafe { *self.ptr.offset(self.layout.offset() as isize + off) })
    }
}

/// Reader producing the same [`KernelRef`] everywhere.
#[derive(Debug, Clone, Copy)]
pub struct RefAccess<'a, T>(KernelRef<'a, T>);

impl<'a, T: Element> Access for RefAccess<'a, T> {
    type Item = KernelRef<'a, T>;

    #[inline]
    fn index_style(&self) -> IndexStyle {
        IndexStyle::Linear
    }

    #[inline]
    unsafe fn load(&self, _pos: &Position<'_>) -> KernelRef<'a, T> {
        self.0
    }

    #[inline]
    unsafe fn load_flat(&self, _i: usize) -> KernelRef<'a, T> {
        self.0
    }
}

impl<'a, A: DeviceResident> Operand for Ref0<&'a A> {
    type Item = KernelRef<'a, A::Elem>;
    type Access = RefAccess<'a, A::Elem>;

    fn access(&self, _dest_dims: &[usize]) -> Result<Self::Access> {
        Ok(RefAccess(KernelRef::new(self.0)))
    }

    fn flat_access(&self) -> Result<Self::Access> {
        Ok(RefAccess(KernelRef::new(self.0)))
    }
}
