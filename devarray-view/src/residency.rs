//! Device-residency classification.
//!
//! [`DeviceResident`] is the structural view of anything backed by device
//! memory: a [`DeviceArray`](crate::DeviceArray) or any stack of adaptors over
//! one. [`Classify`] answers the broader question a broadcast needs for each
//! of its operands: is this device data, a zero-dimensional box around
//! device data, or something that lives on the host?

use std::any::type_name;

use devarray_traits::{BackendHandle, DeviceError, Element, Result};

use crate::guard::assert_scalar_allowed;
use crate::layout::{IndexStyle, StridedLayout};

/// A value whose elements live in device memory.
pub trait DeviceResident {
    type Elem: Element;

    /// Backend owning the storage.
    fn backend(&self) -> &BackendHandle;

    /// Shape and strides of the elements this value exposes.
    fn layout(&self) -> &StridedLayout;

    /// Base pointer of the underlying storage.
    ///
    /// Element `coords` lives at `as_ptr() + layout().offset_of(coords)`.
    fn as_ptr(&self) -> *const Self::Elem;

    #[inline]
    fn dims(&self) -> &[usize] {
        self.layout().dims()
    }

    #[inline]
    fn len(&self) -> usize {
        self.layout().len()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.layout().is_empty()
    }

    #[inline]
    fn index_style(&self) -> IndexStyle {
        self.layout().index_style()
    }

    /// Read one element from the host.
    ///
    /// Subject to the scalar-access guard.
    fn get(&self, index: &[usize]) -> Result<Self::Elem> {
        assert_scalar_allowed("getindex")?;
        let offset = self.layout().checked_offset_of(index)?;
        // SAFETY: a checked offset addresses an element inside the storage.
        Ok(unsafe { *self.as_ptr().add(offset) })
    }

    /// Download every element in column-major order of `dims()`.
    ///
    /// A bulk transfer; never consults the scalar-access guard.
    fn to_vec(&self) -> Vec<Self::Elem> {
        let layout = self.layout();
        let len = layout.len();
        let ptr = self.as_ptr();
        if layout.is_contiguous() {
            // SAFETY: a contiguous layout covers `len` elements from its offset.
            return unsafe { std::slice::from_raw_parts(ptr.add(layout.offset()), len) }.to_vec();
        }
        let mut coords = vec![0usize; layout.ndim()];
        (0..len)
            .map(|i| {
                layout.coords_of(i, &mut coords);
                // SAFETY: coords are in bounds for the layout.
                unsafe { *ptr.add(layout.offset_of(&coords)) }
            })
            .collect()
    }
}

/// A device-resident value that can be written through.
pub trait DeviceResidentMut: DeviceResident {
    fn as_mut_ptr(&mut self) -> *mut Self::Elem;

    /// Write one element from the host.
    ///
    /// Subject to the scalar-access guard.
    fn set(&mut self, index: &[usize], value: Self::Elem) -> Result<()> {
        assert_scalar_allowed("setindex")?;
        let offset = self.layout().checked_offset_of(index)?;
        // SAFETY: a checked offset addresses an element inside the storage.
        unsafe { *self.as_mut_ptr().add(offset) = value };
        Ok(())
    }
}

impl<A: DeviceResident + ?Sized> DeviceResident for &A {
    type Elem = A::Elem;

    #[inline]
    fn backend(&self) -> &BackendHandle {
        (**self).backend()
    }

    #[inline]
    fn layout(&self) -> &StridedLayout {
        (**self).layout()
    }

    #[inline]
    fn as_ptr(&self) -> *const Self::Elem {
        (**self).as_ptr()
    }
}

impl<A: DeviceResident + ?Sized> DeviceResident for &mut A {
    type Elem = A::Elem;

    #[inline]
    fn backend(&self) -> &BackendHandle {
        (**self).backend()
    }

    #[inline]
    fn layout(&self) -> &StridedLayout {
        (**self).layout()
    }

    #[inline]
    fn as_ptr(&self) -> *const Self::Elem {
        (**self).as_ptr()
    }
}

impl<A: DeviceResidentMut + ?Sized> DeviceResidentMut for &mut A {
    #[inline]
    fn as_mut_ptr(&mut self) -> *mut Self::Elem {
        (**self).as_mut_ptr()
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Where a broadcast operand lives.
#[derive(Debug, Clone, Copy)]
pub enum Residency<'a> {
    /// Device data of the given shape.
    Device {
        backend: &'a BackendHandle,
        dims: &'a [usize],
    },
    /// A zero-dimensional box around device data.
    ZeroDim { backend: &'a BackendHandle },
    /// Host data: a scalar, or a host array when `array` is set.
    Host { array: bool },
}

impl<'a> Residency<'a> {
    /// Backend of device-backed values.
    pub fn backend(&self) -> Option<&'a BackendHandle> {
        match *self {
            Residency::Device { backend, .. } | Residency::ZeroDim { backend } => Some(backend),
            Residency::Host { .. } => None,
        }
    }

    /// Shape this value contributes to a broadcast.
    pub fn dims(&self) -> &'a [usize] {
        match *self {
            Residency::Device { dims, .. } => dims,
            Residency::ZeroDim { .. } | Residency::Host { .. } => &[],
        }
    }
}

/// Anything that can appear as a broadcast operand.
pub trait Classify {
    fn residency(&self) -> Residency<'_>;

    /// Name used in diagnostics.
    fn type_label(&self) -> &'static str {
        type_name::<Self>()
    }
}

impl<C: Classify + ?Sized> Classify for &C {
    fn residency(&self) -> Residency<'_> {
        (**self).residency()
    }

    fn type_label(&self) -> &'static str {
        (**self).type_label()
    }
}

impl<C: Classify + ?Sized> Classify for &mut C {
    fn residency(&self) -> Residency<'_> {
        (**self).residency()
    }

    fn type_label(&self) -> &'static str {
        (**self).type_label()
    }
}

impl<T> Classify for [T] {
    fn residency(&self) -> Residency<'_> {
        Residency::Host { array: true }
    }
}

impl<T> Classify for Vec<T> {
    fn residency(&self) -> Residency<'_> {
        Residency::Host { array: true }
    }
}

/// Residency of a device-resident value.
#[inline]
pub fn device_residency<A: DeviceResident + ?Sized>(value: &A) -> Residency<'_> {
    Residency::Device {
        backend: value.backend(),
        dims: value.dims(),
    }
}

/// A host scalar taking part in a broadcast.
///
/// Every kernel invocation receives the same value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scalar<T>(pub T);

impl<T> Classify for Scalar<T> {
    fn residency(&self) -> Residency<'_> {
        Residency::Host { array: false }
    }
}

/// A zero-dimensional box around a device-resident value.
///
/// The whole wrapped value is handed to every kernel invocation instead of
/// being broadcast element by element.
#[derive(Debug, Clone, Copy)]
pub struct Ref0<A>(pub A);

impl<A: DeviceResident> Classify for Ref0<A> {
    fn residency(&self) -> Residency<'_> {
        Residency::ZeroDim {
            backend: self.0.backend(),
        }
    }
}

/// Backend of a device-backed value.
pub fn backend_of<C: Classify + ?Sized>(value: &C) -> Result<BackendHandle> {
    value
        .residency()
        .backend()
        .cloned()
        .ok_or(DeviceError::NotDeviceResident(value.type_label()))
}

/// The one backend shared by all operands of a broadcast.
///
/// Host scalars are ignored. Fails when a host array is present, when no
/// operand is device-backed, or when operands live on different backends.
pub fn common_backend(operands: &[&dyn Classify]) -> Result<BackendHandle> {
    let mut found: Option<&BackendHandle> = None;
    for operand in operands {
        match operand.residency() {
            Residency::Host { array: true } => {
                return Err(DeviceError::NotDeviceResident(operand.type_label()));
            }
            Residency::Host { array: false } => {}
            residency => {
                if let Some(backend) = residency.backend() {
                    match found {
                        None => found = Some(backend),
                        Some(first) if first.id() != backend.id() => {
                            return Err(DeviceError::BackendMismatch(
                                first.id().name(),
                                backend.id().name(),
                            ));
                        }
                        Some(_) => {}
                    }
                }
            }
        }
    }
    found
        .cloned()
        .ok_or(DeviceError::NotDeviceResident("broadcast without device operands"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{store, ScalarPolicy};
    use crate::{DeviceArray, OffsetView};
    use devarray_cpu::CpuBackend;
    use devarray_traits::{Backend, Kernel, LaunchConfig, LaunchHeuristic};

    #[derive(Debug, Default)]
    struct OtherBackend;

    impl Backend for OtherBackend {
        fn name(&self) -> &'static str {
            "other"
        }

        fn launch_heuristic(&self, _: &dyn Kernel, _: usize, _: usize) -> LaunchHeuristic {
            LaunchHeuristic {
                threads: 1,
                blocks: 1,
            }
        }

        fn dispatch(&self, _: &dyn Kernel, _: LaunchConfig) -> Result<()> {
            Ok(())
        }
    }

    fn cpu() -> BackendHandle {
        BackendHandle::new(CpuBackend::new())
    }

    #[test]
    fn test_backend_of_device_values() {
        let backend = cpu();
        let a = DeviceArray::from_vec(&backend, &[2, 2], vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert!(backend_of(&a).unwrap().ptr_eq(&backend));

        let view = a.permute(&[1, 0]).unwrap();
        let nested = OffsetView::new(view, &[-1, -1]).unwrap();
        assert!(backend_of(&nested).unwrap().ptr_eq(&backend));
        assert!(backend_of(&Ref0(&a)).unwrap().ptr_eq(&backend));
    }

    #[test]
    fn test_backend_of_host_values_fails() {
        let host = vec![1.0f32, 2.0];
        assert!(matches!(
            backend_of(&host),
            Err(DeviceError::NotDeviceResident(_))
        ));
        assert!(matches!(
            backend_of(&Scalar(3i32)),
            Err(DeviceError::NotDeviceResident(_))
        ));
    }

    #[test]
    fn test_common_backend() {
        let backend = cpu();
        let a = DeviceArray::<i32>::new(&backend, &[3]).unwrap();
        let b = DeviceArray::<i32>::new(&backend, &[3]).unwrap();
        let s = Scalar(1i32);
        let found = common_backend(&[&a, &s, &b]).unwrap();
        assert!(found.ptr_eq(&backend));
    }

    #[test]
    fn test_common_backend_rejects_host_arrays() {
        let backend = cpu();
        let a = DeviceArray::<i32>::new(&backend, &[3]).unwrap();
        let host = vec![1i32, 2, 3];
        assert!(matches!(
            common_backend(&[&a, &host]),
            Err(DeviceError::NotDeviceResident(_))
        ));
        assert!(matches!(
            common_backend(&[&Scalar(1.0f64)]),
            Err(DeviceError::NotDeviceResident(_))
        ));
    }

    #[test]
    fn test_common_backend_rejects_mixed_backends() {
        let a = DeviceArray::<i32>::new(&cpu(), &[3]).unwrap();
        let b = DeviceArray::<i32>::new(&BackendHandle::new(OtherBackend), &[3]).unwrap();
        assert!(matches!(
            common_backend(&[&a, &b]),
            Err(DeviceError::BackendMismatch("cpu", "other"))
        ));
    }

    #[test]
    fn test_zero_dim_has_no_shape() {
        let backend = cpu();
        let a = DeviceArray::<u8>::new(&backend, &[7, 2]).unwrap();
        let r = Ref0(&a);
        assert!(r.residency().dims().is_empty());
        assert_eq!(device_residency(&a).dims(), &[7, 2]);
    }

    #[test]
    fn test_get_set_consult_guard() {
        let backend = cpu();
        let mut a = DeviceArray::from_vec(&backend, &[2, 2], vec![1, 2, 3, 4]).unwrap();
        store(ScalarPolicy::Disallowed);
        assert!(matches!(
            a.get(&[0, 1]),
            Err(DeviceError::ScalarAccessDisallowed { op: "getindex" })
        ));
        assert!(matches!(
            a.set(&[0, 1], 9),
            Err(DeviceError::ScalarAccessDisallowed { op: "setindex" })
        ));

        store(ScalarPolicy::Allowed);
        assert_eq!(a.get(&[0, 1]).unwrap(), 3);
        a.set(&[0, 1], 9).unwrap();
        assert_eq!(a.get(&[0, 1]).unwrap(), 9);
        assert!(matches!(
            a.get(&[2, 0]),
            Err(DeviceError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_to_vec_bypasses_guard() {
        let backend = cpu();
        let a = DeviceArray::from_vec(&backend, &[2, 3], (0..6).collect::<Vec<i64>>()).unwrap();
        store(ScalarPolicy::Disallowed);
        assert_eq!(a.to_vec(), vec![0, 1, 2, 3, 4, 5]);
        let t = a.permute(&[1, 0]).unwrap();
        assert_eq!(t.to_vec(), vec![0, 2, 4, 1, 3, 5]);
    }
}
