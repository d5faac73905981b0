//! Backend-agnostic broadcast and map kernels for accelerator-resident arrays.
//!
//! `devarray` evaluates elementwise expressions over arrays that live on a
//! compute device. An expression is built lazily, checked on the host, and
//! run as a single grid-stride kernel dispatch on whichever backend owns the
//! operands. Element-by-element access from the host is governed by a
//! per-thread scalar-access policy, so accidental slow paths fail loudly
//! instead of silently crawling.
//!
//! # Crates
//!
//! - [`devarray_traits`]: the [`Backend`] contract, [`Element`] types, errors
//! - [`devarray_view`]: [`DeviceArray`], adaptors, residency checks, the guard
//! - [`devarray_kernel`]: [`broadcasted`], [`evaluate_into`], [`map`], ...
//! - [`devarray_cpu`]: a reference backend running kernels on the host
//!
//! # Example
//!
//! ```rust
//! use devarray::prelude::*;
//!
//! let backend = devarray::default_backend();
//! let a = DeviceArray::from_vec(&backend, &[4], vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
//! let b = DeviceArray::from_vec(&backend, &[4], vec![10.0f32, 20.0, 30.0, 40.0]).unwrap();
//!
//! let sum = evaluate_to_new(&broadcasted(|x: f32, y: f32| x + y, (&a, &b)).unwrap()).unwrap();
//! assert_eq!(sum.to_vec(), vec![11.0, 22.0, 33.0, 44.0]);
//!
//! // Host-side element reads must be opted into.
//! let first = with_scalar_access_allowed(|| sum.get(&[0])).unwrap();
//! assert_eq!(first, 11.0);
//! ```

pub use devarray_cpu;
pub use devarray_kernel;
pub use devarray_traits;
pub use devarray_view;

pub use devarray_cpu::CpuBackend;
pub use devarray_kernel::{
    broadcast_shape, broadcasted, evaluate_into, evaluate_to_new, fill, map, map_into,
    Broadcasted, CartesianTable, IndexingStrategy, KernelRef,
};
pub use devarray_traits::{
    check_element, registry, Backend, BackendHandle, BackendId, DeviceError, Element,
    ElementLayout, ExecutionContext, Kernel, LaunchConfig, LaunchHeuristic, Result,
};
pub use devarray_view::{
    allow_scalar_access, allowscalar, assert_scalar_allowed, backend_of, common_backend,
    current_policy, with_scalar_access_allowed, AccessOutcome, Classify, DeviceArray,
    DeviceResident, DeviceResidentMut, IndexStyle, OffsetView, PermutedDims, Ref0, Reshaped,
    Scalar, ScalarAccessGuard, ScalarPolicy,
};

/// Shared [`CpuBackend`] instance, registered on first use.
pub fn default_backend() -> BackendHandle {
    registry::get_or_register::<CpuBackend>()
}

/// Common imports.
pub mod prelude {
    pub use crate::{
        broadcasted, evaluate_into, evaluate_to_new, fill, map, map_into,
        with_scalar_access_allowed, BackendHandle, DeviceArray, DeviceError, DeviceResident,
        DeviceResidentMut, KernelRef, Ref0, Scalar,
    };
}
