//! Device arrays and the host-side view of them.
//!
//! This crate provides:
//! - [`DeviceArray`]: dense column-major arrays resident on a backend
//! - adaptor layers ([`OffsetView`], [`Reshaped`], [`PermutedDims`]) that
//!   rewrite the layout without copying
//! - the residency classifier ([`Classify`], [`backend_of`],
//!   [`common_backend`]) used to validate broadcast operands
//! - the scalar-access guard ([`guard`]) consulted by every host-side
//!   element access

pub mod adaptor;
pub mod array;
pub mod guard;
pub mod layout;
pub mod residency;

pub use adaptor::{OffsetView, PermutedDims, Reshaped};
pub use array::DeviceArray;
pub use guard::{
    allow_scalar_access, allowscalar, assert_scalar_allowed, current_policy,
    with_scalar_access_allowed, AccessOutcome, ScalarAccessGuard, ScalarPolicy,
};
pub use layout::{col_major_strides, IndexStyle, StridedLayout};
pub use residency::{
    backend_of, common_backend, Classify, DeviceResident, DeviceResidentMut, Ref0, Residency,
    Scalar,
};
