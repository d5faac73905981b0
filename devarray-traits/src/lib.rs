//! Shared traits for the devarray ecosystem.
//!
//! This crate provides the definitions every other devarray crate and every
//! compute backend builds on:
//!
//! - [`Backend`]: the capability contract a backend implements to receive
//!   kernel dispatches and negotiate launch layouts
//! - [`Kernel`] and [`ExecutionContext`]: what a backend runs, and what each
//!   thread slot sees while running it
//! - [`Element`] and [`ElementLayout`]: element types and their device layout
//! - [`registry`]: one shared backend instance per backend type
//!
//! Backend crates depend only on this crate, so they never see array or
//! kernel internals.

pub mod backend;
pub mod context;
pub mod element;
pub mod registry;

pub use backend::{Backend, BackendHandle, BackendId, Kernel, LaunchConfig, LaunchHeuristic};
pub use context::ExecutionContext;
pub use element::{check_element, Element, ElementLayout};

// ============================================================================
// Error types
// ============================================================================

/// Errors raised by device array operations.
///
/// Every variant is fatal to the call that triggered it. Errors detected
/// before a dispatch never touch the device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Destination and expression shapes differ, or operand extents cannot be
    /// broadcast together.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// The result element type has no single fixed layout.
    #[error("non-concrete element type `{0}`: the function returns values of varying layout")]
    NonConcreteElementType(&'static str),

    /// The result element type cannot be stored as fixed-size bit data.
    #[error("element type `{0}` cannot be represented as fixed-size device data")]
    NonRepresentableElementType(&'static str),

    /// Element-by-element host access was attempted while the task's policy forbids it.
    #[error(
        "scalar {op} is disallowed on device arrays; \
         use `with_scalar_access_allowed` to permit it for a single call"
    )]
    ScalarAccessDisallowed { op: &'static str },

    /// A backend was requested from a value that is not backed by a device array.
    #[error("`{0}` is not device resident")]
    NotDeviceResident(&'static str),

    /// Operands live on different backends.
    #[error("operands live on different backends: {0} vs {1}")]
    BackendMismatch(&'static str, &'static str),

    /// Host-side element index outside the array.
    #[error("index {index:?} out of bounds for dims {dims:?}")]
    IndexOutOfBounds { index: Vec<isize>, dims: Vec<usize> },

    /// A permutation that is not a bijection on `0..rank`.
    #[error("invalid permutation {perm:?} for rank {rank}")]
    InvalidPermutation { perm: Vec<usize>, rank: usize },

    /// Reshape was requested over storage that is not linearly addressable.
    #[error("cannot reshape a non-contiguous array")]
    NonContiguousReshape,

    /// Element count does not match the requested shape.
    #[error("length mismatch: shape needs {expected} elements, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    /// The backend failed to execute a dispatch.
    #[error("dispatch failed on backend {backend}: {reason}")]
    Dispatch {
        backend: &'static str,
        reason: String,
    },

    /// A configuration value could not be interpreted.
    #[error("invalid configuration {key}={value}")]
    InvalidConfig { key: &'static str, value: String },
}

/// Result type for device array operations.
pub type Result<T> = std::result::Result<T, DeviceError>;
