//! Fused elementwise kernels for devarray.
//!
//! A broadcast is built lazily with [`broadcasted`] and materialized with
//! [`evaluate_to_new`] or [`evaluate_into`]; [`map`] and [`map_into`] apply a
//! function position by position. Each evaluation is one kernel dispatch on
//! the operands' backend, whatever the nesting of the expression.
//!
//! # Example
//!
//! ```
//! use devarray_cpu::CpuBackend;
//! use devarray_kernel::{broadcasted, evaluate_to_new};
//! use devarray_traits::BackendHandle;
//! use devarray_view::{DeviceArray, DeviceResident, Scalar};
//!
//! let backend = BackendHandle::new(CpuBackend::new());
//! let x = DeviceArray::from_vec(&backend, &[3], vec![1.0f32, 2.0, 3.0]).unwrap();
//! let y = evaluate_to_new(&broadcasted(|a: f32, b: f32| a * b, (&x, Scalar(2.0f32))).unwrap()).unwrap();
//! assert_eq!(y.to_vec(), vec![2.0, 4.0, 6.0]);
//! ```

pub mod broadcast;
pub mod engine;
pub mod indexing;
pub mod launch;
pub mod operand;

pub use broadcast::{broadcast_shape, broadcasted, Broadcasted, Operands};
pub use engine::{evaluate_into, evaluate_to_new, fill, map, map_into};
pub use indexing::{CartesianTable, IndexingStrategy};
pub use launch::{negotiate, ELEMENTS_PER_THREAD_HINT};
pub use operand::{Access, KernelRef, Operand, Position};
