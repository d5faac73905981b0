//! Backend capability contract.
//!
//! A backend receives fully-built kernels and runs them over a grid of thread
//! slots. The engine negotiates the grid in two phases: the backend first
//! proposes a [`LaunchHeuristic`] (what its device can keep busy), then turns
//! that proposal plus the element count into a concrete [`LaunchConfig`].
//! Only the backend knows its occupancy limits, so the engine uses the
//! resulting configuration as-is.

use std::any::{Any, TypeId};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::Result;

/// A unit of device work: the body executed once per thread slot.
pub trait Kernel: Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Run this kernel for one thread slot.
    fn execute(&self, ctx: &ExecutionContext);
}

/// A backend's occupancy proposal for one kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchHeuristic {
    /// Preferred thread slots per block.
    pub threads: usize,
    /// Blocks the device can keep resident at once.
    pub blocks: usize,
}

/// Concrete launch layout for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub threads: usize,
    pub blocks: usize,
    pub elements_per_thread: usize,
}

impl LaunchConfig {
    /// Total thread slots launched.
    #[inline]
    pub fn total_threads(&self) -> usize {
        self.threads * self.blocks
    }

    /// Elements the layout can cover.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.total_threads().saturating_mul(self.elements_per_thread)
    }
}

/// Capability contract every compute backend implements.
pub trait Backend: Send + Sync + fmt::Debug + 'static {
    /// Short backend name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Propose a launch shape for `kernel` over `elements` elements.
    ///
    /// `elements_per_thread` is the caller's upper bound on how many
    /// elements one thread slot may process.
    fn launch_heuristic(
        &self,
        kernel: &dyn Kernel,
        elements: usize,
        elements_per_thread: usize,
    ) -> LaunchHeuristic;

    /// Turn a heuristic into a concrete layout covering `elements`.
    ///
    /// The default clamps the block size to the element count and, when more
    /// blocks would be needed than the heuristic suggests, keeps the
    /// suggested block count and lets each slot loop over several elements
    /// (never more than `elements_per_thread`).
    fn launch_configuration(
        &self,
        heuristic: LaunchHeuristic,
        elements: usize,
        elements_per_thread: usize,
    ) -> LaunchConfig {
        let threads = elements.clamp(1, heuristic.threads.max(1));
        let blocks = elements.div_ceil(threads).max(1);

        if elements_per_thread > 1 && blocks > heuristic.blocks {
            let mut blocks = heuristic.blocks.max(1);
            let mut nelem = elements.div_ceil(blocks * threads);
            if nelem > elements_per_thread {
                nelem = elements_per_thread;
                blocks = elements.div_ceil(nelem * threads);
            }
            LaunchConfig {
                threads,
                blocks,
                elements_per_thread: nelem,
            }
        } else {
            LaunchConfig {
                threads,
                blocks,
                elements_per_thread: 1,
            }
        }
    }

    /// Run `kernel` once per thread slot of `config`.
    fn dispatch(&self, kernel: &dyn Kernel, config: LaunchConfig) -> Result<()>;
}

/// Identity of a backend: its concrete type.
#[derive(Debug, Clone, Copy)]
pub struct BackendId {
    type_id: TypeId,
    name: &'static str,
}

impl BackendId {
    /// Identity of backend type `B`.
    pub fn of<B: Backend>(name: &'static str) -> Self {
        Self {
            type_id: TypeId::of::<B>(),
            name,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for BackendId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for BackendId {}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Shared, cheaply clonable reference to a backend instance.
#[derive(Clone)]
pub struct BackendHandle {
    backend: Arc<dyn Backend>,
    any: Arc<dyn Any + Send + Sync>,
    id: BackendId,
}

impl BackendHandle {
    pub fn new<B: Backend>(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc<B: Backend>(backend: Arc<B>) -> Self {
        let id = BackendId::of::<B>(backend.name());
        Self {
            backend: backend.clone(),
            any: backend,
            id,
        }
    }

    /// Identity of the concrete backend type behind this handle.
    #[inline]
    pub fn id(&self) -> BackendId {
        self.id
    }

    /// Downcast to the concrete backend type.
    pub fn downcast_ref<B: Backend>(&self) -> Option<&B> {
        self.any.downcast_ref::<B>()
    }

    /// Whether two handles point at the same backend instance.
    pub fn ptr_eq(&self, other: &BackendHandle) -> bool {
        Arc::ptr_eq(&self.any, &other.any)
    }
}

impl Deref for BackendHandle {
    type Target = dyn Backend;

    fn deref(&self) -> &Self::Target {
        &*self.backend
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BackendHandle").field(&self.backend).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FixedBackend {
        heuristic: LaunchHeuristic,
    }

    impl Backend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn launch_heuristic(&self, _: &dyn Kernel, _: usize, _: usize) -> LaunchHeuristic {
            self.heuristic
        }

        fn dispatch(&self, _: &dyn Kernel, _: LaunchConfig) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
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

    fn fixed(threads: usize, blocks: usize) -> FixedBackend {
        FixedBackend {
            heuristic: LaunchHeuristic { threads, blocks },
        }
    }

    #[test]
    fn test_config_small_problem_single_block() {
        let b = fixed(256, 8);
        let cfg = b.launch_configuration(b.heuristic, 10, usize::MAX);
        assert_eq!(
            cfg,
            LaunchConfig {
                threads: 10,
                blocks: 1,
                elements_per_thread: 1
            }
        );
    }

    #[test]
    fn test_config_prefers_grid_stride_over_extra_blocks() {
        let b = fixed(256, 4);
        let cfg = b.launch_configuration(b.heuristic, 10_000, usize::MAX);
        assert_eq!(cfg.threads, 256);
        assert_eq!(cfg.blocks, 4);
        assert_eq!(cfg.elements_per_thread, 10);
        assert!(cfg.capacity() >= 10_000);
    }

    #[test]
    fn test_config_caps_elements_per_thread() {
        let b = fixed(256, 4);
        let cfg = b.launch_configuration(b.heuristic, 10_000, 2);
        assert_eq!(cfg.elements_per_thread, 2);
        assert_eq!(cfg.blocks, 20);
        assert!(cfg.capacity() >= 10_000);
    }

    #[test]
    fn test_config_no_grid_stride_when_disallowed() {
        let b = fixed(256, 4);
        let cfg = b.launch_configuration(b.heuristic, 10_000, 1);
        assert_eq!(cfg.elements_per_thread, 1);
        assert_eq!(cfg.blocks, 40);
    }

    #[test]
    fn test_config_zero_elements() {
        let b = fixed(256, 4);
        let cfg = b.launch_configuration(b.heuristic, 0, usize::MAX);
        assert_eq!(cfg.threads, 1);
        assert_eq!(cfg.blocks, 1);
    }

    #[test]
    fn test_handle_identity() {
        let a = BackendHandle::new(fixed(1, 1));
        let b = BackendHandle::new(fixed(2, 2));
        let c = BackendHandle::new(OtherBackend);
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
        assert_eq!(c.id().name(), "other");
        assert!(a.downcast_ref::<FixedBackend>().is_some());
        assert!(a.downcast_ref::<OtherBackend>().is_none());
    }
}
