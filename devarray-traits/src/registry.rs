//! Process-wide backend registry keyed by backend type.
//!
//! Each backend type resolves to one shared instance, looked up once by
//! `TypeId` rather than rediscovered at every call site.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::LazyLock;

use parking_lot::RwLock;
use tracing::info;

use crate::backend::{Backend, BackendHandle};

static REGISTRY: LazyLock<RwLock<HashMap<TypeId, BackendHandle>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register `backend` as the shared instance for its type.
///
/// Replaces any instance registered earlier for the same type. Arrays that
/// already hold a handle to the old instance keep using it.
pub fn register<B: Backend>(backend: B) -> BackendHandle {
    let handle = BackendHandle::new(backend);
    info!(backend = handle.id().name(), "registered backend");
    REGISTRY
        .write()
        .insert(TypeId::of::<B>(), handle.clone());
    handle
}

/// Shared instance registered for backend type `B`, if any.
pub fn lookup<B: Backend>() -> Option<BackendHandle> {
    REGISTRY.read().get(&TypeId::of::<B>()).cloned()
}

/// Shared instance for `B`, registering `B::default()` on first use.
pub fn get_or_register<B: Backend + Default>() -> BackendHandle {
    if let Some(handle) = lookup::<B>() {
        return handle;
    }
    let mut map = REGISTRY.write();
    map.entry(TypeId::of::<B>())
        .or_insert_with(|| {
            let handle = BackendHandle::new(B::default());
            info!(backend = handle.id().name(), "registered default backend");
            handle
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Kernel, LaunchConfig, LaunchHeuristic};
    use crate::Result;

    #[derive(Debug, Default)]
    struct NullBackend;

    impl Backend for NullBackend {
        fn name(&self) -> &'static str {
            "null"
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

    #[derive(Debug, Default)]
    struct UnregisteredBackend;

    impl Backend for UnregisteredBackend {
        fn name(&self) -> &'static str {
            "unregistered"
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

    #[test]
    fn test_get_or_register_is_shared() {
        let a = get_or_register::<NullBackend>();
        let b = get_or_register::<NullBackend>();
        assert!(a.ptr_eq(&b));
        assert!(lookup::<NullBackend>().is_some());
        assert_eq!(a.id().name(), "null");
    }

    #[test]
    fn test_lookup_missing() {
        assert!(lookup::<UnregisteredBackend>().is_none());
    }
}
