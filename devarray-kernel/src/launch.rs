//! Two-phase launch negotiation.

use tracing::debug;

use devarray_traits::{Backend, Kernel, LaunchConfig};

/// Elements-per-thread hint passed to backends: as many as they like.
pub const ELEMENTS_PER_THREAD_HINT: usize = usize::MAX;

/// Ask `backend` how to launch `kernel` over `elements` elements.
///
/// The backend proposes a heuristic, then turns it into a configuration.
/// The result is used unchanged.
pub fn negotiate(backend: &dyn Backend, kernel: &dyn Kernel, elements: usize) -> LaunchConfig {
    let heuristic = backend.launch_heuristic(kernel, elements, ELEMENTS_PER_THREAD_HINT);
    let config = backend.launch_configuration(heuristic, elements, ELEMENTS_PER_THREAD_HINT);
    debug!(
        backend = backend.name(),
        kernel = kernel.name(),
        elements,
        proposed_threads = heuristic.threads,
        proposed_blocks = heuristic.blocks,
        threads = config.threads,
        blocks = config.blocks,
        elements_per_thread = config.elements_per_thread,
        "negotiated launch"
    );
    config
}
