//! Reference CPU backend for devarray.
//!
//! `CpuBackend` emulates an accelerator: "device" memory is ordinary host
//! memory, and a dispatch runs every block of the launch grid on the rayon
//! pool (or sequentially without the `parallel` feature). Thread slots
//! inside one block run one after another on the worker that owns the
//! block, which is how a real device would serialize them on a single lane.
//!
//! Dispatch is synchronous: when [`Backend::dispatch`] returns, every thread
//! slot has finished.

use std::sync::atomic::{AtomicU64, Ordering};

use devarray_traits::{Backend, ExecutionContext, Kernel, LaunchConfig, LaunchHeuristic, Result};
use tracing::trace;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Default thread slots per block.
pub const DEFAULT_THREADS_PER_BLOCK: usize = 256;

/// Resident blocks proposed per worker thread.
pub const BLOCKS_PER_WORKER: usize = 4;

/// Counters describing the work a [`CpuBackend`] has executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    /// Kernel dispatches submitted.
    pub dispatches: u64,
    /// Thread slots executed across all dispatches.
    pub thread_slots: u64,
}

/// Backend that executes kernels on the host.
#[derive(Debug)]
pub struct CpuBackend {
    threads_per_block: usize,
    dispatches: AtomicU64,
    thread_slots: AtomicU64,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::with_threads_per_block(DEFAULT_THREADS_PER_BLOCK)
    }

    /// Backend proposing `threads_per_block` slots per block (at least 1).
    pub fn with_threads_per_block(threads_per_block: usize) -> Self {
        Self {
            threads_per_block: threads_per_block.max(1),
            dispatches: AtomicU64::new(0),
            thread_slots: AtomicU64::new(0),
        }
    }

    pub fn threads_per_block(&self) -> usize {
        self.threads_per_block
    }

    /// Snapshot of the dispatch counters.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            thread_slots: self.thread_slots.load(Ordering::Relaxed),
        }
    }

    fn workers() -> usize {
        #[cfg(feature = "parallel")]
        {
            rayon::current_num_threads()
        }
        #[cfg(not(feature = "parallel"))]
        {
            1
        }
    }
}

/// Run every thread slot of one block.
#[inline]
fn run_block(kernel: &dyn Kernel, config: &LaunchConfig, block_idx: usize) {
    for thread_idx in 0..config.threads {
        let ctx = ExecutionContext {
            block_idx,
            thread_idx,
            block_dim: config.threads,
            grid_dim: config.blocks,
            quota: config.elements_per_thread,
        };
        kernel.execute(&ctx);
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn launch_heuristic(
        &self,
        _kernel: &dyn Kernel,
        _elements: usize,
        _elements_per_thread: usize,
    ) -> LaunchHeuristic {
        LaunchHeuristic {
            threads: self.threads_per_block,
            blocks: Self::workers() * BLOCKS_PER_WORKER,
        }
    }

    fn dispatch(&self, kernel: &dyn Kernel, config: LaunchConfig) -> Result<()> {
        trace!(
            kernel = kernel.name(),
            threads = config.threads,
            blocks = config.blocks,
            elements_per_thread = config.elements_per_thread,
            "cpu dispatch"
        );
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.thread_slots
            .fetch_add(config.total_threads() as u64, Ordering::Relaxed);

        #[cfg(feature = "parallel")]
        (0..config.blocks)
            .into_par_iter()
            .for_each(|block_idx| run_block(kernel, &config, block_idx));

        #[cfg(not(feature = "parallel"))]
        for block_idx in 0..config.blocks {
            run_block(kernel, &config, block_idx);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Records how often each logical index is visited.
    struct CountingKernel {
        len: usize,
        hits: Vec<AtomicUsize>,
    }

    impl CountingKernel {
        fn new(len: usize) -> Self {
            Self {
                len,
                hits: (0..len).map(|_| AtomicUsize::new(0)).collect(),
            }
        }
    }

    impl Kernel for CountingKernel {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn execute(&self, ctx: &ExecutionContext) {
            for local in 0..ctx.quota {
                let i = ctx.linear_index(local);
                if i >= self.len {
                    return;
                }
                self.hits[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn run(backend: &CpuBackend, len: usize, elements_per_thread: usize) -> CountingKernel {
        let kernel = CountingKernel::new(len);
        let heuristic = backend.launch_heuristic(&kernel, len, elements_per_thread);
        let config = backend.launch_configuration(heuristic, len, elements_per_thread);
        backend.dispatch(&kernel, config).unwrap();
        kernel
    }

    #[test]
    fn test_every_index_visited_once() {
        let backend = CpuBackend::with_threads_per_block(32);
        for len in [1, 31, 32, 33, 1000, 12_345] {
            let kernel = run(&backend, len, usize::MAX);
            assert!(
                kernel.hits.iter().all(|h| h.load(Ordering::Relaxed) == 1),
                "len={len}"
            );
        }
    }

    #[test]
    fn test_every_index_visited_once_without_grid_stride() {
        let backend = CpuBackend::with_threads_per_block(8);
        let kernel = run(&backend, 1001, 1);
        assert!(kernel.hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_stats_count_dispatches() {
        let backend = CpuBackend::with_threads_per_block(16);
        assert_eq!(backend.stats(), DispatchStats::default());
        run(&backend, 100, usize::MAX);
        run(&backend, 5, usize::MAX);
        let stats = backend.stats();
        assert_eq!(stats.dispatches, 2);
        assert!(stats.thread_slots >= 16 + 5);
    }

    #[test]
    fn test_heuristic_uses_block_size() {
        let backend = CpuBackend::with_threads_per_block(0);
        assert_eq!(backend.threads_per_block(), 1);
        let kernel = CountingKernel::new(0);
        let h = backend.launch_heuristic(&kernel, 10, usize::MAX);
        assert_eq!(h.threads, 1);
        assert!(h.blocks >= BLOCKS_PER_WORKER);
    }
}
