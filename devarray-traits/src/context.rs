//! Per-thread-slot execution context handed to kernels by a backend.

/// Identity of one logical thread slot within a dispatch.
///
/// A backend builds one context per thread slot it runs. The kernel derives
/// every logical element index it touches from this value alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Index of this slot's block within the grid.
    pub block_idx: usize,
    /// Index of this slot within its block.
    pub thread_idx: usize,
    /// Thread slots per block.
    pub block_dim: usize,
    /// Blocks in the grid.
    pub grid_dim: usize,
    /// Elements this slot is responsible for (the negotiated elements-per-thread).
    pub quota: usize,
}

impl ExecutionContext {
    /// Global index of this thread slot across the whole grid.
    #[inline]
    pub fn global_index(&self) -> usize {
        self.block_idx * self.block_dim + self.thread_idx
    }

    /// Total thread slots in the grid, i.e. the grid-stride step.
    #[inline]
    pub fn global_size(&self) -> usize {
        self.block_dim * self.grid_dim
    }

    /// Flat logical index of iteration `local` of this slot's grid-stride loop.
    ///
    /// Consecutive slots touch consecutive elements on every iteration, so a
    /// warp's accesses stay adjacent.
    #[inline]
    pub fn linear_index(&self, local: usize) -> usize {
        local * self.global_size() + self.global_index()
    }
}
