//! Indexing strategy selection.
//!
//! A launch addresses elements either by the flat index alone or, when some
//! side cannot map a flat index to storage directly, through a table of
//! column-major coordinates built once per launch.

use tracing::debug;

use devarray_view::layout::total_len;
use devarray_view::IndexStyle;

/// Addressing mode of one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingStrategy {
    /// Every side reads and writes by flat index.
    Linear,
    /// Coordinates are looked up in a [`CartesianTable`].
    Cartesian,
}

impl IndexingStrategy {
    /// Pick the strategy for a destination of style `dest` and operands
    /// whose combined style is `operands`.
    pub fn resolve(dest: IndexStyle, operands: IndexStyle) -> Self {
        let strategy = match dest.combine(operands) {
            IndexStyle::Linear => IndexingStrategy::Linear,
            IndexStyle::Cartesian => IndexingStrategy::Cartesian,
        };
        debug!(?dest, ?operands, ?strategy, "resolved indexing strategy");
        strategy
    }
}

/// Column-major coordinates of every position in a shape.
#[derive(Debug, Clone)]
pub struct CartesianTable {
    ndim: usize,
    len: usize,
    coords: Vec<usize>,
}

impl CartesianTable {
    pub fn new(dims: &[usize]) -> Self {
        let ndim = dims.len();
        let len = total_len(dims);
        let mut coords = Vec::with_capacity(len * ndim);
        let mut current = vec![0usize; ndim];
        for _ in 0..len {
            coords.extend_from_slice(&current);
            for (c, &d) in current.iter_mut().zip(dims.iter()) {
                *c += 1;
                if *c < d {
                    break;
                }
                *c = 0;
            }
        }
        Self { ndim, len, coords }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.ndim
    }

    /// Coordinates of position `i`.
    #[inline]
    pub fn get(&self, i: usize) -> Option<&[usize]> {
        if i < self.len {
            Some(&self.coords[i * self.ndim..(i + 1) * self.ndim])
        } else {
            None
        }
    }

    /// Coordinates of position `i` without a bounds check.
    ///
    /// # Safety
    ///
    /// `i` must be below `len()`.
    #[inline]
    pub unsafe fn get_unchecked(&self, i: usize) -> &[usize] {
        unsafe {
            self.coords
                .get_unchecked(i * self.ndim..(i + 1) * self.ndim)
        }
    }
}
