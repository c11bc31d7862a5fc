//! Chunk and slice partitioning
//!
//! An index domain is cut into fixed-size chunks of [`CHUNK_SIZE`] elements
//! (the last chunk may be short), and the chunks are grouped into one
//! contiguous slice per worker. Each slice carries a progress checkpoint,
//! `pos`, so that a worker which stops early can be resumed exactly where it
//! left off.
//!
//! # Example
//!
//! ```
//! use parray::slices::{compute_all_slice_bounds, compute_num_chunks};
//!
//! let chunks = compute_num_chunks(1000); // 32 chunks, the last one short
//! let plan = compute_all_slice_bounds(chunks, 3);
//!
//! // 32 / 3 = 10 chunks per slice, the final slice absorbs the remainder
//! let widths: Vec<_> = plan.iter().map(|s| s.len()).collect();
//! assert_eq!(widths, vec![10, 10, 12]);
//! ```

use std::ops::Range;

/// log2 of [`CHUNK_SIZE`]
pub const CHUNK_SHIFT: usize = 5;

/// Number of elements per chunk, the unit of checkpointing.
///
/// Filter packs one chunk of survivors into a `u32`, so this must stay at
/// most 32.
pub const CHUNK_SIZE: usize = 1 << CHUNK_SHIFT;

/// Number of chunks needed to cover `length` elements
pub fn compute_num_chunks(length: usize) -> usize {
    length.div_ceil(CHUNK_SIZE)
}

/// Bounds of slice `slice_index` out of `num_slices` over `num_items` items.
///
/// Every slice gets `num_items / num_slices` items; the final slice also takes
/// the remainder.
pub fn compute_slice_bounds(num_items: usize, slice_index: usize, num_slices: usize) -> Range<usize> {
    let width = num_items / num_slices;
    let start = width * slice_index;
    let end = if slice_index == num_slices - 1 {
        num_items
    } else {
        width * (slice_index + 1)
    };
    start..end
}

/// Divide `num_items` units among `num_slices` slices with `pos = start`
pub fn compute_all_slice_bounds(num_items: usize, num_slices: usize) -> SlicePlan {
    let num_slices = num_slices.max(1);
    let slices = (0..num_slices)
        .map(|i| SliceDescriptor::new(compute_slice_bounds(num_items, i, num_slices)))
        .collect();
    SlicePlan { num_items, slices }
}

/// One worker's statically assigned range plus its progress checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceDescriptor {
    /// First unit owned by this slice
    pub start: usize,
    /// One past the last unit owned by this slice
    pub end: usize,
    /// Next unit not yet processed, `start <= pos <= end`
    pub pos: usize,
}

impl SliceDescriptor {
    pub fn new(range: Range<usize>) -> Self {
        Self {
            start: range.start,
            end: range.end,
            pos: range.start,
        }
    }

    /// Number of units in this slice
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finished(&self) -> bool {
        self.pos == self.end
    }

    /// Whether no unit has been processed yet
    pub fn is_untouched(&self) -> bool {
        self.pos == self.start
    }

    /// End of the range a pass should stop at: all of it, or at most
    /// `warmup_units` past `pos` during a warmup pass.
    pub fn pass_end(&self, warmup: bool, warmup_units: usize) -> usize {
        if warmup {
            self.end.min(self.pos + warmup_units)
        } else {
            self.end
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Element range of the slice's chunks, clamped to `length`
    pub fn element_range(&self, length: usize) -> Range<usize> {
        let start = (self.start << CHUNK_SHIFT).min(length);
        let end = (self.end << CHUNK_SHIFT).min(length);
        start..end
    }

    /// Element range of chunk `chunk`, clamped to `length`
    pub fn chunk_range(chunk: usize, length: usize) -> Range<usize> {
        let start = chunk << CHUNK_SHIFT;
        start..(start + CHUNK_SIZE).min(length)
    }
}

/// Slice descriptors for every worker of one operation
#[derive(Debug, Clone)]
pub struct SlicePlan {
    /// Total number of units covered
    pub num_items: usize,
    slices: Vec<SliceDescriptor>,
}

impl SlicePlan {
    pub fn num_slices(&self) -> usize {
        self.slices.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SliceDescriptor> {
        self.slices.iter()
    }

    pub fn into_descriptors(self) -> Vec<SliceDescriptor> {
        self.slices
    }

    /// Convert a chunk-granular plan into element-granular descriptors over
    /// `length` elements, with every `pos` reset to its slice start.
    pub fn to_element_bounds(&self, length: usize) -> SlicePlan {
        let slices = self
            .slices
            .iter()
            .map(|s| SliceDescriptor::new(s.element_range(length)))
            .collect();
        SlicePlan {
            num_items: length,
            slices,
        }
    }

    /// Verify that every unit in `[0, num_items)` is covered exactly once, in order
    #[cfg(test)]
    fn verify_coverage(&self) -> bool {
        let mut next = 0;
        for slice in &self.slices {
            if slice.start != next || slice.end < slice.start {
                return false;
            }
            next = slice.end;
        }
        next == self.num_items
    }
}

impl<'a> IntoIterator for &'a SlicePlan {
    type Item = &'a SliceDescriptor;
    type IntoIter = std::slice::Iter<'a, SliceDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
