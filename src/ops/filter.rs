//! Order-preserving filter over the outermost dimension
//!
//! Pass one evaluates the predicate and records survivors as one `u32` word
//! per chunk, bit `b` standing for element `chunk * CHUNK_SIZE + b`. Pass two
//! turns the per-slice survivor counts into output offsets and copies the
//! survivors; it runs no user code and is never interrupted.

use rayon::prelude::*;

use crate::error::Result;
use crate::mode::ExecutionConfig;
use crate::plan::OpKind;
use crate::protocol::{Engine, ExecutionReport, Pass};
use crate::shape::Shape;
use crate::slices::{SliceDescriptor, CHUNK_SHIFT};
use crate::view::{ArrayView, Element};

/// Survivor bitsets of one slice, one word per processed chunk
struct Survivors {
    slice: SliceDescriptor,
    words: Vec<u32>,
    count: usize,
}

impl Survivors {
    fn new(slice: SliceDescriptor) -> Self {
        Self {
            slice,
            words: Vec::with_capacity(slice.len()),
            count: 0,
        }
    }

    /// Indices of the surviving elements, ascending
    fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(move |(k, &word)| {
            let chunk_start = (self.slice.start + k) << CHUNK_SHIFT;
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(chunk_start + bit)
            })
        })
    }
}

impl Engine {
    /// Keep the elements of the outermost dimension for which
    /// `predicate(element, index, source)` holds, in their original order.
    ///
    /// The result has shape `[count, inner...]`.
    pub fn filter<T, P>(&self, source: &ArrayView<T>, config: &ExecutionConfig, predicate: P) -> Result<ArrayView<T>>
    where
        T: Clone + Send + Sync,
        P: Fn(Element<'_, T>, usize, &ArrayView<T>) -> bool + Sync,
    {
        self.filter_reported(source, config, predicate).map(|(array, _)| array)
    }

    pub fn filter_reported<T, P>(
        &self,
        source: &ArrayView<T>,
        config: &ExecutionConfig,
        predicate: P,
    ) -> Result<(ArrayView<T>, ExecutionReport)>
    where
        T: Clone + Send + Sync,
        P: Fn(Element<'_, T>, usize, &ArrayView<T>) -> bool + Sync,
    {
        let length = source.len();

        let kernel = |state: &mut Survivors, pass: &Pass<'_>| {
            let end = state.slice.pass_end(pass.warmup, 1);
            while state.slice.pos < end {
                let chunk = state.slice.pos;
                if pass.should_bail(chunk) {
                    return false;
                }
                let range = SliceDescriptor::chunk_range(chunk, length);
                let chunk_start = range.start;
                let mut word = 0u32;
                for i in range {
                    if predicate(source.element_at(i), i, source) {
                        word |= 1 << (i - chunk_start);
                    }
                }
                state.count += word.count_ones() as usize;
                state.words.push(word);
                state.slice.pos += 1;
            }
            state.slice.is_finished()
        };

        let resumed = self.run_resumable(OpKind::Filter, length, config, Survivors::new, kernel)?;
        let Some(survivors) = resumed.states else {
            return Ok((ArrayView::empty(), resumed.report));
        };

        let data = source.as_slice();
        let inner = source.inner_len();
        let runs: Vec<Vec<T>> = survivors
            .par_iter()
            .map(|s| {
                let mut run = Vec::with_capacity(s.count * inner);
                for i in s.indices() {
                    run.extend_from_slice(&data[i * inner..(i + 1) * inner]);
                }
                run
            })
            .collect();

        let count: usize = survivors.iter().map(|s| s.count).sum();
        let mut out = Vec::with_capacity(count * inner);
        let mut base = 0;
        for (run, s) in runs.into_iter().zip(&survivors) {
            debug_assert_eq!(out.len(), base * inner);
            out.extend(run);
            base += s.count;
        }
        log::trace!("filter: {} of {} elements survive", count, length);

        let mut dims = vec![count];
        dims.extend_from_slice(source.shape().inner());
        let array = ArrayView::from_shape_vec(Shape::new(dims)?, out)?;
        Ok((array, resumed.report))
    }
}
