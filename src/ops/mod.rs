//! Bulk operations
//!
//! Each operation is an inherent method on [`Engine`] that returns the new
//! array (or reduced value), with a `*_reported` twin that also returns the
//! [`ExecutionReport`] of the run.
//!
//! Operations whose slices write disjoint output runs share one resumable
//! driver: plan, fork-join, then finish leftover work on the calling thread
//! from each slice's checkpoint.

pub mod build;
pub mod filter;
pub mod map;
pub mod reduce;
pub mod scan;
pub mod scatter;

use std::ops::Range;

use crate::error::Result;
use crate::mode::ExecutionConfig;
use crate::plan::OpKind;
use crate::protocol::{Engine, ExecutionPath, ExecutionReport, Pass};
use crate::slices::{compute_all_slice_bounds, SliceDescriptor};

/// Per-slice state for operations that append one output run per slice
pub(crate) struct SliceOutput<U> {
    pub slice: SliceDescriptor,
    pub out: Vec<U>,
}

impl<U> SliceOutput<U> {
    pub fn new(slice: SliceDescriptor) -> Self {
        Self {
            slice,
            out: Vec::new(),
        }
    }
}

/// Concatenate per-slice runs in slice order
pub(crate) fn concat<U>(states: Vec<SliceOutput<U>>) -> Vec<U> {
    let total = states.iter().map(|s| s.out.len()).sum();
    let mut result = Vec::with_capacity(total);
    for state in states {
        result.extend(state.out);
    }
    result
}

/// Split `data` into consecutive mutable windows, one per range.
///
/// The ranges must be ascending and contiguous, starting at 0.
pub(crate) fn split_windows<'a, T>(
    mut data: &'a mut [T],
    ranges: impl IntoIterator<Item = Range<usize>>,
) -> Vec<&'a mut [T]> {
    let mut windows = Vec::new();
    let mut consumed = 0;
    for range in ranges {
        debug_assert_eq!(range.start, consumed);
        let (head, tail) = std::mem::take(&mut data).split_at_mut(range.end - range.start);
        windows.push(head);
        data = tail;
        consumed = range.end;
    }
    windows
}

/// Result of a resumable run; `states` is `None` when the run needed the
/// sequential path but the configuration disables it.
pub(crate) struct Resumed<S> {
    pub states: Option<Vec<S>>,
    pub report: ExecutionReport,
}

impl Engine {
    /// Drive a chunk-granular single-phase operation over `length` elements.
    ///
    /// In parallel every slice gets the state built by `init`; otherwise a
    /// single state covers all chunks. Leftover work after a fallback resumes
    /// from each slice's checkpoint.
    pub(crate) fn run_resumable<S, I, K>(
        &self,
        op: OpKind,
        length: usize,
        config: &ExecutionConfig,
        init: I,
        kernel: K,
    ) -> Result<Resumed<S>>
    where
        S: Send,
        I: Fn(SliceDescriptor) -> S,
        K: Fn(&mut S, &Pass<'_>) -> bool + Sync,
    {
        let plan = self.plan(op, length, config);
        let (mut states, report) = if plan.is_parallel() {
            let mut states: Vec<S> = compute_all_slice_bounds(plan.num_chunks, plan.num_slices)
                .into_descriptors()
                .into_iter()
                .map(&init)
                .collect();
            let outcome = self.fork_join(op, config, &mut states, &kernel);
            (states, ExecutionReport::from_phase(&plan, outcome))
        } else {
            let whole = SliceDescriptor::new(0..plan.num_chunks);
            (vec![init(whole)], ExecutionReport::sequential(&plan))
        };

        let needs_sequential = report.path == ExecutionPath::Sequential;
        if needs_sequential && config.sequential {
            self.complete_sequentially(op, &mut states, &kernel);
        }
        let report = self.finish(config, report)?;
        if needs_sequential && !config.sequential {
            log::debug!("{}: sequential path disabled, returning an empty result", op);
            return Ok(Resumed {
                states: None,
                report,
            });
        }
        Ok(Resumed {
            states: Some(states),
            report,
        })
    }
}
