//! Inclusive prefix scan of rank 1 arrays
//!
//! The parallel scan runs in two fork-join phases around a short sequential
//! step:
//!
//! 1. every slice scans its own chunks in isolation;
//! 2. the last value of each slice is folded left to right into the carry
//!    that slice `i + 1` needs;
//! 3. every slice after the first combines its elements with its carry.
//!
//! A fallback in either phase discards the partial output and rescans the
//! whole array sequentially.

use crate::error::{ArrayError, Result};
use crate::mode::ExecutionConfig;
use crate::ops::split_windows;
use crate::plan::{DispatchPlan, OpKind};
use crate::protocol::{Engine, ExecutionPath, ExecutionReport, Pass};
use crate::slices::{compute_all_slice_bounds, SliceDescriptor, CHUNK_SIZE};
use crate::view::ArrayView;

/// One slice's window of the output, addressed by absolute element index
struct ScanWindow<'a, T> {
    slice: SliceDescriptor,
    base: usize,
    window: &'a mut [T],
}

/// Phase two state: a window plus the carry from all earlier slices
struct CarryWindow<'a, T> {
    slice: SliceDescriptor,
    base: usize,
    window: &'a mut [T],
    carry: Option<&'a T>,
}

impl Engine {
    /// Inclusive scan: `out[0] = a[0]`, `out[i] = f(out[i - 1], a[i])`
    ///
    /// ```
    /// use parray::{ArrayView, Engine, ExecutionConfig};
    ///
    /// let engine = Engine::new();
    /// let source = ArrayView::from_vec(vec![1, 2, 3, 4]);
    /// let sums = engine.scan(&source, &ExecutionConfig::default(), |a, b| a + b).unwrap();
    /// assert_eq!(sums.to_vec(), vec![1, 3, 6, 10]);
    /// ```
    pub fn scan<T, F>(&self, source: &ArrayView<T>, config: &ExecutionConfig, f: F) -> Result<ArrayView<T>>
    where
        T: Clone + Send + Sync,
        F: Fn(&T, &T) -> T + Sync,
    {
        self.scan_reported(source, config, f).map(|(array, _)| array)
    }

    pub fn scan_reported<T, F>(
        &self,
        source: &ArrayView<T>,
        config: &ExecutionConfig,
        f: F,
    ) -> Result<(ArrayView<T>, ExecutionReport)>
    where
        T: Clone + Send + Sync,
        F: Fn(&T, &T) -> T + Sync,
    {
        if source.rank() != 1 {
            return Err(ArrayError::UnsupportedShape {
                op: "scan",
                rank: source.rank(),
            });
        }
        if source.is_empty() {
            return Err(ArrayError::EmptyDomain);
        }

        let plan = self.plan(OpKind::Scan, source.len(), config);
        let mut out = source.to_vec();
        let report = if plan.is_parallel() {
            self.scan_parallel(&plan, config, &mut out, &f)
        } else {
            ExecutionReport::sequential(&plan)
        };

        let needs_sequential = report.path == ExecutionPath::Sequential;
        if needs_sequential && config.sequential {
            out = source.to_vec();
            scan_in_place(&mut out, &f);
        }
        let report = self.finish(config, report)?;
        if needs_sequential && !config.sequential {
            return Ok((ArrayView::empty(), report));
        }
        Ok((ArrayView::from_vec(out), report))
    }

    fn scan_parallel<T, F>(
        &self,
        plan: &DispatchPlan,
        config: &ExecutionConfig,
        out: &mut [T],
        f: &F,
    ) -> ExecutionReport
    where
        T: Clone + Send + Sync,
        F: Fn(&T, &T) -> T + Sync,
    {
        let length = out.len();
        let chunks = compute_all_slice_bounds(plan.num_chunks, plan.num_slices);
        let elements = chunks.to_element_bounds(length);

        // phase 1: scan each slice in isolation
        let mut windows: Vec<ScanWindow<'_, T>> = chunks
            .iter()
            .zip(split_windows(out, elements.iter().map(|s| s.range())))
            .map(|(slice, window)| ScanWindow {
                slice: *slice,
                base: slice.element_range(length).start,
                window,
            })
            .collect();
        let outcome = self.fork_join(OpKind::Scan, config, &mut windows, |state, pass| {
            scan_chunks(state, pass, length, f)
        });
        let report = ExecutionReport::from_phase(plan, outcome);
        if !outcome.is_completed() {
            return report;
        }

        // sequential step: carry[i] combines the final values of slices 0..i
        let mut carries: Vec<Option<T>> = Vec::with_capacity(windows.len());
        let mut running: Option<T> = None;
        for state in &windows {
            carries.push(running.clone());
            if let Some(last) = state.window.last() {
                running = Some(match running.take() {
                    Some(acc) => f(&acc, last),
                    None => last.clone(),
                });
            }
        }
        drop(windows);

        // phase 2: fold the carry into every element of the later slices
        let mut windows: Vec<CarryWindow<'_, T>> = elements
            .iter()
            .zip(split_windows(out, elements.iter().map(|s| s.range())))
            .zip(carries.iter())
            .map(|((slice, window), carry)| {
                let mut slice = *slice;
                if carry.is_none() {
                    slice.pos = slice.end;
                }
                CarryWindow {
                    slice,
                    base: slice.start,
                    window,
                    carry: carry.as_ref(),
                }
            })
            .collect();
        let outcome = self.fork_join(OpKind::Scan, config, &mut windows, |state, pass| {
            apply_carry(state, pass, f)
        });
        report.then(outcome)
    }
}

fn scan_chunks<T, F>(state: &mut ScanWindow<'_, T>, pass: &Pass<'_>, length: usize, f: &F) -> bool
where
    F: Fn(&T, &T) -> T,
{
    let end = state.slice.pass_end(pass.warmup, 2);
    while state.slice.pos < end {
        let chunk = state.slice.pos;
        if pass.should_bail(chunk) {
            return false;
        }
        for i in SliceDescriptor::chunk_range(chunk, length) {
            let k = i - state.base;
            if k > 0 {
                let value = f(&state.window[k - 1], &state.window[k]);
                state.window[k] = value;
            }
        }
        state.slice.pos += 1;
    }
    state.slice.is_finished()
}

fn apply_carry<T, F>(state: &mut CarryWindow<'_, T>, pass: &Pass<'_>, f: &F) -> bool
where
    F: Fn(&T, &T) -> T,
{
    let Some(carry) = state.carry else {
        return true;
    };
    let end = state.slice.pass_end(pass.warmup, CHUNK_SIZE);
    while state.slice.pos < end {
        let i = state.slice.pos;
        if pass.should_bail(i) {
            return false;
        }
        let k = i - state.base;
        let value = f(carry, &state.window[k]);
        state.window[k] = value;
        state.slice.pos += 1;
    }
    state.slice.is_finished()
}

fn scan_in_place<T, F>(data: &mut [T], f: &F)
where
    F: Fn(&T, &T) -> T,
{
    for k in 1..data.len() {
        let value = f(&data[k - 1], &data[k]);
        data[k] = value;
    }
}
