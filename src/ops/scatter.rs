//! Scatter of rank 1 arrays into a fresh output
//!
//! `out[targets[i]] = source[i]` for every effective target, `default` where
//! nothing lands. When several sources hit one position they are combined
//! with the conflict function as `f(new, existing)`.
//!
//! Two parallel strategies exist:
//!
//! * [`ScatterStrategy::DivideOutputRange`]: each worker owns a range of the
//!   output, walks every target and only writes the ones inside its range.
//! * [`ScatterStrategy::DivideScatterVector`]: each worker owns a range of
//!   the targets and scatters into a private buffer; the buffers are merged
//!   in worker order afterwards.

use std::ops::Range;

use crate::error::{ArrayError, Result};
use crate::mode::{ExecutionConfig, MergeMode, ScatterStrategy};
use crate::ops::split_windows;
use crate::plan::{DispatchPlan, OpKind};
use crate::protocol::{Engine, ExecutionPath, ExecutionReport, Pass};
use crate::slices::{compute_all_slice_bounds, compute_num_chunks, SliceDescriptor, CHUNK_SIZE};
use crate::view::ArrayView;

/// Types accepted as scatter targets
pub trait ScatterIndex: Copy + Send + Sync {
    /// The target as a signed position, or `None` if it is not an integer
    fn as_position(self) -> Option<i64>;
}

impl ScatterIndex for usize {
    fn as_position(self) -> Option<i64> {
        Some(i64::try_from(self).unwrap_or(i64::MAX))
    }
}

impl ScatterIndex for u32 {
    fn as_position(self) -> Option<i64> {
        Some(i64::from(self))
    }
}

impl ScatterIndex for i32 {
    fn as_position(self) -> Option<i64> {
        Some(i64::from(self))
    }
}

impl ScatterIndex for i64 {
    fn as_position(self) -> Option<i64> {
        Some(self)
    }
}

impl ScatterIndex for f64 {
    fn as_position(self) -> Option<i64> {
        (self.is_finite() && self.fract() == 0.0).then_some(self as i64)
    }
}

/// Which positions of an output window have been written
#[derive(Debug, Clone)]
pub(crate) struct ConflictSet {
    base: usize,
    written: Vec<bool>,
}

impl ConflictSet {
    pub fn new(range: Range<usize>) -> Self {
        Self {
            base: range.start,
            written: vec![false; range.len()],
        }
    }

    /// Mark `target` written; false if it already was
    pub fn insert(&mut self, target: usize) -> bool {
        let slot = &mut self.written[target - self.base];
        !std::mem::replace(slot, true)
    }
}

/// Validate and convert the effective targets
fn resolve_targets<I: ScatterIndex>(targets: &[I], length: usize) -> Result<Vec<usize>> {
    targets
        .iter()
        .enumerate()
        .map(|(index, t)| {
            let target = t.as_position().ok_or_else(|| {
                ArrayError::argument(format!("scatter target of source index {} is not an integer", index))
            })?;
            usize::try_from(target)
                .ok()
                .filter(|&t| t < length)
                .ok_or(ArrayError::Bounds {
                    index,
                    target,
                    len: length,
                })
        })
        .collect()
}

fn check_no_conflicts(targets: &[usize], length: usize) -> Result<()> {
    let mut written = ConflictSet::new(0..length);
    for (index, &target) in targets.iter().enumerate() {
        if !written.insert(target) {
            return Err(ArrayError::ScatterConflict { index, target });
        }
    }
    Ok(())
}

/// Worker state for the output-range strategy: a cursor over all targets
/// and the output window the worker owns
struct OutputRange<'a, T> {
    cursor: SliceDescriptor,
    range: Range<usize>,
    window: &'a mut [T],
    written: ConflictSet,
}

/// Worker state for the scatter-vector strategy
struct PrivateScatter<T> {
    slice: SliceDescriptor,
    out: Vec<Option<T>>,
}

impl Engine {
    /// Scatter `source` into an array of `length` elements filled with
    /// `default`. Two sources hitting one target is an error.
    ///
    /// ```
    /// use parray::{ArrayView, Engine, ExecutionConfig};
    ///
    /// let engine = Engine::new();
    /// let source = ArrayView::from_vec(vec![10, 20, 30]);
    /// let out = engine
    ///     .scatter(&source, &[2usize, 0, 3], 0, 5, &ExecutionConfig::default())
    ///     .unwrap();
    /// assert_eq!(out.to_vec(), vec![20, 0, 10, 30, 0]);
    /// ```
    pub fn scatter<T, I>(
        &self,
        source: &ArrayView<T>,
        targets: &[I],
        default: T,
        length: usize,
        config: &ExecutionConfig,
    ) -> Result<ArrayView<T>>
    where
        T: Clone + Send + Sync,
        I: ScatterIndex,
    {
        self.scatter_reported(source, targets, default, length, config)
            .map(|(array, _)| array)
    }

    pub fn scatter_reported<T, I>(
        &self,
        source: &ArrayView<T>,
        targets: &[I],
        default: T,
        length: usize,
        config: &ExecutionConfig,
    ) -> Result<(ArrayView<T>, ExecutionReport)>
    where
        T: Clone + Send + Sync,
        I: ScatterIndex,
    {
        self.scatter_impl::<T, I, fn(&T, &T) -> T>(source, targets, default, length, config, None)
    }

    /// Scatter combining colliding sources with `conflict(new, existing)`
    pub fn scatter_with<T, I, C>(
        &self,
        source: &ArrayView<T>,
        targets: &[I],
        default: T,
        length: usize,
        config: &ExecutionConfig,
        conflict: C,
    ) -> Result<ArrayView<T>>
    where
        T: Clone + Send + Sync,
        I: ScatterIndex,
        C: Fn(&T, &T) -> T + Sync,
    {
        self.scatter_with_reported(source, targets, default, length, config, conflict)
            .map(|(array, _)| array)
    }

    pub fn scatter_with_reported<T, I, C>(
        &self,
        source: &ArrayView<T>,
        targets: &[I],
        default: T,
        length: usize,
        config: &ExecutionConfig,
        conflict: C,
    ) -> Result<(ArrayView<T>, ExecutionReport)>
    where
        T: Clone + Send + Sync,
        I: ScatterIndex,
        C: Fn(&T, &T) -> T + Sync,
    {
        self.scatter_impl(source, targets, default, length, config, Some(&conflict))
    }

    fn scatter_impl<T, I, C>(
        &self,
        source: &ArrayView<T>,
        targets: &[I],
        default: T,
        length: usize,
        config: &ExecutionConfig,
        conflict: Option<&C>,
    ) -> Result<(ArrayView<T>, ExecutionReport)>
    where
        T: Clone + Send + Sync,
        I: ScatterIndex,
        C: Fn(&T, &T) -> T + Sync,
    {
        if source.rank() != 1 {
            return Err(ArrayError::UnsupportedShape {
                op: "scatter",
                rank: source.rank(),
            });
        }
        let count = targets.len().min(source.len());
        let data = &source.as_slice()[..count];
        let targets = resolve_targets(&targets[..count], length)?;
        if conflict.is_none() {
            check_no_conflicts(&targets, length)?;
        }

        // without a conflict function duplicates were rejected above
        let collide = |new: &T, existing: &T| match conflict {
            Some(f) => f(new, existing),
            None => new.clone(),
        };

        let plan = self.plan(OpKind::Scatter, count, config);
        if !plan.is_parallel() {
            let report = self.finish(config, ExecutionReport::sequential(&plan))?;
            if !config.sequential {
                return Ok((ArrayView::empty(), report));
            }
            let out = scatter_sequential(data, &targets, default, length, &collide);
            return Ok((ArrayView::from_vec(out), report));
        }

        let strategy = config.strategy.unwrap_or(if count < length {
            ScatterStrategy::DivideOutputRange
        } else {
            ScatterStrategy::DivideScatterVector
        });
        log::debug!("scatter: {} targets into {} using {}", count, length, strategy);

        let job = ScatterJob {
            data,
            targets: &targets,
            length,
            collide: &collide,
        };
        let (out, report) = match strategy {
            ScatterStrategy::DivideOutputRange => self.divide_output_range(&plan, config, &job, default),
            ScatterStrategy::DivideScatterVector => self.divide_scatter_vector(&plan, config, &job, default),
        };
        let report = self.finish(config, report)?;
        Ok((out.map_or_else(ArrayView::empty, ArrayView::from_vec), report))
    }

    fn divide_output_range<T, C>(
        &self,
        plan: &DispatchPlan,
        config: &ExecutionConfig,
        job: &ScatterJob<'_, T, C>,
        default: T,
    ) -> (Option<Vec<T>>, ExecutionReport)
    where
        T: Clone + Send + Sync,
        C: Fn(&T, &T) -> T + Sync,
    {
        let mut out = vec![default; job.length];
        let ranges = compute_all_slice_bounds(job.length, plan.num_slices);
        let mut workers: Vec<OutputRange<'_, T>> = ranges
            .iter()
            .zip(split_windows(&mut out, ranges.iter().map(|s| s.range())))
            .map(|(slice, window)| OutputRange {
                cursor: SliceDescriptor::new(0..job.targets.len()),
                range: slice.range(),
                window,
                written: ConflictSet::new(slice.range()),
            })
            .collect();

        let kernel = |state: &mut OutputRange<'_, T>, pass: &Pass<'_>| {
            let end = state.cursor.pass_end(pass.warmup, CHUNK_SIZE);
            while state.cursor.pos < end {
                let i = state.cursor.pos;
                if pass.should_bail(i) {
                    return false;
                }
                let target = job.targets[i];
                if state.range.contains(&target) {
                    let k = target - state.range.start;
                    if state.written.insert(target) {
                        state.window[k] = job.data[i].clone();
                    } else {
                        let value = (job.collide)(&job.data[i], &state.window[k]);
                        state.window[k] = value;
                    }
                }
                state.cursor.pos += 1;
            }
            state.cursor.is_finished()
        };

        let outcome = self.fork_join(OpKind::Scatter, config, &mut workers, &kernel);
        let report = ExecutionReport::from_phase(plan, outcome);
        if report.path == ExecutionPath::Sequential {
            if !config.sequential {
                return (None, report);
            }
            self.complete_sequentially(OpKind::Scatter, &mut workers, &kernel);
        }
        drop(workers);
        (Some(out), report)
    }

    fn divide_scatter_vector<T, C>(
        &self,
        plan: &DispatchPlan,
        config: &ExecutionConfig,
        job: &ScatterJob<'_, T, C>,
        default: T,
    ) -> (Option<Vec<T>>, ExecutionReport)
    where
        T: Clone + Send + Sync,
        C: Fn(&T, &T) -> T + Sync,
    {
        let count = job.targets.len();
        let slices = compute_all_slice_bounds(compute_num_chunks(count), plan.num_slices).to_element_bounds(count);
        let mut workers: Vec<PrivateScatter<T>> = slices
            .iter()
            .map(|slice| PrivateScatter {
                slice: *slice,
                out: vec![None; job.length],
            })
            .collect();

        let kernel = |state: &mut PrivateScatter<T>, pass: &Pass<'_>| {
            let end = state.slice.pass_end(pass.warmup, CHUNK_SIZE);
            while state.slice.pos < end {
                let i = state.slice.pos;
                if pass.should_bail(i) {
                    return false;
                }
                let slot = &mut state.out[job.targets[i]];
                *slot = Some(match slot.take() {
                    Some(existing) => (job.collide)(&job.data[i], &existing),
                    None => job.data[i].clone(),
                });
                state.slice.pos += 1;
            }
            state.slice.is_finished()
        };

        let outcome = self.fork_join(OpKind::Scatter, config, &mut workers, &kernel);
        let report = ExecutionReport::from_phase(plan, outcome);
        if report.path == ExecutionPath::Sequential {
            if !config.sequential {
                return (None, report);
            }
            self.complete_sequentially(OpKind::Scatter, &mut workers, &kernel);
        }

        if config.merge == MergeMode::Par {
            log::debug!("scatter: parallel merge requested, merging sequentially");
        }
        let mut merged: Vec<Option<T>> = vec![None; job.length];
        for worker in workers {
            for (slot, value) in merged.iter_mut().zip(worker.out) {
                let Some(value) = value else { continue };
                *slot = Some(match slot.take() {
                    Some(accumulated) => (job.collide)(&value, &accumulated),
                    None => value,
                });
            }
        }
        let out = merged
            .into_iter()
            .map(|v| v.unwrap_or_else(|| default.clone()))
            .collect();
        (Some(out), report)
    }
}

/// Borrowed inputs shared by every scatter worker
struct ScatterJob<'a, T, C> {
    data: &'a [T],
    targets: &'a [usize],
    length: usize,
    collide: &'a C,
}

fn scatter_sequential<T, C>(data: &[T], targets: &[usize], default: T, length: usize, collide: &C) -> Vec<T>
where
    T: Clone,
    C: Fn(&T, &T) -> T,
{
    let mut out = vec![default; length];
    let mut written = ConflictSet::new(0..length);
    for (value, &target) in data.iter().zip(targets) {
        out[target] = if written.insert(target) {
            value.clone()
        } else {
            collide(value, &out[target])
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::host::BailSchedule;
    use crate::mode::ExecutionMode;
    use crate::shape::Shape;

    fn strategies() -> [ScatterStrategy; 2] {
        [ScatterStrategy::DivideOutputRange, ScatterStrategy::DivideScatterVector]
    }

    #[test]
    fn test_scatter_identity() {
        let engine = Engine::new();
        let source = ArrayView::from_vec((0..2000u32).collect());
        let targets: Vec<usize> = (0..2000).collect();
        for strategy in strategies() {
            let config = ExecutionConfig::new(ExecutionMode::Par)
                .with_workers(4)
                .with_strategy(strategy);
            let out = engine.scatter(&source, &targets, 0, 2000, &config).unwrap();
            assert_eq!(out, source, "{}", strategy);
        }
    }

    #[test]
    fn test_scatter_reverse_small_forced() {
        let engine = Engine::new();
        let source = ArrayView::from_vec((2..16i32).collect());
        let targets: Vec<i32> = (0..14).rev().collect();
        let expected: Vec<i32> = (2..16).rev().collect();
        for strategy in strategies() {
            let config = ExecutionConfig::new(ExecutionMode::Par)
                .with_workers(8)
                .with_strategy(strategy);
            let (out, report) = engine.scatter_reported(&source, &targets, 0, 14, &config).unwrap();
            assert_eq!(report.path, ExecutionPath::Parallel);
            assert_eq!(out.to_vec(), expected);
        }
    }

    #[test]
    fn test_scatter_conflicts_combine() {
        let engine = Engine::new();
        let source = ArrayView::from_vec((1..=3000u64).collect());
        let targets: Vec<u32> = (0..3000).map(|i| i % 7).collect();
        let seq = engine
            .scatter_with(&source, &targets, 0, 10, &ExecutionConfig::seq(), |a, b| a + b)
            .unwrap();
        for strategy in strategies() {
            let config = ExecutionConfig::new(ExecutionMode::Par)
                .with_workers(4)
                .with_strategy(strategy);
            let par = engine
                .scatter_with(&source, &targets, 0, 10, &config, |a, b| a + b)
                .unwrap();
            assert_eq!(par, seq, "{}", strategy);
        }
        assert_eq!(seq.scalar(&[7]), Some(&0));
    }

    #[test]
    fn test_conflict_function_sees_new_then_existing() {
        let engine = Engine::new();
        let source = ArrayView::from_vec(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        let out = engine
            .scatter_with(&source, &[0usize, 0, 0], String::new(), 1, &ExecutionConfig::seq(), |new, old| {
                format!("{}{}", new, old)
            })
            .unwrap();
        assert_eq!(out.to_vec(), vec!["cba".to_string()]);
    }

    #[test]
    fn test_scatter_validation_errors() {
        let engine = Engine::new();
        let source = ArrayView::from_vec(vec![1, 2, 3]);
        let config = ExecutionConfig::default();

        let err = engine.scatter(&source, &[0.0, 1.5, 2.0], 0, 3, &config).unwrap_err();
        assert!(matches!(err, ArrayError::Argument(ref msg) if msg.contains("source index 1")));

        let err = engine.scatter(&source, &[0i64, 1, -1], 0, 3, &config).unwrap_err();
        assert_eq!(err, ArrayError::Bounds { index: 2, target: -1, len: 3 });

        let err = engine.scatter(&source, &[0usize, 3, 1], 0, 3, &config).unwrap_err();
        assert_eq!(err, ArrayError::Bounds { index: 1, target: 3, len: 3 });

        let err = engine.scatter(&source, &[2usize, 0, 2], 0, 3, &config).unwrap_err();
        assert_eq!(err, ArrayError::ScatterConflict { index: 2, target: 2 });

        let err = engine.scatter(&source, &[f64::NAN], 0, 3, &config).unwrap_err();
        assert!(matches!(err, ArrayError::Argument(_)));
    }

    #[test]
    fn test_scatter_ignores_extra_targets() {
        let engine = Engine::new();
        let source = ArrayView::from_vec(vec![7, 8]);
        // the third target would be out of bounds, but there is no third source
        let out = engine
            .scatter(&source, &[1usize, 0, 99], -1, 3, &ExecutionConfig::default())
            .unwrap();
        assert_eq!(out.to_vec(), vec![8, 7, -1]);
    }

    #[test]
    fn test_scatter_rejects_matrices() {
        let engine = Engine::new();
        let source = ArrayView::from_shape_vec(Shape::new(vec![1, 2]).unwrap(), vec![1, 2]).unwrap();
        let err = engine
            .scatter(&source, &[0usize], 0, 2, &ExecutionConfig::default())
            .unwrap_err();
        assert_eq!(err, ArrayError::UnsupportedShape { op: "scatter", rank: 2 });
    }

    #[test]
    fn test_scatter_vector_fallback_resumes() {
        let engine = Engine::with_host(Arc::new(BailSchedule::always()));
        let config = ExecutionConfig::new(ExecutionMode::Bailout)
            .with_workers(4)
            .with_strategy(ScatterStrategy::DivideScatterVector)
            .with_merge(MergeMode::Par);
        let source = ArrayView::from_vec((0..1500u32).collect());
        let targets: Vec<usize> = (0..1500).map(|i| 1499 - i).collect();
        let (out, report) = engine.scatter_reported(&source, &targets, 0, 1500, &config).unwrap();
        assert_eq!(report.path, ExecutionPath::Sequential);
        assert_eq!(out.to_vec(), (0..1500).rev().collect::<Vec<u32>>());
    }

    #[test]
    fn test_conflict_set() {
        let mut set = ConflictSet::new(10..20);
        assert!(set.insert(10));
        assert!(set.insert(19));
        assert!(!set.insert(10));
    }
}
