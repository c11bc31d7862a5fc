//! Reduction of rank 1 arrays

use crate::error::{ArrayError, Result};
use crate::mode::ExecutionConfig;
use crate::plan::OpKind;
use crate::protocol::{Engine, ExecutionReport, Pass};
use crate::slices::{compute_all_slice_bounds, SliceDescriptor};
use crate::view::ArrayView;

/// A slice's running fold, checkpointed together with its position
struct Partial<T> {
    slice: SliceDescriptor,
    acc: Option<T>,
}

impl Engine {
    /// Fold the array left to right with `f`.
    ///
    /// In parallel each slice folds its own chunks and the partials are then
    /// combined in slice order, so `f` should be associative for the result
    /// to match the sequential fold.
    pub fn reduce<T, F>(&self, source: &ArrayView<T>, config: &ExecutionConfig, f: F) -> Result<T>
    where
        T: Clone + Send + Sync,
        F: Fn(&T, &T) -> T + Sync,
    {
        self.reduce_reported(source, config, f).map(|(value, _)| value)
    }

    pub fn reduce_reported<T, F>(
        &self,
        source: &ArrayView<T>,
        config: &ExecutionConfig,
        f: F,
    ) -> Result<(T, ExecutionReport)>
    where
        T: Clone + Send + Sync,
        F: Fn(&T, &T) -> T + Sync,
    {
        if source.rank() != 1 {
            return Err(ArrayError::UnsupportedShape {
                op: "reduce",
                rank: source.rank(),
            });
        }
        let data = source.as_slice();
        let length = data.len();
        if length == 0 {
            return Err(ArrayError::EmptyDomain);
        }

        let plan = self.plan(OpKind::Reduce, length, config);
        if !plan.is_parallel() {
            let report = self.finish(config, ExecutionReport::sequential(&plan))?;
            return Ok((fold_sequential(data, &f), report));
        }

        let kernel = |state: &mut Partial<T>, pass: &Pass<'_>| {
            let end = state.slice.pass_end(pass.warmup, 2);
            while state.slice.pos < end {
                let chunk = state.slice.pos;
                if pass.should_bail(chunk) {
                    return false;
                }
                for value in &data[SliceDescriptor::chunk_range(chunk, length)] {
                    state.acc = Some(match state.acc.take() {
                        Some(acc) => f(&acc, value),
                        None => value.clone(),
                    });
                }
                state.slice.pos += 1;
            }
            log::trace!("reduce: slice {} folded up to chunk {}", pass.slice, state.slice.pos);
            state.slice.is_finished()
        };

        let mut partials: Vec<Partial<T>> = compute_all_slice_bounds(plan.num_chunks, plan.num_slices)
            .into_descriptors()
            .into_iter()
            .map(|slice| Partial { slice, acc: None })
            .collect();
        let outcome = self.fork_join(OpKind::Reduce, config, &mut partials, kernel);
        let report = self.finish(config, ExecutionReport::from_phase(&plan, outcome))?;

        if !outcome.is_completed() {
            // partial folds are discarded; there is no empty result to return
            return Ok((fold_sequential(data, &f), report));
        }

        let value = partials
            .into_iter()
            .filter_map(|p| p.acc)
            .reduce(|acc, partial| f(&acc, &partial));
        match value {
            Some(value) => Ok((value, report)),
            None => Err(ArrayError::EmptyDomain),
        }
    }
}

fn fold_sequential<T, F>(data: &[T], f: &F) -> T
where
    T: Clone,
    F: Fn(&T, &T) -> T,
{
    let mut acc = data[0].clone();
    for value in &data[1..] {
        acc = f(&acc, value);
    }
    acc
}
