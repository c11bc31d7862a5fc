//! Construction of arrays from index functions

use std::ops::Range;

use crate::error::Result;
use crate::mode::ExecutionConfig;
use crate::ops::SliceOutput;
use crate::plan::OpKind;
use crate::protocol::{Engine, ExecutionReport, Pass};
use crate::shape::{compute_indices, step_indices, Rank, Shape};
use crate::slices::SliceDescriptor;
use crate::view::ArrayView;

impl Engine {
    /// Build an array of `shape` whose element at coordinates `c` is `f(c)`.
    ///
    /// ```
    /// use parray::{Engine, ExecutionConfig, Shape};
    ///
    /// let engine = Engine::new();
    /// let shape = Shape::new(vec![2, 3]).unwrap();
    /// let grid = engine
    ///     .build(&shape, &ExecutionConfig::default(), |c| c[0] * 10 + c[1])
    ///     .unwrap();
    /// assert_eq!(grid.as_slice(), &[0, 1, 2, 10, 11, 12]);
    /// ```
    pub fn build<T, F>(&self, shape: &Shape, config: &ExecutionConfig, f: F) -> Result<ArrayView<T>>
    where
        T: Send,
        F: Fn(&[usize]) -> T + Sync,
    {
        self.build_reported(shape, config, f).map(|(array, _)| array)
    }

    pub fn build_reported<T, F>(
        &self,
        shape: &Shape,
        config: &ExecutionConfig,
        f: F,
    ) -> Result<(ArrayView<T>, ExecutionReport)>
    where
        T: Send,
        F: Fn(&[usize]) -> T + Sync,
    {
        let dims = shape.dims();
        let length = shape.len();
        let rank = shape.rank_kind();

        let kernel = |state: &mut SliceOutput<T>, pass: &Pass<'_>| {
            let end = state.slice.pass_end(pass.warmup, 1);
            while state.slice.pos < end {
                let chunk = state.slice.pos;
                if pass.should_bail(chunk) {
                    return false;
                }
                fill_chunk(rank, dims, SliceDescriptor::chunk_range(chunk, length), &mut state.out, &f);
                state.slice.pos += 1;
            }
            state.slice.is_finished()
        };

        let resumed = self.run_resumable(OpKind::Build, length, config, SliceOutput::new, kernel)?;
        let array = match resumed.states {
            Some(states) => ArrayView::from_shape_vec(shape.clone(), super::concat(states))?,
            None => ArrayView::empty(),
        };
        Ok((array, resumed.report))
    }
}

/// Append `f(coords)` for every linear index in `range`
fn fill_chunk<T, F>(rank: Rank, dims: &[usize], range: Range<usize>, out: &mut Vec<T>, f: &F)
where
    F: Fn(&[usize]) -> T,
{
    match rank {
        Rank::Rank1(_) => out.extend(range.map(|x| f(&[x]))),
        Rank::Rank2(_, y_dim) => out.extend(range.map(|i| f(&[i / y_dim, i % y_dim]))),
        Rank::Rank3(_, y_dim, z_dim) => {
            let plane = y_dim * z_dim;
            out.extend(range.map(|i| {
                let r = i % plane;
                f(&[i / plane, r / z_dim, r % z_dim])
            }))
        }
        Rank::RankN => {
            let mut coords = compute_indices(dims, range.start);
            for _ in range {
                out.push(f(&coords));
                step_indices(dims, &mut coords);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::host::BailSchedule;
    use crate::mode::ExecutionMode;
    use crate::protocol::ExecutionPath;
    use crate::shape::offset_of;

    fn par() -> ExecutionConfig {
        ExecutionConfig::new(ExecutionMode::Par).with_workers(4)
    }

    #[test]
    fn test_build_every_rank_matches_offsets() {
        let engine = Engine::new();
        for dims in [vec![100], vec![9, 13], vec![5, 7, 11], vec![3, 4, 5, 6]] {
            let shape = Shape::new(dims.clone()).unwrap();
            let array = engine
                .build(&shape, &par(), |c| offset_of(shape.dims(), c))
                .unwrap();
            let expected: Vec<_> = (0..shape.len()).map(Some).collect();
            assert_eq!(array.as_slice(), expected.as_slice(), "{:?}", dims);
        }
    }

    #[test]
    fn test_build_parallel_equals_sequential() {
        let engine = Engine::new();
        let shape = Shape::new(vec![40, 30]).unwrap();
        let f = |c: &[usize]| (c[0] * 31 + c[1] * 7) % 17;
        let (par_array, report) = engine.build_reported(&shape, &par(), f).unwrap();
        let seq_array = engine.build(&shape, &ExecutionConfig::seq(), f).unwrap();
        assert_eq!(par_array, seq_array);
        assert_eq!(report.path, ExecutionPath::Parallel);
    }

    #[test]
    fn test_build_recovers_after_bailout() {
        let engine = Engine::with_host(Arc::new(BailSchedule::once(1, 10)));
        let shape = Shape::vector(2048);
        let config = ExecutionConfig::new(ExecutionMode::Recover).with_workers(4);
        let (array, report) = engine.build_reported(&shape, &config, |c| c[0] as u64).unwrap();
        assert_eq!(report.bailouts, 1);
        assert_eq!(report.path, ExecutionPath::Parallel);
        assert_eq!(array.to_vec(), (0..2048).collect::<Vec<u64>>());
    }

    #[test]
    fn test_build_empty_shape() {
        let engine = Engine::new();
        let shape = Shape::new(vec![4, 0]).unwrap();
        let array = engine.build(&shape, &ExecutionConfig::default(), |_| 1u8).unwrap();
        assert_eq!(array.shape(), &shape);
        assert!(array.as_slice().is_empty());
    }

    #[test]
    fn test_build_with_sequential_disabled() {
        let engine = Engine::new();
        let config = ExecutionConfig::seq().without_sequential();
        let array = engine.build(&Shape::vector(10), &config, |c| c[0]).unwrap();
        assert_eq!(array.shape().dims(), &[0]);
    }
}
