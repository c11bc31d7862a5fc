//! Elementwise map over the outermost dimension

use crate::error::Result;
use crate::mode::ExecutionConfig;
use crate::ops::{concat, SliceOutput};
use crate::plan::OpKind;
use crate::protocol::{Engine, ExecutionReport, Pass};
use crate::slices::SliceDescriptor;
use crate::view::{ArrayView, Element};

impl Engine {
    /// Apply `f(element, index, source)` to every element of the outermost
    /// dimension. The result has shape `[source.len()]`.
    ///
    /// For rank 1 sources the element is a scalar; for higher ranks it is the
    /// row view.
    pub fn map<T, U, F>(&self, source: &ArrayView<T>, config: &ExecutionConfig, f: F) -> Result<ArrayView<U>>
    where
        T: Send + Sync,
        U: Send,
        F: Fn(Element<'_, T>, usize, &ArrayView<T>) -> U + Sync,
    {
        self.map_reported(source, config, f).map(|(array, _)| array)
    }

    pub fn map_reported<T, U, F>(
        &self,
        source: &ArrayView<T>,
        config: &ExecutionConfig,
        f: F,
    ) -> Result<(ArrayView<U>, ExecutionReport)>
    where
        T: Send + Sync,
        U: Send,
        F: Fn(Element<'_, T>, usize, &ArrayView<T>) -> U + Sync,
    {
        let length = source.len();

        let kernel = |state: &mut SliceOutput<U>, pass: &Pass<'_>| {
            let end = state.slice.pass_end(pass.warmup, 1);
            while state.slice.pos < end {
                let chunk = state.slice.pos;
                if pass.should_bail(chunk) {
                    return false;
                }
                for i in SliceDescriptor::chunk_range(chunk, length) {
                    state.out.push(f(source.element_at(i), i, source));
                }
                state.slice.pos += 1;
            }
            state.slice.is_finished()
        };

        let resumed = self.run_resumable(OpKind::Map, length, config, SliceOutput::new, kernel)?;
        let array = match resumed.states {
            Some(states) => ArrayView::from_vec(concat(states)),
            None => ArrayView::empty(),
        };
        Ok((array, resumed.report))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::ArrayError;
    use crate::host::BailSchedule;
    use crate::mode::ExecutionMode;
    use crate::protocol::ExecutionPath;
    use crate::shape::Shape;

    fn par() -> ExecutionConfig {
        ExecutionConfig::new(ExecutionMode::Par).with_workers(4)
    }

    #[test]
    fn test_map_scalars() {
        let engine = Engine::new();
        let source = ArrayView::from_vec((0..1000i64).collect());
        let doubled = engine
            .map(&source, &par(), |e, i, _| e.scalar().copied().unwrap_or_default() * 2 + i as i64)
            .unwrap();
        let expected: Vec<i64> = (0..1000).map(|x| x * 3).collect();
        assert_eq!(doubled.to_vec(), expected);
    }

    #[test]
    fn test_map_rows_of_matrix() {
        let engine = Engine::new();
        let source =
            ArrayView::from_shape_vec(Shape::new(vec![100, 3]).unwrap(), (0..300u32).collect()).unwrap();
        let sums = engine
            .map(&source, &par(), |e, _, _| {
                e.view().map(|row| row.as_slice().iter().sum::<u32>()).unwrap_or(0)
            })
            .unwrap();
        assert_eq!(sums.shape().dims(), &[100]);
        assert_eq!(sums.scalar(&[0]), Some(&3));
        assert_eq!(sums.scalar(&[99]), Some(&(297 + 298 + 299)));
    }

    #[test]
    fn test_map_callback_sees_source() {
        let engine = Engine::new();
        let source = ArrayView::from_vec(vec![5, 1, 4]);
        let next = engine
            .map(&source, &ExecutionConfig::default(), |_, i, src| {
                src.scalar(&[(i + 1) % src.len()]).copied().unwrap_or(0)
            })
            .unwrap();
        assert_eq!(next.to_vec(), vec![1, 4, 5]);
    }

    #[test]
    fn test_map_fallback_resumes_checkpoints() {
        let engine = Engine::with_host(Arc::new(BailSchedule::always()));
        let config = ExecutionConfig::new(ExecutionMode::Bailout).with_workers(4);
        let source = ArrayView::from_vec((0..4096u32).collect());
        let (out, report) = engine
            .map_reported(&source, &config, |e, _, _| e.scalar().map_or(0, |v| v + 1))
            .unwrap();
        assert_eq!(report.path, ExecutionPath::Sequential);
        assert_eq!(report.bailouts, 3);
        assert_eq!(out.to_vec(), (1..=4096).collect::<Vec<u32>>());
    }

    #[test]
    fn test_map_par_expectation_fails_when_bailing() {
        let engine = Engine::with_host(Arc::new(BailSchedule::once(0, 0)));
        let source = ArrayView::from_vec(vec![1u8; 512]);
        let err = engine.map(&source, &par(), |_, _, _| 0u8).unwrap_err();
        assert!(matches!(err, ArrayError::UnexpectedOutcome { op: "map", .. }));
    }

    #[test]
    fn test_map_disabled_fallback_is_empty() {
        let engine = Engine::with_host(Arc::new(BailSchedule::always()));
        let config = ExecutionConfig::default().with_workers(2).without_sequential();
        let source = ArrayView::from_vec(vec![1u8; 512]);
        let out = engine.map(&source, &config, |_, _, _| 0u8).unwrap();
        assert!(out.is_empty());
    }
}
