//! Dispatch planning
//!
//! Before anything runs, every operation asks [`plan_dispatch`] whether a
//! parallel attempt is worthwhile. The answer is a [`DispatchPlan`] that
//! records the decision together with the reason for it, so the choice can be
//! logged and inspected without side effects.
//!
//! # Example
//!
//! ```
//! use parray::mode::ExecutionConfig;
//! use parray::plan::{plan_dispatch, DispatchAction, DispatchReason, OpKind};
//!
//! // 100 elements are 4 chunks: not enough for 8 reducing workers
//! let plan = plan_dispatch(OpKind::Reduce, 100, &ExecutionConfig::default(), 8);
//! assert_eq!(plan.action, DispatchAction::Sequential);
//! assert_eq!(plan.reason, DispatchReason::TooFewChunks { chunks: 4, required: 8 });
//! ```

use std::fmt;

use crate::mode::ExecutionConfig;
use crate::slices::compute_num_chunks;

/// The bulk operations the engine knows how to plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Build,
    Map,
    Reduce,
    Scan,
    Filter,
    Scatter,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Build => "build",
            OpKind::Map => "map",
            OpKind::Reduce => "reduce",
            OpKind::Scan => "scan",
            OpKind::Filter => "filter",
            OpKind::Scatter => "scatter",
        }
    }

    /// Chunks required before a parallel attempt pays off
    pub fn min_chunks(&self, workers: usize) -> usize {
        match self {
            // construction and map have no cross-slice dependency
            OpKind::Build | OpKind::Map => 0,
            // reduce and scan need at least one element per slice
            OpKind::Reduce | OpKind::Scan | OpKind::Scatter => workers,
            // the survivor bitsets only pay off with two chunks per worker
            OpKind::Filter => workers * 2,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What the engine will do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchAction {
    /// Run the warmup/dispatch protocol
    Parallel,
    /// Go straight to the sequential path
    Sequential,
}

impl fmt::Display for DispatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchAction::Parallel => write!(f, "parallel"),
            DispatchAction::Sequential => write!(f, "sequential"),
        }
    }
}

/// Why the action was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchReason {
    // Parallel reasons
    /// Enough work for every worker
    Eligible,
    /// An explicit scatter strategy was requested
    ForcedByStrategy,

    // Sequential reasons
    /// The mode does not allow a parallel attempt
    ModeForbidsParallel,
    /// Nothing to do
    EmptyDomain,
    /// Less work than the operation needs per worker
    TooFewChunks { chunks: usize, required: usize },
}

impl fmt::Display for DispatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchReason::Eligible => write!(f, "eligible"),
            DispatchReason::ForcedByStrategy => write!(f, "forced_by_strategy"),
            DispatchReason::ModeForbidsParallel => write!(f, "mode_forbids_parallel"),
            DispatchReason::EmptyDomain => write!(f, "empty_domain"),
            DispatchReason::TooFewChunks { chunks, required } => {
                write!(f, "too_few_chunks:{}<{}", chunks, required)
            }
        }
    }
}

/// The entry-guard decision for one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPlan {
    pub op: OpKind,
    pub action: DispatchAction,
    pub reason: DispatchReason,
    /// Number of elements in the index domain
    pub length: usize,
    /// Number of chunks covering the domain
    pub num_chunks: usize,
    /// Number of slices (one per worker)
    pub num_slices: usize,
}

impl DispatchPlan {
    pub fn is_parallel(&self) -> bool {
        self.action == DispatchAction::Parallel
    }
}

impl fmt::Display for DispatchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} over {} elements ({} chunks, {} slices): {} ({})",
            self.op, self.length, self.num_chunks, self.num_slices, self.action, self.reason
        )
    }
}

/// Decide whether `op` over `length` elements attempts parallel execution
pub fn plan_dispatch(
    op: OpKind,
    length: usize,
    config: &ExecutionConfig,
    workers: usize,
) -> DispatchPlan {
    let num_chunks = compute_num_chunks(length);
    let (action, reason) = determine_action(op, length, num_chunks, config, workers);
    DispatchPlan {
        op,
        action,
        reason,
        length,
        num_chunks,
        num_slices: workers,
    }
}

fn determine_action(
    op: OpKind,
    length: usize,
    num_chunks: usize,
    config: &ExecutionConfig,
    workers: usize,
) -> (DispatchAction, DispatchReason) {
    if !config.mode.allows_parallel() {
        return (DispatchAction::Sequential, DispatchReason::ModeForbidsParallel);
    }
    if length == 0 {
        return (DispatchAction::Sequential, DispatchReason::EmptyDomain);
    }
    if op == OpKind::Scatter && config.strategy.is_some() {
        return (DispatchAction::Parallel, DispatchReason::ForcedByStrategy);
    }

    let required = op.min_chunks(workers);
    if num_chunks < required {
        return (
            DispatchAction::Sequential,
            DispatchReason::TooFewChunks {
                chunks: num_chunks,
                required,
            },
        );
    }
    (DispatchAction::Parallel, DispatchReason::Eligible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{ExecutionMode, ScatterStrategy};

    #[test]
    fn test_seq_mode_forbids_parallel() {
        let plan = plan_dispatch(OpKind::Map, 10_000, &ExecutionConfig::seq(), 4);
        assert_eq!(plan.action, DispatchAction::Sequential);
        assert_eq!(plan.reason, DispatchReason::ModeForbidsParallel);
    }

    #[test]
    fn test_map_and_build_ignore_chunk_guard() {
        let config = ExecutionConfig::new(ExecutionMode::Par);
        for op in [OpKind::Map, OpKind::Build] {
            let plan = plan_dispatch(op, 10, &config, 16);
            assert!(plan.is_parallel(), "{}", op);
        }
    }

    #[test]
    fn test_filter_needs_two_chunks_per_worker() {
        let config = ExecutionConfig::default();
        // 7 chunks
        let plan = plan_dispatch(OpKind::Filter, 224, &config, 4);
        assert_eq!(
            plan.reason,
            DispatchReason::TooFewChunks {
                chunks: 7,
                required: 8
            }
        );
        let plan = plan_dispatch(OpKind::Filter, 256, &config, 4);
        assert!(plan.is_parallel());
    }

    #[test]
    fn test_empty_domain() {
        let plan = plan_dispatch(OpKind::Map, 0, &ExecutionConfig::default(), 4);
        assert_eq!(plan.reason, DispatchReason::EmptyDomain);
    }

    #[test]
    fn test_explicit_strategy_bypasses_guard() {
        let config = ExecutionConfig::new(ExecutionMode::Par)
            .with_strategy(ScatterStrategy::DivideOutputRange);
        let plan = plan_dispatch(OpKind::Scatter, 15, &config, 8);
        assert_eq!(plan.reason, DispatchReason::ForcedByStrategy);

        let plan = plan_dispatch(OpKind::Scatter, 15, &ExecutionConfig::default(), 8);
        assert!(!plan.is_parallel());
    }

    #[test]
    fn test_display() {
        let plan = plan_dispatch(OpKind::Scan, 100, &ExecutionConfig::default(), 8);
        assert_eq!(
            plan.to_string(),
            "scan over 100 elements (4 chunks, 8 slices): sequential (too_few_chunks:4<8)"
        );
    }
}
