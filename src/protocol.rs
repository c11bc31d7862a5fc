//! The warmup/bailout protocol
//!
//! Every parallel phase of every operation goes through [`Engine::fork_join`]:
//!
//! 1. **Warmup**: each slice's kernel runs once on the calling thread with
//!    `warmup` set, processing at most one or two units. Warmup progress is
//!    real progress; the kernel advances its checkpoint.
//! 2. **Dispatch**: all slices run concurrently on the rayon pool. Before each
//!    unit the kernel asks the [`ParallelHost`] whether to bail out; a kernel
//!    that bails returns `false` with its checkpoint at the first unprocessed
//!    unit.
//! 3. **Retry**: if any slice bailed, warm up again and re-dispatch, resuming
//!    every slice from its checkpoint, up to [`MAX_BAILOUTS`] times.
//! 4. **Fallback**: after too many bailouts the phase reports
//!    [`PhaseOutcome::Fallback`] and the operation completes on the
//!    sequential path.
//!
//! Each operation ends with an [`ExecutionReport`], which is logged and
//! checked against the configured [`Expect`]ation.

use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{ArrayError, Result};
use crate::host::{Checkpoint, NeverBail, ParallelHost};
use crate::mode::{ExecutionConfig, ExecutionMode, Expect};
use crate::plan::{plan_dispatch, DispatchPlan, DispatchReason, OpKind};

/// Dispatch attempts before giving up on parallel execution
pub const MAX_BAILOUTS: u32 = 3;

/// How an operation ultimately executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPath {
    /// Every phase completed in parallel
    Parallel,
    /// At least part of the work ran on the sequential path
    Sequential,
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPath::Parallel => write!(f, "parallel"),
            ExecutionPath::Sequential => write!(f, "sequential"),
        }
    }
}

/// Record of how one operation executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub op: &'static str,
    pub path: ExecutionPath,
    /// Dispatch attempts that ended in a bailout, over all phases
    pub bailouts: u32,
    /// Entry-guard reason
    pub reason: DispatchReason,
}

impl ExecutionReport {
    pub(crate) fn new(plan: &DispatchPlan, path: ExecutionPath, bailouts: u32) -> Self {
        Self {
            op: plan.op.name(),
            path,
            bailouts,
            reason: plan.reason,
        }
    }

    /// Report of an operation that never attempted parallel execution
    pub(crate) fn sequential(plan: &DispatchPlan) -> Self {
        Self::new(plan, ExecutionPath::Sequential, 0)
    }

    pub(crate) fn from_phase(plan: &DispatchPlan, outcome: PhaseOutcome) -> Self {
        match outcome {
            PhaseOutcome::Completed { bailouts } => {
                Self::new(plan, ExecutionPath::Parallel, bailouts)
            }
            PhaseOutcome::Fallback { bailouts } => {
                Self::new(plan, ExecutionPath::Sequential, bailouts)
            }
        }
    }

    /// Fold the report of a later phase into this one
    pub(crate) fn then(mut self, outcome: PhaseOutcome) -> Self {
        match outcome {
            PhaseOutcome::Completed { bailouts } => self.bailouts += bailouts,
            PhaseOutcome::Fallback { bailouts } => {
                self.bailouts += bailouts;
                self.path = ExecutionPath::Sequential;
            }
        }
        self
    }

    /// Whether the execution meets `expect`
    pub fn satisfies(&self, expect: Expect) -> bool {
        match expect {
            Expect::Success => self.path == ExecutionPath::Parallel && self.bailouts == 0,
            Expect::Mixed => self.bailouts > 0,
            Expect::Any => true,
        }
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} with {} bailout{} ({})",
            self.path,
            self.bailouts,
            if self.bailouts == 1 { "" } else { "s" },
            self.reason
        )
    }
}

/// Result of one fork-join phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Every slice finished in parallel
    Completed { bailouts: u32 },
    /// The phase must be completed sequentially
    Fallback { bailouts: u32 },
}

impl PhaseOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PhaseOutcome::Completed { .. })
    }
}

/// Context handed to a kernel for one pass over its slice
pub struct Pass<'h> {
    pub op: &'static str,
    pub attempt: u32,
    pub slice: usize,
    /// Truncated trial run
    pub warmup: bool,
    /// Single-threaded completion; never bails
    pub sequential: bool,
    host: &'h dyn ParallelHost,
}

impl<'h> Pass<'h> {
    fn new(op: &'static str, attempt: u32, slice: usize, host: &'h dyn ParallelHost) -> Self {
        Self {
            op,
            attempt,
            slice,
            warmup: false,
            sequential: false,
            host,
        }
    }

    /// Whether the kernel must stop before processing `unit`
    pub fn should_bail(&self, unit: usize) -> bool {
        if self.warmup || self.sequential {
            return false;
        }
        self.host.should_bail(&Checkpoint {
            op: self.op,
            attempt: self.attempt,
            slice: self.slice,
            unit,
        })
    }
}

/// Executes bulk operations, consulting a [`ParallelHost`] during parallel
/// phases.
///
/// Engines are cheap to clone and can be shared between threads.
#[derive(Clone)]
pub struct Engine {
    host: Arc<dyn ParallelHost>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine whose workers never bail out
    pub fn new() -> Self {
        Self::with_host(Arc::new(NeverBail))
    }

    pub fn with_host(host: Arc<dyn ParallelHost>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &dyn ParallelHost {
        self.host.as_ref()
    }

    /// Worker count for `config`: explicit, or the rayon pool size
    pub fn workers(&self, config: &ExecutionConfig) -> usize {
        config
            .workers
            .unwrap_or_else(rayon::current_num_threads)
            .max(1)
    }

    pub(crate) fn plan(&self, op: OpKind, length: usize, config: &ExecutionConfig) -> DispatchPlan {
        let plan = plan_dispatch(op, length, config, self.workers(config));
        log::debug!("{}", plan);
        plan
    }

    /// Run one parallel phase over `states`, one state per slice.
    ///
    /// `kernel` processes the slice owned by its state and returns whether the
    /// slice is finished. It must checkpoint its progress in the state so that
    /// a later pass resumes where the previous one stopped.
    pub(crate) fn fork_join<S, K>(
        &self,
        op: OpKind,
        config: &ExecutionConfig,
        states: &mut [S],
        kernel: K,
    ) -> PhaseOutcome
    where
        S: Send,
        K: Fn(&mut S, &Pass<'_>) -> bool + Sync,
    {
        let name = op.name();
        let host = self.host();

        if config.mode == ExecutionMode::Compile {
            host.compile(name);
            self.warmup(name, 0, states, &kernel);
            log::debug!("{}: compile pass done, completing sequentially", name);
            return PhaseOutcome::Fallback { bailouts: 0 };
        }

        let mut bailouts = 0;
        while bailouts < MAX_BAILOUTS {
            host.compile(name);
            self.warmup(name, bailouts, states, &kernel);

            let attempt = bailouts;
            let unfinished = states
                .par_iter_mut()
                .enumerate()
                .map(|(slice, state)| kernel(state, &Pass::new(name, attempt, slice, host)))
                .filter(|finished| !finished)
                .count();

            if unfinished == 0 {
                return PhaseOutcome::Completed { bailouts };
            }
            bailouts += 1;
            log::debug!(
                "{}: {} of {} slices bailed out (attempt {})",
                name,
                unfinished,
                states.len(),
                attempt
            );
        }

        log::debug!("{}: giving up on parallel execution after {} bailouts", name, bailouts);
        PhaseOutcome::Fallback { bailouts }
    }

    fn warmup<S, K>(&self, op: &'static str, attempt: u32, states: &mut [S], kernel: &K)
    where
        K: Fn(&mut S, &Pass<'_>) -> bool,
    {
        for (slice, state) in states.iter_mut().enumerate() {
            let mut pass = Pass::new(op, attempt, slice, self.host());
            pass.warmup = true;
            kernel(state, &pass);
        }
    }

    /// Complete every slice on the calling thread, resuming from checkpoints
    pub(crate) fn complete_sequentially<S, K>(&self, op: OpKind, states: &mut [S], kernel: K)
    where
        K: Fn(&mut S, &Pass<'_>) -> bool,
    {
        for (slice, state) in states.iter_mut().enumerate() {
            let mut pass = Pass::new(op.name(), 0, slice, self.host());
            pass.sequential = true;
            kernel(state, &pass);
        }
    }

    /// Log `report` and check it against the configured expectation
    pub(crate) fn finish(&self, config: &ExecutionConfig, report: ExecutionReport) -> Result<ExecutionReport> {
        log::debug!("{}: {}", report.op, report);
        let expected = config.effective_expect();
        if !report.satisfies(expected) {
            return Err(ArrayError::UnexpectedOutcome {
                op: report.op,
                expected,
                report,
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BailSchedule;
    use crate::slices::{compute_all_slice_bounds, SliceDescriptor};

    /// Counts units per slice; one unit per loop iteration
    fn counting_kernel(state: &mut (SliceDescriptor, Vec<usize>), pass: &Pass<'_>) -> bool {
        let (slice, seen) = state;
        let end = slice.pass_end(pass.warmup, 1);
        while slice.pos < end {
            if pass.should_bail(slice.pos) {
                return false;
            }
            seen.push(slice.pos);
            slice.pos += 1;
        }
        end == slice.end
    }

    fn states(units: usize, slices: usize) -> Vec<(SliceDescriptor, Vec<usize>)> {
        compute_all_slice_bounds(units, slices)
            .into_descriptors()
            .into_iter()
            .map(|d| (d, Vec::new()))
            .collect()
    }

    fn assert_each_unit_once(states: &[(SliceDescriptor, Vec<usize>)]) {
        for (slice, seen) in states {
            assert_eq!(seen, &slice.range().collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_completes_without_bailouts() {
        let engine = Engine::new();
        let mut states = states(40, 4);
        let outcome = engine.fork_join(OpKind::Map, &ExecutionConfig::default(), &mut states, counting_kernel);
        assert_eq!(outcome, PhaseOutcome::Completed { bailouts: 0 });
        assert_each_unit_once(&states);
    }

    #[test]
    fn test_retry_resumes_from_checkpoint() {
        let engine = Engine::with_host(Arc::new(BailSchedule::once(2, 25)));
        let mut states = states(40, 4);
        let outcome = engine.fork_join(OpKind::Map, &ExecutionConfig::default(), &mut states, counting_kernel);
        assert_eq!(outcome, PhaseOutcome::Completed { bailouts: 1 });
        assert_each_unit_once(&states);
    }

    #[test]
    fn test_fallback_after_max_bailouts() {
        let engine = Engine::with_host(Arc::new(BailSchedule::always()));
        let mut states = states(40, 4);
        let config = ExecutionConfig::default();
        let outcome = engine.fork_join(OpKind::Map, &config, &mut states, counting_kernel);
        assert_eq!(outcome, PhaseOutcome::Fallback { bailouts: MAX_BAILOUTS });

        // each warmup advanced every slice by one unit
        for (slice, _) in &states {
            assert_eq!(slice.pos, slice.start + MAX_BAILOUTS as usize);
        }
        engine.complete_sequentially(OpKind::Map, &mut states, counting_kernel);
        assert_each_unit_once(&states);
    }

    #[test]
    fn test_compile_mode_only_warms_up() {
        let engine = Engine::new();
        let mut states = states(40, 4);
        let config = ExecutionConfig::new(ExecutionMode::Compile);
        let outcome = engine.fork_join(OpKind::Map, &config, &mut states, counting_kernel);
        assert_eq!(outcome, PhaseOutcome::Fallback { bailouts: 0 });
        for (slice, seen) in &states {
            assert_eq!(seen.len(), 1.min(slice.len()));
        }
    }

    #[test]
    fn test_expectations() {
        let plan = plan_dispatch(OpKind::Map, 100, &ExecutionConfig::default(), 2);
        let clean = ExecutionReport::from_phase(&plan, PhaseOutcome::Completed { bailouts: 0 });
        let recovered = ExecutionReport::from_phase(&plan, PhaseOutcome::Completed { bailouts: 2 });
        let fell_back = ExecutionReport::from_phase(&plan, PhaseOutcome::Fallback { bailouts: 3 });

        assert!(clean.satisfies(Expect::Success));
        assert!(!clean.satisfies(Expect::Mixed));
        assert!(!recovered.satisfies(Expect::Success));
        assert!(recovered.satisfies(Expect::Mixed));
        assert!(fell_back.satisfies(Expect::Mixed));
        assert!(ExecutionReport::sequential(&plan).satisfies(Expect::Any));
        assert!(!ExecutionReport::sequential(&plan).satisfies(Expect::Success));

        let merged = clean.then(PhaseOutcome::Fallback { bailouts: 3 });
        assert_eq!(merged.path, ExecutionPath::Sequential);
        assert_eq!(merged.bailouts, 3);
        assert_eq!(recovered.to_string(), "parallel with 2 bailouts (eligible)");
    }

    #[test]
    fn test_finish_reports_mismatch() {
        let engine = Engine::new();
        let config = ExecutionConfig::new(ExecutionMode::Par);
        let plan = plan_dispatch(OpKind::Reduce, 10, &config, 4);
        let err = engine
            .finish(&config, ExecutionReport::sequential(&plan))
            .unwrap_err();
        assert!(matches!(
            err,
            ArrayError::UnexpectedOutcome {
                op: "reduce",
                expected: Expect::Success,
                ..
            }
        ));
    }
}
