//! The host collaborator
//!
//! Parallel kernels do not decide on their own when to give up. Before every
//! unit of work in a dispatched run they hand a [`Checkpoint`] to the
//! [`ParallelHost`], which answers whether the worker must bail out. The host
//! also receives the opaque "compile" request issued before each warmup.
//!
//! [`NeverBail`] is the production host. [`BailSchedule`] injects bailouts at
//! a fixed position for a fixed number of attempts, which is how tests
//! exercise recovery and fallback.

use std::fmt;

/// Where a worker currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Operation name (`"map"`, `"scan"`, ...)
    pub op: &'static str,
    /// Zero-based dispatch attempt
    pub attempt: u32,
    /// Slice the worker owns
    pub slice: usize,
    /// Next unit (chunk or element, depending on the phase) to process
    pub unit: usize,
}

/// Runtime services the engine consults during parallel execution
pub trait ParallelHost: Send + Sync {
    /// Whether the worker at `checkpoint` must stop. Never consulted during
    /// warmup or sequential execution.
    fn should_bail(&self, checkpoint: &Checkpoint) -> bool;

    /// Prepare the kernel of `op` for parallel execution
    fn compile(&self, op: &'static str) {
        log::trace!("{}: compile request", op);
    }
}

/// Host that always lets workers finish
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverBail;

impl ParallelHost for NeverBail {
    fn should_bail(&self, _checkpoint: &Checkpoint) -> bool {
        false
    }
}

/// Host that bails out a chosen slice at a chosen unit.
///
/// The bailout fires in every attempt below `failing_attempts`, the first
/// time the slice reaches `unit` or beyond within that attempt. With one
/// failing attempt the first dispatch bails and the retry succeeds; with
/// [`crate::protocol::MAX_BAILOUTS`] or more the engine falls back to
/// sequential execution.
#[derive(Debug, Clone)]
pub struct BailSchedule {
    /// Slice that bails; `None` means every slice
    pub slice: Option<usize>,
    /// Unit at or after which the slice bails
    pub unit: usize,
    /// Number of leading attempts that bail
    pub failing_attempts: u32,
    /// Restrict the schedule to one operation
    pub op: Option<&'static str>,
}

impl BailSchedule {
    /// Bail slice `slice` at `unit` in the first attempt only
    pub fn once(slice: usize, unit: usize) -> Self {
        Self {
            slice: Some(slice),
            unit,
            failing_attempts: 1,
            op: None,
        }
    }

    /// Bail every slice at its first dispatched unit, in every attempt
    pub fn always() -> Self {
        Self {
            slice: None,
            unit: 0,
            failing_attempts: u32::MAX,
            op: None,
        }
    }

    pub fn with_failing_attempts(mut self, attempts: u32) -> Self {
        self.failing_attempts = attempts;
        self
    }

    pub fn for_op(mut self, op: &'static str) -> Self {
        self.op = Some(op);
        self
    }
}

impl ParallelHost for BailSchedule {
    fn should_bail(&self, checkpoint: &Checkpoint) -> bool {
        checkpoint.attempt < self.failing_attempts
            && self.slice.map_or(true, |s| s == checkpoint.slice)
            && self.op.map_or(true, |op| op == checkpoint.op)
            && checkpoint.unit >= self.unit
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempt {} slice {} unit {}",
            self.op, self.attempt, self.slice, self.unit
        )
    }
}
