//! Error taxonomy for array operations
//!
//! Every error is raised while validating inputs, before any parallel
//! dispatch is attempted, so a parallel run never fails differently from its
//! sequential twin. A bailout is not an error: it is a silent transition to
//! the sequential path.

use thiserror::Error;

use crate::mode::Expect;
use crate::protocol::ExecutionReport;

/// Errors that can occur during array construction and bulk operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArrayError {
    /// Malformed shape, non-integer index or mismatched length
    #[error("invalid argument: {0}")]
    Argument(String),

    /// A scatter target outside `[0, len)`
    #[error("scatter target {target} of source index {index} out of bounds for length {len}")]
    Bounds { index: usize, target: i64, len: usize },

    /// Reduce or scan over a zero-length domain
    #[error("cannot reduce an empty domain")]
    EmptyDomain,

    /// Two source elements hit the same destination and no conflict function was given
    #[error("scatter conflict at target {target} (source index {index}) with no conflict function")]
    ScatterConflict { index: usize, target: usize },

    /// The operation is not generalized to arrays of this rank
    #[error("{op} is not supported for arrays of rank {rank}")]
    UnsupportedShape { op: &'static str, rank: usize },

    /// The execution outcome did not match the configured expectation
    #[error("{op}: expected {expected} execution, got {report}")]
    UnexpectedOutcome {
        op: &'static str,
        expected: Expect,
        report: ExecutionReport,
    },
}

impl ArrayError {
    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        ArrayError::Argument(msg.into())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ArrayError>;
