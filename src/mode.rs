//! Execution configuration
//!
//! Callers steer every operation with an [`ExecutionConfig`]: which execution
//! path to attempt, which scatter strategy to use, and, for tests, which
//! outcome to expect. The configuration can be built in code or deserialized
//! from the same option names the engine prints:
//!
//! ```
//! use parray::mode::{ExecutionConfig, ExecutionMode, Expect, ScatterStrategy};
//!
//! let config = ExecutionConfig::new(ExecutionMode::Par)
//!     .with_strategy(ScatterStrategy::DivideScatterVector)
//!     .with_workers(4);
//! assert_eq!(config.effective_expect(), Expect::Success);
//!
//! let parsed: ExecutionMode = "recover".parse().unwrap();
//! assert_eq!(parsed, ExecutionMode::Recover);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArrayError;

/// Which execution path an operation attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Try parallel execution, fall back silently
    #[default]
    Default,
    /// Warm up (compile) the kernel, then finish sequentially
    Compile,
    /// Parallel execution that is expected to succeed without bailouts
    Par,
    /// Parallel execution that is expected to bail out and recover
    Recover,
    /// Parallel execution that is expected to bail out
    Bailout,
    /// Sequential execution only
    Seq,
}

impl ExecutionMode {
    /// Whether this mode permits a parallel attempt
    pub fn allows_parallel(&self) -> bool {
        !matches!(self, ExecutionMode::Seq)
    }

    /// Expectation implied by the mode when none is given explicitly
    pub fn default_expect(&self) -> Expect {
        match self {
            ExecutionMode::Par => Expect::Success,
            ExecutionMode::Recover | ExecutionMode::Bailout => Expect::Mixed,
            ExecutionMode::Default | ExecutionMode::Compile | ExecutionMode::Seq => Expect::Any,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Default => write!(f, "default"),
            ExecutionMode::Compile => write!(f, "compile"),
            ExecutionMode::Par => write!(f, "par"),
            ExecutionMode::Recover => write!(f, "recover"),
            ExecutionMode::Bailout => write!(f, "bailout"),
            ExecutionMode::Seq => write!(f, "seq"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = ArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(ExecutionMode::Default),
            "compile" => Ok(ExecutionMode::Compile),
            "par" => Ok(ExecutionMode::Par),
            "recover" => Ok(ExecutionMode::Recover),
            "bailout" => Ok(ExecutionMode::Bailout),
            "seq" => Ok(ExecutionMode::Seq),
            other => Err(ArrayError::argument(format!("unknown mode '{}'", other))),
        }
    }
}

/// Outcome a test expects from an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expect {
    /// Parallel completion without any bailout
    Success,
    /// At least one bailout occurred
    Mixed,
    /// Anything goes
    Any,
}

impl fmt::Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expect::Success => write!(f, "success"),
            Expect::Mixed => write!(f, "mixed"),
            Expect::Any => write!(f, "any"),
        }
    }
}

impl FromStr for Expect {
    type Err = ArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Expect::Success),
            "mixed" => Ok(Expect::Mixed),
            "any" => Ok(Expect::Any),
            other => Err(ArrayError::argument(format!("unknown expectation '{}'", other))),
        }
    }
}

/// How parallel scatter divides its work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScatterStrategy {
    /// Each worker owns a range of output indices and scans all targets
    DivideOutputRange,
    /// Each worker owns a range of targets and a private output buffer
    DivideScatterVector,
}

impl fmt::Display for ScatterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScatterStrategy::DivideOutputRange => write!(f, "divide-output-range"),
            ScatterStrategy::DivideScatterVector => write!(f, "divide-scatter-vector"),
        }
    }
}

impl FromStr for ScatterStrategy {
    type Err = ArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "divide-output-range" => Ok(ScatterStrategy::DivideOutputRange),
            "divide-scatter-vector" => Ok(ScatterStrategy::DivideScatterVector),
            other => Err(ArrayError::argument(format!("unknown scatter strategy '{}'", other))),
        }
    }
}

/// Threading of the scatter-vector merge phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    #[default]
    Seq,
    /// Accepted for compatibility; currently merges sequentially
    Par,
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeMode::Seq => write!(f, "seq"),
            MergeMode::Par => write!(f, "par"),
        }
    }
}

impl FromStr for MergeMode {
    type Err = ArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seq" => Ok(MergeMode::Seq),
            "par" => Ok(MergeMode::Par),
            other => Err(ArrayError::argument(format!("unknown merge mode '{}'", other))),
        }
    }
}

/// Per-call execution options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ExecutionConfig {
    /// Execution path to attempt. Default: `Default`
    pub mode: ExecutionMode,

    /// Scatter strategy; `None` picks one by heuristic
    pub strategy: Option<ScatterStrategy>,

    /// Expected outcome; `None` derives it from `mode`
    pub expect: Option<Expect>,

    /// Scatter-vector merge threading. Default: `Seq`
    pub merge: MergeMode,

    /// Worker count; `None` uses the rayon pool size
    pub workers: Option<usize>,

    /// Whether the sequential path may run. Disabling it is only useful in
    /// tests; an operation that would need it returns an empty result.
    /// Default: true
    pub sequential: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Default,
            strategy: None,
            expect: None,
            merge: MergeMode::Seq,
            workers: None,
            sequential: true,
        }
    }
}

impl ExecutionConfig {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Sequential-only configuration
    pub fn seq() -> Self {
        Self::new(ExecutionMode::Seq)
    }

    pub fn with_strategy(mut self, strategy: ScatterStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_expect(mut self, expect: Expect) -> Self {
        self.expect = Some(expect);
        self
    }

    pub fn with_merge(mut self, merge: MergeMode) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn without_sequential(mut self) -> Self {
        self.sequential = false;
        self
    }

    /// The explicit expectation, or the one implied by the mode
    pub fn effective_expect(&self) -> Expect {
        self.expect.unwrap_or_else(|| self.mode.default_expect())
    }
}
