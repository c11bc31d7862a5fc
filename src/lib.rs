//! parray: chunked fork-join data-parallel arrays
//!
//! This crate provides immutable N-dimensional arrays and the bulk operations
//! over them (build, map, reduce, scan, filter, scatter). Every operation
//! first attempts a speculative parallel execution over statically assigned
//! slices of 32-element chunks. Workers checkpoint their progress so that a
//! bailout can be retried or finished sequentially without redoing work, and
//! every operation produces exactly the result of its sequential twin.
//!
//! ```
//! use parray::{ArrayView, Engine, ExecutionConfig};
//!
//! let engine = Engine::new();
//! let config = ExecutionConfig::default();
//! let source = ArrayView::from_vec((1..=100).collect::<Vec<u64>>());
//!
//! let squares = engine.map(&source, &config, |e, _, _| e.scalar().map_or(0, |v| v * v)).unwrap();
//! let total = engine.reduce(&squares, &config, |a, b| a + b).unwrap();
//! assert_eq!(total, 338_350);
//! ```

pub mod error;
pub mod host;
pub mod layout;
pub mod mode;
pub mod ops;
pub mod plan;
pub mod protocol;
pub mod shape;
pub mod slices;
pub mod view;

// Re-export main types at crate root
pub use error::{ArrayError, Result};
pub use host::{BailSchedule, Checkpoint, NeverBail, ParallelHost};
pub use layout::{Layout, ScalarKind, StructuredArray};
pub use mode::{ExecutionConfig, ExecutionMode, Expect, MergeMode, ScatterStrategy};
pub use ops::scatter::ScatterIndex;
pub use protocol::{Engine, ExecutionPath, ExecutionReport, MAX_BAILOUTS};
pub use shape::Shape;
pub use view::{ArrayView, Element};
