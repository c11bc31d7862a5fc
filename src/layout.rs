//! Binary record layouts
//!
//! A [`Layout`] describes how one record is laid out in a byte buffer:
//! scalars, fixed-length arrays, and structs whose fields are placed in
//! declaration order, each aligned to its own alignment. A struct's size is
//! rounded up to its alignment so records can be packed back to back.
//!
//! A [`StructuredArray`] is a shared byte buffer plus a record layout. It
//! never decodes records eagerly; it hands out `(bytes, byte_offset)` pairs
//! that callers read with [`ScalarKind::read`].
//!
//! ```
//! use parray::layout::{Layout, ScalarKind, StructuredArray};
//!
//! let point = Layout::structure(vec![
//!     ("tag", Layout::Scalar(ScalarKind::U8)),
//!     ("x", Layout::Scalar(ScalarKind::F64)),
//! ])
//! .unwrap();
//! assert_eq!(point.size(), 16);
//! assert_eq!(point.resolve(&["x"]).unwrap().0, 8);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::{ArrayError, Result};
use crate::mode::ExecutionConfig;
use crate::ops::SliceOutput;
use crate::plan::OpKind;
use crate::protocol::{Engine, ExecutionReport, Pass};
use crate::slices::SliceDescriptor;
use crate::view::ArrayView;

/// Primitive field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    U8,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarKind {
    pub fn size(&self) -> usize {
        match self {
            ScalarKind::U8 => 1,
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F32 => 4,
            ScalarKind::F64 => 8,
        }
    }

    /// Decode the little-endian value at `offset`, widened to `f64`
    pub fn read(&self, bytes: &[u8], offset: usize) -> Option<f64> {
        let raw = bytes.get(offset..offset + self.size())?;
        let value = match self {
            ScalarKind::U8 => f64::from(raw[0]),
            ScalarKind::I32 => f64::from(i32::from_le_bytes(raw.try_into().ok()?)),
            ScalarKind::U32 => f64::from(u32::from_le_bytes(raw.try_into().ok()?)),
            ScalarKind::F32 => f64::from(f32::from_le_bytes(raw.try_into().ok()?)),
            ScalarKind::F64 => f64::from_le_bytes(raw.try_into().ok()?),
        };
        Some(value)
    }
}

/// A named field placed at a fixed byte offset
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    pub layout: Layout,
}

/// The binary shape of one record
#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Scalar(ScalarKind),
    Array {
        element: Box<Layout>,
        len: usize,
    },
    Struct {
        fields: Vec<Field>,
        size: usize,
        align: usize,
    },
}

fn align_up(offset: usize, align: usize) -> usize {
    offset.div_ceil(align) * align
}

impl Layout {
    pub fn array(element: Layout, len: usize) -> Layout {
        Layout::Array {
            element: Box::new(element),
            len,
        }
    }

    /// Lay out `fields` in order. Field names must be unique.
    pub fn structure(fields: Vec<(&str, Layout)>) -> Result<Layout> {
        let mut placed: Vec<Field> = Vec::with_capacity(fields.len());
        let mut offset = 0;
        let mut align = 1;
        for (name, layout) in fields {
            if placed.iter().any(|f| f.name == name) {
                return Err(ArrayError::argument(format!("duplicate field '{}'", name)));
            }
            let field_align = layout.align();
            offset = align_up(offset, field_align);
            align = align.max(field_align);
            let size = layout.size();
            placed.push(Field {
                name: name.to_string(),
                offset,
                layout,
            });
            offset += size;
        }
        Ok(Layout::Struct {
            fields: placed,
            size: align_up(offset, align),
            align,
        })
    }

    /// Bytes per record, including trailing padding
    pub fn size(&self) -> usize {
        match self {
            Layout::Scalar(kind) => kind.size(),
            Layout::Array { element, len } => element.size() * len,
            Layout::Struct { size, .. } => *size,
        }
    }

    pub fn align(&self) -> usize {
        match self {
            Layout::Scalar(kind) => kind.size(),
            Layout::Array { element, .. } => element.align(),
            Layout::Struct { align, .. } => *align,
        }
    }

    /// Byte offset and layout of the value at `path`, relative to the
    /// record start. Struct steps name a field, array steps are decimal
    /// indices.
    pub fn resolve(&self, path: &[&str]) -> Result<(usize, &Layout)> {
        let mut offset = 0;
        let mut current = self;
        for step in path {
            match current {
                Layout::Struct { fields, .. } => {
                    let field = fields
                        .iter()
                        .find(|f| f.name == *step)
                        .ok_or_else(|| ArrayError::argument(format!("no field '{}'", step)))?;
                    offset += field.offset;
                    current = &field.layout;
                }
                Layout::Array { element, len } => {
                    let index: usize = step
                        .parse()
                        .ok()
                        .filter(|i| i < len)
                        .ok_or_else(|| ArrayError::argument(format!("bad array index '{}'", step)))?;
                    offset += index * element.size();
                    current = element.as_ref();
                }
                Layout::Scalar(_) => {
                    return Err(ArrayError::argument(format!("cannot select '{}' in a scalar", step)));
                }
            }
        }
        Ok((offset, current))
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Scalar(kind) => write!(f, "{:?}", kind),
            Layout::Array { element, len } => write!(f, "[{}; {}]", element, len),
            Layout::Struct { fields, .. } => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}@{}: {}", field.name, field.offset, field.layout)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// A packed sequence of records sharing one byte buffer
#[derive(Debug, Clone)]
pub struct StructuredArray {
    bytes: Arc<[u8]>,
    layout: Layout,
    len: usize,
}

impl StructuredArray {
    /// The buffer must hold a whole number of records
    pub fn new(bytes: impl Into<Arc<[u8]>>, layout: Layout) -> Result<Self> {
        let bytes = bytes.into();
        let size = layout.size();
        if size == 0 || bytes.len() % size != 0 {
            return Err(ArrayError::argument(format!(
                "{} bytes do not hold whole records of {} bytes",
                bytes.len(),
                size
            )));
        }
        let len = bytes.len() / size;
        Ok(Self { bytes, layout, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    /// Buffer and byte offset of record `index`
    pub fn record(&self, index: usize) -> Option<(Arc<[u8]>, usize)> {
        (index < self.len).then(|| (Arc::clone(&self.bytes), index * self.layout.size()))
    }

    /// Buffer and byte offset of the value at `path` inside record `index`
    pub fn field(&self, index: usize, path: &[&str]) -> Result<(Arc<[u8]>, usize)> {
        let (bytes, base) = self.record(index).ok_or_else(|| {
            ArrayError::argument(format!("record {} out of range {}", index, self.len))
        })?;
        let (offset, _) = self.layout.resolve(path)?;
        Ok((bytes, base + offset))
    }

    /// Decode the scalar at `path` inside record `index`
    pub fn read(&self, index: usize, path: &[&str]) -> Result<f64> {
        let (offset, layout) = self.layout.resolve(path)?;
        let Layout::Scalar(kind) = layout else {
            return Err(ArrayError::argument(format!("{:?} is not a scalar field", path)));
        };
        if index >= self.len {
            return Err(ArrayError::argument(format!("record {} out of range {}", index, self.len)));
        }
        kind.read(&self.bytes, index * self.layout.size() + offset)
            .ok_or_else(|| ArrayError::argument("record truncated"))
    }
}

impl Engine {
    /// Apply `f(bytes, byte_offset)` to every record
    pub fn map_records<U, F>(&self, records: &StructuredArray, config: &ExecutionConfig, f: F) -> Result<ArrayView<U>>
    where
        U: Send,
        F: Fn(&Arc<[u8]>, usize) -> U + Sync,
    {
        self.map_records_reported(records, config, f).map(|(array, _)| array)
    }

    pub fn map_records_reported<U, F>(
        &self,
        records: &StructuredArray,
        config: &ExecutionConfig,
        f: F,
    ) -> Result<(ArrayView<U>, ExecutionReport)>
    where
        U: Send,
        F: Fn(&Arc<[u8]>, usize) -> U + Sync,
    {
        let length = records.len();
        let size = records.layout.size();
        let bytes = &records.bytes;

        let kernel = |state: &mut SliceOutput<U>, pass: &Pass<'_>| {
            let end = state.slice.pass_end(pass.warmup, 1);
            while state.slice.pos < end {
                let chunk = state.slice.pos;
                if pass.should_bail(chunk) {
                    return false;
                }
                for i in SliceDescriptor::chunk_range(chunk, length) {
                    state.out.push(f(bytes, i * size));
                }
                state.slice.pos += 1;
            }
            state.slice.is_finished()
        };

        let resumed = self.run_resumable(OpKind::Map, length, config, SliceOutput::new, kernel)?;
        let array = match resumed.states {
            Some(states) => ArrayView::from_vec(crate::ops::concat(states)),
            None => ArrayView::empty(),
        };
        Ok((array, resumed.report))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::mode::ExecutionMode;

    /// `{ id: u32, pos: [f32; 3], weight: f64 }`
    fn particle() -> Layout {
        Layout::structure(vec![
            ("id", Layout::Scalar(ScalarKind::U32)),
            ("pos", Layout::array(Layout::Scalar(ScalarKind::F32), 3)),
            ("weight", Layout::Scalar(ScalarKind::F64)),
        ])
        .unwrap()
    }

    fn encode(count: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        for i in 0..count {
            bytes.extend_from_slice(&(i as u32).to_le_bytes());
            for k in 0..3 {
                bytes.extend_from_slice(&((i * 3 + k) as f32).to_le_bytes());
            }
            bytes.extend_from_slice(&(i as f64 * 0.5).to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_struct_offsets_and_padding() {
        let layout = particle();
        assert_eq!(layout.resolve(&["id"]).unwrap().0, 0);
        assert_eq!(layout.resolve(&["pos", "2"]).unwrap().0, 12);
        assert_eq!(layout.resolve(&["weight"]).unwrap().0, 16);
        assert_eq!(layout.size(), 24);
        assert_eq!(layout.align(), 8);

        let padded = Layout::structure(vec![
            ("wide", Layout::Scalar(ScalarKind::F64)),
            ("flag", Layout::Scalar(ScalarKind::U8)),
        ])
        .unwrap();
        assert_eq!(padded.size(), 16);
    }

    #[test]
    fn test_resolve_errors() {
        let layout = particle();
        assert!(layout.resolve(&["mass"]).is_err());
        assert!(layout.resolve(&["pos", "3"]).is_err());
        assert!(layout.resolve(&["id", "0"]).is_err());
        assert!(Layout::structure(vec![
            ("a", Layout::Scalar(ScalarKind::U8)),
            ("a", Layout::Scalar(ScalarKind::U8)),
        ])
        .is_err());
    }

    #[test]
    fn test_structured_array_access() {
        let records = StructuredArray::new(encode(4), particle()).unwrap();
        assert_eq!(records.len(), 4);
        let (_, offset) = records.field(2, &["pos", "1"]).unwrap();
        assert_eq!(offset, 2 * 24 + 8);
        assert_relative_eq!(records.read(2, &["pos", "1"]).unwrap(), 7.0);
        assert_relative_eq!(records.read(3, &["weight"]).unwrap(), 1.5);
        assert!(records.read(4, &["id"]).is_err());
        assert!(records.read(0, &["pos"]).is_err());
        assert!(records.record(4).is_none());

        assert!(StructuredArray::new(vec![0u8; 25], particle()).is_err());
    }

    #[test]
    fn test_map_records_parallel() {
        let engine = Engine::new();
        let records = StructuredArray::new(encode(1000), particle()).unwrap();
        let weight = records.layout().resolve(&["weight"]).unwrap().0;
        let config = ExecutionConfig::new(ExecutionMode::Par).with_workers(4);
        let weights = engine
            .map_records(&records, &config, |bytes, offset| {
                ScalarKind::F64.read(bytes, offset + weight).unwrap_or(f64::NAN)
            })
            .unwrap();
        assert_eq!(weights.len(), 1000);
        for (i, w) in weights.as_slice().iter().enumerate() {
            assert_relative_eq!(*w, i as f64 * 0.5);
        }
    }

    #[test]
    fn test_display() {
        let layout = Layout::structure(vec![("v", Layout::array(Layout::Scalar(ScalarKind::I32), 2))]).unwrap();
        assert_eq!(layout.to_string(), "{v@0: [I32; 2]}");
    }
}
