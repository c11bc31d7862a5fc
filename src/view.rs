//! Array views over shared buffers
//!
//! An [`ArrayView`] is an immutable value handle: a shape, a reference-counted
//! flat buffer, and an offset into that buffer. Several views may alias one
//! buffer (a row of a matrix, a partitioned or flattened array); every
//! operation that produces new data returns a view owning a fresh buffer.
//!
//! # Accessors
//!
//! | Call | Returns |
//! |------|---------|
//! | `get(&[x])` on rank 1 | `Element::Scalar` |
//! | `get(&[x])` on rank 2+ | `Element::View` of the row |
//! | `get(&[x, y, ..])` with full coordinates | `Element::Scalar` |
//! | out-of-range coordinates | `None` |
//!
//! # Example
//!
//! ```
//! use parray::shape::Shape;
//! use parray::view::ArrayView;
//!
//! let m = ArrayView::from_shape_vec(Shape::new(vec![2, 3]).unwrap(), (0..6).collect()).unwrap();
//! assert_eq!(m.scalar(&[1, 2]), Some(&5));
//!
//! let row = m.row(1).unwrap();
//! assert_eq!(row.as_slice(), &[3, 4, 5]);
//! assert!(row.shares_buffer(&m));
//! assert_eq!(m.to_string(), "<0,1,2>,<3,4,5>");
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::{ArrayError, Result};
use crate::shape::{offset_of, Shape};

/// A shaped window onto a shared flat buffer
#[derive(Debug)]
pub struct ArrayView<T> {
    shape: Shape,
    buffer: Arc<[T]>,
    offset: usize,
}

impl<T> Clone for ArrayView<T> {
    fn clone(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            buffer: Arc::clone(&self.buffer),
            offset: self.offset,
        }
    }
}

/// One element of the outermost dimension, or the target of [`ArrayView::get`]
#[derive(Debug, Clone)]
pub enum Element<'a, T> {
    /// A single value
    Scalar(&'a T),
    /// A sub-array aliasing the parent's buffer
    View(ArrayView<T>),
}

impl<'a, T> Element<'a, T> {
    pub fn scalar(&self) -> Option<&'a T> {
        match self {
            Element::Scalar(v) => Some(*v),
            Element::View(_) => None,
        }
    }

    pub fn view(&self) -> Option<&ArrayView<T>> {
        match self {
            Element::Scalar(_) => None,
            Element::View(v) => Some(v),
        }
    }
}

impl<T> ArrayView<T> {
    /// One-dimensional array owning `data`
    pub fn from_vec(data: Vec<T>) -> Self {
        let shape = Shape::vector(data.len());
        Self::from_parts(shape, data.into(), 0)
    }

    /// Array of `shape` owning `data`, which must hold exactly `shape.len()` elements
    pub fn from_shape_vec(shape: Shape, data: Vec<T>) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(ArrayError::argument(format!(
                "shape {} needs {} elements, got {}",
                shape,
                shape.len(),
                data.len()
            )));
        }
        Ok(Self::from_parts(shape, data.into(), 0))
    }

    /// The zero-length array, shape `[0]`
    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    pub(crate) fn from_parts(shape: Shape, buffer: Arc<[T]>, offset: usize) -> Self {
        debug_assert!(offset + shape.len() <= buffer.len());
        Self {
            shape,
            buffer,
            offset,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Size of the outermost dimension
    pub fn len(&self) -> usize {
        self.shape.outer()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Base index of this view in its buffer
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The elements covered by this view, in row-major order
    pub fn as_slice(&self) -> &[T] {
        &self.buffer[self.offset..self.offset + self.shape.len()]
    }

    /// Whether both views alias the same buffer
    pub fn shares_buffer(&self, other: &ArrayView<T>) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Element `index` of the outermost dimension
    pub fn element(&self, index: usize) -> Option<Element<'_, T>> {
        self.get(&[index])
    }

    /// Value at full coordinates, or the sub-view selected by a coordinate prefix
    pub fn get(&self, coords: &[usize]) -> Option<Element<'_, T>> {
        if coords.is_empty() {
            return None;
        }
        let dims = self.shape.dims();
        if coords.len() == dims.len() {
            let offset = self.shape.rank_kind().offset(dims, coords)?;
            return Some(Element::Scalar(&self.buffer[self.offset + offset]));
        }
        let offset = offset_of(dims, coords)?;
        Some(Element::View(Self::from_parts(
            self.shape.suffix(coords.len()),
            Arc::clone(&self.buffer),
            self.offset + offset,
        )))
    }

    /// Element `index` of the outermost dimension. Panics when out of range.
    pub(crate) fn element_at(&self, index: usize) -> Element<'_, T> {
        if self.rank() == 1 {
            return Element::Scalar(&self.as_slice()[index]);
        }
        assert!(index < self.len(), "element {} out of range {}", index, self.len());
        let inner = self.inner_len();
        Element::View(Self::from_parts(
            self.shape.suffix(1),
            Arc::clone(&self.buffer),
            self.offset + index * inner,
        ))
    }

    /// Number of scalars in one element of the outermost dimension
    pub(crate) fn inner_len(&self) -> usize {
        self.shape.inner().iter().product()
    }

    /// Value at full coordinates
    pub fn scalar(&self, coords: &[usize]) -> Option<&T> {
        match self.get(coords)? {
            Element::Scalar(v) => Some(v),
            Element::View(_) => None,
        }
    }

    /// Row `index` of a rank 2+ array, aliasing this buffer
    pub fn row(&self, index: usize) -> Option<ArrayView<T>> {
        match self.element(index)? {
            Element::View(v) => Some(v),
            Element::Scalar(_) => None,
        }
    }

    /// Iterate over the elements of the outermost dimension
    pub fn elements(&self) -> impl Iterator<Item = Element<'_, T>> + '_ {
        (0..self.len()).filter_map(move |i| self.element(i))
    }

    /// Split the outermost dimension: `[N, ...] -> [N / amount, amount, ...]`.
    ///
    /// No data is copied.
    pub fn partition(&self, amount: usize) -> Result<Self> {
        let length = self.len();
        if amount == 0 || length % amount != 0 {
            return Err(ArrayError::argument(format!(
                "cannot partition length {} into groups of {}",
                length, amount
            )));
        }
        let mut dims = vec![length / amount, amount];
        dims.extend_from_slice(self.shape.inner());
        Ok(Self::from_parts(
            Shape::new(dims)?,
            Arc::clone(&self.buffer),
            self.offset,
        ))
    }

    /// Merge the two outermost dimensions: `[X, Y, ...] -> [X * Y, ...]`.
    ///
    /// No data is copied.
    pub fn flatten(&self) -> Result<Self> {
        let dims = self.shape.dims();
        if dims.len() < 2 {
            return Err(ArrayError::UnsupportedShape {
                op: "flatten",
                rank: dims.len(),
            });
        }
        let mut flat = vec![dims[0] * dims[1]];
        flat.extend_from_slice(&dims[2..]);
        Ok(Self::from_parts(
            Shape::new(flat)?,
            Arc::clone(&self.buffer),
            self.offset,
        ))
    }
}

impl<T: Clone> ArrayView<T> {
    /// Copy the view's elements into an owned vector
    pub fn to_vec(&self) -> Vec<T> {
        self.as_slice().to_vec()
    }
}

impl<T: PartialEq> PartialEq for ArrayView<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.as_slice() == other.as_slice()
    }
}

impl<T: fmt::Display> fmt::Display for Element<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Scalar(v) => write!(f, "{}", v),
            Element::View(v) => write!(f, "<{}>", v),
        }
    }
}

impl<T: fmt::Display> fmt::Display for ArrayView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.elements().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", element)?;
        }
        Ok(())
    }
}
