//! Row-major shapes and strided addressing
//!
//! A [`Shape`] describes how a flat buffer is viewed as an N-dimensional
//! array. Linear indices and coordinates are converted with the partial
//! products of the trailing dimensions:
//!
//! ```
//! use parray::shape::{compute_indices, compute_products, offset_of};
//!
//! let dims = [2, 4, 6, 8];
//! assert_eq!(compute_products(&dims), vec![1, 8, 48, 192]);
//!
//! let coords = compute_indices(&dims, 200);
//! assert_eq!(coords, vec![1, 0, 1, 0]);
//! assert_eq!(offset_of(&dims, &coords), Some(200));
//! ```

use std::fmt;

use crate::error::{ArrayError, Result};

/// The dimensions of an array, outermost first
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Create a shape, rejecting rank 0 and element counts that overflow `usize`
    pub fn new(dims: Vec<usize>) -> Result<Self> {
        if dims.is_empty() {
            return Err(ArrayError::argument("shape must have at least one dimension"));
        }
        dims.iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| ArrayError::argument(format!("shape {:?} overflows", dims)))?;
        Ok(Self { dims })
    }

    /// One-dimensional shape of `len` elements
    pub fn vector(len: usize) -> Self {
        Self { dims: vec![len] }
    }

    /// Parse loosely-typed dimensions.
    ///
    /// Every entry must be a finite, non-negative integer that fits in a
    /// `u32`; anything else (`-1`, `2.5`, `NaN`) is an argument error.
    pub fn from_f64_dims(dims: &[f64]) -> Result<Self> {
        let mut parsed = Vec::with_capacity(dims.len());
        for (axis, &d) in dims.iter().enumerate() {
            if !d.is_finite() || d < 0.0 || d.fract() != 0.0 || d > u32::MAX as f64 {
                return Err(ArrayError::argument(format!(
                    "dimension {} is not a valid length: {}",
                    axis, d
                )));
            }
            parsed.push(d as usize);
        }
        Self::new(parsed)
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Size of the outermost dimension
    pub fn outer(&self) -> usize {
        self.dims[0]
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        product_of_range(&self.dims, 0, self.dims.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape of one element of the outermost dimension (`[A, B, C] -> [B, C]`)
    pub fn inner(&self) -> &[usize] {
        &self.dims[1..]
    }

    pub fn rank_kind(&self) -> Rank {
        Rank::of(&self.dims)
    }

    /// Shape of the sub-view selected by a coordinate prefix of length `from`
    pub(crate) fn suffix(&self, from: usize) -> Shape {
        Shape {
            dims: self.dims[from..].to_vec(),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

/// Closed rank dispatch: explicit arithmetic for ranks 1 to 3, the general
/// products path for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    Rank1(usize),
    Rank2(usize, usize),
    Rank3(usize, usize, usize),
    RankN,
}

impl Rank {
    pub fn of(dims: &[usize]) -> Rank {
        match *dims {
            [x] => Rank::Rank1(x),
            [x, y] => Rank::Rank2(x, y),
            [x, y, z] => Rank::Rank3(x, y, z),
            _ => Rank::RankN,
        }
    }

    /// Offset of a full coordinate vector, or `None` if any coordinate is out
    /// of range or the coordinate count does not match the rank.
    pub fn offset(&self, dims: &[usize], coords: &[usize]) -> Option<usize> {
        match (*self, coords) {
            (Rank::Rank1(x_dim), &[x]) => (x < x_dim).then_some(x),
            (Rank::Rank2(x_dim, y_dim), &[x, y]) => {
                (x < x_dim && y < y_dim).then_some(x * y_dim + y)
            }
            (Rank::Rank3(x_dim, y_dim, z_dim), &[x, y, z]) => {
                (x < x_dim && y < y_dim && z < z_dim).then_some(z + y * z_dim + x * y_dim * z_dim)
            }
            (Rank::RankN, _) if coords.len() == dims.len() => offset_of(dims, coords),
            _ => None,
        }
    }

    /// Coordinates of linear index `index1d`
    pub fn indices(&self, dims: &[usize], index1d: usize) -> Vec<usize> {
        match *self {
            Rank::Rank1(_) => vec![index1d],
            Rank::Rank2(_, y_dim) => vec![index1d / y_dim, index1d % y_dim],
            Rank::Rank3(_, y_dim, z_dim) => {
                let x = index1d / (y_dim * z_dim);
                let r = index1d - x * y_dim * z_dim;
                vec![x, r / z_dim, r % z_dim]
            }
            Rank::RankN => compute_indices(dims, index1d),
        }
    }
}

/// Product of `shape[start..limit]`
pub fn product_of_range(shape: &[usize], start: usize, limit: usize) -> usize {
    shape[start..limit].iter().product()
}

/// Partial products in reverse order: `[A, B, C, D] -> [1, D, CD, BCD]`
pub fn compute_products(shape: &[usize]) -> Vec<usize> {
    let mut product = 1;
    let mut products = Vec::with_capacity(shape.len());
    products.push(1);
    for &d in shape.iter().skip(1).rev() {
        product *= d;
        products.push(product);
    }
    products
}

/// The N-dimensional coordinate of linear index `index1d`
pub fn compute_indices(shape: &[usize], index1d: usize) -> Vec<usize> {
    let products = compute_products(shape);
    let l = shape.len();
    let mut remaining = index1d;
    let mut result = Vec::with_capacity(l);
    for i in 0..l {
        let stride = products[l - i - 1];
        let index = remaining / stride;
        result.push(index);
        remaining -= index * stride;
    }
    result
}

/// Linear offset of a coordinate vector or coordinate prefix.
///
/// A prefix `[a, b]` of a rank-4 shape yields the offset of the `[C, D]`
/// sub-view it selects. Returns `None` when a coordinate is out of range or
/// there are more coordinates than dimensions.
pub fn offset_of(shape: &[usize], coords: &[usize]) -> Option<usize> {
    if coords.len() > shape.len() {
        return None;
    }
    let products = compute_products(shape);
    let rank = shape.len();
    let mut offset = 0;
    for (i, &c) in coords.iter().enumerate() {
        if c >= shape[i] {
            return None;
        }
        offset += c * products[rank - i - 1];
    }
    Some(offset)
}

/// Advance `indices` by one row-major step.
///
/// Past the last element the coordinates wrap to all zeros; callers track
/// the domain length to detect completion.
pub fn step_indices(shape: &[usize], indices: &mut [usize]) {
    for i in (0..shape.len()).rev() {
        let next = indices[i] + 1;
        if next < shape[i] {
            indices[i] = next;
            return;
        }
        indices[i] = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_shapes() -> Vec<Vec<usize>> {
        vec![
            vec![1],
            vec![7],
            vec![3, 5],
            vec![1, 9],
            vec![4, 1],
            vec![2, 3, 4],
            vec![5, 1, 2],
            vec![2, 4, 6, 8],
            vec![3, 2, 1, 2, 3],
        ]
    }

    #[test]
    fn test_products() {
        assert_eq!(compute_products(&[5]), vec![1]);
        assert_eq!(compute_products(&[2, 3]), vec![1, 3]);
        assert_eq!(compute_products(&[2, 4, 6, 8]), vec![1, 8, 48, 192]);
    }

    #[test]
    fn test_round_trip_2468() {
        let shape = [2, 4, 6, 8];
        for index1d in 0..384 {
            let coords = compute_indices(&shape, index1d);
            assert_eq!(offset_of(&shape, &coords), Some(index1d), "index {}", index1d);
        }
    }

    #[test]
    fn test_fast_paths_match_general_path() {
        for dims in small_shapes() {
            let rank = Rank::of(&dims);
            let len: usize = dims.iter().product();
            for index1d in 0..len {
                let general = compute_indices(&dims, index1d);
                assert_eq!(rank.indices(&dims, index1d), general, "{:?} @ {}", dims, index1d);
                assert_eq!(rank.offset(&dims, &general), Some(index1d));
                assert_eq!(offset_of(&dims, &general), Some(index1d));
            }
        }
    }

    #[test]
    fn test_step_indices_walks_row_major() {
        for dims in small_shapes() {
            let len: usize = dims.iter().product();
            let mut coords = vec![0; dims.len()];
            for index1d in 0..len {
                assert_eq!(coords, compute_indices(&dims, index1d));
                step_indices(&dims, &mut coords);
            }
            // wraps to the terminal all-zero state
            assert!(coords.iter().all(|&c| c == 0));
        }
    }

    #[test]
    fn test_offset_of_prefix_and_bounds() {
        let dims = [3, 4, 5];
        assert_eq!(offset_of(&dims, &[2]), Some(40));
        assert_eq!(offset_of(&dims, &[1, 2]), Some(30));
        assert_eq!(offset_of(&dims, &[3]), None);
        assert_eq!(offset_of(&dims, &[0, 0, 5]), None);
        assert_eq!(offset_of(&dims, &[0, 0, 0, 0]), None);
        assert_eq!(Rank::of(&dims).offset(&dims, &[1, 2]), None);
    }

    #[test]
    fn test_shape_validation() {
        assert!(matches!(Shape::new(vec![]), Err(ArrayError::Argument(_))));
        assert!(matches!(
            Shape::new(vec![usize::MAX, 2]),
            Err(ArrayError::Argument(_))
        ));
        let shape = Shape::new(vec![3, 0, 2]).unwrap();
        assert!(shape.is_empty());
        assert_eq!(shape.to_string(), "[3, 0, 2]");
    }

    #[test]
    fn test_from_f64_dims() {
        let shape = Shape::from_f64_dims(&[4.0, 2.0]).unwrap();
        assert_eq!(shape.dims(), &[4, 2]);
        assert_eq!(shape.rank_kind(), Rank::Rank2(4, 2));

        for bad in [[-1.0], [2.5], [f64::NAN], [f64::INFINITY], [5e9]] {
            assert!(
                matches!(Shape::from_f64_dims(&bad), Err(ArrayError::Argument(_))),
                "{:?} accepted",
                bad
            );
        }
    }
}
