use std::fmt;

use crate::error::{Error, Result};

// Shape: N-dimensional shape representation
//
// A Shape describes the size of each dimension of a tensor.
// For example:
//   - Scalar: Shape([])         : 0 dimensions, 1 element
//   - Vector: Shape([5])        : 1 dimension, 5 elements
//   - Matrix: Shape([3, 4])     : 2 dimensions, 12 elements
//
// Shapes are immutable once attached to a tensor. Every shape operation
// below returns a new Shape (or a list of axes) and has no side effects.

/// N-dimensional shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    pub fn scalar() -> Self {
        Shape(vec![])
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions (0 for scalar, 1 for vector, 2 for matrix, etc.).
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements (product of all dimensions).
    /// A scalar shape [] has 1 element; any zero dimension gives 0.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product::<usize>()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// Compute the contiguous (row-major / C-order) strides for this shape.
    ///
    /// For shape [2, 3, 4], strides are [12, 4, 1].
    pub fn stride_contiguous(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.rank()];
        if self.rank() > 0 {
            strides[self.rank() - 1] = 1;
            for i in (0..self.rank() - 1).rev() {
                strides[i] = strides[i + 1] * self.0[i + 1];
            }
        }
        strides
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> Result<usize> {
        self.0.get(d).copied().ok_or(Error::AxisOutOfRange {
            axis: d as i64,
            rank: self.rank(),
        })
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.0.clone()
    }

    // Broadcasting

    /// Compute the broadcast output shape from two input shapes.
    ///
    /// NumPy-style broadcasting rules:
    ///   1. Align shapes from the right (trailing dimensions).
    ///   2. Dimensions are compatible if they are equal or one of them is 1.
    ///   3. Missing leading dimensions are treated as 1.
    ///
    /// Examples:
    ///   [3, 4] and [4]     → [3, 4]
    ///   [2, 1] and [1, 3]  → [2, 3]
    ///   [3] and [4]        → Error (3 ≠ 4 and neither is 1)
    pub fn broadcast_shape(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
        let l = lhs.dims();
        let r = rhs.dims();
        let max_rank = l.len().max(r.len());
        let mut result = Vec::with_capacity(max_rank);

        for i in 0..max_rank {
            // Index from the right. If i >= len, treat as 1.
            let ld = if i < l.len() { l[l.len() - 1 - i] } else { 1 };
            let rd = if i < r.len() { r[r.len() - 1 - i] } else { 1 };

            if ld == rd {
                result.push(ld);
            } else if ld == 1 {
                result.push(rd);
            } else if rd == 1 {
                result.push(ld);
            } else {
                return Err(Error::shape_mismatch(format!(
                    "operands could not be broadcast together with shapes {lhs} and {rhs}"
                )));
            }
        }

        result.reverse();
        Ok(Shape::new(result))
    }

    /// Return the broadcast strides for this shape to match a target broadcast shape.
    ///
    /// For each dimension where self.dim[i] == 1 and target.dim[i] > 1,
    /// the stride is set to 0 (repeating the single element).
    /// For missing leading dimensions (self has fewer dims), stride is also 0.
    pub fn broadcast_strides(&self, target: &Shape) -> Vec<usize> {
        let self_dims = self.dims();
        let target_dims = target.dims();
        let self_strides = self.stride_contiguous();

        let mut result = vec![0usize; target_dims.len()];
        let offset = target_dims.len() - self_dims.len();

        for i in 0..self_dims.len() {
            if self_dims[i] == target_dims[i + offset] {
                result[i + offset] = self_strides[i];
            }
        }
        result
    }

    /// Axes of `broadcast` that were stretched when `self` was broadcast to it.
    ///
    /// An axis is listed when `self` lacks it (leading padding) or has size 1
    /// where `broadcast` is larger. Summing a gradient over these axes and
    /// reshaping to `self` undoes the broadcast.
    pub fn reduction_axes(&self, broadcast: &Shape) -> Vec<usize> {
        let in_dims = self.dims();
        let out_dims = broadcast.dims();
        let mut axes = Vec::new();
        for i in 0..out_dims.len() {
            let out_axis = out_dims.len() - 1 - i;
            let out_dim = out_dims[out_axis];
            let in_dim = if i < in_dims.len() {
                Some(in_dims[in_dims.len() - 1 - i])
            } else {
                None
            };
            match in_dim {
                None => axes.push(out_axis),
                Some(1) if out_dim > 1 => axes.push(out_axis),
                _ => {}
            }
        }
        axes.reverse();
        axes
    }

    // Reductions

    /// Shape after reducing over `axes`, keeping size-1 dims when `keep_dims`.
    pub fn reduced(&self, axes: &[usize], keep_dims: bool) -> Shape {
        let dims = self
            .0
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| {
                if axes.contains(&i) {
                    keep_dims.then_some(1)
                } else {
                    Some(d)
                }
            })
            .collect();
        Shape(dims)
    }

    /// This shape with every axis in `axes` set to 1.
    pub fn expand_to_keep_dim(&self, axes: &[usize]) -> Shape {
        let mut dims = self.0.clone();
        for &a in axes {
            if a < dims.len() {
                dims[a] = 1;
            }
        }
        Shape(dims)
    }
}

/// Pairwise broadcast of two shapes. See [`Shape::broadcast_shape`].
pub fn broadcast_shape(a: &Shape, b: &Shape) -> Result<Shape> {
    Shape::broadcast_shape(a, b)
}

/// Axes to sum a gradient over to undo a broadcast. See [`Shape::reduction_axes`].
pub fn reduction_axes(original: &Shape, broadcast: &Shape) -> Vec<usize> {
    original.reduction_axes(broadcast)
}

/// Normalize an axis argument against `rank`.
///
/// `None` means every axis. Negative axes count from the end. The result is
/// sorted and free of duplicates.
pub fn parse_axis_param(axis: Option<&[i64]>, rank: usize) -> Result<Vec<usize>> {
    let Some(axis) = axis else {
        return Ok((0..rank).collect());
    };
    let mut out = Vec::with_capacity(axis.len());
    for &a in axis {
        let r = rank as i64;
        if a < -r || a >= r.max(1) {
            return Err(Error::AxisOutOfRange { axis: a, rank });
        }
        let norm = if a < 0 { (a + r) as usize } else { a as usize };
        if !out.contains(&norm) {
            out.push(norm);
        }
    }
    out.sort_unstable();
    Ok(out)
}

/// Resolve a reshape target that may contain a single `-1`.
pub fn infer_from_implicit_shape(shape: &[i64], size: usize) -> Result<Shape> {
    let mut implicit = None;
    let mut known = 1usize;
    for (i, &d) in shape.iter().enumerate() {
        match d {
            -1 => {
                if implicit.is_some() {
                    return Err(Error::invalid_argument(
                        "reshape",
                        format!("shapes can only have one implicit size, got {shape:?}"),
                    ));
                }
                implicit = Some(i);
            }
            d if d < 0 => {
                return Err(Error::invalid_argument(
                    "reshape",
                    format!("dim {i} of {shape:?} is negative"),
                ));
            }
            d => known *= d as usize,
        }
    }
    let mut dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    if let Some(i) = implicit {
        if known == 0 || size % known != 0 {
            return Err(Error::invalid_argument(
                "reshape",
                format!("the implicit shape can't be a fractional number: {size} / {known}"),
            ));
        }
        dims[i] = size / known;
    }
    Ok(Shape(dims))
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

// Convenient From implementations
// These let you write: Shape::from((3, 4)) instead of Shape::new(vec![3, 4])

impl From<()> for Shape {
    /// Scalar shape (0 dimensions).
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    /// 1-D shape.
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<(usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3): (usize, usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2, d3])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(s: [usize; N]) -> Self {
        Shape(s.to_vec())
    }
}

impl From<&Shape> for Shape {
    fn from(s: &Shape) -> Self {
        s.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::from(());
        assert_eq!(s.rank(), 0);
        assert_eq!(s.elem_count(), 1);
        assert_eq!(s.stride_contiguous(), Vec::<usize>::new());
    }

    #[test]
    fn test_3d_strides() {
        let s = Shape::from((2, 3, 4));
        assert_eq!(s.stride_contiguous(), vec![12, 4, 1]);
        assert_eq!(s.elem_count(), 24);
    }

    #[test]
    fn test_zero_dim_has_no_elements() {
        assert_eq!(Shape::from((3, 0)).elem_count(), 0);
    }

    #[rstest]
    #[case(vec![3, 4], vec![4], vec![3, 4])]
    #[case(vec![2, 1], vec![1, 3], vec![2, 3])]
    #[case(vec![5, 3, 1], vec![3, 4], vec![5, 3, 4])]
    #[case(vec![], vec![2, 2], vec![2, 2])]
    #[case(vec![1], vec![0], vec![0])]
    fn test_broadcast_is_symmetric(
        #[case] a: Vec<usize>,
        #[case] b: Vec<usize>,
        #[case] expected: Vec<usize>,
    ) {
        let (a, b) = (Shape::new(a), Shape::new(b));
        let ab = broadcast_shape(&a, &b).unwrap();
        let ba = broadcast_shape(&b, &a).unwrap();
        assert_eq!(ab, Shape::new(expected));
        assert_eq!(ab, ba);
        assert_eq!(broadcast_shape(&a, &a).unwrap(), a);
    }

    #[rstest]
    #[case(vec![3], vec![4])]
    #[case(vec![2, 3], vec![3, 2])]
    fn test_broadcast_mismatch(#[case] a: Vec<usize>, #[case] b: Vec<usize>) {
        let err = broadcast_shape(&Shape::new(a), &Shape::new(b)).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }

    #[rstest]
    #[case(vec![4], vec![3, 4], vec![0])]
    #[case(vec![1, 4], vec![3, 4], vec![0])]
    #[case(vec![3, 1], vec![3, 4], vec![1])]
    #[case(vec![], vec![2, 3], vec![0, 1])]
    #[case(vec![2, 3], vec![2, 3], vec![])]
    #[case(vec![1, 1], vec![1, 5], vec![1])]
    fn test_reduction_axes(
        #[case] original: Vec<usize>,
        #[case] broadcast: Vec<usize>,
        #[case] expected: Vec<usize>,
    ) {
        assert_eq!(
            reduction_axes(&Shape::new(original), &Shape::new(broadcast)),
            expected
        );
    }

    #[test]
    fn test_broadcast_strides() {
        let s = Shape::from((3, 1));
        assert_eq!(s.broadcast_strides(&Shape::from((2, 3, 4))), vec![0, 1, 0]);
    }

    #[test]
    fn test_parse_axis_param() {
        assert_eq!(parse_axis_param(None, 3).unwrap(), vec![0, 1, 2]);
        assert_eq!(parse_axis_param(Some(&[-1, 0]), 3).unwrap(), vec![0, 2]);
        assert!(parse_axis_param(Some(&[3]), 3).is_err());
        assert!(parse_axis_param(Some(&[-4]), 3).is_err());
    }

    #[test]
    fn test_reduced_shapes() {
        let s = Shape::from((2, 3, 4));
        assert_eq!(s.reduced(&[1], false), Shape::from((2, 4)));
        assert_eq!(s.reduced(&[0, 2], true), Shape::from((1, 3, 1)));
        assert_eq!(s.expand_to_keep_dim(&[1]), Shape::from((2, 1, 4)));
    }

    #[test]
    fn test_implicit_shape() {
        assert_eq!(infer_from_implicit_shape(&[2, -1], 6).unwrap(), Shape::from((2, 3)));
        assert!(infer_from_implicit_shape(&[-1, -1], 6).is_err());
        assert!(infer_from_implicit_shape(&[4, -1], 6).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Shape::from((3, 4))), "[3, 4]");
    }
}
