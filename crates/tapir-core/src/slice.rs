use crate::error::{Error, Result};
use crate::shape::Shape;

// Slice: slice and strided-slice index normalization
//
// `normalize_strided_slice` turns user-facing strided-slice arguments into
// concrete, clamped per-axis (begin, end, stride) triples over the input
// shape, following NumPy / TensorFlow semantics:
//
//   begin_mask bit i        → begin[i] ignored, start of the axis (per direction)
//   end_mask bit i          → end[i] ignored, end of the axis (per direction)
//   ellipsis_mask (one bit) → full selection over every unspecified middle axis
//   new_axis_mask bit i     → a size-1 axis inserted at position i
//   shrink_axis_mask bit i  → select exactly one element and drop the axis
//
// Combining the ellipsis with new-axis or shrink-axis bits is rejected.
//
// Negative indices count from the end of the axis. Begin is clamped to
// [0, size-1] and end to [0, size] for positive strides; with a negative
// stride end is clamped to [-1, size-1] so the walk can reach index 0.

/// Arguments of a strided slice. Entries past the end of `begin` / `end`
/// (or a missing `strides`) select the full range of that axis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StridedSliceParams {
    pub begin: Vec<i64>,
    pub end: Vec<i64>,
    pub strides: Option<Vec<i64>>,
    pub begin_mask: u32,
    pub end_mask: u32,
    pub ellipsis_mask: u32,
    pub new_axis_mask: u32,
    pub shrink_axis_mask: u32,
}

impl StridedSliceParams {
    pub fn new(begin: Vec<i64>, end: Vec<i64>, strides: Option<Vec<i64>>) -> Self {
        StridedSliceParams {
            begin,
            end,
            strides,
            ..Default::default()
        }
    }

    pub fn with_begin_mask(mut self, mask: u32) -> Self {
        self.begin_mask = mask;
        self
    }

    pub fn with_end_mask(mut self, mask: u32) -> Self {
        self.end_mask = mask;
        self
    }

    pub fn with_ellipsis_mask(mut self, mask: u32) -> Self {
        self.ellipsis_mask = mask;
        self
    }

    pub fn with_new_axis_mask(mut self, mask: u32) -> Self {
        self.new_axis_mask = mask;
        self
    }

    pub fn with_shrink_axis_mask(mut self, mask: u32) -> Self {
        self.shrink_axis_mask = mask;
        self
    }
}

/// Normalized strided slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceInfo {
    /// Clamped start index per axis of `input_shape`.
    pub begin: Vec<i64>,
    /// Clamped (exclusive) stop index per axis of `input_shape`.
    pub end: Vec<i64>,
    pub strides: Vec<i64>,
    /// Number of selected elements per axis of `input_shape`.
    pub size: Vec<usize>,
    /// The input shape after new-axis insertion.
    pub input_shape: Shape,
    /// `size` with the shrunk axes removed.
    pub output_shape: Shape,
    /// Whether every stride is 1.
    pub non_strided: bool,
}

/// Indices of the set bits of `mask`, lowest first.
pub fn mask_to_axes(mask: u32) -> Vec<usize> {
    (0..32usize).filter(|&i| mask & (1u32 << i) != 0).collect()
}

/// `max(0, ceil((end - begin) / stride))` per axis.
pub fn compute_out_shape(begin: &[i64], end: &[i64], strides: &[i64]) -> Vec<usize> {
    begin
        .iter()
        .zip(end)
        .zip(strides)
        .map(|((&b, &e), &s)| ceil_div(e - b, s).max(0) as usize)
        .collect()
}

fn ceil_div(num: i64, den: i64) -> i64 {
    let q = num / den;
    if num % den != 0 && ((num > 0) == (den > 0)) {
        q + 1
    } else {
        q
    }
}

// `i64::clamp` panics when lo > hi, which happens for empty axes.
fn clamp(lo: i64, x: i64, hi: i64) -> i64 {
    lo.max(x.min(hi))
}

/// One axis of the normalized selection before clamping.
struct AxisSpec {
    begin: Option<i64>,
    end: Option<i64>,
    stride: i64,
}

fn start_for_axis(spec: &AxisSpec, axis_size: i64) -> i64 {
    let start = match spec.begin {
        Some(b) => b,
        None if spec.stride > 0 => i64::MIN,
        None => i64::MAX,
    };
    let start = if start < 0 { start + axis_size } else { start };
    clamp(0, start, axis_size - 1)
}

fn stop_for_axis(spec: &AxisSpec, axis_size: i64) -> i64 {
    let stop = match spec.end {
        Some(e) => e,
        None if spec.stride > 0 => i64::MAX,
        None => i64::MIN,
    };
    let stop = if stop < 0 { stop + axis_size } else { stop };
    if spec.stride > 0 {
        clamp(0, stop, axis_size)
    } else {
        clamp(-1, stop, axis_size - 1)
    }
}

/// Normalize strided-slice arguments against `input_shape`.
pub fn normalize_strided_slice(input_shape: &Shape, params: &StridedSliceParams) -> Result<SliceInfo> {
    let ellipsis_axes = mask_to_axes(params.ellipsis_mask);
    if ellipsis_axes.len() > 1 {
        return Err(Error::InvalidSliceMask(
            "multiple ellipses in slice are not allowed".into(),
        ));
    }
    if params.ellipsis_mask != 0 && params.new_axis_mask != 0 {
        return Err(Error::InvalidSliceMask(
            "using both ellipsis_mask and new_axis_mask is not supported".into(),
        ));
    }
    if params.ellipsis_mask != 0 && params.shrink_axis_mask != 0 {
        return Err(Error::InvalidSliceMask(
            "using both ellipsis_mask and shrink_axis_mask is not supported".into(),
        ));
    }
    if let Some(strides) = &params.strides {
        if let Some(i) = strides.iter().position(|&s| s == 0) {
            return Err(Error::invalid_argument(
                "strided_slice",
                format!("stride at index {i} is 0"),
            ));
        }
    }

    let mut begin: Vec<Option<i64>> = params.begin.iter().copied().map(Some).collect();
    let mut end: Vec<Option<i64>> = params.end.iter().copied().map(Some).collect();
    let strides: Vec<i64> = params.strides.clone().unwrap_or_default();
    let num_interpolated = input_shape.rank() as i64 - params.begin.len() as i64;

    // New axes first: they shift every later index.
    let mut dims = input_shape.to_vec();
    for axis in mask_to_axes(params.new_axis_mask) {
        set_at(&mut begin, axis, 0);
        set_at(&mut end, axis, 1);
        if axis > dims.len() {
            return Err(Error::InvalidSliceMask(format!(
                "new axis {axis} is beyond the rank of the expanded shape"
            )));
        }
        dims.insert(axis, 1);
    }
    let rank = dims.len();

    // With an ellipsis, the ellipsis position plus `num_interpolated` axes
    // after it select everything; explicit entries after the ellipsis map
    // back onto the tail axes.
    let elided = ellipsis_axes
        .first()
        .map(|&full| (full, num_interpolated.max(0) as usize + 1));
    let original_axis = |axis: usize| -> Option<usize> {
        match elided {
            Some((full, n)) if axis >= full && axis < full + n => None,
            Some((full, n)) if axis >= full + n => Some(axis - (n - 1)),
            _ => Some(axis),
        }
    };

    let mut out_begin = Vec::with_capacity(rank);
    let mut out_end = Vec::with_capacity(rank);
    let mut out_strides = Vec::with_capacity(rank);
    for (axis, &dim) in dims.iter().enumerate() {
        let spec = match original_axis(axis) {
            None => AxisSpec {
                begin: None,
                end: None,
                stride: 1,
            },
            Some(orig) => {
                let stride = strides.get(orig).copied().unwrap_or(1);
                let b = begin.get(orig).copied().flatten();
                let e = end.get(orig).copied().flatten();
                AxisSpec {
                    begin: if params.begin_mask & (1 << orig) != 0 { None } else { b },
                    end: if params.end_mask & (1 << orig) != 0 { None } else { e },
                    stride,
                }
            }
        };
        let size = dim as i64;
        out_begin.push(start_for_axis(&spec, size));
        out_end.push(stop_for_axis(&spec, size));
        out_strides.push(spec.stride);
    }

    let shrink_axes = mask_to_axes(params.shrink_axis_mask);
    for &axis in &shrink_axes {
        if axis < rank {
            out_end[axis] = out_begin[axis] + 1;
            out_strides[axis] = 1;
        }
    }

    let size = compute_out_shape(&out_begin, &out_end, &out_strides);
    let output_shape = size
        .iter()
        .enumerate()
        .filter(|(axis, _)| !shrink_axes.contains(axis))
        .map(|(_, &d)| d)
        .collect::<Vec<_>>();
    let non_strided = out_strides.iter().all(|&s| s == 1);

    Ok(SliceInfo {
        begin: out_begin,
        end: out_end,
        strides: out_strides,
        size,
        input_shape: Shape::new(dims),
        output_shape: Shape::new(output_shape),
        non_strided,
    })
}

fn set_at(v: &mut Vec<Option<i64>>, i: usize, value: i64) {
    if v.len() <= i {
        v.resize(i + 1, None);
    }
    v[i] = Some(value);
}

// Plain slice (begin + size)

/// Expand `begin` / `size` to the full rank of `shape`.
///
/// Missing begin entries are 0. A size of -1 (or a missing entry) selects
/// the rest of the axis.
pub fn parse_slice_params(
    shape: &Shape,
    begin: &[i64],
    size: Option<&[i64]>,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let rank = shape.rank();
    if begin.len() > rank {
        return Err(Error::invalid_argument(
            "slice",
            format!("begin {begin:?} is longer than the rank {rank}"),
        ));
    }
    let mut begin_ = Vec::with_capacity(rank);
    for i in 0..rank {
        let b = begin.get(i).copied().unwrap_or(0);
        if b < 0 {
            return Err(Error::invalid_argument(
                "slice",
                "negative begin indexing is not supported",
            ));
        }
        begin_.push(b as usize);
    }
    let mut size_ = Vec::with_capacity(rank);
    for i in 0..rank {
        let s = size.and_then(|s| s.get(i).copied()).unwrap_or(-1);
        if s >= 0 {
            size_.push(s as usize);
        } else if s == -1 {
            size_.push(shape.dims()[i].saturating_sub(begin_[i]));
        } else {
            return Err(Error::invalid_argument(
                "slice",
                format!("negative size values should be exactly -1 but got {s} at index {i}"),
            ));
        }
    }
    Ok((begin_, size_))
}

/// Check that `begin + size` stays inside `shape` on every axis.
pub fn assert_slice_params_valid(shape: &Shape, begin: &[usize], size: &[usize]) -> Result<()> {
    let rank = shape.rank();
    if begin.len() != rank || size.len() != rank {
        return Err(Error::shape_mismatch(format!(
            "slice{rank}d: begin {begin:?} and size {size:?} must match the rank of the array ({rank})"
        )));
    }
    for i in 0..rank {
        if begin[i] + size[i] > shape.dims()[i] {
            return Err(Error::shape_mismatch(format!(
                "slice{rank}d: begin[{i}] + size[{i}] ({}) would overflow input shape[{i}] ({})",
                begin[i] + size[i],
                shape.dims()[i]
            )));
        }
    }
    Ok(())
}

/// Whether the slice covers one contiguous run of the row-major buffer.
pub fn is_slice_continuous(shape: &Shape, begin: &[usize], size: &[usize]) -> bool {
    let first_non_one = size.iter().position(|&s| s > 1).unwrap_or(size.len());
    ((first_non_one + 1)..size.len()).all(|i| begin[i] == 0 && size[i] == shape.dims()[i])
}

/// Flat index of `begin` given row-major `strides`.
pub fn compute_flat_offset(begin: &[usize], strides: &[usize]) -> usize {
    begin.iter().zip(strides).map(|(b, s)| b * s).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn info(shape: &[usize], params: StridedSliceParams) -> SliceInfo {
        normalize_strided_slice(&Shape::from(shape), &params).unwrap()
    }

    #[test]
    fn test_full_range_is_identity() {
        let shape = [2usize, 3, 4];
        let i = info(&shape, StridedSliceParams::new(vec![0, 0, 0], vec![2, 3, 4], Some(vec![1, 1, 1])));
        assert_eq!(i.output_shape, Shape::from(shape));
        assert_eq!(i.begin, vec![0, 0, 0]);
        assert!(i.non_strided);
    }

    #[test]
    fn test_masks_select_full_axis() {
        let i = info(
            &[3, 4],
            StridedSliceParams::new(vec![2, 1], vec![0, 3], None)
                .with_begin_mask(0b01)
                .with_end_mask(0b01),
        );
        assert_eq!(i.begin, vec![0, 1]);
        assert_eq!(i.end, vec![3, 3]);
        assert_eq!(i.output_shape, Shape::from((3, 2)));
    }

    #[test]
    fn test_negative_indices_and_clamping() {
        let i = info(&[5], StridedSliceParams::new(vec![-3], vec![100], None));
        assert_eq!((i.begin[0], i.end[0]), (2, 5));
        assert_eq!(i.output_shape, Shape::from(3usize));
    }

    #[test]
    fn test_negative_stride_reverses() {
        let i = info(&[5], StridedSliceParams::new(vec![], vec![], Some(vec![-1])));
        assert_eq!((i.begin[0], i.end[0]), (4, -1));
        assert_eq!(i.size, vec![5]);

        let i = info(&[6], StridedSliceParams::new(vec![5], vec![0], Some(vec![-2])));
        assert_eq!(i.size, vec![3]);
        assert!(!i.non_strided);
    }

    #[test]
    fn test_shrink_axis_drops_dim() {
        let i = info(
            &[3, 4],
            StridedSliceParams::new(vec![1, 0], vec![2, 4], None).with_shrink_axis_mask(0b01),
        );
        assert_eq!(i.size, vec![1, 4]);
        assert_eq!(i.output_shape, Shape::from(4usize));
    }

    #[test]
    fn test_new_axis_inserts_dim() {
        let i = info(
            &[3],
            StridedSliceParams::new(vec![0, 0], vec![1, 3], None).with_new_axis_mask(0b01),
        );
        assert_eq!(i.input_shape, Shape::from((1, 3)));
        assert_eq!(i.output_shape, Shape::from((1, 3)));
    }

    #[test]
    fn test_ellipsis_fills_middle_axes() {
        // x[1:2, ..., 0:2] on a [3, 4, 5] tensor.
        let i = info(
            &[3, 4, 5],
            StridedSliceParams::new(vec![1, 0, 0], vec![2, 0, 2], None).with_ellipsis_mask(0b10),
        );
        assert_eq!(i.output_shape, Shape::from((1, 4, 2)));

        // x[..., 1:3] on the same tensor: only two spec entries.
        let i = info(
            &[3, 4, 5],
            StridedSliceParams::new(vec![0, 1], vec![0, 3], None).with_ellipsis_mask(0b01),
        );
        assert_eq!(i.output_shape, Shape::from((3, 4, 2)));
        assert_eq!(i.begin, vec![0, 0, 1]);
    }

    #[test]
    fn test_ellipsis_path_handles_negative_indices() {
        let i = info(
            &[3, 4, 5],
            StridedSliceParams::new(vec![0, -2], vec![0, 100], None).with_ellipsis_mask(0b01),
        );
        assert_eq!(i.begin, vec![0, 0, 3]);
        assert_eq!(i.end, vec![3, 4, 5]);
    }

    #[rstest]
    #[case(StridedSliceParams::new(vec![0], vec![1], None).with_ellipsis_mask(0b11))]
    #[case(StridedSliceParams::new(vec![0, 0], vec![1, 1], None).with_ellipsis_mask(0b01).with_new_axis_mask(0b10))]
    #[case(StridedSliceParams::new(vec![0, 0], vec![1, 1], None).with_ellipsis_mask(0b01).with_shrink_axis_mask(0b10))]
    fn test_invalid_mask_combinations(#[case] params: StridedSliceParams) {
        let err = normalize_strided_slice(&Shape::from((2, 2)), &params).unwrap_err();
        assert!(matches!(err, Error::InvalidSliceMask(_)));
    }

    #[test]
    fn test_zero_stride_rejected() {
        let err = normalize_strided_slice(
            &Shape::from(4usize),
            &StridedSliceParams::new(vec![0], vec![4], Some(vec![0])),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_empty_axis_does_not_panic() {
        let i = info(&[0, 2], StridedSliceParams::new(vec![0, 0], vec![1, 2], None));
        assert_eq!(i.size, vec![0, 2]);
    }

    #[test]
    fn test_mask_to_axes() {
        assert_eq!(mask_to_axes(0b1011), vec![0, 1, 3]);
        assert!(mask_to_axes(0).is_empty());
    }

    #[test]
    fn test_parse_slice_params_fills_rest() {
        let shape = Shape::from((4, 5));
        let (b, s) = parse_slice_params(&shape, &[1], None).unwrap();
        assert_eq!(b, vec![1, 0]);
        assert_eq!(s, vec![3, 5]);
        let (_, s) = parse_slice_params(&shape, &[1, 2], Some(&[2, -1])).unwrap();
        assert_eq!(s, vec![2, 3]);
        assert!(parse_slice_params(&shape, &[-1], None).is_err());
        assert!(parse_slice_params(&shape, &[0], Some(&[-2])).is_err());
    }

    #[test]
    fn test_assert_slice_params_valid() {
        let shape = Shape::from((4, 5));
        assert!(assert_slice_params_valid(&shape, &[1, 1], &[3, 4]).is_ok());
        let err = assert_slice_params_valid(&shape, &[2, 0], &[3, 5]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }

    #[test]
    fn test_continuity_and_offset() {
        let shape = Shape::from((4, 5));
        assert!(is_slice_continuous(&shape, &[1, 0], &[2, 5]));
        assert!(!is_slice_continuous(&shape, &[1, 1], &[2, 3]));
        assert!(is_slice_continuous(&shape, &[1, 1], &[1, 3]));
        assert_eq!(compute_flat_offset(&[1, 2], &shape.stride_contiguous()), 7);
    }
}
