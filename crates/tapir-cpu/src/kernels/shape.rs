use tapir_core::backend::TensorInfo;
use tapir_core::dtype::TensorValues;
use tapir_core::error::{Error, Result};
use tapir_core::kernel::KernelArgs;
use tapir_core::shape::Shape;
use tapir_core::slice::{normalize_strided_slice, StridedSliceParams};

use super::{single, source_indices, unravel};

// Shape kernels
//
// Reshape and ExpandDims only relabel the buffer: the output shares the
// input's DataId. The others gather the selected elements into a new buffer.

fn relabel(args: &KernelArgs<'_>, shape: Shape) -> Result<Vec<TensorInfo>> {
    let x = args.input("x")?;
    if shape.elem_count() != x.size() {
        return Err(Error::ElementCountMismatch {
            expected: x.size(),
            got: shape.elem_count(),
            shape,
        });
    }
    single(TensorInfo::new(x.data_id, shape, x.dtype))
}

pub fn reshape(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let shape = args.attrs.get_shape("shape")?;
    relabel(&args, shape)
}

pub fn expand_dims(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let x = args.input("x")?;
    let rank = x.shape.rank() as i64;
    let dim = args.attrs.get_int("dim")?;
    if dim < -(rank + 1) || dim > rank {
        return Err(Error::AxisOutOfRange {
            axis: dim,
            rank: x.shape.rank() + 1,
        });
    }
    let axis = (if dim < 0 { dim + rank + 1 } else { dim }) as usize;
    let mut dims = x.shape.to_vec();
    dims.insert(axis, 1);
    relabel(&args, Shape::new(dims))
}

pub fn broadcast_to(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let target = args.attrs.get_shape("shape")?;
    let x = args.input("x")?.clone();
    let out = Shape::broadcast_shape(&x.shape, &target)?;
    if out != target {
        return Err(Error::shape_mismatch(format!(
            "cannot broadcast {} to {target}",
            x.shape
        )));
    }
    let values = args.read("x")?;
    let values = match source_indices(&x.shape, &out) {
        Some(indices) => values.gather(&indices),
        None => values,
    };
    single(args.write(values, out)?)
}

/// Flat source index of every output element of a strided walk.
fn strided_indices(src: &Shape, begin: &[i64], strides: &[i64], out_dims: &[usize]) -> Vec<usize> {
    let src_strides = src.stride_contiguous();
    let n: usize = out_dims.iter().product();
    let mut coord = vec![0usize; out_dims.len()];
    (0..n)
        .map(|flat| {
            unravel(flat, out_dims, &mut coord);
            coord
                .iter()
                .enumerate()
                .map(|(axis, &c)| (begin[axis] + c as i64 * strides[axis]) as usize * src_strides[axis])
                .sum()
        })
        .collect()
}

/// Contiguous slice. `begin` and `size` cover every axis.
pub fn slice(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let x = args.input("x")?.clone();
    let begin = args.attrs.get_ints("begin")?;
    let size: Vec<usize> = args
        .attrs
        .get_ints("size")?
        .into_iter()
        .map(|s| s.max(0) as usize)
        .collect();
    if begin.len() != x.shape.rank() || size.len() != x.shape.rank() {
        return Err(Error::shape_mismatch(format!(
            "slice begin {begin:?} and size {size:?} must match the rank of {}",
            x.shape
        )));
    }
    let indices = strided_indices(&x.shape, &begin, &vec![1; begin.len()], &size);
    let values = args.read("x")?.gather(&indices);
    single(args.write(values, Shape::new(size))?)
}

fn mask(args: &KernelArgs<'_>, name: &str) -> Result<u32> {
    if args.attrs.contains(name) {
        Ok(args.attrs.get_int(name)? as u32)
    } else {
        Ok(0)
    }
}

pub fn strided_slice(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let x = args.input("x")?.clone();
    let params = StridedSliceParams {
        begin: args.attrs.get_ints("begin")?,
        end: args.attrs.get_ints("end")?,
        strides: args.attrs.ints_opt("strides")?,
        begin_mask: mask(&args, "beginMask")?,
        end_mask: mask(&args, "endMask")?,
        ellipsis_mask: mask(&args, "ellipsisMask")?,
        new_axis_mask: mask(&args, "newAxisMask")?,
        shrink_axis_mask: mask(&args, "shrinkAxisMask")?,
    };
    let info = normalize_strided_slice(&x.shape, &params)?;
    let indices = strided_indices(&info.input_shape, &info.begin, &info.strides, &info.size);
    let values = args.read("x")?.gather(&indices);
    single(args.write(values, info.output_shape)?)
}

/// `values` followed by one element holding `fill`.
fn with_fill(values: TensorValues, fill: f64) -> TensorValues {
    match values {
        TensorValues::Float32(mut v) => {
            v.push(fill as f32);
            TensorValues::Float32(v)
        }
        TensorValues::Int32(mut v) => {
            v.push(fill as i32);
            TensorValues::Int32(v)
        }
        TensorValues::Bool(mut v) => {
            v.push((fill != 0.0) as u8);
            TensorValues::Bool(v)
        }
        TensorValues::String(mut v) => {
            v.push(String::new());
            TensorValues::String(v)
        }
        TensorValues::Complex64(mut v) => {
            v.extend([fill as f32, 0.0]);
            TensorValues::Complex64(v)
        }
    }
}

/// Constant padding. `paddings` holds `[before, after]` per axis, flattened.
pub fn pad(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let x = args.input("x")?.clone();
    let paddings = args.attrs.get_ints("paddings")?;
    let constant = if args.attrs.contains("constantValue") {
        args.attrs.get_float("constantValue")?
    } else {
        0.0
    };
    let rank = x.shape.rank();
    if paddings.len() != 2 * rank || paddings.iter().any(|&p| p < 0) {
        return Err(Error::invalid_argument(
            "pad",
            format!("expected {rank} non-negative [before, after] pairs, got {paddings:?}"),
        ));
    }
    let before: Vec<usize> = paddings.iter().step_by(2).map(|&p| p as usize).collect();
    let out_dims: Vec<usize> = x
        .shape
        .dims()
        .iter()
        .zip(paddings.chunks_exact(2))
        .map(|(&d, p)| d + p[0] as usize + p[1] as usize)
        .collect();

    let fill_index = x.size();
    let src_strides = x.shape.stride_contiguous();
    let n: usize = out_dims.iter().product();
    let mut coord = vec![0usize; rank];
    let indices: Vec<usize> = (0..n)
        .map(|flat| {
            unravel(flat, &out_dims, &mut coord);
            let mut src = 0;
            for axis in 0..rank {
                let c = coord[axis];
                if c < before[axis] || c >= before[axis] + x.shape.dims()[axis] {
                    return fill_index;
                }
                src += (c - before[axis]) * src_strides[axis];
            }
            src
        })
        .collect();
    let values = with_fill(args.read("x")?, constant).gather(&indices);
    single(args.write(values, Shape::new(out_dims))?)
}

/// Stack equally shaped inputs "0", "1", ... along the new axis `axis`.
pub fn pack(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let infos: Vec<TensorInfo> = args.inputs.values().cloned().collect();
    let Some(first) = infos.first() else {
        return Err(Error::invalid_argument("Pack", "at least one input is required"));
    };
    let dims = first.shape.to_vec();
    let axis = args.attrs.get_int("axis")?;
    if axis < 0 || axis as usize > dims.len() {
        return Err(Error::AxisOutOfRange {
            axis,
            rank: dims.len() + 1,
        });
    }
    let axis = axis as usize;
    if let Some(other) = infos.iter().find(|i| i.shape != first.shape) {
        return Err(Error::shape_mismatch(format!(
            "all tensors passed to stack must have matching shapes, got {} and {}",
            first.shape, other.shape
        )));
    }
    let outer: usize = dims[..axis].iter().product();
    let inner: usize = dims[axis..].iter().product();
    let n = infos.len();
    let mut parts = Vec::with_capacity(n);
    for (name, _) in args.inputs.iter() {
        parts.push(args.read(name)?);
    }
    let values = TensorValues::concat(&parts)?;
    // Output layout is [outer, n, inner]; input k starts at k * outer * inner.
    let indices: Vec<usize> = (0..outer * n * inner)
        .map(|flat| {
            let (o, rest) = (flat / (n * inner), flat % (n * inner));
            let (k, r) = (rest / inner, rest % inner);
            k * outer * inner + o * inner + r
        })
        .collect();
    let mut out_dims = dims;
    out_dims.insert(axis, n);
    single(args.write(values.gather(&indices), Shape::new(out_dims))?)
}

/// Split `value` along `axis` into one output per index, dropping the axis.
pub fn unpack(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let x = args.input("value")?.clone();
    let dims = x.shape.to_vec();
    let axis = args.attrs.get_int("axis")?;
    if axis < 0 || axis as usize >= dims.len() {
        return Err(Error::AxisOutOfRange {
            axis,
            rank: dims.len(),
        });
    }
    let axis = axis as usize;
    let n = dims[axis];
    let outer: usize = dims[..axis].iter().product();
    let inner: usize = dims[axis + 1..].iter().product();
    let mut out_dims = dims;
    out_dims.remove(axis);
    let values = args.read("value")?;
    let mut outputs = Vec::with_capacity(n);
    for k in 0..n {
        let indices: Vec<usize> = (0..outer * inner)
            .map(|flat| (flat / inner) * n * inner + k * inner + flat % inner)
            .collect();
        outputs.push(args.write(values.gather(&indices), Shape::new(out_dims.clone()))?);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strided_indices_reverse() {
        let idx = strided_indices(&Shape::from(5usize), &[4], &[-1], &[5]);
        assert_eq!(idx, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_strided_indices_2d_window() {
        // rows 1..3, cols 0..4 step 2 of a [3, 4] buffer
        let idx = strided_indices(&Shape::from((3, 4)), &[1, 0], &[1, 2], &[2, 2]);
        assert_eq!(idx, vec![4, 6, 8, 10]);
    }

    #[test]
    fn test_with_fill_appends() {
        let v = with_fill(TensorValues::Int32(vec![1, 2]), 7.0);
        assert_eq!(v, TensorValues::Int32(vec![1, 2, 7]));
    }
}
