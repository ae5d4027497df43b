use tapir_core::error::{Error, Result};
use tapir_core::kernel::{NamedAttrMap, NamedTensorMap};
use tapir_core::op::KernelName;
use tapir_core::shape::{infer_from_implicit_shape, Shape};
use tapir_core::slice::{assert_slice_params_valid, parse_slice_params, StridedSliceParams};
use tapir_core::{Engine, Tensor};

use super::{convert_to_tensor, run, ParseAs, TensorLike};

fn single_input(x: Tensor) -> NamedTensorMap<Tensor> {
    NamedTensorMap::new().with("x", x)
}

/// Reshape to `shape`; one entry may be `-1`. The result shares the buffer.
pub fn reshape(engine: &mut Engine, x: impl TensorLike, shape: &[i64]) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "reshape", ParseAs::Any)?;
    let target = infer_from_implicit_shape(shape, x.size())?;
    if target.elem_count() != x.size() {
        return Err(Error::invalid_argument(
            "reshape",
            format!(
                "size({}) must match the product of shape {shape:?}",
                x.size()
            ),
        ));
    }
    let attrs = NamedAttrMap::new().with("shape", target);
    run(engine, KernelName::Reshape, single_input(x), attrs)
}

/// Reshape to an already resolved shape.
pub(crate) fn reshape_to(engine: &mut Engine, x: &Tensor, shape: &Shape) -> Result<Tensor> {
    let dims: Vec<i64> = shape.dims().iter().map(|&d| d as i64).collect();
    reshape(engine, x, &dims)
}

/// Insert a size-1 axis at `axis` (negative counts from the end).
pub fn expand_dims(engine: &mut Engine, x: impl TensorLike, axis: i64) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "expandDims", ParseAs::Any)?;
    let attrs = NamedAttrMap::new().with("dim", axis);
    run(engine, KernelName::ExpandDims, single_input(x), attrs)
}

pub fn as_1d(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    reshape(engine, x, &[-1])
}

/// A rank-0 view of a single-element tensor.
pub fn as_scalar(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "asScalar", ParseAs::Any)?;
    if x.size() != 1 {
        return Err(Error::invalid_argument(
            "asScalar",
            format!("the array must have only 1 element, got shape {}", x.shape()),
        ));
    }
    reshape(engine, &x, &[])
}

/// Broadcast to `shape`. Returns `x` itself when the shapes already match.
pub fn broadcast_to(engine: &mut Engine, x: impl TensorLike, shape: impl Into<Shape>) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "broadcastTo", ParseAs::Any)?;
    let shape = shape.into();
    if x.rank() > shape.rank() {
        return Err(Error::invalid_argument(
            "broadcastTo",
            format!("broadcastTo(): shape.length={} < input.rank={}", shape.rank(), x.rank()),
        ));
    }
    if *x.shape() == shape {
        return Ok(x);
    }
    let attrs = NamedAttrMap::new().with("shape", shape);
    run(engine, KernelName::BroadcastTo, single_input(x), attrs)
}

/// Contiguous slice starting at `begin`. Missing `size` entries (or `-1`)
/// take the rest of the axis.
pub fn slice(
    engine: &mut Engine,
    x: impl TensorLike,
    begin: &[i64],
    size: Option<&[i64]>,
) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "slice", ParseAs::Any)?;
    if x.rank() == 0 {
        return Err(Error::invalid_argument("slice", "slicing scalar is not possible"));
    }
    let (begin, size) = parse_slice_params(x.shape(), begin, size)?;
    assert_slice_params_valid(x.shape(), &begin, &size)?;
    let attrs = NamedAttrMap::new()
        .with("begin", begin.iter().map(|&b| b as i64).collect::<Vec<_>>())
        .with("size", size.iter().map(|&s| s as i64).collect::<Vec<_>>());
    run(engine, KernelName::Slice, single_input(x), attrs)
}

/// NumPy-style strided slice. See [`StridedSliceParams`] for the masks.
pub fn strided_slice(engine: &mut Engine, x: impl TensorLike, params: &StridedSliceParams) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "stridedSlice", ParseAs::Any)?;
    let mut attrs = NamedAttrMap::new()
        .with("begin", params.begin.clone())
        .with("end", params.end.clone())
        .with("beginMask", params.begin_mask as i64)
        .with("endMask", params.end_mask as i64)
        .with("ellipsisMask", params.ellipsis_mask as i64)
        .with("newAxisMask", params.new_axis_mask as i64)
        .with("shrinkAxisMask", params.shrink_axis_mask as i64);
    if let Some(strides) = &params.strides {
        attrs.insert("strides", strides.clone());
    }
    run(engine, KernelName::StridedSlice, single_input(x), attrs)
}

/// Pad with `constant`; `paddings` holds `(before, after)` per axis.
pub fn pad(engine: &mut Engine, x: impl TensorLike, paddings: &[(usize, usize)], constant: f64) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "pad", ParseAs::Any)?;
    if x.rank() == 0 {
        return Err(Error::invalid_argument("pad", "pad(scalar) is not defined"));
    }
    if paddings.len() != x.rank() {
        return Err(Error::invalid_argument(
            "pad",
            format!("expected {} paddings, got {}", x.rank(), paddings.len()),
        ));
    }
    let flat: Vec<i64> = paddings
        .iter()
        .flat_map(|&(b, a)| [b as i64, a as i64])
        .collect();
    let attrs = NamedAttrMap::new()
        .with("paddings", flat)
        .with("constantValue", constant);
    run(engine, KernelName::PadV2, single_input(x), attrs)
}

/// Stack equally shaped tensors along a new axis `axis` (negative counts
/// from the end of the result's shape).
pub fn stack(engine: &mut Engine, tensors: &[&Tensor], axis: i64) -> Result<Tensor> {
    let Some(first) = tensors.first() else {
        return Err(Error::invalid_argument("stack", "pass at least one tensor to stack"));
    };
    let rank = first.rank() as i64;
    if axis < -(rank + 1) || axis > rank {
        return Err(Error::AxisOutOfRange {
            axis,
            rank: first.rank() + 1,
        });
    }
    for t in tensors {
        if t.shape() != first.shape() {
            return Err(Error::shape_mismatch(format!(
                "all tensors passed to stack must have matching shapes, got {} and {}",
                first.shape(),
                t.shape()
            )));
        }
        if t.dtype() != first.dtype() {
            return Err(Error::invalid_argument(
                "stack",
                format!(
                    "all tensors passed to stack must have matching dtypes, got {} and {}",
                    first.dtype(),
                    t.dtype()
                ),
            ));
        }
    }
    let axis = if axis < 0 { axis + rank + 1 } else { axis };
    if tensors.len() == 1 {
        return expand_dims(engine, *first, axis);
    }
    let inputs = NamedTensorMap::indexed(tensors.iter().map(|t| (*t).clone()));
    run(engine, KernelName::Pack, inputs, NamedAttrMap::new().with("axis", axis))
}

/// Split `x` along `axis` into `x.dims()[axis]` tensors of rank one lower.
pub fn unstack(engine: &mut Engine, x: impl TensorLike, axis: i64) -> Result<Vec<Tensor>> {
    let x = convert_to_tensor(engine, x, "x", "unstack", ParseAs::Any)?;
    let rank = x.rank() as i64;
    if axis < -rank || axis >= rank {
        return Err(Error::invalid_argument(
            "unstack",
            format!("axis = {axis} is not in [-{rank}, {rank})"),
        ));
    }
    let axis = if axis < 0 { axis + rank } else { axis };
    let inputs = NamedTensorMap::new().with("value", x);
    engine.run_kernel_multi(KernelName::Unpack, &inputs, &NamedAttrMap::new().with("axis", axis))
}
