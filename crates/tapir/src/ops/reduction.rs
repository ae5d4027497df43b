use tapir_core::dtype::DType;
use tapir_core::error::{Error, Result};
use tapir_core::kernel::{NamedAttrMap, NamedTensorMap};
use tapir_core::op::KernelName;
use tapir_core::shape::parse_axis_param;
use tapir_core::{Engine, Tensor};

use super::{axis_attr, convert_to_tensor, run, ParseAs, TensorLike};

/// Sum over `axis` (every axis when `None`). Bool tensors sum as int32.
pub fn sum(engine: &mut Engine, x: impl TensorLike, axis: Option<&[i64]>, keep_dims: bool) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "sum", ParseAs::Numeric)?;
    let axes = parse_axis_param(axis, x.rank())?;
    let attrs = NamedAttrMap::new()
        .with("axis", axis_attr(&axes))
        .with("keepDims", keep_dims);
    run(engine, KernelName::Sum, NamedTensorMap::new().with("x", x), attrs)
}

/// Histogram of the int32 values of `x` over `[0, size)`.
///
/// `x` is 1-D or 2-D (one histogram per row). `weights` is either empty or
/// has the size of `x`; each occurrence adds its weight instead of 1. With
/// `binary_output` a bin is 1 if it was hit at all.
pub fn dense_bincount(
    engine: &mut Engine,
    x: impl TensorLike,
    weights: impl TensorLike,
    size: usize,
    binary_output: bool,
) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "denseBincount", ParseAs::DType(DType::Int32))?;
    let weights = convert_to_tensor(engine, weights, "weights", "denseBincount", ParseAs::Numeric)?;
    if x.rank() != 1 && x.rank() != 2 {
        return Err(Error::invalid_argument(
            "denseBincount",
            format!("the input must be of rank 1 or 2, but got rank {}", x.rank()),
        ));
    }
    if weights.size() != x.size() && weights.size() != 0 {
        return Err(Error::invalid_argument(
            "denseBincount",
            format!(
                "weights must have the same shape as x or 0-length, but got x shape {} and weights shape {}",
                x.shape(),
                weights.shape()
            ),
        ));
    }
    let inputs = NamedTensorMap::new().with("x", x).with("weights", weights);
    let attrs = NamedAttrMap::new()
        .with("size", size as i64)
        .with("binaryOutput", binary_output);
    run(engine, KernelName::DenseBincount, inputs, attrs)
}
