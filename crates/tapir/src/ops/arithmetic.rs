use tapir_core::dtype::DType;
use tapir_core::error::Result;
use tapir_core::kernel::{NamedAttrMap, NamedTensorMap};
use tapir_core::op::KernelName;
use tapir_core::shape::Shape;
use tapir_core::{Engine, Tensor};

use super::unary::cast;
use super::{convert_to_tensor, run, ParseAs, TensorLike};

/// Cast both tensors to their common dtype.
pub fn make_types_match(engine: &mut Engine, a: &Tensor, b: &Tensor) -> Result<(Tensor, Tensor)> {
    let dtype = a.dtype().upcast(b.dtype())?;
    Ok((cast(engine, a, dtype)?, cast(engine, b, dtype)?))
}

/// Convert, upcast and broadcast-check the operands of a binary op.
pub(crate) fn binary_operands(
    engine: &mut Engine,
    a: impl TensorLike,
    b: impl TensorLike,
    op: &str,
    parse_as: ParseAs,
) -> Result<(Tensor, Tensor)> {
    let a = convert_to_tensor(engine, a, "a", op, parse_as)?;
    let b = convert_to_tensor(engine, b, "b", op, parse_as)?;
    let (a, b) = make_types_match(engine, &a, &b)?;
    Shape::broadcast_shape(a.shape(), b.shape())?;
    Ok((a, b))
}

pub(crate) fn run2(engine: &mut Engine, kernel: KernelName, a: Tensor, b: Tensor) -> Result<Tensor> {
    let inputs = NamedTensorMap::new().with("a", a).with("b", b);
    run(engine, kernel, inputs, NamedAttrMap::new())
}

fn binary(
    engine: &mut Engine,
    kernel: KernelName,
    op: &str,
    a: impl TensorLike,
    b: impl TensorLike,
) -> Result<Tensor> {
    let (a, b) = binary_operands(engine, a, b, op, ParseAs::Numeric)?;
    run2(engine, kernel, a, b)
}

/// `a + b`, broadcasting.
pub fn add(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    binary(engine, KernelName::Add, "add", a, b)
}

pub fn sub(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    binary(engine, KernelName::Sub, "sub", a, b)
}

pub fn mul(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    binary(engine, KernelName::Multiply, "mul", a, b)
}

/// `a / b`. Two int32 operands divide with flooring.
pub fn div(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    let (a, b) = binary_operands(engine, a, b, "div", ParseAs::Numeric)?;
    if a.dtype() == DType::Int32 && b.dtype() == DType::Int32 {
        return run2(engine, KernelName::FloorDiv, a, b);
    }
    run2(engine, KernelName::RealDiv, a, b)
}

pub fn floor_div(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    binary(engine, KernelName::FloorDiv, "floorDiv", a, b)
}

/// Elementwise maximum, NaN-propagating.
pub fn maximum(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    binary(engine, KernelName::Maximum, "maximum", a, b)
}

pub fn minimum(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    binary(engine, KernelName::Minimum, "minimum", a, b)
}
