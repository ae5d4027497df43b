use tapir_core::dtype::DType;
use tapir_core::error::{Error, Result};
use tapir_core::kernel::{NamedAttrMap, NamedTensorMap};
use tapir_core::op::KernelName;
use tapir_core::shape::Shape;
use tapir_core::{Engine, Tensor};

use super::arithmetic::{binary_operands, run2};
use super::shape::broadcast_to;
use super::{convert_to_tensor, run, run1, ParseAs, TensorLike};

fn comparison(
    engine: &mut Engine,
    kernel: KernelName,
    op: &str,
    a: impl TensorLike,
    b: impl TensorLike,
) -> Result<Tensor> {
    let (a, b) = binary_operands(engine, a, b, op, ParseAs::Any)?;
    run2(engine, kernel, a, b)
}

/// `a > b` as a bool tensor.
pub fn greater(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    comparison(engine, KernelName::Greater, "greater", a, b)
}

pub fn greater_equal(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    comparison(engine, KernelName::GreaterEqual, "greaterEqual", a, b)
}

pub fn less(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    comparison(engine, KernelName::Less, "less", a, b)
}

pub fn less_equal(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    comparison(engine, KernelName::LessEqual, "lessEqual", a, b)
}

pub fn equal(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    comparison(engine, KernelName::Equal, "equal", a, b)
}

fn logical(
    engine: &mut Engine,
    kernel: KernelName,
    op: &str,
    a: impl TensorLike,
    b: impl TensorLike,
) -> Result<Tensor> {
    let a = convert_to_tensor(engine, a, "a", op, ParseAs::DType(DType::Bool))?;
    let b = convert_to_tensor(engine, b, "b", op, ParseAs::DType(DType::Bool))?;
    Shape::broadcast_shape(a.shape(), b.shape())?;
    run2(engine, kernel, a, b)
}

pub fn logical_and(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    logical(engine, KernelName::LogicalAnd, "logicalAnd", a, b)
}

pub fn logical_or(engine: &mut Engine, a: impl TensorLike, b: impl TensorLike) -> Result<Tensor> {
    logical(engine, KernelName::LogicalOr, "logicalOr", a, b)
}

pub fn logical_not(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "logicalNot", ParseAs::DType(DType::Bool))?;
    run1(engine, KernelName::LogicalNot, &x)
}

/// `condition ? a : b` elementwise. All three broadcast to a common shape;
/// `a` and `b` must share a dtype.
pub fn where_(
    engine: &mut Engine,
    condition: impl TensorLike,
    a: impl TensorLike,
    b: impl TensorLike,
) -> Result<Tensor> {
    let a = convert_to_tensor(engine, a, "a", "where", ParseAs::Any)?;
    let b = convert_to_tensor(engine, b, "b", "where", ParseAs::Any)?;
    let condition =
        convert_to_tensor(engine, condition, "condition", "where", ParseAs::DType(DType::Bool))?;
    if a.dtype() != b.dtype() {
        return Err(Error::DTypeMismatch {
            arg: "b".to_string(),
            op: "where".to_string(),
            expected: a.dtype().to_string(),
            got: b.dtype(),
        });
    }
    let shape = Shape::broadcast_shape(
        &Shape::broadcast_shape(condition.shape(), a.shape())?,
        b.shape(),
    )?;
    let condition = broadcast_to(engine, &condition, shape.clone())?;
    let a = broadcast_to(engine, &a, shape.clone())?;
    let b = broadcast_to(engine, &b, shape)?;
    let inputs = NamedTensorMap::new()
        .with("condition", condition)
        .with("t", a)
        .with("e", b);
    run(engine, KernelName::Select, inputs, NamedAttrMap::new())
}
