use tapir_core::dtype::DType;
use tapir_core::error::{Error, Result};
use tapir_core::kernel::{NamedAttrMap, NamedTensorMap};
use tapir_core::op::KernelName;
use tapir_core::{Engine, Tensor};

use super::{convert_to_tensor, run, run1, ParseAs, TensorLike};

fn unary(engine: &mut Engine, kernel: KernelName, op: &str, x: impl TensorLike) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", op, ParseAs::Numeric)?;
    run1(engine, kernel, &x)
}

/// Convert to `dtype`. Casting a tensor to its own dtype returns it.
pub fn cast(engine: &mut Engine, x: impl TensorLike, dtype: DType) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "cast", ParseAs::Any)?;
    if x.dtype() == dtype {
        return Ok(x);
    }
    if dtype == DType::String || x.dtype() == DType::String {
        return Err(Error::invalid_argument(
            "cast",
            format!("cannot cast {} to {dtype}", x.dtype()),
        ));
    }
    let attrs = NamedAttrMap::new().with("dtype", dtype);
    run(engine, KernelName::Cast, NamedTensorMap::new().with("x", x), attrs)
}

pub fn neg(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    unary(engine, KernelName::Neg, "neg", x)
}

pub fn square(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    unary(engine, KernelName::Square, "square", x)
}

pub fn sqrt(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    unary(engine, KernelName::Sqrt, "sqrt", x)
}

pub fn abs(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    unary(engine, KernelName::Abs, "abs", x)
}

pub fn exp(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    unary(engine, KernelName::Exp, "exp", x)
}

/// Natural logarithm.
pub fn log(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    unary(engine, KernelName::Log, "log", x)
}

pub fn sin(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    unary(engine, KernelName::Sin, "sin", x)
}

pub fn cos(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    unary(engine, KernelName::Cos, "cos", x)
}

pub fn tan(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    unary(engine, KernelName::Tan, "tan", x)
}

pub fn relu(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    unary(engine, KernelName::Relu, "relu", x)
}

pub fn relu6(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    unary(engine, KernelName::Relu6, "relu6", x)
}

/// `1` where `x > 0`, `alpha` elsewhere.
pub fn step(engine: &mut Engine, x: impl TensorLike, alpha: f64) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "step", ParseAs::Numeric)?;
    let attrs = NamedAttrMap::new().with("alpha", alpha);
    run(engine, KernelName::Step, NamedTensorMap::new().with("x", x), attrs)
}

/// Round half to even.
pub fn round(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    unary(engine, KernelName::Round, "round", x)
}

pub fn is_inf(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    unary(engine, KernelName::IsInf, "isInf", x)
}

/// Clamp every element to `[min, max]`.
pub fn clip_by_value(engine: &mut Engine, x: impl TensorLike, min: f64, max: f64) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "clipByValue", ParseAs::Numeric)?;
    if min > max {
        return Err(Error::invalid_argument(
            "clipByValue",
            format!("min ({min}) must be less than or equal to max ({max})"),
        ));
    }
    let attrs = NamedAttrMap::new()
        .with("clipValueMin", min)
        .with("clipValueMax", max);
    run(engine, KernelName::ClipByValue, NamedTensorMap::new().with("x", x), attrs)
}
