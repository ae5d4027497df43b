use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tapir_core::dtype::{DType, TensorValues};
use tapir_core::error::{Error, Result};
use tapir_core::op::KernelName;
use tapir_core::shape::Shape;
use tapir_core::{Engine, Tensor};

use super::{convert_to_tensor, run1, ParseAs, TensorLike};

/// A tensor from tensor-like values, converted to `dtype` when given.
pub fn tensor(engine: &mut Engine, values: impl TensorLike, dtype: Option<DType>) -> Result<Tensor> {
    let parse_as = dtype.map_or(ParseAs::Any, ParseAs::DType);
    convert_to_tensor(engine, values, "values", "tensor", parse_as)
}

fn with_rank(engine: &mut Engine, t: Tensor, rank: usize, op: &str) -> Result<Tensor> {
    if t.rank() == rank {
        return Ok(t);
    }
    let msg = format!("{op}() requires values of rank {rank}, got shape {}", t.shape());
    engine.dispose(&t)?;
    Err(Error::invalid_argument(op, msg))
}

/// A rank-0 tensor.
pub fn scalar(engine: &mut Engine, value: impl TensorLike) -> Result<Tensor> {
    let t = convert_to_tensor(engine, value, "value", "scalar", ParseAs::Any)?;
    with_rank(engine, t, 0, "scalar")
}

pub fn tensor1d(engine: &mut Engine, values: impl TensorLike) -> Result<Tensor> {
    let t = convert_to_tensor(engine, values, "values", "tensor1d", ParseAs::Any)?;
    with_rank(engine, t, 1, "tensor1d")
}

pub fn tensor2d(engine: &mut Engine, values: impl TensorLike) -> Result<Tensor> {
    let t = convert_to_tensor(engine, values, "values", "tensor2d", ParseAs::Any)?;
    with_rank(engine, t, 2, "tensor2d")
}

/// A tensor of `shape` with every element set to `value`.
pub fn fill(engine: &mut Engine, shape: impl Into<Shape>, value: f64, dtype: DType) -> Result<Tensor> {
    engine.fill(&shape.into(), value, dtype)
}

pub fn zeros(engine: &mut Engine, shape: impl Into<Shape>, dtype: DType) -> Result<Tensor> {
    fill(engine, shape, 0.0, dtype)
}

pub fn ones(engine: &mut Engine, shape: impl Into<Shape>, dtype: DType) -> Result<Tensor> {
    fill(engine, shape, 1.0, dtype)
}

pub fn zeros_like(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "zerosLike", ParseAs::Any)?;
    run1(engine, KernelName::ZerosLike, &x)
}

pub fn ones_like(engine: &mut Engine, x: impl TensorLike) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "onesLike", ParseAs::Any)?;
    run1(engine, KernelName::OnesLike, &x)
}

/// Values drawn uniformly from `[min, max)`.
///
/// With a seed the values are reproducible. Int32 tensors draw integers.
pub fn random_uniform(
    engine: &mut Engine,
    shape: impl Into<Shape>,
    min: f64,
    max: f64,
    dtype: DType,
    seed: Option<u64>,
) -> Result<Tensor> {
    let shape = shape.into();
    if min.is_nan() || max.is_nan() || min >= max {
        return Err(Error::invalid_argument(
            "randomUniform",
            format!("min ({min}) must be less than max ({max})"),
        ));
    }
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let n = shape.elem_count();
    let values = match dtype {
        DType::Float32 => {
            TensorValues::Float32((0..n).map(|_| rng.gen_range(min..max) as f32).collect())
        }
        DType::Int32 => {
            let (lo, hi) = (min.ceil() as i32, max.ceil() as i32);
            if lo >= hi {
                return Err(Error::invalid_argument(
                    "randomUniform",
                    format!("no integer lies in [{min}, {max})"),
                ));
            }
            TensorValues::Int32((0..n).map(|_| rng.gen_range(lo..hi)).collect())
        }
        other => {
            return Err(Error::invalid_argument(
                "randomUniform",
                format!("unsupported dtype {other}"),
            ))
        }
    };
    log::trace!("randomUniform {shape} {dtype} seed={seed:?}");
    engine.make_tensor(values, shape)
}
