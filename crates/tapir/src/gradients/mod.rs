// Gradients: Descriptors for the differentiable kernels
//
// Each descriptor lists the forward values it needs and returns one thunk per
// differentiable input. The thunks are written with the public ops, so the
// backward pass is itself recorded when gradients are nested and can be
// differentiated again.
//
// Masks built from comparisons go through stop_gradient: they are constant
// with respect to every input.

use tapir_core::error::Result;
use tapir_core::gradient::GradConfig;
use tapir_core::shape::Shape;
use tapir_core::{Engine, Tensor};

use crate::ops;

mod binary;
mod pool;
mod shape;
mod unary;

/// Every gradient descriptor shipped with tapir.
pub fn all() -> Vec<GradConfig> {
    let mut configs = Vec::new();
    configs.extend_from_slice(binary::GRADIENTS);
    configs.extend_from_slice(unary::GRADIENTS);
    configs.extend_from_slice(shape::GRADIENTS);
    configs.extend_from_slice(pool::GRADIENTS);
    configs
}

/// Register every descriptor from [`all`] on `engine`.
pub fn register_gradients(engine: &mut Engine) -> Result<()> {
    let configs = all();
    let n = configs.len();
    for config in configs {
        engine.register_gradient(config)?;
    }
    log::debug!("registered {n} gradient descriptors");
    Ok(())
}

/// Sum `res` over the axes a broadcast from `shape` stretched, then reshape
/// back to `shape`.
pub(crate) fn reduce_to(engine: &mut Engine, res: &Tensor, shape: &Shape) -> Result<Tensor> {
    let axes = shape.reduction_axes(res.shape());
    if axes.is_empty() {
        return Ok(res.clone());
    }
    let summed = ops::sum(engine, res, Some(&ops::axis_attr(&axes)), false)?;
    ops::shape::reshape_to(engine, &summed, shape)
}

/// A comparison result as a constant float32 mask.
pub(crate) fn mask(engine: &mut Engine, cond: &Tensor) -> Result<Tensor> {
    let m = ops::cast(engine, cond, tapir_core::DType::Float32)?;
    engine.stop_gradient(&m)
}
