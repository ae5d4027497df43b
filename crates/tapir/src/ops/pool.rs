use tapir_core::dtype::DType;
use tapir_core::error::{Error, Result};
use tapir_core::kernel::{NamedAttrMap, NamedTensorMap};
use tapir_core::op::KernelName;
use tapir_core::{Engine, Tensor};

use super::shape::reshape_to;
use super::{convert_to_tensor, run, ParseAs, TensorLike};

/// Padding mode of a pooling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Valid,
    Same,
}

impl Padding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Padding::Valid => "valid",
            Padding::Same => "same",
        }
    }
}

pub(crate) fn pool_attrs(filter: (usize, usize), strides: (usize, usize), pad: &str) -> NamedAttrMap {
    NamedAttrMap::new()
        .with("filterSize", vec![filter.0 as i64, filter.1 as i64])
        .with("strides", vec![strides.0 as i64, strides.1 as i64])
        .with("pad", pad)
}

/// 2-D max pooling over an NHWC tensor. A rank-3 (HWC) input is treated as a
/// batch of one and the result has rank 3 too.
pub fn max_pool(
    engine: &mut Engine,
    x: impl TensorLike,
    filter: (usize, usize),
    strides: (usize, usize),
    pad: Padding,
) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "maxPool", ParseAs::Numeric)?;
    let (x4, batched) = match x.rank() {
        4 => (x, false),
        3 => {
            let mut dims = vec![1];
            dims.extend_from_slice(x.dims());
            (reshape_to(engine, &x, &dims.into())?, true)
        }
        r => {
            return Err(Error::invalid_argument(
                "maxPool",
                format!("x must be rank 4 or 3, but got rank {r}"),
            ))
        }
    };
    let attrs = pool_attrs(filter, strides, pad.as_str());
    let y = run(engine, KernelName::MaxPool, NamedTensorMap::new().with("x", x4), attrs)?;
    if batched {
        let dims = y.dims()[1..].to_vec();
        return reshape_to(engine, &y, &dims.into());
    }
    Ok(y)
}

/// Gradient of [`max_pool`] with respect to `input`, given the forward
/// `output` and the gradient `dy` of that output. All three are NHWC.
pub fn max_pool_grad(
    engine: &mut Engine,
    dy: &Tensor,
    input: &Tensor,
    output: &Tensor,
    filter: (usize, usize),
    strides: (usize, usize),
    pad: Padding,
) -> Result<Tensor> {
    let inputs = NamedTensorMap::new()
        .with("dy", dy.clone())
        .with("input", input.clone())
        .with("output", output.clone());
    run(engine, KernelName::MaxPoolGrad, inputs, pool_attrs(filter, strides, pad.as_str()))
}

pub(crate) fn pool_3d_attrs(
    filter: (usize, usize, usize),
    strides: (usize, usize, usize),
    pad: &str,
) -> NamedAttrMap {
    NamedAttrMap::new()
        .with("filterSize", vec![filter.0 as i64, filter.1 as i64, filter.2 as i64])
        .with("strides", vec![strides.0 as i64, strides.1 as i64, strides.2 as i64])
        .with("pad", pad)
}

/// `x` with a leading batch axis of one when it has rank `unbatched`.
fn batched(engine: &mut Engine, x: &Tensor, unbatched: usize) -> Result<(Tensor, bool)> {
    if x.rank() != unbatched {
        return Ok((x.clone(), false));
    }
    let mut dims = vec![1];
    dims.extend_from_slice(x.dims());
    Ok((reshape_to(engine, x, &dims.into())?, true))
}

fn unbatched(engine: &mut Engine, y: Tensor, was_batched: bool) -> Result<Tensor> {
    if !was_batched {
        return Ok(y);
    }
    let dims = y.dims()[1..].to_vec();
    reshape_to(engine, &y, &dims.into())
}

fn require_rank(op: &str, arg: &str, x: &Tensor, rank: usize) -> Result<()> {
    if x.rank() != rank {
        return Err(Error::invalid_argument(
            op,
            format!("{arg} must be rank {rank} but got rank {}", x.rank()),
        ));
    }
    Ok(())
}

/// 3-D max pooling over an NDHWC tensor. A rank-4 (DHWC) input is treated
/// as a batch of one and the result has rank 4 too.
pub fn max_pool3d(
    engine: &mut Engine,
    x: impl TensorLike,
    filter: (usize, usize, usize),
    strides: (usize, usize, usize),
    pad: Padding,
) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "maxPool3d", ParseAs::Numeric)?;
    let (x5, was_batched) = batched(engine, &x, 4)?;
    require_rank("maxPool3d", "x", &x5, 5)?;
    let attrs = pool_3d_attrs(filter, strides, pad.as_str());
    let y = run(engine, KernelName::MaxPool3D, NamedTensorMap::new().with("x", x5), attrs)?;
    unbatched(engine, y, was_batched)
}

/// Gradient of [`max_pool3d`] with respect to `input`. When `input` has
/// rank 4 all three tensors are treated as a batch of one.
pub fn max_pool3d_grad(
    engine: &mut Engine,
    dy: impl TensorLike,
    input: impl TensorLike,
    output: impl TensorLike,
    filter: (usize, usize, usize),
    strides: (usize, usize, usize),
    pad: Padding,
) -> Result<Tensor> {
    let op = "maxPool3dGrad";
    let dy = convert_to_tensor(engine, dy, "dy", op, ParseAs::Numeric)?;
    let input = convert_to_tensor(engine, input, "input", op, ParseAs::Numeric)?;
    let output = convert_to_tensor(engine, output, "output", op, ParseAs::Numeric)?;
    let reshape_all = input.rank() == 4;
    let (dy5, input5, output5) = if reshape_all {
        (
            batched(engine, &dy, dy.rank())?.0,
            batched(engine, &input, 4)?.0,
            batched(engine, &output, output.rank())?.0,
        )
    } else {
        (dy, input, output)
    };
    require_rank(op, "dy", &dy5, 5)?;
    require_rank(op, "input", &input5, 5)?;
    require_rank(op, "output", &output5, 5)?;
    let inputs = NamedTensorMap::new()
        .with("dy", dy5)
        .with("input", input5)
        .with("output", output5);
    let dx = run(engine, KernelName::MaxPool3DGrad, inputs, pool_3d_attrs(filter, strides, pad.as_str()))?;
    unbatched(engine, dx, reshape_all)
}

pub(crate) fn dilation_attrs(strides: (usize, usize), dilations: (usize, usize), pad: &str) -> NamedAttrMap {
    NamedAttrMap::new()
        .with("strides", vec![strides.0 as i64, strides.1 as i64])
        .with("dilations", vec![dilations.0 as i64, dilations.1 as i64])
        .with("pad", pad)
}

/// Grayscale morphological dilation of an NHWC tensor by a `[h, w, c]`
/// filter: the max over each window of `x + filter`, per channel. A rank-3
/// input is treated as a batch of one.
pub fn dilation2d(
    engine: &mut Engine,
    x: impl TensorLike,
    filter: impl TensorLike,
    strides: (usize, usize),
    pad: Padding,
    dilations: (usize, usize),
) -> Result<Tensor> {
    let x = convert_to_tensor(engine, x, "x", "dilation2d", ParseAs::DType(DType::Float32))?;
    let filter = convert_to_tensor(engine, filter, "filter", "dilation2d", ParseAs::DType(DType::Float32))?;
    let (x4, was_batched) = batched(engine, &x, 3)?;
    require_rank("dilation2d", "x", &x4, 4)?;
    require_rank("dilation2d", "filter", &filter, 3)?;
    if x4.dims()[3] != filter.dims()[2] {
        return Err(Error::invalid_argument(
            "dilation2d",
            format!(
                "input depth {} does not match filter depth {}",
                x4.dims()[3],
                filter.dims()[2]
            ),
        ));
    }
    let inputs = NamedTensorMap::new().with("x", x4).with("filter", filter);
    let attrs = dilation_attrs(strides, dilations, pad.as_str());
    let y = run(engine, KernelName::Dilation2D, inputs, attrs)?;
    unbatched(engine, y, was_batched)
}
