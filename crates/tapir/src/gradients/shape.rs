use tapir_core::error::Result;
use tapir_core::gradient::{GradConfig, GradContext, GradMap};
use tapir_core::op::KernelName;
use tapir_core::shape::{parse_axis_param, Shape};
use tapir_core::{Engine, Tensor};

use crate::ops;
use crate::ops::shape::reshape_to;

pub(super) const GRADIENTS: &[GradConfig] = &[
    GradConfig {
        kernel: KernelName::Sum,
        inputs_to_save: &["x"],
        outputs_to_save: &[],
        grad_fn: sum_grad,
    },
    GradConfig {
        kernel: KernelName::Reshape,
        inputs_to_save: &["x"],
        outputs_to_save: &[],
        grad_fn: reshape_grad,
    },
    GradConfig {
        kernel: KernelName::ExpandDims,
        inputs_to_save: &["x"],
        outputs_to_save: &[],
        grad_fn: reshape_grad,
    },
    GradConfig {
        kernel: KernelName::BroadcastTo,
        inputs_to_save: &["x"],
        outputs_to_save: &[],
        grad_fn: broadcast_to_grad,
    },
    GradConfig {
        kernel: KernelName::Slice,
        inputs_to_save: &["x"],
        outputs_to_save: &[],
        grad_fn: slice_grad,
    },
    GradConfig {
        kernel: KernelName::PadV2,
        inputs_to_save: &["x"],
        outputs_to_save: &[],
        grad_fn: pad_grad,
    },
    GradConfig {
        kernel: KernelName::Pack,
        inputs_to_save: &[],
        outputs_to_save: &[],
        grad_fn: pack_grad,
    },
    GradConfig {
        kernel: KernelName::Unpack,
        inputs_to_save: &[],
        outputs_to_save: &[],
        grad_fn: unpack_grad,
    },
];

/// `dy` goes back to every element that was summed into it.
fn sum_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    let axes = parse_axis_param(ctx.attrs.ints_opt("axis")?.as_deref(), x.rank())?;
    Ok(GradMap::new().with("x", move |e| {
        let kept = x.shape().expand_to_keep_dim(&axes);
        let dy = reshape_to(e, &dy, &kept)?;
        ops::broadcast_to(e, &dy, x.shape().clone())
    }))
}

/// Shared by Reshape and ExpandDims.
fn reshape_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    Ok(GradMap::new().with("x", move |e| reshape_to(e, &dy, x.shape())))
}

fn broadcast_to_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    Ok(GradMap::new().with("x", move |e| {
        let x_shape: Shape = if x.rank() < dy.rank() {
            let mut dims = vec![1; dy.rank() - x.rank()];
            dims.extend_from_slice(x.dims());
            dims.into()
        } else {
            x.shape().clone()
        };
        let axes = x_shape.reduction_axes(dy.shape());
        if axes.is_empty() {
            return e.clone_tensor(&dy);
        }
        let summed = ops::sum(e, &dy, Some(&ops::axis_attr(&axes)), true)?;
        reshape_to(e, &summed, x.shape())
    }))
}

/// Pads `dy` back out to the input's shape.
fn slice_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    let begin = ctx.attrs.get_ints("begin")?;
    let size = ctx.attrs.get_ints("size")?;
    Ok(GradMap::new().with("x", move |e| {
        let paddings: Vec<(usize, usize)> = x
            .dims()
            .iter()
            .zip(begin.iter().zip(size.iter()))
            .map(|(&d, (&b, &s))| {
                let b = b as usize;
                (b, d - b - s as usize)
            })
            .collect();
        ops::pad(e, &dy, &paddings, 0.0)
    }))
}

/// Slices the padding off `dy`.
fn pad_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    let paddings = ctx.attrs.get_ints("paddings")?;
    Ok(GradMap::new().with("x", move |e| {
        let begin: Vec<i64> = paddings.iter().step_by(2).copied().collect();
        let size: Vec<i64> = x.dims().iter().map(|&d| d as i64).collect();
        ops::slice(e, &dy, &begin, Some(&size))
    }))
}

/// Input `i` gets slice `i` of `dy` along the stacking axis. The split runs
/// once, here, and every thunk hands out its own piece.
fn pack_grad(engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let axis = ctx.attrs.get_int("axis")?;
    let pieces = ops::unstack(engine, &ctx.dy()?, axis)?;
    Ok(pieces
        .into_iter()
        .enumerate()
        .fold(GradMap::new(), |grads, (i, piece)| {
            grads.with(i.to_string(), move |_| Ok(piece))
        }))
}

/// Restacks the gradient of every output.
fn unpack_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let axis = ctx.attrs.get_int("axis")?;
    let dys = ctx.dys.to_vec();
    Ok(GradMap::new().with("value", move |e| {
        let refs: Vec<&Tensor> = dys.iter().collect();
        ops::stack(e, &refs, axis)
    }))
}
