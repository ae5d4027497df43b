use tapir_core::dtype::DType;
use tapir_core::error::Result;
use tapir_core::gradient::{GradConfig, GradContext, GradMap};
use tapir_core::op::KernelName;
use tapir_core::Engine;

use super::{mask, reduce_to};
use crate::ops;

pub(super) const GRADIENTS: &[GradConfig] = &[
    GradConfig {
        kernel: KernelName::Add,
        inputs_to_save: &["a", "b"],
        outputs_to_save: &[],
        grad_fn: add_grad,
    },
    GradConfig {
        kernel: KernelName::Sub,
        inputs_to_save: &["a", "b"],
        outputs_to_save: &[],
        grad_fn: sub_grad,
    },
    GradConfig {
        kernel: KernelName::Multiply,
        inputs_to_save: &["a", "b"],
        outputs_to_save: &[],
        grad_fn: multiply_grad,
    },
    GradConfig {
        kernel: KernelName::RealDiv,
        inputs_to_save: &["a", "b"],
        outputs_to_save: &[],
        grad_fn: div_grad,
    },
    GradConfig {
        kernel: KernelName::FloorDiv,
        inputs_to_save: &["a", "b"],
        outputs_to_save: &[],
        grad_fn: div_grad,
    },
    GradConfig {
        kernel: KernelName::Maximum,
        inputs_to_save: &["a", "b"],
        outputs_to_save: &[],
        grad_fn: maximum_grad,
    },
    GradConfig {
        kernel: KernelName::Minimum,
        inputs_to_save: &["a", "b"],
        outputs_to_save: &[],
        grad_fn: minimum_grad,
    },
    GradConfig {
        kernel: KernelName::GreaterEqual,
        inputs_to_save: &["a", "b"],
        outputs_to_save: &[],
        grad_fn: greater_equal_grad,
    },
    GradConfig {
        kernel: KernelName::Select,
        inputs_to_save: &["condition"],
        outputs_to_save: &[],
        grad_fn: select_grad,
    },
];

fn add_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let dy = ctx.dy()?;
    let sa = ctx.saved(0)?.shape().clone();
    let sb = ctx.saved(1)?.shape().clone();
    let dy_b = dy.clone();
    Ok(GradMap::new()
        .with("a", move |e| reduce_to(e, &dy, &sa))
        .with("b", move |e| reduce_to(e, &dy_b, &sb)))
}

fn sub_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let dy = ctx.dy()?;
    let sa = ctx.saved(0)?.shape().clone();
    let sb = ctx.saved(1)?.shape().clone();
    let dy_b = dy.clone();
    Ok(GradMap::new()
        .with("a", move |e| reduce_to(e, &dy, &sa))
        .with("b", move |e| {
            let res = reduce_to(e, &dy_b, &sb)?;
            ops::neg(e, &res)
        }))
}

fn multiply_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let dy = ctx.dy()?;
    let (a, b) = (ctx.saved(0)?, ctx.saved(1)?);
    let (dy_b, a_b, b_b) = (dy.clone(), a.clone(), b.clone());
    Ok(GradMap::new()
        .with("a", move |e| {
            let b = ops::cast(e, &b, DType::Float32)?;
            let res = ops::mul(e, &dy, &b)?;
            reduce_to(e, &res, a.shape())
        })
        .with("b", move |e| {
            let a = ops::cast(e, &a_b, DType::Float32)?;
            let res = ops::mul(e, &dy_b, &a)?;
            reduce_to(e, &res, b_b.shape())
        }))
}

/// Shared by RealDiv and FloorDiv.
fn div_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let dy = ctx.dy()?;
    let (a, b) = (ctx.saved(0)?, ctx.saved(1)?);
    let (dy_b, a_b, b_b) = (dy.clone(), a.clone(), b.clone());
    Ok(GradMap::new()
        .with("a", move |e| {
            let b = ops::cast(e, &b, DType::Float32)?;
            let res = ops::div(e, &dy, &b)?;
            reduce_to(e, &res, a.shape())
        })
        .with("b", move |e| {
            let a = ops::cast(e, &a_b, DType::Float32)?;
            let res = ops::mul(e, &dy_b, &a)?;
            let res = reduce_to(e, &res, b_b.shape())?;
            let b = ops::cast(e, &b_b, DType::Float32)?;
            let b2 = ops::square(e, &b)?;
            let q = ops::div(e, &res, &b2)?;
            ops::neg(e, &q)
        }))
}

type Compare = fn(&mut Engine, &tapir_core::Tensor, &tapir_core::Tensor) -> Result<tapir_core::Tensor>;

/// Routes `dy` to `a` where `pick_a(a, b)` holds and to `b` where `pick_b`
/// holds.
fn select_between(ctx: &GradContext<'_>, pick_a: Compare, pick_b: Compare) -> Result<GradMap> {
    let dy = ctx.dy()?;
    let (a, b) = (ctx.saved(0)?, ctx.saved(1)?);
    let (dy_b, a_b, b_b) = (dy.clone(), a.clone(), b.clone());
    Ok(GradMap::new()
        .with("a", move |e| {
            let cond = pick_a(e, &a, &b)?;
            let m = mask(e, &cond)?;
            let res = ops::mul(e, &dy, &m)?;
            reduce_to(e, &res, a.shape())
        })
        .with("b", move |e| {
            let cond = pick_b(e, &a_b, &b_b)?;
            let m = mask(e, &cond)?;
            let res = ops::mul(e, &dy_b, &m)?;
            reduce_to(e, &res, b_b.shape())
        }))
}

fn maximum_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    select_between(ctx, |e, a, b| ops::greater_equal(e, a, b), |e, a, b| ops::less(e, a, b))
}

fn minimum_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    select_between(ctx, |e, a, b| ops::less_equal(e, a, b), |e, a, b| ops::greater(e, a, b))
}

fn select_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let dy = ctx.dy()?;
    let cond = ctx.saved(0)?;
    let (dy_e, cond_e, cond_c) = (dy.clone(), cond.clone(), cond.clone());
    Ok(GradMap::new()
        .with("condition", move |e| {
            let z = ops::zeros_like(e, &cond_c)?;
            ops::cast(e, &z, DType::Float32)
        })
        .with("t", move |e| {
            let m = mask(e, &cond)?;
            ops::mul(e, &dy, &m)
        })
        .with("e", move |e| {
            let not = ops::logical_not(e, &cond_e)?;
            let m = mask(e, &not)?;
            ops::mul(e, &dy_e, &m)
        }))
}

/// A comparison is piecewise constant in both operands.
fn greater_equal_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let sa = ctx.saved(0)?.shape().clone();
    let sb = ctx.saved(1)?.shape().clone();
    Ok(GradMap::new()
        .with("a", move |e| ops::zeros(e, sa, DType::Float32))
        .with("b", move |e| ops::zeros(e, sb, DType::Float32)))
}
