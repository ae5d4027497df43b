use tapir_core::dtype::DType;
use tapir_core::error::Result;
use tapir_core::gradient::{GradConfig, GradContext, GradMap};
use tapir_core::op::KernelName;
use tapir_core::{Engine, Tensor};

use super::mask;
use crate::ops;

macro_rules! grad {
    ($kernel:ident, $save:expr, $f:ident) => {
        GradConfig {
            kernel: KernelName::$kernel,
            inputs_to_save: $save,
            outputs_to_save: &[],
            grad_fn: $f,
        }
    };
}

pub(super) const GRADIENTS: &[GradConfig] = &[
    grad!(Neg, &[], neg_grad),
    grad!(Square, &["x"], square_grad),
    grad!(Sqrt, &["x"], sqrt_grad),
    grad!(Abs, &["x"], abs_grad),
    GradConfig {
        kernel: KernelName::Exp,
        inputs_to_save: &[],
        outputs_to_save: &[true],
        grad_fn: exp_grad,
    },
    grad!(Log, &["x"], log_grad),
    grad!(Sin, &["x"], sin_grad),
    grad!(Cos, &["x"], cos_grad),
    grad!(Tan, &["x"], tan_grad),
    grad!(Relu, &["x"], relu_grad),
    grad!(Relu6, &["x"], relu6_grad),
    grad!(Step, &[], zero_grad),
    grad!(Round, &[], zero_grad),
    grad!(IsInf, &[], zero_grad),
    grad!(ZerosLike, &[], zero_grad),
    grad!(OnesLike, &[], zero_grad),
    grad!(ClipByValue, &["x"], clip_by_value_grad),
    grad!(Cast, &[], pass_grad),
    grad!(Identity, &[], pass_grad),
];

/// `x` as float32.
fn float(engine: &mut Engine, x: &Tensor) -> Result<Tensor> {
    ops::cast(engine, x, DType::Float32)
}

/// Gradient thunk for a kernel with a single input `x`.
fn x_grad(f: impl FnOnce(&mut Engine) -> Result<Tensor> + 'static) -> Result<GradMap> {
    Ok(GradMap::new().with("x", f))
}

fn neg_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let dy = ctx.dy()?;
    x_grad(move |e| ops::neg(e, &dy))
}

fn square_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    x_grad(move |e| {
        let x = float(e, &x)?;
        let two_x = ops::mul(e, &x, 2.0f32)?;
        ops::mul(e, &dy, &two_x)
    })
}

fn sqrt_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    x_grad(move |e| {
        let x = float(e, &x)?;
        let root = ops::sqrt(e, &x)?;
        let denom = ops::mul(e, &root, 2.0f32)?;
        ops::div(e, &dy, &denom)
    })
}

fn abs_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    x_grad(move |e| {
        let x = float(e, &x)?;
        let sign = ops::step(e, &x, -1.0)?;
        ops::mul(e, &dy, &sign)
    })
}

fn exp_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, y) = (ctx.dy()?, ctx.saved(0)?);
    x_grad(move |e| ops::mul(e, &dy, &y))
}

fn log_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    x_grad(move |e| {
        let x = float(e, &x)?;
        ops::div(e, &dy, &x)
    })
}

fn sin_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    x_grad(move |e| {
        let x = float(e, &x)?;
        let c = ops::cos(e, &x)?;
        ops::mul(e, &c, &dy)
    })
}

fn cos_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    x_grad(move |e| {
        let x = float(e, &x)?;
        let s = ops::sin(e, &x)?;
        let ns = ops::neg(e, &s)?;
        ops::mul(e, &ns, &dy)
    })
}

fn tan_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    x_grad(move |e| {
        let c = ops::cos(e, &x)?;
        let c2 = ops::square(e, &c)?;
        ops::div(e, &dy, &c2)
    })
}

fn relu_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    x_grad(move |e| {
        let s = ops::step(e, &x, 0.0)?;
        let s = float(e, &s)?;
        ops::mul(e, &dy, &s)
    })
}

fn relu6_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    x_grad(move |e| {
        let below = ops::less_equal(e, &x, 6.0f32)?;
        let below = mask(e, &below)?;
        let s = ops::step(e, &x, 0.0)?;
        let m = ops::mul(e, &below, &s)?;
        let m = float(e, &m)?;
        ops::mul(e, &dy, &m)
    })
}

/// Kernels whose output does not vary with their input.
fn zero_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let shape = ctx.dy()?.shape().clone();
    x_grad(move |e| ops::zeros(e, shape, DType::Float32))
}

fn clip_by_value_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let (dy, x) = (ctx.dy()?, ctx.saved(0)?);
    let lo = ctx.attrs.get_float("clipValueMin")? as f32;
    let hi = ctx.attrs.get_float("clipValueMax")? as f32;
    x_grad(move |e| {
        let above = ops::greater_equal(e, &x, lo)?;
        let below = ops::less_equal(e, &x, hi)?;
        let inside = ops::logical_and(e, &above, &below)?;
        let inside = e.stop_gradient(&inside)?;
        let zeros = ops::zeros_like(e, &dy)?;
        ops::where_(e, &inside, &dy, &zeros)
    })
}

/// Cast and Identity hand the output gradient through.
fn pass_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let dy = ctx.dy()?;
    x_grad(move |e| e.clone_tensor(&dy))
}
