use tapir_core::error::Result;
use tapir_core::gradient::{GradConfig, GradContext, GradMap};
use tapir_core::kernel::NamedTensorMap;
use tapir_core::op::KernelName;
use tapir_core::Engine;

pub(super) const GRADIENTS: &[GradConfig] = &[
    GradConfig {
        kernel: KernelName::MaxPool,
        inputs_to_save: &["x"],
        outputs_to_save: &[true],
        grad_fn: max_pool_grad,
    },
    GradConfig {
        kernel: KernelName::MaxPool3D,
        inputs_to_save: &["x"],
        outputs_to_save: &[true],
        grad_fn: max_pool_3d_grad,
    },
    GradConfig {
        kernel: KernelName::Dilation2D,
        inputs_to_save: &["x", "filter"],
        outputs_to_save: &[],
        grad_fn: dilation_2d_grad,
    },
];

/// Each window's gradient lands on the position that won the max.
fn window_max_grad(ctx: &GradContext<'_>, backprop: KernelName) -> Result<GradMap> {
    let dy = ctx.dy()?;
    let (x, y) = (ctx.saved(0)?, ctx.saved(1)?);
    let attrs = ctx.attrs.clone();
    Ok(GradMap::new().with("x", move |e| {
        let inputs = NamedTensorMap::new()
            .with("dy", dy)
            .with("input", x)
            .with("output", y);
        e.run_kernel(backprop, &inputs, &attrs)
    }))
}

fn max_pool_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    window_max_grad(ctx, KernelName::MaxPoolGrad)
}

fn max_pool_3d_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    window_max_grad(ctx, KernelName::MaxPool3DGrad)
}

/// Both backprop kernels take the forward inputs and `dy`.
fn dilation_2d_grad(_engine: &mut Engine, ctx: &GradContext<'_>) -> Result<GradMap> {
    let dy = ctx.dy()?;
    let (x, filter) = (ctx.saved(0)?, ctx.saved(1)?);
    let inputs = NamedTensorMap::new()
        .with("x", x)
        .with("filter", filter)
        .with("dy", dy);
    let (x_inputs, x_attrs) = (inputs.clone(), ctx.attrs.clone());
    let (filter_inputs, filter_attrs) = (inputs, ctx.attrs.clone());
    Ok(GradMap::new()
        .with("x", move |e| {
            e.run_kernel(KernelName::Dilation2DBackpropInput, &x_inputs, &x_attrs)
        })
        .with("filter", move |e| {
            e.run_kernel(KernelName::Dilation2DBackpropFilter, &filter_inputs, &filter_attrs)
        }))
}
