use tapir_core::backend::TensorInfo;
use tapir_core::dtype::{DType, TensorValues};
use tapir_core::error::Result;
use tapir_core::kernel::KernelArgs;

use super::{map1, single, unsupported};

// Unary kernels
//
// Two families:
//   - dtype preserving (Neg, Abs, Square, Relu, Relu6, Step, ClipByValue):
//     int32 stays int32, bool computes as int32
//   - float producing (Exp, Log, Sqrt, Sin, Cos, Tan, Round): integer inputs
//     are converted to float32 first

fn preserving(
    mut args: KernelArgs<'_>,
    f: impl Fn(f32) -> f32 + Sync + Send,
    i: impl Fn(i32) -> i32 + Sync + Send,
) -> Result<Vec<TensorInfo>> {
    let shape = args.input("x")?.shape.clone();
    let values = match args.read("x")? {
        TensorValues::Float32(v) => TensorValues::Float32(map1(&v, |&x| f(x))),
        TensorValues::Int32(v) => TensorValues::Int32(map1(&v, |&x| i(x))),
        TensorValues::Bool(v) => TensorValues::Int32(map1(&v, |&x| i(x as i32))),
        other => return Err(unsupported(args.kernel, other.dtype())),
    };
    single(args.write(values, shape)?)
}

fn floating(mut args: KernelArgs<'_>, f: fn(f32) -> f32) -> Result<Vec<TensorInfo>> {
    let shape = args.input("x")?.shape.clone();
    let x = args.read("x")?;
    if !matches!(x.dtype(), DType::Float32 | DType::Int32 | DType::Bool) {
        return Err(unsupported(args.kernel, x.dtype()));
    }
    let v = x.to_f32_vec()?;
    single(args.write(TensorValues::Float32(map1(&v, |&x| f(x))), shape)?)
}

pub fn neg(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    preserving(args, |x| -x, |x| x.wrapping_neg())
}

pub fn abs(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    preserving(args, f32::abs, |x| x.wrapping_abs())
}

pub fn square(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    preserving(args, |x| x * x, |x| x.wrapping_mul(x))
}

pub fn relu(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    preserving(args, |x| if x < 0.0 { 0.0 } else { x }, |x| x.max(0))
}

pub fn relu6(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    preserving(
        args,
        |x| if x < 0.0 { 0.0 } else if x > 6.0 { 6.0 } else { x },
        |x| x.clamp(0, 6),
    )
}

/// `x > 0 ? 1 : alpha`, NaN stays NaN.
pub fn step(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let alpha = if args.attrs.contains("alpha") {
        args.attrs.get_float("alpha")? as f32
    } else {
        0.0
    };
    preserving(
        args,
        move |x| {
            if x.is_nan() {
                f32::NAN
            } else if x > 0.0 {
                1.0
            } else {
                alpha
            }
        },
        move |x| if x > 0 { 1 } else { alpha as i32 },
    )
}

pub fn clip_by_value(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let lo = args.attrs.get_float("clipValueMin")?;
    let hi = args.attrs.get_float("clipValueMax")?;
    let (lo32, hi32) = (lo as f32, hi as f32);
    preserving(
        args,
        move |x| {
            if x > hi32 {
                hi32
            } else if x < lo32 {
                lo32
            } else {
                x
            }
        },
        move |x| {
            let xf = x as f64;
            if xf > hi {
                hi as i32
            } else if xf < lo {
                lo as i32
            } else {
                x
            }
        },
    )
}

pub fn exp(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    floating(args, f32::exp)
}

pub fn log(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    floating(args, f32::ln)
}

pub fn sqrt(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    floating(args, f32::sqrt)
}

pub fn sin(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    floating(args, f32::sin)
}

pub fn cos(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    floating(args, f32::cos)
}

pub fn tan(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    floating(args, f32::tan)
}

/// Round half to even.
pub fn round(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    floating(args, round_half_even)
}

pub(crate) fn round_half_even(x: f32) -> f32 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        r
    }
}

pub fn is_inf(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let shape = args.input("x")?.shape.clone();
    let out: Vec<u8> = match args.read("x")? {
        TensorValues::Float32(v) => map1(&v, |x| x.is_infinite() as u8),
        other => vec![0; other.len()],
    };
    single(args.write(TensorValues::Bool(out), shape)?)
}

pub fn cast(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let dtype = args.attrs.get_dtype("dtype")?;
    let shape = args.input("x")?.shape.clone();
    let values = args.read("x")?.cast(dtype)?;
    single(args.write(values, shape)?)
}

pub fn logical_not(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let shape = args.input("x")?.shape.clone();
    let x = args.read("x")?.to_bool_vec()?;
    let out = map1(&x, |&b| (!b) as u8);
    single(args.write(TensorValues::Bool(out), shape)?)
}

/// Output shares the input's buffer.
pub fn identity(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    single(args.input("x")?.clone())
}

pub fn zeros_like(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let x = args.input("x")?.clone();
    single(args.write(TensorValues::zeros(x.dtype, x.size()), x.shape)?)
}

pub fn ones_like(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let x = args.input("x")?.clone();
    single(args.write(TensorValues::filled(x.dtype, x.size(), 1.0)?, x.shape)?)
}

pub fn fill(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let shape = args.attrs.get_shape("shape")?;
    let dtype = args.attrs.get_dtype("dtype")?;
    let values = match args.attrs.get("value")? {
        tapir_core::kernel::AttrValue::Str(s) if dtype == DType::String => {
            TensorValues::String(vec![s.clone(); shape.elem_count()])
        }
        _ => TensorValues::filled(dtype, shape.elem_count(), args.attrs.get_float("value")?)?,
    };
    single(args.write(values, shape)?)
}
