use tapir_core::backend::TensorInfo;
use tapir_core::dtype::{DType, TensorValues};
use tapir_core::error::{Error, Result};
use tapir_core::kernel::KernelArgs;
use tapir_core::shape::Shape;

use super::{at, map2, single, source_indices, unsupported, Broadcast};

// Binary kernels
//
// Both operands are brought to their common dtype before computing. Bool
// operands of arithmetic kernels compute as int32. RealDiv always produces
// float32 (or complex64); comparisons and logical kernels produce bool.

type F32Op = fn(f32, f32) -> f32;
type I32Op = fn(i32, i32) -> i32;
type ComplexOp = fn((f32, f32), (f32, f32)) -> (f32, f32);

/// Operand values cast to their common dtype, plus the broadcast maps.
fn operands(
    args: &KernelArgs<'_>,
    promote_bool: bool,
) -> Result<(TensorValues, TensorValues, Broadcast)> {
    let ai = args.input("a")?;
    let bi = args.input("b")?;
    let mut dtype = ai.dtype.upcast(bi.dtype)?;
    if promote_bool && dtype == DType::Bool {
        dtype = DType::Int32;
    }
    let bc = Broadcast::new(&ai.shape, &bi.shape)?;
    let a = args.read("a")?.cast(dtype)?;
    let b = args.read("b")?.cast(dtype)?;
    Ok((a, b, bc))
}

fn pairs(v: &[f32]) -> Vec<(f32, f32)> {
    v.chunks_exact(2).map(|p| (p[0], p[1])).collect()
}

fn unpair(v: Vec<(f32, f32)>) -> Vec<f32> {
    v.into_iter().flat_map(|(re, im)| [re, im]).collect()
}

fn arithmetic(
    mut args: KernelArgs<'_>,
    f: F32Op,
    i: I32Op,
    c: Option<ComplexOp>,
) -> Result<Vec<TensorInfo>> {
    let (a, b, bc) = operands(&args, true)?;
    let values = match (&a, &b) {
        (TensorValues::Float32(x), TensorValues::Float32(y)) => {
            TensorValues::Float32(map2(x, y, &bc, |&p, &q| f(p, q)))
        }
        (TensorValues::Int32(x), TensorValues::Int32(y)) => {
            TensorValues::Int32(map2(x, y, &bc, |&p, &q| i(p, q)))
        }
        (TensorValues::Complex64(x), TensorValues::Complex64(y)) => {
            let op = c.ok_or_else(|| unsupported(args.kernel, DType::Complex64))?;
            let out = map2(&pairs(x), &pairs(y), &bc, |&p, &q| op(p, q));
            TensorValues::Complex64(unpair(out))
        }
        _ => return Err(unsupported(args.kernel, a.dtype())),
    };
    single(args.write(values, bc.out)?)
}

pub fn add(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    arithmetic(
        args,
        |a, b| a + b,
        |a, b| a.wrapping_add(b),
        Some(|(ar, ai), (br, bi)| (ar + br, ai + bi)),
    )
}

pub fn sub(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    arithmetic(
        args,
        |a, b| a - b,
        |a, b| a.wrapping_sub(b),
        Some(|(ar, ai), (br, bi)| (ar - br, ai - bi)),
    )
}

pub fn multiply(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    arithmetic(
        args,
        |a, b| a * b,
        |a, b| a.wrapping_mul(b),
        Some(|(ar, ai), (br, bi)| (ar * br - ai * bi, ar * bi + ai * br)),
    )
}

pub fn maximum(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    arithmetic(
        args,
        |a, b| if a.is_nan() || a > b { a } else { b },
        |a, b| a.max(b),
        None,
    )
}

pub fn minimum(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    arithmetic(
        args,
        |a, b| if a.is_nan() || a < b { a } else { b },
        |a, b| a.min(b),
        None,
    )
}

pub fn real_div(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let (a, b, bc) = operands(&args, true)?;
    let values = match (&a, &b) {
        (TensorValues::Complex64(x), TensorValues::Complex64(y)) => {
            let out = map2(&pairs(x), &pairs(y), &bc, |&(ar, ai), &(br, bi)| {
                let denom = br * br + bi * bi;
                ((ar * br + ai * bi) / denom, (ai * br - ar * bi) / denom)
            });
            TensorValues::Complex64(unpair(out))
        }
        _ => {
            let x = a.to_f32_vec()?;
            let y = b.to_f32_vec()?;
            TensorValues::Float32(map2(&x, &y, &bc, |&p, &q| p / q))
        }
    };
    single(args.write(values, bc.out)?)
}

pub fn floor_div(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    arithmetic(
        args,
        |a, b| (a / b).floor(),
        |a, b| (a as f64 / b as f64).floor() as i32,
        None,
    )
}

// Comparisons

fn compare(
    mut args: KernelArgs<'_>,
    f: fn(std::cmp::Ordering) -> bool,
) -> Result<Vec<TensorInfo>> {
    let (a, b, bc) = operands(&args, false)?;
    let cmp = |o: Option<std::cmp::Ordering>| o.map_or(false, f) as u8;
    let out: Vec<u8> = match (&a, &b) {
        (TensorValues::Float32(x), TensorValues::Float32(y)) => {
            map2(x, y, &bc, |p, q| cmp(p.partial_cmp(q)))
        }
        (TensorValues::Int32(x), TensorValues::Int32(y)) => map2(x, y, &bc, |p, q| cmp(Some(p.cmp(q)))),
        (TensorValues::Bool(x), TensorValues::Bool(y)) => map2(x, y, &bc, |p, q| cmp(Some(p.cmp(q)))),
        (TensorValues::String(x), TensorValues::String(y)) => {
            map2(x, y, &bc, |p, q| cmp(Some(p.cmp(q))))
        }
        _ => return Err(unsupported(args.kernel, a.dtype())),
    };
    single(args.write(TensorValues::Bool(out), bc.out)?)
}

pub fn greater(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    compare(args, |o| o.is_gt())
}

pub fn greater_equal(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    compare(args, |o| o.is_ge())
}

pub fn less(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    compare(args, |o| o.is_lt())
}

pub fn less_equal(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    compare(args, |o| o.is_le())
}

pub fn equal(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    compare(args, |o| o.is_eq())
}

// Logical

fn logical(mut args: KernelArgs<'_>, f: fn(bool, bool) -> bool) -> Result<Vec<TensorInfo>> {
    let ai = args.input("a")?;
    let bi = args.input("b")?;
    let bc = Broadcast::new(&ai.shape, &bi.shape)?;
    let a = args.read("a")?.to_bool_vec()?;
    let b = args.read("b")?.to_bool_vec()?;
    let out = map2(&a, &b, &bc, |&p, &q| f(p, q) as u8);
    single(args.write(TensorValues::Bool(out), bc.out)?)
}

pub fn logical_and(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    logical(args, |a, b| a && b)
}

pub fn logical_or(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    logical(args, |a, b| a || b)
}

/// `condition ? t : e`, broadcasting all three inputs.
pub fn select(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let ci = args.input("condition")?.clone();
    let ti = args.input("t")?.clone();
    let ei = args.input("e")?.clone();
    let out = Shape::broadcast_shape(&Shape::broadcast_shape(&ci.shape, &ti.shape)?, &ei.shape)?;
    let dtype = ti.dtype.upcast(ei.dtype)?;
    let cond = args.read("condition")?.to_bool_vec()?;
    let t = args.read("t")?.cast(dtype)?;
    let e = args.read("e")?.cast(dtype)?;

    let cm = source_indices(&ci.shape, &out);
    let tm = source_indices(&ti.shape, &out);
    let em = source_indices(&ei.shape, &out);
    let plan: Vec<(bool, usize)> = (0..out.elem_count())
        .map(|i| {
            let c = cond[at(&cm, i)];
            (c, if c { at(&tm, i) } else { at(&em, i) })
        })
        .collect();
    let values = choose(&t, &e, &plan)?;
    single(args.write(values, out)?)
}

fn choose(t: &TensorValues, e: &TensorValues, plan: &[(bool, usize)]) -> Result<TensorValues> {
    fn pick<T: Clone>(t: &[T], e: &[T], width: usize, plan: &[(bool, usize)]) -> Vec<T> {
        let mut out = Vec::with_capacity(plan.len() * width);
        for &(use_t, j) in plan {
            let src = if use_t { t } else { e };
            out.extend_from_slice(&src[j * width..(j + 1) * width]);
        }
        out
    }
    Ok(match (t, e) {
        (TensorValues::Float32(a), TensorValues::Float32(b)) => TensorValues::Float32(pick(a, b, 1, plan)),
        (TensorValues::Int32(a), TensorValues::Int32(b)) => TensorValues::Int32(pick(a, b, 1, plan)),
        (TensorValues::Bool(a), TensorValues::Bool(b)) => TensorValues::Bool(pick(a, b, 1, plan)),
        (TensorValues::String(a), TensorValues::String(b)) => TensorValues::String(pick(a, b, 1, plan)),
        (TensorValues::Complex64(a), TensorValues::Complex64(b)) => {
            TensorValues::Complex64(pick(a, b, 2, plan))
        }
        _ => return Err(Error::msg("select branches must share a dtype")),
    })
}
