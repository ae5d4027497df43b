use tapir_core::backend::TensorInfo;
use tapir_core::dtype::TensorValues;
use tapir_core::error::Result;
use tapir_core::kernel::KernelArgs;
use tapir_core::shape::{parse_axis_param, Shape};

use super::{single, unravel, unsupported};

/// For every element of `input`, the flat index of the reduced element it
/// contributes to.
fn reduce_map(input: &Shape, axes: &[usize]) -> Vec<usize> {
    let kept = input.expand_to_keep_dim(axes);
    let strides = kept.stride_contiguous();
    let dims = input.dims();
    let mut coord = vec![0usize; dims.len()];
    (0..input.elem_count())
        .map(|flat| {
            unravel(flat, dims, &mut coord);
            coord
                .iter()
                .zip(&strides)
                .enumerate()
                .filter(|(axis, _)| !axes.contains(axis))
                .map(|(_, (c, s))| c * s)
                .sum()
        })
        .collect()
}

fn accumulate<T: Copy + std::ops::AddAssign + Default>(x: &[T], map: &[usize], n: usize) -> Vec<T> {
    let mut out = vec![T::default(); n];
    for (v, &o) in x.iter().zip(map) {
        out[o] += *v;
    }
    out
}

/// Sum over `axis` (every axis when absent). Bool sums as int32.
pub fn sum(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let shape = args.input("x")?.shape.clone();
    let axis = args.attrs.ints_opt("axis")?;
    let keep_dims = args.attrs.bool_or("keepDims", false)?;
    let axes = parse_axis_param(axis.as_deref(), shape.rank())?;
    let out_shape = shape.reduced(&axes, keep_dims);
    let n = out_shape.elem_count();
    let map = reduce_map(&shape, &axes);

    let values = match args.read("x")? {
        TensorValues::Float32(v) => TensorValues::Float32(accumulate(&v, &map, n)),
        TensorValues::Int32(v) => TensorValues::Int32(accumulate(&v, &map, n)),
        TensorValues::Bool(v) => {
            let v: Vec<i32> = v.iter().map(|&b| b as i32).collect();
            TensorValues::Int32(accumulate(&v, &map, n))
        }
        TensorValues::Complex64(v) => {
            let mut out = vec![0.0f32; 2 * n];
            for (pair, &o) in v.chunks_exact(2).zip(&map) {
                out[2 * o] += pair[0];
                out[2 * o + 1] += pair[1];
            }
            TensorValues::Complex64(out)
        }
        other => return Err(unsupported(args.kernel, other.dtype())),
    };
    single(args.write(values, out_shape)?)
}
