use tapir_core::backend::TensorInfo;
use tapir_core::dtype::{DType, TensorValues};
use tapir_core::error::{Error, Result};
use tapir_core::kernel::KernelArgs;
use tapir_core::shape::Shape;

use super::single;

/// Count (or weight-sum) occurrences of each value of `x` in `[0, size)`.
///
/// `x` is 1-D or 2-D; a 2-D input counts each row separately. Values outside
/// the range are skipped. `weights` is empty (every occurrence counts 1) or
/// has the shape of `x`. With `binaryOutput` a bin is 1 when any value hit it.
pub fn dense_bincount(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let xi = args.input("x")?.clone();
    let wi = args.input("weights")?.clone();
    let size = args.attrs.get_int("size")?;
    let binary = args.attrs.bool_or("binaryOutput", false)?;
    if size < 0 {
        return Err(Error::invalid_argument(
            "denseBincount",
            format!("size must be non-negative, got {size}"),
        ));
    }
    let size = size as usize;
    let (rows, cols) = match xi.shape.dims() {
        [n] => (1, *n),
        [r, c] => (*r, *c),
        _ => {
            return Err(Error::invalid_argument(
                "denseBincount",
                format!("input must be of rank 1 or 2, got shape {}", xi.shape),
            ))
        }
    };
    let x = args.read("x")?.to_i32_vec()?;
    let weights = if wi.size() == 0 {
        None
    } else if wi.size() == xi.size() {
        Some(args.read("weights")?.to_f32_vec()?)
    } else {
        return Err(Error::shape_mismatch(format!(
            "weights {} must be empty or match the size of the input {}",
            wi.shape, xi.shape
        )));
    };

    let mut bins = vec![0f32; rows * size];
    for r in 0..rows {
        for c in 0..cols {
            let i = r * cols + c;
            let v = x[i];
            if v < 0 || v as usize >= size {
                continue;
            }
            let slot = &mut bins[r * size + v as usize];
            if binary {
                *slot = 1.0;
            } else {
                *slot += weights.as_ref().map_or(1.0, |w| w[i]);
            }
        }
    }

    let out_shape = if xi.shape.rank() == 1 {
        Shape::from(size)
    } else {
        Shape::from((rows, size))
    };
    let values = match wi.dtype {
        DType::Int32 => TensorValues::Int32(bins.into_iter().map(|b| b as i32).collect()),
        _ => TensorValues::Float32(bins),
    };
    single(args.write(values, out_shape)?)
}
