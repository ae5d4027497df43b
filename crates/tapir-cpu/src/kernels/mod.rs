use rayon::prelude::*;

use tapir_core::backend::TensorInfo;
use tapir_core::dtype::DType;
use tapir_core::error::{Error, Result};
use tapir_core::kernel::{KernelConfig, KernelFn, KernelRegistry};
use tapir_core::op::KernelName;
use tapir_core::shape::Shape;

pub mod binary;
pub mod bincount;
pub mod pool;
pub mod reduce;
pub mod shape;
pub mod unary;

// CPU kernel table
//
// Kernels read their inputs' values from the backend, compute on host
// memory and write new buffers. Elementwise loops switch to rayon once the
// output has PARALLEL_THRESHOLD elements.

/// Output size from which elementwise kernels run in parallel.
pub const PARALLEL_THRESHOLD: usize = 1 << 15;

const KERNELS: &[(KernelName, KernelFn)] = &[
    (KernelName::Add, binary::add),
    (KernelName::Sub, binary::sub),
    (KernelName::Multiply, binary::multiply),
    (KernelName::RealDiv, binary::real_div),
    (KernelName::FloorDiv, binary::floor_div),
    (KernelName::Maximum, binary::maximum),
    (KernelName::Minimum, binary::minimum),
    (KernelName::Greater, binary::greater),
    (KernelName::GreaterEqual, binary::greater_equal),
    (KernelName::Less, binary::less),
    (KernelName::LessEqual, binary::less_equal),
    (KernelName::Equal, binary::equal),
    (KernelName::LogicalAnd, binary::logical_and),
    (KernelName::LogicalOr, binary::logical_or),
    (KernelName::Select, binary::select),
    (KernelName::Neg, unary::neg),
    (KernelName::Exp, unary::exp),
    (KernelName::Log, unary::log),
    (KernelName::Square, unary::square),
    (KernelName::Sqrt, unary::sqrt),
    (KernelName::Abs, unary::abs),
    (KernelName::Sin, unary::sin),
    (KernelName::Cos, unary::cos),
    (KernelName::Tan, unary::tan),
    (KernelName::Relu, unary::relu),
    (KernelName::Relu6, unary::relu6),
    (KernelName::Step, unary::step),
    (KernelName::Round, unary::round),
    (KernelName::IsInf, unary::is_inf),
    (KernelName::ClipByValue, unary::clip_by_value),
    (KernelName::Cast, unary::cast),
    (KernelName::LogicalNot, unary::logical_not),
    (KernelName::Identity, unary::identity),
    (KernelName::ZerosLike, unary::zeros_like),
    (KernelName::OnesLike, unary::ones_like),
    (KernelName::Fill, unary::fill),
    (KernelName::Sum, reduce::sum),
    (KernelName::DenseBincount, bincount::dense_bincount),
    (KernelName::Reshape, shape::reshape),
    (KernelName::ExpandDims, shape::expand_dims),
    (KernelName::BroadcastTo, shape::broadcast_to),
    (KernelName::Slice, shape::slice),
    (KernelName::StridedSlice, shape::strided_slice),
    (KernelName::PadV2, shape::pad),
    (KernelName::Pack, shape::pack),
    (KernelName::Unpack, shape::unpack),
    (KernelName::MaxPool, pool::max_pool),
    (KernelName::MaxPoolGrad, pool::max_pool_grad),
    (KernelName::MaxPool3D, pool::max_pool_3d),
    (KernelName::MaxPool3DGrad, pool::max_pool_3d_grad),
    (KernelName::Dilation2D, pool::dilation_2d),
    (KernelName::Dilation2DBackpropInput, pool::dilation_2d_backprop_input),
    (KernelName::Dilation2DBackpropFilter, pool::dilation_2d_backprop_filter),
];

/// Register every CPU kernel under `backend`.
pub fn register_kernels(registry: &mut KernelRegistry, backend: &str) -> Result<()> {
    for &(kernel, kernel_fn) in KERNELS {
        registry.register(KernelConfig::new(kernel, backend, kernel_fn))?;
    }
    log::debug!("registered {} cpu kernels for backend '{backend}'", KERNELS.len());
    Ok(())
}

pub(crate) fn single(info: TensorInfo) -> Result<Vec<TensorInfo>> {
    Ok(vec![info])
}

pub(crate) fn unsupported(kernel: KernelName, dtype: DType) -> Error {
    Error::Backend(format!("cpu kernel '{kernel}' does not support {dtype} tensors"))
}

// Broadcast index maps

/// For every element of `out`, the flat index of the element of `src` it
/// reads. `None` when the shapes are equal (identity map).
pub(crate) fn source_indices(src: &Shape, out: &Shape) -> Option<Vec<usize>> {
    if src == out {
        return None;
    }
    let strides = src.broadcast_strides(out);
    let out_dims = out.dims();
    let n = out.elem_count();
    let mut indices = Vec::with_capacity(n);
    let mut coord = vec![0usize; out_dims.len()];
    for _ in 0..n {
        indices.push(coord.iter().zip(&strides).map(|(c, s)| c * s).sum());
        for axis in (0..out_dims.len()).rev() {
            coord[axis] += 1;
            if coord[axis] < out_dims[axis] {
                break;
            }
            coord[axis] = 0;
        }
    }
    Some(indices)
}

#[inline]
pub(crate) fn at(map: &Option<Vec<usize>>, i: usize) -> usize {
    map.as_ref().map_or(i, |m| m[i])
}

/// Output shape and index maps of a broadcasting binary kernel.
pub(crate) struct Broadcast {
    pub out: Shape,
    pub a: Option<Vec<usize>>,
    pub b: Option<Vec<usize>>,
}

impl Broadcast {
    pub fn new(a: &Shape, b: &Shape) -> Result<Self> {
        let out = Shape::broadcast_shape(a, b)?;
        Ok(Broadcast {
            a: source_indices(a, &out),
            b: source_indices(b, &out),
            out,
        })
    }
}

/// Elementwise map, parallel for large inputs.
pub(crate) fn map1<T, R, F>(x: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    if x.len() >= PARALLEL_THRESHOLD {
        x.par_iter().map(f).collect()
    } else {
        x.iter().map(f).collect()
    }
}

/// Broadcasting elementwise zip, parallel for large outputs.
pub(crate) fn map2<T, U, R, F>(a: &[T], b: &[U], bc: &Broadcast, f: F) -> Vec<R>
where
    T: Sync,
    U: Sync,
    R: Send,
    F: Fn(&T, &U) -> R + Sync + Send,
{
    let n = bc.out.elem_count();
    let pick = |i: usize| f(&a[at(&bc.a, i)], &b[at(&bc.b, i)]);
    if n >= PARALLEL_THRESHOLD {
        (0..n).into_par_iter().map(pick).collect()
    } else {
        (0..n).map(pick).collect()
    }
}

/// Unravel a flat row-major index into `coord`.
pub(crate) fn unravel(mut flat: usize, dims: &[usize], coord: &mut [usize]) {
    for axis in (0..dims.len()).rev() {
        let d = dims[axis].max(1);
        coord[axis] = flat % d;
        flat /= d;
    }
}
