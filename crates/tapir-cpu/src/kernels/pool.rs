use tapir_core::backend::TensorInfo;
use tapir_core::dtype::TensorValues;
use tapir_core::error::{Error, Result};
use tapir_core::kernel::{KernelArgs, NamedAttrMap};
use tapir_core::op::KernelName;
use tapir_core::shape::Shape;

use super::single;

// Windowed max kernels over channels-last tensors
//
// MaxPool (NHWC), MaxPool3D (NDHWC) and Dilation2D (NHWC) all slide a window
// over the spatial axes and take a maximum per channel. PoolGeometry holds
// the window layout for all three; a 2-D layout is a 3-D one with depth 1.
//
// Windows that hang over the border ("same" padding) only look at in-bounds
// pixels. The first maximum in row-major window order wins, and the
// backprop kernels route each output gradient back to that position.

/// Window layout of a 2-D or 3-D pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolGeometry {
    /// 2 for NHWC, 3 for NDHWC.
    pub spatial: usize,
    pub batch: usize,
    pub in_d: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub channels: usize,
    pub filter_d: usize,
    pub filter_h: usize,
    pub filter_w: usize,
    pub stride_d: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub pad_front: usize,
    pub pad_top: usize,
    pub pad_left: usize,
    pub out_d: usize,
    pub out_h: usize,
    pub out_w: usize,
}

/// `n` positive ints, or a single one repeated.
fn dims_attr(kernel: KernelName, attrs: &NamedAttrMap, name: &str, n: usize) -> Result<Vec<usize>> {
    let ints = attrs.get_ints(name)?;
    let valid = ints.iter().all(|&v| v > 0);
    match ints.len() {
        len if valid && len == n => Ok(ints.iter().map(|&v| v as usize).collect()),
        1 if valid => Ok(vec![ints[0] as usize; n]),
        _ => Err(Error::invalid_argument(
            kernel.as_str(),
            format!("{name} must be 1 or {n} positive ints, got {ints:?}"),
        )),
    }
}

/// Output size and leading padding of one spatial axis.
fn axis_layout(
    kernel: KernelName,
    input: usize,
    filter: usize,
    stride: usize,
    dilation: usize,
    pad: &str,
) -> Result<(usize, usize)> {
    let effective = (filter - 1) * dilation + 1;
    match pad {
        "valid" => Ok(((input + 1).saturating_sub(effective).div_ceil(stride), 0)),
        "same" => {
            let out = input.div_ceil(stride);
            let total = ((out.max(1) - 1) * stride + effective).saturating_sub(input);
            Ok((out, total / 2))
        }
        other => Err(Error::invalid_argument(
            kernel.as_str(),
            format!("unknown padding '{other}', expected 'valid' or 'same'"),
        )),
    }
}

impl PoolGeometry {
    /// Layout of a max pooling whose window comes from the `filterSize`,
    /// `strides` and `pad` attributes.
    pub fn new(kernel: KernelName, input: &Shape, spatial: usize, attrs: &NamedAttrMap) -> Result<Self> {
        let filter = dims_attr(kernel, attrs, "filterSize", spatial)?;
        let strides = dims_attr(kernel, attrs, "strides", spatial)?;
        let pad = attrs.get_str("pad")?;
        Self::from_parts(kernel, input, &filter, &strides, &vec![1; spatial], &pad)
    }

    /// Layout for explicit window sizes. The spatial rank is `filter.len()`.
    pub fn from_parts(
        kernel: KernelName,
        input: &Shape,
        filter: &[usize],
        strides: &[usize],
        dilations: &[usize],
        pad: &str,
    ) -> Result<Self> {
        let spatial = filter.len();
        let (batch, in_d, in_h, in_w, channels) = match (spatial, input.dims()) {
            (2, &[b, h, w, c]) => (b, 1, h, w, c),
            (3, &[b, d, h, w, c]) => (b, d, h, w, c),
            _ => {
                let layout = if spatial == 3 { "rank 5 (NDHWC)" } else { "rank 4 (NHWC)" };
                return Err(Error::invalid_argument(
                    kernel.as_str(),
                    format!("input must be {layout}, got shape {input}"),
                ));
            }
        };
        if filter.contains(&0) {
            return Err(Error::invalid_argument(
                kernel.as_str(),
                format!("window sizes must be positive, got {filter:?}"),
            ));
        }
        // Depth is the leading spatial axis when present.
        let lead = spatial - 2;
        let depth = |v: &[usize]| if lead == 1 { v[0] } else { 1 };
        let (filter_d, filter_h, filter_w) = (depth(filter), filter[lead], filter[lead + 1]);
        let (stride_d, stride_h, stride_w) = (depth(strides), strides[lead], strides[lead + 1]);
        let (dilation_h, dilation_w) = (dilations[lead], dilations[lead + 1]);
        if depth(dilations) != 1 {
            return Err(Error::invalid_argument(
                kernel.as_str(),
                "dilation along depth is not supported",
            ));
        }
        let (out_d, pad_front) = axis_layout(kernel, in_d, filter_d, stride_d, 1, pad)?;
        let (out_h, pad_top) = axis_layout(kernel, in_h, filter_h, stride_h, dilation_h, pad)?;
        let (out_w, pad_left) = axis_layout(kernel, in_w, filter_w, stride_w, dilation_w, pad)?;
        Ok(PoolGeometry {
            spatial,
            batch,
            in_d,
            in_h,
            in_w,
            channels,
            filter_d,
            filter_h,
            filter_w,
            stride_d,
            stride_h,
            stride_w,
            dilation_h,
            dilation_w,
            pad_front,
            pad_top,
            pad_left,
            out_d,
            out_h,
            out_w,
        })
    }

    pub fn output_shape(&self) -> Shape {
        if self.spatial == 3 {
            Shape::new(vec![self.batch, self.out_d, self.out_h, self.out_w, self.channels])
        } else {
            Shape::new(vec![self.batch, self.out_h, self.out_w, self.channels])
        }
    }

    /// For every output element, the flat input index and flat filter index
    /// of its window's first maximum of `score(input, filter)`. `None` for a
    /// window with no in-bounds pixel.
    fn argmax(&self, score: impl Fn(usize, usize) -> f32) -> Vec<Option<(usize, usize)>> {
        let mut out = Vec::with_capacity(self.output_shape().elem_count());
        for b in 0..self.batch {
            for od in 0..self.out_d {
                for oh in 0..self.out_h {
                    for ow in 0..self.out_w {
                        for c in 0..self.channels {
                            out.push(self.window_max(&score, [b, od, oh, ow], c));
                        }
                    }
                }
            }
        }
        out
    }

    fn window_max(
        &self,
        score: &impl Fn(usize, usize) -> f32,
        [b, od, oh, ow]: [usize; 4],
        c: usize,
    ) -> Option<(usize, usize)> {
        let d0 = (od * self.stride_d) as i64 - self.pad_front as i64;
        let h0 = (oh * self.stride_h) as i64 - self.pad_top as i64;
        let w0 = (ow * self.stride_w) as i64 - self.pad_left as i64;
        let mut best: Option<((usize, usize), f32)> = None;
        for fd in 0..self.filter_d {
            let d = d0 + fd as i64;
            if d < 0 || d >= self.in_d as i64 {
                continue;
            }
            for fh in 0..self.filter_h {
                let h = h0 + (fh * self.dilation_h) as i64;
                if h < 0 || h >= self.in_h as i64 {
                    continue;
                }
                for fw in 0..self.filter_w {
                    let w = w0 + (fw * self.dilation_w) as i64;
                    if w < 0 || w >= self.in_w as i64 {
                        continue;
                    }
                    let pixel = ((b * self.in_d + d as usize) * self.in_h + h as usize) * self.in_w
                        + w as usize;
                    let tap = (fd * self.filter_h + fh) * self.filter_w + fw;
                    let at = (pixel * self.channels + c, tap * self.channels + c);
                    let v = score(at.0, at.1);
                    match best {
                        Some((_, m)) if m.is_nan() => {}
                        Some((_, m)) if !(v > m || v.is_nan()) => {}
                        _ => best = Some((at, v)),
                    }
                }
            }
        }
        best.map(|(at, _)| at)
    }
}

fn pool_forward(mut args: KernelArgs<'_>, spatial: usize) -> Result<Vec<TensorInfo>> {
    let shape = args.input("x")?.shape.clone();
    let geom = PoolGeometry::new(args.kernel, &shape, spatial, args.attrs)?;
    let x = args.read("x")?.to_f32_vec()?;
    let out: Vec<f32> = geom
        .argmax(|i, _| x[i])
        .into_iter()
        .map(|at| at.map_or(f32::NEG_INFINITY, |(i, _)| x[i]))
        .collect();
    single(args.write(TensorValues::Float32(out), geom.output_shape())?)
}

/// Routes `dy` back to the window maxima of the forward input.
fn pool_backward(mut args: KernelArgs<'_>, spatial: usize) -> Result<Vec<TensorInfo>> {
    let shape = args.input("input")?.shape.clone();
    let geom = PoolGeometry::new(args.kernel, &shape, spatial, args.attrs)?;
    let dy_shape = &args.input("dy")?.shape;
    if *dy_shape != geom.output_shape() {
        return Err(Error::shape_mismatch(format!(
            "{}: dy has shape {dy_shape}, expected {}",
            args.kernel,
            geom.output_shape()
        )));
    }
    // The forward output must exist, though positions are recomputed.
    args.input("output")?;
    let x = args.read("input")?.to_f32_vec()?;
    let dy = args.read("dy")?.to_f32_vec()?;
    let mut dx = vec![0f32; shape.elem_count()];
    for (at, g) in geom.argmax(|i, _| x[i]).into_iter().zip(dy) {
        if let Some((i, _)) = at {
            dx[i] += g;
        }
    }
    single(args.write(TensorValues::Float32(dx), shape)?)
}

pub fn max_pool(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    pool_forward(args, 2)
}

/// Gradient of MaxPool with respect to its input.
pub fn max_pool_grad(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    pool_backward(args, 2)
}

pub fn max_pool_3d(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    pool_forward(args, 3)
}

/// Gradient of MaxPool3D with respect to its input.
pub fn max_pool_3d_grad(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    pool_backward(args, 3)
}

// Dilation2D: grayscale morphological dilation
//
//   out[b, y, x, c] = max over (i, j) of
//       x[b, y*sh + i*rh - pad_top, x*sw + j*rw - pad_left, c] + filter[i, j, c]

fn dilation_geometry(args: &KernelArgs<'_>) -> Result<PoolGeometry> {
    let kernel = args.kernel;
    let x = &args.input("x")?.shape;
    let filter = &args.input("filter")?.shape;
    let &[fh, fw, fc] = filter.dims() else {
        return Err(Error::invalid_argument(
            kernel.as_str(),
            format!("filter must be rank 3, got shape {filter}"),
        ));
    };
    if x.rank() == 4 && x.dims()[3] != fc {
        return Err(Error::invalid_argument(
            kernel.as_str(),
            format!("input depth {} does not match filter depth {fc}", x.dims()[3]),
        ));
    }
    let strides = dims_attr(kernel, args.attrs, "strides", 2)?;
    let dilations = dims_attr(kernel, args.attrs, "dilations", 2)?;
    let pad = args.attrs.get_str("pad")?;
    PoolGeometry::from_parts(kernel, x, &[fh, fw], &strides, &dilations, &pad)
}

/// Window maxima of `x + filter`, with the summed values.
fn dilation_taps(args: &KernelArgs<'_>, geom: &PoolGeometry) -> Result<(Vec<Option<(usize, usize)>>, Vec<f32>)> {
    let x = args.read("x")?.to_f32_vec()?;
    let filter = args.read("filter")?.to_f32_vec()?;
    let taps = geom.argmax(|i, f| x[i] + filter[f]);
    let values = taps
        .iter()
        .map(|at| at.map_or(f32::NEG_INFINITY, |(i, f)| x[i] + filter[f]))
        .collect();
    Ok((taps, values))
}

pub fn dilation_2d(mut args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let geom = dilation_geometry(&args)?;
    let (_, out) = dilation_taps(&args, &geom)?;
    single(args.write(TensorValues::Float32(out), geom.output_shape())?)
}

fn dilation_backprop(mut args: KernelArgs<'_>, to_filter: bool) -> Result<Vec<TensorInfo>> {
    let geom = dilation_geometry(&args)?;
    let dy_shape = &args.input("dy")?.shape;
    if *dy_shape != geom.output_shape() {
        return Err(Error::shape_mismatch(format!(
            "{}: dy has shape {dy_shape}, expected {}",
            args.kernel,
            geom.output_shape()
        )));
    }
    let shape = if to_filter {
        args.input("filter")?.shape.clone()
    } else {
        args.input("x")?.shape.clone()
    };
    let (taps, _) = dilation_taps(&args, &geom)?;
    let dy = args.read("dy")?.to_f32_vec()?;
    let mut grad = vec![0f32; shape.elem_count()];
    for (at, g) in taps.into_iter().zip(dy) {
        if let Some((i, f)) = at {
            grad[if to_filter { f } else { i }] += g;
        }
    }
    single(args.write(TensorValues::Float32(grad), shape)?)
}

/// Gradient of Dilation2D with respect to `x`.
pub fn dilation_2d_backprop_input(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    dilation_backprop(args, false)
}

/// Gradient of Dilation2D with respect to `filter`.
pub fn dilation_2d_backprop_filter(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    dilation_backprop(args, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(filter: i64, stride: i64, pad: &str) -> NamedAttrMap {
        NamedAttrMap::new()
            .with("filterSize", vec![filter])
            .with("strides", vec![stride])
            .with("pad", pad)
    }

    fn geometry(dims: Vec<usize>, spatial: usize, attrs: &NamedAttrMap) -> Result<PoolGeometry> {
        PoolGeometry::new(KernelName::MaxPool, &Shape::new(dims), spatial, attrs)
    }

    #[test]
    fn test_valid_geometry() {
        let g = geometry(vec![1, 4, 4, 1], 2, &attrs(2, 2, "valid")).unwrap();
        assert_eq!((g.out_h, g.out_w), (2, 2));
        let g = geometry(vec![1, 5, 5, 1], 2, &attrs(3, 1, "valid")).unwrap();
        assert_eq!((g.out_h, g.out_w), (3, 3));
        assert_eq!(g.output_shape().dims(), &[1, 3, 3, 1]);
    }

    #[test]
    fn test_same_geometry_pads() {
        let g = geometry(vec![1, 5, 5, 2], 2, &attrs(3, 2, "same")).unwrap();
        assert_eq!((g.out_h, g.out_w), (3, 3));
        assert_eq!((g.pad_top, g.pad_left), (1, 1));
    }

    #[test]
    fn test_3d_geometry() {
        let g = geometry(vec![2, 4, 3, 3, 1], 3, &attrs(2, 2, "same")).unwrap();
        assert_eq!((g.out_d, g.out_h, g.out_w), (2, 2, 2));
        assert_eq!(g.output_shape().dims(), &[2, 2, 2, 2, 1]);
        // A rank-4 input is not NDHWC.
        assert!(geometry(vec![1, 4, 4, 1], 3, &attrs(2, 2, "valid")).is_err());
    }

    #[test]
    fn test_dilated_window_extent() {
        let g = PoolGeometry::from_parts(
            KernelName::Dilation2D,
            &Shape::new(vec![1, 5, 5, 1]),
            &[2, 2],
            &[1, 1],
            &[2, 2],
            "valid",
        )
        .unwrap();
        // A 2x2 window at rate 2 spans 3 pixels.
        assert_eq!((g.out_h, g.out_w), (3, 3));
    }

    #[test]
    fn test_argmax_first_max_wins() {
        let g = geometry(vec![1, 2, 2, 1], 2, &attrs(2, 2, "valid")).unwrap();
        let x = [3.0, 3.0, 1.0, 2.0];
        assert_eq!(g.argmax(|i, _| x[i]), vec![Some((0, 0))]);
    }

    #[test]
    fn test_rejects_bad_pad() {
        let err = geometry(vec![1, 2, 2, 1], 2, &attrs(2, 2, "full")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }
}
