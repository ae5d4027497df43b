// Ops: User-facing tensor operations
//
// Every op is a free function taking the engine first. Arguments that accept
// "anything tensor-like" go through convert_to_tensor, which creates a tensor
// on the active backend for plain Rust values and validates the dtype of
// existing tensors. The op then builds its named inputs and attributes and
// dispatches one kernel through Engine::run_kernel, which records it on the
// tape while gradients are being computed.

use tapir_core::dtype::{DType, TensorValues, WithDType};
use tapir_core::error::{Error, Result};
use tapir_core::kernel::{NamedAttrMap, NamedTensorMap};
use tapir_core::op::KernelName;
use tapir_core::shape::Shape;
use tapir_core::{Engine, Tensor};

pub mod arithmetic;
pub mod creation;
pub mod logical;
pub mod pool;
pub mod reduction;
pub mod shape;
pub mod unary;

pub use arithmetic::*;
pub use creation::*;
pub use logical::*;
pub use pool::*;
pub use reduction::*;
pub use shape::*;
pub use unary::*;

/// What dtype an argument must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseAs {
    /// Any numeric dtype (not string).
    Numeric,
    /// Numeric or string.
    Any,
    /// Exactly this dtype. Plain values are converted to it.
    DType(DType),
}

/// Where the data of a tensor-like argument comes from.
pub enum TensorSource {
    Tensor(Tensor),
    Values(TensorValues, Shape),
}

/// Values an op accepts wherever it takes a tensor.
pub trait TensorLike {
    /// `check_shape` asks nested inputs to reject ragged rows.
    fn into_source(self, check_shape: bool) -> Result<TensorSource>;
}

impl TensorLike for Tensor {
    fn into_source(self, _check_shape: bool) -> Result<TensorSource> {
        Ok(TensorSource::Tensor(self))
    }
}

impl TensorLike for &Tensor {
    fn into_source(self, _check_shape: bool) -> Result<TensorSource> {
        Ok(TensorSource::Tensor(self.clone()))
    }
}

macro_rules! scalar_like {
    ($($t:ty),*) => {
        $(
            impl TensorLike for $t {
                fn into_source(self, _check_shape: bool) -> Result<TensorSource> {
                    Ok(TensorSource::Values(<$t>::into_values(vec![self]), Shape::scalar()))
                }
            }

            impl TensorLike for Vec<$t> {
                fn into_source(self, _check_shape: bool) -> Result<TensorSource> {
                    let shape = Shape::from(self.len());
                    Ok(TensorSource::Values(<$t>::into_values(self), shape))
                }
            }

            impl TensorLike for &[$t] {
                fn into_source(self, check_shape: bool) -> Result<TensorSource> {
                    self.to_vec().into_source(check_shape)
                }
            }

            impl TensorLike for Vec<Vec<$t>> {
                fn into_source(self, check_shape: bool) -> Result<TensorSource> {
                    let cols = self.first().map_or(0, |r| r.len());
                    if check_shape {
                        if let Some(i) = self.iter().position(|r| r.len() != cols) {
                            return Err(Error::shape_mismatch(format!(
                                "element arr[{i}] should have {cols} elements, but has {} elements",
                                self[i].len()
                            )));
                        }
                    }
                    let shape = Shape::from((self.len(), cols));
                    let flat: Vec<$t> = self.into_iter().flatten().collect();
                    Ok(TensorSource::Values(<$t>::into_values(flat), shape))
                }
            }

            impl<S: Into<Shape>> TensorLike for (Vec<$t>, S) {
                fn into_source(self, _check_shape: bool) -> Result<TensorSource> {
                    Ok(TensorSource::Values(<$t>::into_values(self.0), self.1.into()))
                }
            }
        )*
    };
}

scalar_like!(f32, i32, bool, String);

impl TensorLike for f64 {
    fn into_source(self, check_shape: bool) -> Result<TensorSource> {
        (self as f32).into_source(check_shape)
    }
}

impl TensorLike for &str {
    fn into_source(self, check_shape: bool) -> Result<TensorSource> {
        self.to_string().into_source(check_shape)
    }
}

impl TensorLike for (TensorValues, Shape) {
    fn into_source(self, _check_shape: bool) -> Result<TensorSource> {
        Ok(TensorSource::Values(self.0, self.1))
    }
}

fn check_dtype(parse_as: ParseAs, got: DType, arg: &str, op: &str) -> Result<()> {
    let expected = match parse_as {
        ParseAs::Any => return Ok(()),
        ParseAs::Numeric if got.is_numeric() => return Ok(()),
        ParseAs::Numeric => "numeric".to_string(),
        ParseAs::DType(d) if d == got => return Ok(()),
        ParseAs::DType(d) => d.to_string(),
    };
    Err(Error::DTypeMismatch {
        arg: arg.to_string(),
        op: op.to_string(),
        expected,
        got,
    })
}

/// Turn `x` into a tensor for argument `arg` of `op`.
///
/// Existing tensors are returned as they are after their dtype is checked.
/// Plain values become a new tensor on the active backend, converted to the
/// requested dtype when one is given.
pub fn convert_to_tensor(
    engine: &mut Engine,
    x: impl TensorLike,
    arg: &str,
    op: &str,
    parse_as: ParseAs,
) -> Result<Tensor> {
    match x.into_source(engine.config().check_shape_consistency)? {
        TensorSource::Tensor(t) => {
            t.ensure_live()?;
            check_dtype(parse_as, t.dtype(), arg, op)?;
            Ok(t)
        }
        TensorSource::Values(values, shape) => {
            let values = match parse_as {
                ParseAs::DType(d) if values.dtype() != d => values.cast(d)?,
                _ => values,
            };
            check_dtype(parse_as, values.dtype(), arg, op)?;
            engine.make_tensor(values, shape)
        }
    }
}

/// Dispatch a single-output kernel.
pub(crate) fn run(
    engine: &mut Engine,
    kernel: KernelName,
    inputs: NamedTensorMap<Tensor>,
    attrs: NamedAttrMap,
) -> Result<Tensor> {
    engine.run_kernel(kernel, &inputs, &attrs)
}

pub(crate) fn run1(engine: &mut Engine, kernel: KernelName, x: &Tensor) -> Result<Tensor> {
    run(engine, kernel, NamedTensorMap::new().with("x", x.clone()), NamedAttrMap::new())
}

/// Axis list attribute value.
pub(crate) fn axis_attr(axes: &[usize]) -> Vec<i64> {
    axes.iter().map(|&a| a as i64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_dtype() {
        assert!(check_dtype(ParseAs::Any, DType::String, "x", "f").is_ok());
        assert!(check_dtype(ParseAs::Numeric, DType::Int32, "x", "f").is_ok());
        let err = check_dtype(ParseAs::Numeric, DType::String, "x", "neg").unwrap_err();
        assert_eq!(
            err.to_string(),
            "argument 'x' passed to 'neg' must be numeric tensor, but got string tensor"
        );
        let err = check_dtype(ParseAs::DType(DType::Int32), DType::Float32, "x", "denseBincount")
            .unwrap_err();
        assert!(matches!(err, Error::DTypeMismatch { .. }));
    }

    #[test]
    fn test_nested_rows_must_match() {
        let ragged = vec![vec![1.0f32, 2.0], vec![3.0]];
        assert!(matches!(ragged.clone().into_source(true), Err(Error::ShapeMismatch(_))));
        // Without the check the ragged rows reach tensor creation unchanged.
        assert!(ragged.into_source(false).is_ok());
    }
}
