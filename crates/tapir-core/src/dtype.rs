use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

// DType: Supported element types
//
// Every tensor carries one of a closed set of dtypes:
//
//   Float32  : 32-bit float, the default and the only gradient dtype
//   Int32    : signed 32-bit int, for indices and counts
//   Bool     : stored as one byte per element (0 or 1)
//   String   : variable-length UTF-8 values
//   Complex64: pairs of f32 (real, imaginary), stored interleaved

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Float32,
    Int32,
    Bool,
    String,
    Complex64,
}

impl DType {
    /// Size of one element in bytes. `None` for strings.
    pub fn size_in_bytes(&self) -> Option<usize> {
        match self {
            DType::Float32 => Some(4),
            DType::Int32 => Some(4),
            DType::Bool => Some(1),
            DType::String => None,
            DType::Complex64 => Some(8),
        }
    }

    /// Whether this dtype is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float32 | DType::Complex64)
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, DType::String)
    }

    /// The wider of two dtypes, used to make binary operands agree.
    ///
    /// `Complex64 > Float32 > Int32 > Bool`. Strings only combine with strings.
    pub fn upcast(self, other: DType) -> Result<DType> {
        use DType::*;
        match (self, other) {
            (String, String) => Ok(String),
            (String, d) | (d, String) => Err(Error::msg(format!(
                "cannot upcast string tensor with {d} tensor"
            ))),
            (Complex64, _) | (_, Complex64) => Ok(Complex64),
            (Float32, _) | (_, Float32) => Ok(Float32),
            (Int32, _) | (_, Int32) => Ok(Int32),
            (Bool, Bool) => Ok(Bool),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Float32 => "float32",
            DType::Int32 => "int32",
            DType::Bool => "bool",
            DType::String => "string",
            DType::Complex64 => "complex64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "float32" => Ok(DType::Float32),
            "int32" => Ok(DType::Int32),
            "bool" => Ok(DType::Bool),
            "string" => Ok(DType::String),
            "complex64" => Ok(DType::Complex64),
            other => Err(Error::msg(format!("unknown dtype '{other}'"))),
        }
    }
}

// TensorValues: host-side values of one tensor
//
// This is what backends accept when a tensor is created from raw values and
// what they hand back when a tensor is read. Complex values are interleaved
// (re0, im0, re1, im1, ...) so `Complex64(v).len()` is `v.len() / 2`.

/// Flat, row-major values of a tensor, tagged with their dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValues {
    Float32(Vec<f32>),
    Int32(Vec<i32>),
    Bool(Vec<u8>),
    String(Vec<String>),
    Complex64(Vec<f32>),
}

impl TensorValues {
    pub fn dtype(&self) -> DType {
        match self {
            TensorValues::Float32(_) => DType::Float32,
            TensorValues::Int32(_) => DType::Int32,
            TensorValues::Bool(_) => DType::Bool,
            TensorValues::String(_) => DType::String,
            TensorValues::Complex64(_) => DType::Complex64,
        }
    }

    /// Number of elements (not scalars: a complex element counts once).
    pub fn len(&self) -> usize {
        match self {
            TensorValues::Float32(v) => v.len(),
            TensorValues::Int32(v) => v.len(),
            TensorValues::Bool(v) => v.len(),
            TensorValues::String(v) => v.len(),
            TensorValues::Complex64(v) => v.len() / 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte size of the values, counting string bytes for string tensors.
    pub fn num_bytes(&self) -> usize {
        match self {
            TensorValues::String(v) => v.iter().map(|s| s.len()).sum(),
            other => other.len() * other.dtype().size_in_bytes().unwrap_or(0),
        }
    }

    /// `n` zero values of `dtype` (empty strings for string tensors).
    pub fn zeros(dtype: DType, n: usize) -> Self {
        match dtype {
            DType::Float32 => TensorValues::Float32(vec![0.0; n]),
            DType::Int32 => TensorValues::Int32(vec![0; n]),
            DType::Bool => TensorValues::Bool(vec![0; n]),
            DType::String => TensorValues::String(vec![String::new(); n]),
            DType::Complex64 => TensorValues::Complex64(vec![0.0; 2 * n]),
        }
    }

    /// `n` copies of `value` converted to `dtype`.
    pub fn filled(dtype: DType, n: usize, value: f64) -> Result<Self> {
        Ok(match dtype {
            DType::Float32 => TensorValues::Float32(vec![value as f32; n]),
            DType::Int32 => TensorValues::Int32(vec![value as i32; n]),
            DType::Bool => TensorValues::Bool(vec![(value != 0.0) as u8; n]),
            DType::Complex64 => {
                let mut v = vec![0.0f32; 2 * n];
                for pair in v.chunks_exact_mut(2) {
                    pair[0] = value as f32;
                }
                TensorValues::Complex64(v)
            }
            DType::String => {
                return Err(Error::msg("cannot fill a string tensor with a number"));
            }
        })
    }

    /// Numeric values as f32. Complex values yield their real part.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        Ok(match self {
            TensorValues::Float32(v) => v.clone(),
            TensorValues::Int32(v) => v.iter().map(|&x| x as f32).collect(),
            TensorValues::Bool(v) => v.iter().map(|&x| x as f32).collect(),
            TensorValues::Complex64(v) => v.chunks_exact(2).map(|p| p[0]).collect(),
            TensorValues::String(_) => return Err(self.not_numeric()),
        })
    }

    /// Numeric values as i32, truncating floats toward zero.
    pub fn to_i32_vec(&self) -> Result<Vec<i32>> {
        Ok(match self {
            TensorValues::Float32(v) => v.iter().map(|&x| x as i32).collect(),
            TensorValues::Int32(v) => v.clone(),
            TensorValues::Bool(v) => v.iter().map(|&x| x as i32).collect(),
            TensorValues::Complex64(v) => v.chunks_exact(2).map(|p| p[0] as i32).collect(),
            TensorValues::String(_) => return Err(self.not_numeric()),
        })
    }

    /// Truthiness of each element (non-zero is true).
    pub fn to_bool_vec(&self) -> Result<Vec<bool>> {
        Ok(match self {
            TensorValues::Float32(v) => v.iter().map(|&x| x != 0.0).collect(),
            TensorValues::Int32(v) => v.iter().map(|&x| x != 0).collect(),
            TensorValues::Bool(v) => v.iter().map(|&x| x != 0).collect(),
            TensorValues::Complex64(v) => v
                .chunks_exact(2)
                .map(|p| p[0] != 0.0 || p[1] != 0.0)
                .collect(),
            TensorValues::String(_) => return Err(self.not_numeric()),
        })
    }

    /// Convert to another dtype. Casting to or from strings is not supported
    /// (apart from the identity cast).
    pub fn cast(&self, dtype: DType) -> Result<TensorValues> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        Ok(match dtype {
            DType::Float32 => TensorValues::Float32(self.to_f32_vec()?),
            DType::Int32 => TensorValues::Int32(self.to_i32_vec()?),
            DType::Bool => TensorValues::Bool(
                self.to_bool_vec()?.into_iter().map(|b| b as u8).collect(),
            ),
            DType::Complex64 => {
                let re = self.to_f32_vec()?;
                TensorValues::Complex64(re.into_iter().flat_map(|r| [r, 0.0]).collect())
            }
            DType::String => {
                return Err(Error::msg(format!(
                    "cannot cast {} tensor to string",
                    self.dtype()
                )));
            }
        })
    }

    /// Pick elements by flat index, in order. Works for every dtype.
    pub fn gather(&self, indices: &[usize]) -> TensorValues {
        match self {
            TensorValues::Float32(v) => TensorValues::Float32(indices.iter().map(|&i| v[i]).collect()),
            TensorValues::Int32(v) => TensorValues::Int32(indices.iter().map(|&i| v[i]).collect()),
            TensorValues::Bool(v) => TensorValues::Bool(indices.iter().map(|&i| v[i]).collect()),
            TensorValues::String(v) => {
                TensorValues::String(indices.iter().map(|&i| v[i].clone()).collect())
            }
            TensorValues::Complex64(v) => TensorValues::Complex64(
                indices.iter().flat_map(|&i| [v[2 * i], v[2 * i + 1]]).collect(),
            ),
        }
    }

    /// The values of every part, one after another. All parts must share a
    /// dtype.
    pub fn concat(parts: &[TensorValues]) -> Result<TensorValues> {
        let Some(first) = parts.first() else {
            return Err(Error::msg("cannot concatenate zero value lists"));
        };
        let mut out = TensorValues::zeros(first.dtype(), 0);
        for part in parts {
            match (&mut out, part) {
                (TensorValues::Float32(a), TensorValues::Float32(b)) => a.extend_from_slice(b),
                (TensorValues::Int32(a), TensorValues::Int32(b)) => a.extend_from_slice(b),
                (TensorValues::Bool(a), TensorValues::Bool(b)) => a.extend_from_slice(b),
                (TensorValues::String(a), TensorValues::String(b)) => a.extend_from_slice(b),
                (TensorValues::Complex64(a), TensorValues::Complex64(b)) => a.extend_from_slice(b),
                (a, b) => {
                    return Err(Error::msg(format!(
                        "cannot concatenate {} values with {} values",
                        a.dtype(),
                        b.dtype()
                    )))
                }
            }
        }
        Ok(out)
    }

    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        match self {
            TensorValues::Float32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32_slice(&self) -> Option<&[i32]> {
        match self {
            TensorValues::Int32(v) => Some(v),
            _ => None,
        }
    }

    fn not_numeric(&self) -> Error {
        Error::msg(format!("expected a numeric tensor, got {}", self.dtype()))
    }
}

// WithDType: Trait that connects Rust element types to DType
//
// Lets op wrappers accept `Vec<f32>`, `Vec<i32>` or `Vec<bool>` and build the
// matching `TensorValues` without the caller naming the dtype.

/// Trait implemented by Rust types that can be stored in a tensor.
pub trait WithDType: Clone + 'static {
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Wrap a vector of this type as tensor values.
    fn into_values(values: Vec<Self>) -> TensorValues;
}

impl WithDType for f32 {
    const DTYPE: DType = DType::Float32;
    fn into_values(values: Vec<Self>) -> TensorValues {
        TensorValues::Float32(values)
    }
}

impl WithDType for i32 {
    const DTYPE: DType = DType::Int32;
    fn into_values(values: Vec<Self>) -> TensorValues {
        TensorValues::Int32(values)
    }
}

impl WithDType for bool {
    const DTYPE: DType = DType::Bool;
    fn into_values(values: Vec<Self>) -> TensorValues {
        TensorValues::Bool(values.into_iter().map(|b| b as u8).collect())
    }
}

impl WithDType for String {
    const DTYPE: DType = DType::String;
    fn into_values(values: Vec<Self>) -> TensorValues {
        TensorValues::String(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_size() {
        assert_eq!(DType::Float32.size_in_bytes(), Some(4));
        assert_eq!(DType::Bool.size_in_bytes(), Some(1));
        assert_eq!(DType::Complex64.size_in_bytes(), Some(8));
        assert_eq!(DType::String.size_in_bytes(), None);
    }

    #[test]
    fn test_upcast_order() {
        assert_eq!(DType::Bool.upcast(DType::Int32).unwrap(), DType::Int32);
        assert_eq!(DType::Int32.upcast(DType::Float32).unwrap(), DType::Float32);
        assert_eq!(DType::Float32.upcast(DType::Complex64).unwrap(), DType::Complex64);
        assert_eq!(DType::Bool.upcast(DType::Bool).unwrap(), DType::Bool);
        assert!(DType::String.upcast(DType::Float32).is_err());
    }

    #[test]
    fn test_parse_roundtrip() {
        for d in [DType::Float32, DType::Int32, DType::Bool, DType::String, DType::Complex64] {
            assert_eq!(d.as_str().parse::<DType>().unwrap(), d);
        }
        assert!("float64".parse::<DType>().is_err());
    }

    #[test]
    fn test_concat_keeps_order() {
        let v = TensorValues::concat(&[
            TensorValues::Int32(vec![1, 2]),
            TensorValues::Int32(vec![3]),
        ])
        .unwrap();
        assert_eq!(v, TensorValues::Int32(vec![1, 2, 3]));
        let mixed = [TensorValues::Int32(vec![1]), TensorValues::Float32(vec![1.0])];
        assert!(TensorValues::concat(&mixed).is_err());
    }

    #[test]
    fn test_complex_len_and_cast() {
        let c = TensorValues::Float32(vec![1.5, -2.0]).cast(DType::Complex64).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c, TensorValues::Complex64(vec![1.5, 0.0, -2.0, 0.0]));
        assert_eq!(c.to_f32_vec().unwrap(), vec![1.5, -2.0]);
    }

    #[test]
    fn test_bool_cast() {
        let b = TensorValues::Float32(vec![0.0, 2.0, -1.0]).cast(DType::Bool).unwrap();
        assert_eq!(b, TensorValues::Bool(vec![0, 1, 1]));
        assert!(TensorValues::String(vec!["a".into()]).cast(DType::Int32).is_err());
    }

    #[test]
    fn test_gather() {
        let v = TensorValues::Int32(vec![10, 20, 30]);
        assert_eq!(v.gather(&[2, 0, 0]), TensorValues::Int32(vec![30, 10, 10]));
    }
}
