use crate::dtype::DType;
use crate::op::{KernelName, TensorId};
use crate::shape::Shape;

/// All errors that can occur within tapir.
///
/// Every variant is a programming or usage error surfaced synchronously at
/// the point of violation. The engine never retries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Incompatible shapes: a failed broadcast, a gradient whose shape does
    /// not match its input, out-of-bounds slice parameters, and so on.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Element count mismatch when creating a tensor from raw values.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Axis index out of range for the tensor's rank.
    #[error("axis {axis} is out of range for a tensor of rank {rank}")]
    AxisOutOfRange { axis: i64, rank: usize },

    /// A tensor of the wrong dtype was passed to an operation argument.
    #[error("argument '{arg}' passed to '{op}' must be {expected} tensor, but got {got} tensor")]
    DTypeMismatch {
        arg: String,
        op: String,
        expected: String,
        got: DType,
    },

    /// No kernel registered for this (kernel, backend) pair.
    #[error("kernel '{kernel}' not implemented for backend '{backend}'")]
    KernelNotFound { kernel: KernelName, backend: String },

    /// No backend registered under this name, or no backend selected.
    #[error("backend '{0}' is not registered")]
    BackendNotFound(String),

    /// The backward pass reached a kernel without a gradient descriptor.
    #[error("cannot compute gradient: gradient function not found for {kernel}")]
    GradientNotDefined { kernel: KernelName },

    /// A gradient function did not produce a gradient for an input the
    /// backward pass needs.
    #[error("cannot backprop through input '{input}' of {kernel}; gradients available for: {available:?}")]
    MissingGradient {
        kernel: KernelName,
        input: String,
        available: Vec<String>,
    },

    /// Operation on a tensor that has already been disposed.
    #[error("tensor {id} is already disposed")]
    DisposedTensorUse { id: TensorId },

    /// A kernel, gradient or backend was registered twice without override.
    #[error("{what} '{key}' is already registered")]
    DuplicateRegistration { what: &'static str, key: String },

    /// Conflicting or malformed strided-slice masks.
    #[error("invalid slice mask: {0}")]
    InvalidSliceMask(String),

    /// A kernel was invoked without one of its named inputs.
    #[error("kernel '{kernel}' is missing input '{name}'")]
    MissingInput { kernel: KernelName, name: String },

    /// A kernel was invoked without one of its attributes.
    #[error("missing attribute '{0}'")]
    MissingAttr(String),

    /// An attribute holds a value of the wrong kind.
    #[error("attribute '{name}' must be {expected}")]
    AttrType { name: String, expected: &'static str },

    /// A malformed argument to an op wrapper or a kernel.
    #[error("error in {op}: {msg}")]
    InvalidArgument { op: String, msg: String },

    /// Debug mode found a NaN in a float32 kernel output.
    #[error("the result of '{kernel}' contains NaN")]
    NanDetected { kernel: KernelName },

    /// Failure reported by a backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn invalid_argument(op: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::InvalidArgument {
            op: op.into(),
            msg: msg.into(),
        }
    }

    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Error::ShapeMismatch(msg.into())
    }
}

/// Convenience Result type used throughout tapir.
pub type Result<T> = std::result::Result<T, Error>;

/// Early return with a formatted [`Error::Msg`].
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
