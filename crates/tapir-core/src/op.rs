use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

// Op: Kernel names and tensor identity
//
// Every operation the engine can dispatch is a variant of KernelName. Kernel
// and gradient registries are keyed by it, so a typo is a compile error
// rather than a lookup failure at run time. `as_str()` gives the canonical
// name used in log lines and error messages, and `FromStr` parses it back.
//
// TensorId identifies one tensor handle. Gradient bookkeeping during the
// backward pass is keyed by it, the same as the tape's input/output lists.

/// Unique identifier for a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub(crate) u64);

impl Default for TensorId {
    fn default() -> Self {
        Self::new()
    }
}

impl TensorId {
    /// Generate a new unique tensor ID (uses a global atomic counter).
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TensorId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

macro_rules! kernel_names {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Closed set of dispatchable operations.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum KernelName {
            $($variant),*
        }

        impl KernelName {
            /// Every kernel name, in declaration order.
            pub const ALL: &'static [KernelName] = &[$(KernelName::$variant),*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(KernelName::$variant => $name),*
                }
            }
        }

        impl FromStr for KernelName {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($name => Ok(KernelName::$variant),)*
                    other => crate::bail!("unknown kernel '{other}'"),
                }
            }
        }
    };
}

kernel_names! {
    // Arithmetic
    Add => "Add",
    Sub => "Sub",
    Multiply => "Multiply",
    RealDiv => "RealDiv",
    FloorDiv => "FloorDiv",
    Maximum => "Maximum",
    Minimum => "Minimum",
    Neg => "Neg",
    // Elementwise math
    Exp => "Exp",
    Log => "Log",
    Square => "Square",
    Sqrt => "Sqrt",
    Abs => "Abs",
    Sin => "Sin",
    Cos => "Cos",
    Tan => "Tan",
    Relu => "Relu",
    Relu6 => "Relu6",
    Step => "Step",
    Round => "Round",
    IsInf => "IsInf",
    ClipByValue => "ClipByValue",
    Cast => "Cast",
    // Comparison and logic
    Greater => "Greater",
    GreaterEqual => "GreaterEqual",
    Less => "Less",
    LessEqual => "LessEqual",
    Equal => "Equal",
    LogicalAnd => "LogicalAnd",
    LogicalOr => "LogicalOr",
    LogicalNot => "LogicalNot",
    Select => "Select",
    // Reduction
    Sum => "Sum",
    DenseBincount => "DenseBincount",
    // Shape and data movement
    Reshape => "Reshape",
    ExpandDims => "ExpandDims",
    BroadcastTo => "BroadcastTo",
    Slice => "Slice",
    StridedSlice => "StridedSlice",
    PadV2 => "PadV2",
    Pack => "Pack",
    Unpack => "Unpack",
    Identity => "Identity",
    // Creation
    Fill => "Fill",
    ZerosLike => "ZerosLike",
    OnesLike => "OnesLike",
    // Pooling
    MaxPool => "MaxPool",
    MaxPoolGrad => "MaxPoolGrad",
    MaxPool3D => "MaxPool3D",
    MaxPool3DGrad => "MaxPool3DGrad",
    Dilation2D => "Dilation2D",
    Dilation2DBackpropInput => "Dilation2DBackpropInput",
    Dilation2DBackpropFilter => "Dilation2DBackpropFilter",
}

impl fmt::Display for KernelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
