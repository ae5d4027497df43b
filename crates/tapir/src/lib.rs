//! # tapir
//!
//! A tensor engine with reverse-mode automatic differentiation.
//!
//! This is the facade crate: it re-exports the engine from `tapir-core`, the
//! CPU backend from `tapir-cpu`, and adds the public ops and the gradient
//! descriptors for every differentiable kernel.
//!
//! ## Usage
//!
//! ```rust
//! use tapir::prelude::*;
//!
//! let mut engine = tapir::cpu_engine().unwrap();
//! let x = ops::tensor1d(&mut engine, vec![1.0f32, 2.0, 3.0]).unwrap();
//! let g = engine
//!     .gradients(|e| ops::square(e, &x), &[&x], None)
//!     .unwrap();
//! let dx = g.grads[0].as_ref().unwrap();
//! assert_eq!(engine.read_sync(dx).unwrap().to_f32_vec().unwrap(), vec![2.0, 4.0, 6.0]);
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `tapir-core` | Engine, Tensor, Shape, DType, Backend trait, kernel and gradient registries, tape |
//! | `tapir-cpu` | CPU backend and its kernel table (rayon for large elementwise loops) |
//! | `tapir` | Ops, gradient descriptors, engine constructors |

pub use tapir_core::{
    backend::{Backend, DataId, TensorInfo},
    kernel::{AttrValue, KernelArgs, KernelConfig, KernelFn, NamedAttrMap, NamedTensorMap},
    slice::StridedSliceParams,
    DType, Engine, EngineConfig, Error, GradConfig, GradContext, GradMap, Gradients, KernelName,
    MemoryInfo, Result, Shape, Tensor, TensorId, TensorValues,
};

pub use tapir_cpu::{CpuBackend, CPU_BACKEND_NAME};

/// Gradient descriptors for the differentiable kernels.
pub mod gradients;

/// Public tensor operations.
pub mod ops;

/// An engine with the CPU backend active, its kernels registered and every
/// gradient descriptor installed. Configuration comes from the environment.
pub fn cpu_engine() -> Result<Engine> {
    engine_with_config(EngineConfig::from_env())
}

/// Like [`cpu_engine`] with an explicit configuration.
pub fn engine_with_config(config: EngineConfig) -> Result<Engine> {
    let mut engine = Engine::new(config);
    engine.register_backend(Box::new(CpuBackend::new()))?;
    tapir_cpu::register_kernels(engine.kernels_mut(), CPU_BACKEND_NAME)?;
    gradients::register_gradients(&mut engine)?;
    Ok(engine)
}

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::ops;
    pub use crate::ops::{Padding, TensorLike};
    pub use crate::{
        cpu_engine, engine_with_config, CpuBackend, DType, Engine, EngineConfig, Error, Gradients,
        Result, Shape, StridedSliceParams, Tensor, TensorValues,
    };
}
