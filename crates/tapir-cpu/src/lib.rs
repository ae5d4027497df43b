//! # tapir-cpu
//!
//! Reference CPU backend for tapir.
//!
//! [`CpuBackend`] keeps buffers in host memory. [`register_kernels`] adds
//! its kernel table to a [`KernelRegistry`](tapir_core::KernelRegistry)
//! under a given backend name. Large elementwise kernels run on the rayon
//! thread pool; every kernel returns synchronously.

pub mod backend;
pub mod kernels;

pub use backend::CpuBackend;
pub use kernels::register_kernels;

/// Name the CPU backend registers under by default.
pub const CPU_BACKEND_NAME: &str = "cpu";
