//! # tapir-core
//!
//! Core of the tapir tensor engine: dispatch, gradient tape, shape utilities
//! and tensor lifecycle.
//!
//! This crate provides:
//! - [`Engine`]: kernel dispatch, scopes, memory accounting and `gradients`
//! - [`Tensor`]: dtype-tagged, immutable-shape handle to a backend buffer
//! - [`Shape`] and the broadcast / strided-slice helpers in [`shape`] and [`slice`]
//! - [`Backend`] trait: the capability a compute backend provides
//! - [`KernelRegistry`] / [`GradientRegistry`]: kernel functions and
//!   gradient descriptors keyed by [`KernelName`]
// - DType: closed set of element types and host-side values
// - Op: kernel names and tensor ids
// - Kernel: attributes, named inputs, kernel registry
// - Gradient / Backprop: descriptors, tape, reverse walk
// - Config: engine flags

pub mod backend;
pub mod backprop;
pub mod config;
pub mod dtype;
pub mod engine;
pub mod error;
pub mod gradient;
pub mod kernel;
pub mod op;
pub mod shape;
pub mod slice;
pub mod tensor;

pub use backend::{Backend, DataId, ReadFuture, TensorInfo};
pub use backprop::{Gradients, TapeEntry, TapeGradient};
pub use config::EngineConfig;
pub use dtype::{DType, TensorValues, WithDType};
pub use engine::{Engine, MemoryInfo};
pub use error::{Error, Result};
pub use gradient::{GradConfig, GradContext, GradFn, GradMap, GradThunk, GradientRegistry};
pub use kernel::{
    AttrValue, KernelArgs, KernelConfig, KernelFn, KernelRegistry, NamedAttrMap, NamedTensorMap,
};
pub use op::{KernelName, TensorId};
pub use shape::Shape;
pub use slice::{SliceInfo, StridedSliceParams};
pub use tensor::{Tensor, TensorContainer};
