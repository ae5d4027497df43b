use std::cell::Cell;
use std::rc::Rc;

use crate::backend::{DataId, TensorInfo};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::op::TensorId;
use crate::shape::Shape;

// Tensor: The handle every op consumes and produces
//
// A Tensor is an immutable-shape, dtype-tagged handle to a buffer owned by a
// backend. It never holds values itself: the engine maps its DataId to the
// backend that holds the buffer and to a reference count.
//
// MEMORY MODEL:
//
//   The inner data is wrapped in Rc. Cloning a Tensor is cheap and does NOT
//   create a new tensor: both handles have the same TensorId and disposing
//   one disposes the other. Engine::clone_tensor creates a new tensor (new
//   id) over the same buffer.
//
//   Each live tensor holds one reference on its DataId. Reshape-like kernels
//   return their input's DataId, so several tensors may share a buffer; the
//   buffer is freed when the last of them is disposed.
//
//   The disposed and kept flags are interior-mutable: the engine flips them
//   through shared handles held by scopes, the tape and the caller.

struct TensorInner {
    id: TensorId,
    shape: Shape,
    dtype: DType,
    data_id: DataId,
    disposed: Cell<bool>,
    kept: Cell<bool>,
}

/// An n-dimensional array living on some backend.
///
/// Tensors are created by an [`Engine`](crate::Engine) and are only
/// meaningful together with the engine that created them.
#[derive(Clone)]
pub struct Tensor {
    inner: Rc<TensorInner>,
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(id={}, shape={}, dtype={}{})",
            self.inner.id,
            self.inner.shape,
            self.inner.dtype,
            if self.is_disposed() { ", disposed" } else { "" },
        )
    }
}

impl Tensor {
    pub(crate) fn new(data_id: DataId, shape: Shape, dtype: DType) -> Self {
        Tensor {
            inner: Rc::new(TensorInner {
                id: TensorId::new(),
                shape,
                dtype,
                data_id,
                disposed: Cell::new(false),
                kept: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.inner.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.inner.shape.rank()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.inner.shape.elem_count()
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn data_id(&self) -> DataId {
        self.inner.data_id
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Whether the tensor is exempt from scope cleanup.
    pub fn is_kept(&self) -> bool {
        self.inner.kept.get()
    }

    /// Fail with `DisposedTensorUse` if this tensor has been disposed.
    pub fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::DisposedTensorUse { id: self.id() })
        } else {
            Ok(())
        }
    }

    /// The kernel-level view of this tensor.
    pub fn info(&self) -> TensorInfo {
        TensorInfo::new(self.data_id(), self.shape().clone(), self.dtype())
    }

    pub(crate) fn mark_disposed(&self) {
        self.inner.disposed.set(true);
    }

    pub(crate) fn mark_kept(&self) {
        self.inner.kept.set(true);
    }
}

// TensorContainer: values that can be returned from a scope
//
// `Engine::tidy` keeps every tensor reachable from the closure's result and
// disposes the rest. Anything the closure returns must say which tensors it
// holds.

/// A value holding zero or more tensors.
pub trait TensorContainer {
    fn collect_tensors(&self, out: &mut Vec<Tensor>);

    fn tensors(&self) -> Vec<Tensor> {
        let mut out = Vec::new();
        self.collect_tensors(&mut out);
        out
    }
}

impl TensorContainer for Tensor {
    fn collect_tensors(&self, out: &mut Vec<Tensor>) {
        out.push(self.clone());
    }
}

impl TensorContainer for () {
    fn collect_tensors(&self, _out: &mut Vec<Tensor>) {}
}

impl<T: TensorContainer> TensorContainer for Vec<T> {
    fn collect_tensors(&self, out: &mut Vec<Tensor>) {
        for t in self {
            t.collect_tensors(out);
        }
    }
}

impl<T: TensorContainer> TensorContainer for Option<T> {
    fn collect_tensors(&self, out: &mut Vec<Tensor>) {
        if let Some(t) = self {
            t.collect_tensors(out);
        }
    }
}

impl<A: TensorContainer, B: TensorContainer> TensorContainer for (A, B) {
    fn collect_tensors(&self, out: &mut Vec<Tensor>) {
        self.0.collect_tensors(out);
        self.1.collect_tensors(out);
    }
}

impl<A: TensorContainer, B: TensorContainer, C: TensorContainer> TensorContainer for (A, B, C) {
    fn collect_tensors(&self, out: &mut Vec<Tensor>) {
        self.0.collect_tensors(out);
        self.1.collect_tensors(out);
        self.2.collect_tensors(out);
    }
}

macro_rules! impl_plain_container {
    ($($t:ty),*) => {
        $(impl TensorContainer for $t {
            fn collect_tensors(&self, _out: &mut Vec<Tensor>) {}
        })*
    };
}

impl_plain_container!(bool, f32, f64, i32, i64, usize, String);
