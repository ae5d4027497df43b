use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::dtype::{DType, TensorValues};
use crate::error::Result;
use crate::shape::Shape;

// Backend: Abstraction over compute devices
//
// A backend owns tensor buffers, keyed by DataId. The engine never touches
// buffer contents directly: it writes host values in, reads host values
// out, and asks the backend to free a buffer once no tensor refers to it.
//
// Numeric work is not a method of this trait. Each backend registers kernel
// functions in the KernelRegistry under its name, and the engine calls them
// with the backend itself as an argument. Adding an operation therefore
// never changes this trait.
//
// Backends are object-safe so the engine can hold several at once and pick
// the active one by name at run time.

/// Key of one backend buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataId(u64);

impl Default for DataId {
    fn default() -> Self {
        Self::new()
    }
}

impl DataId {
    /// Generate a new unique buffer id. Ids are unique across backends so a
    /// buffer keeps its id when it moves between them.
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        DataId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data#{}", self.0)
    }
}

/// What a kernel knows about one tensor: where its values live and how to
/// interpret them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    pub data_id: DataId,
    pub shape: Shape,
    pub dtype: DType,
}

impl TensorInfo {
    pub fn new(data_id: DataId, shape: Shape, dtype: DType) -> Self {
        TensorInfo {
            data_id,
            shape,
            dtype,
        }
    }

    pub fn size(&self) -> usize {
        self.shape.elem_count()
    }
}

/// A deferred read of a buffer's values.
pub type ReadFuture = Pin<Box<dyn Future<Output = Result<TensorValues>>>>;

/// The capability every compute backend provides to the engine.
pub trait Backend: fmt::Debug {
    /// Name under which the backend is registered and its kernels are keyed.
    fn name(&self) -> &str;

    /// Store `values` under `id`, replacing any previous buffer.
    fn store(&mut self, id: DataId, values: TensorValues, shape: &Shape) -> Result<()>;

    /// Blocking read of a buffer's values.
    fn read_sync(&self, id: DataId) -> Result<TensorValues>;

    /// Free a buffer. Returns whether the id was present.
    fn dispose_data(&mut self, id: DataId) -> bool;

    /// Number of buffers currently held.
    fn num_data_ids(&self) -> usize;

    /// Whether a buffer is held by this backend.
    fn has(&self, id: DataId) -> bool;

    /// Store `values` in a fresh buffer.
    fn write(&mut self, values: TensorValues, shape: &Shape) -> Result<DataId> {
        let id = DataId::new();
        self.store(id, values, shape)?;
        Ok(id)
    }

    /// Allocate a zero-filled buffer.
    fn allocate(&mut self, shape: &Shape, dtype: DType) -> Result<DataId> {
        self.write(TensorValues::zeros(dtype, shape.elem_count()), shape)
    }

    /// Deferred read. Backends that compute on a device queue override this;
    /// the default resolves immediately from `read_sync`.
    fn read(&self, id: DataId) -> ReadFuture {
        let values = self.read_sync(id);
        Box::pin(std::future::ready(values))
    }
}
