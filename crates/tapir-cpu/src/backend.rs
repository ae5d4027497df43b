use std::collections::HashMap;

use tapir_core::backend::{Backend, DataId};
use tapir_core::dtype::TensorValues;
use tapir_core::error::{Error, Result};
use tapir_core::shape::Shape;

use crate::CPU_BACKEND_NAME;

// CpuBackend: host-memory buffers
//
// Buffers are plain TensorValues in a HashMap. Reads clone the values; the
// kernels in `crate::kernels` compute on those clones and write new buffers.

/// Reference backend keeping every buffer in host memory.
#[derive(Debug)]
pub struct CpuBackend {
    name: String,
    buffers: HashMap<DataId, TensorValues>,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    /// A CPU backend registered as `"cpu"`.
    pub fn new() -> Self {
        Self::with_name(CPU_BACKEND_NAME)
    }

    /// A CPU backend under another name, to run several side by side.
    pub fn with_name(name: impl Into<String>) -> Self {
        CpuBackend {
            name: name.into(),
            buffers: HashMap::new(),
        }
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn store(&mut self, id: DataId, values: TensorValues, shape: &Shape) -> Result<()> {
        if values.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                shape: shape.clone(),
                expected: shape.elem_count(),
                got: values.len(),
            });
        }
        self.buffers.insert(id, values);
        Ok(())
    }

    fn read_sync(&self, id: DataId) -> Result<TensorValues> {
        self.buffers
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Backend(format!("{id} not found on backend '{}'", self.name)))
    }

    fn dispose_data(&mut self, id: DataId) -> bool {
        self.buffers.remove(&id).is_some()
    }

    fn num_data_ids(&self) -> usize {
        self.buffers.len()
    }

    fn has(&self, id: DataId) -> bool {
        self.buffers.contains_key(&id)
    }
}
