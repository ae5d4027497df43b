use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use crate::backend::{Backend, DataId, ReadFuture, TensorInfo};
use crate::backprop::{self, GradStore, Gradients, Tape, TapeEntry, TapeGradient};
use crate::config::EngineConfig;
use crate::dtype::{DType, TensorValues};
use crate::error::{Error, Result};
use crate::gradient::{GradConfig, GradientRegistry};
use crate::kernel::{KernelArgs, KernelConfig, KernelRegistry, NamedAttrMap, NamedTensorMap};
use crate::op::{KernelName, TensorId};
use crate::shape::Shape;
use crate::tensor::{Tensor, TensorContainer};

// Engine: Dispatch, tape recording, scopes and memory
//
// The Engine is the explicit context every op runs against. It owns:
//
//   - the kernel and gradient registries
//   - the registered backends and the name of the active one
//   - the reference-count book: DataId → (backend holding it, ref count)
//   - the scope stack used by tidy()
//   - the tape, present while gradients() is running
//
// DISPATCH (run_kernel):
//
//   1. Fail on disposed inputs.
//   2. Resolve the kernel for the active backend, or for the configured
//      fallback backend when the active one has none.
//   3. Move every input buffer to the executing backend.
//   4. Call the kernel; count and track every output.
//   5. In debug mode, check float32 outputs for NaN.
//   6. While recording, append a tape entry with the tensors the
//      gradient descriptor asked to save.
//
// MEMORY:
//
//   Every live tensor holds one reference on its DataId. dispose() drops it;
//   the backend frees the buffer when the count reaches zero. A tensor is
//   tracked by the innermost scope open when it was created. end_scope()
//   disposes the scope's tensors that are neither kept nor returned, and
//   hands the returned ones to the parent scope.
//
// The engine is single-threaded. Independent engines share nothing.

struct DataEntry {
    backend: String,
    ref_count: usize,
}

struct Scope {
    id: usize,
    name: String,
    tracked: Vec<Tensor>,
}

/// Snapshot of the engine's memory book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Live (not disposed) tensors.
    pub num_tensors: usize,
    /// Distinct backend buffers referenced by live tensors.
    pub num_data_buffers: usize,
}

/// Tensor execution-and-gradient engine.
pub struct Engine {
    config: EngineConfig,
    kernels: KernelRegistry,
    gradients: GradientRegistry,
    backends: BTreeMap<String, Box<dyn Backend>>,
    active: Option<String>,
    data: HashMap<DataId, DataEntry>,
    num_tensors: usize,
    scopes: Vec<Scope>,
    next_scope_id: usize,
    tape: Option<Tape>,
    gradient_depth: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("active", &self.active)
            .field("num_tensors", &self.num_tensors)
            .field("scopes", &self.scopes.len())
            .field("gradient_depth", &self.gradient_depth)
            .finish()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            config,
            kernels: KernelRegistry::new(),
            gradients: GradientRegistry::new(),
            backends: BTreeMap::new(),
            active: None,
            data: HashMap::new(),
            num_tensors: 0,
            scopes: Vec::new(),
            next_scope_id: 1,
            tape: None,
            gradient_depth: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    // Registries

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    pub fn kernels_mut(&mut self) -> &mut KernelRegistry {
        &mut self.kernels
    }

    pub fn gradient_registry(&self) -> &GradientRegistry {
        &self.gradients
    }

    pub fn gradient_registry_mut(&mut self) -> &mut GradientRegistry {
        &mut self.gradients
    }

    pub fn register_kernel(&mut self, config: KernelConfig) -> Result<()> {
        self.kernels.register(config)
    }

    pub fn register_gradient(&mut self, config: GradConfig) -> Result<()> {
        self.gradients.register(config)
    }

    // Backends

    /// Register a backend. The first one registered becomes active.
    pub fn register_backend(&mut self, backend: Box<dyn Backend>) -> Result<()> {
        let name = backend.name().to_string();
        if self.backends.contains_key(&name) {
            return Err(Error::DuplicateRegistration {
                what: "backend",
                key: name,
            });
        }
        log::info!("registered backend '{name}'");
        self.backends.insert(name.clone(), backend);
        if self.active.is_none() {
            self.set_backend(&name)?;
        }
        Ok(())
    }

    /// Make `name` the active backend.
    pub fn set_backend(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(Error::BackendNotFound(name.to_string()));
        }
        log::info!("active backend set to '{name}'");
        self.active = Some(name.to_string());
        Ok(())
    }

    /// Name of the active backend.
    pub fn backend_name(&self) -> Result<&str> {
        self.active
            .as_deref()
            .ok_or_else(|| Error::BackendNotFound("<none selected>".to_string()))
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.keys().map(|s| s.as_str()).collect()
    }

    /// A registered backend by name.
    pub fn backend(&self, name: &str) -> Result<&dyn Backend> {
        self.backends
            .get(name)
            .map(|b| b.as_ref())
            .ok_or_else(|| Error::BackendNotFound(name.to_string()))
    }

    fn backend_mut(&mut self, name: &str) -> Result<&mut Box<dyn Backend>> {
        self.backends
            .get_mut(name)
            .ok_or_else(|| Error::BackendNotFound(name.to_string()))
    }

    /// Name of the backend currently holding `data_id`.
    pub fn backend_of(&self, data_id: DataId) -> Option<&str> {
        self.data.get(&data_id).map(|e| e.backend.as_str())
    }

    // Tensor creation and reading

    /// Create a tensor on the active backend from raw values.
    pub fn make_tensor(&mut self, values: TensorValues, shape: impl Into<Shape>) -> Result<Tensor> {
        let shape = shape.into();
        if values.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: values.len(),
                shape,
            });
        }
        let backend_name = self.backend_name()?.to_string();
        let dtype = values.dtype();
        let data_id = self.backend_mut(&backend_name)?.write(values, &shape)?;
        Ok(self.track_new(TensorInfo::new(data_id, shape, dtype), &backend_name))
    }

    /// Blocking read of a tensor's values.
    pub fn read_sync(&self, t: &Tensor) -> Result<TensorValues> {
        t.ensure_live()?;
        let backend = self.holder(t.data_id())?;
        self.backend(backend)?.read_sync(t.data_id())
    }

    /// Deferred read of a tensor's values.
    pub fn read(&self, t: &Tensor) -> ReadFuture {
        let backend = t
            .ensure_live()
            .and_then(|_| self.holder(t.data_id()))
            .and_then(|name| self.backend(name));
        match backend {
            Ok(b) => b.read(t.data_id()),
            Err(e) => Box::pin(std::future::ready(Err(e))),
        }
    }

    fn holder(&self, data_id: DataId) -> Result<&str> {
        self.backend_of(data_id)
            .ok_or_else(|| Error::Backend(format!("{data_id} is not held by any backend")))
    }

    /// Scalar fill, used by the backward pass for seeds and missing gradients.
    pub fn fill(&mut self, shape: &Shape, value: f64, dtype: DType) -> Result<Tensor> {
        let attrs = NamedAttrMap::new()
            .with("shape", shape.clone())
            .with("value", value)
            .with("dtype", dtype);
        self.run_kernel(KernelName::Fill, &NamedTensorMap::new(), &attrs)
    }

    /// Elementwise sum of two float32 tensors of the same shape.
    pub fn add_tensors(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let inputs = NamedTensorMap::new().with("a", a.clone()).with("b", b.clone());
        self.run_kernel(KernelName::Add, &inputs, &NamedAttrMap::new())
    }

    // Dispatch

    /// Run a kernel that produces exactly one output.
    pub fn run_kernel(
        &mut self,
        kernel: KernelName,
        inputs: &NamedTensorMap<Tensor>,
        attrs: &NamedAttrMap,
    ) -> Result<Tensor> {
        let mut outputs = self.run_kernel_multi(kernel, inputs, attrs)?;
        if outputs.len() != 1 {
            crate::bail!("kernel '{kernel}' returned {} outputs, expected 1", outputs.len());
        }
        Ok(outputs.remove(0))
    }

    /// Run a kernel and return all of its outputs.
    pub fn run_kernel_multi(
        &mut self,
        kernel: KernelName,
        inputs: &NamedTensorMap<Tensor>,
        attrs: &NamedAttrMap,
    ) -> Result<Vec<Tensor>> {
        self.dispatch(kernel, inputs, attrs, None)
    }

    fn dispatch(
        &mut self,
        kernel: KernelName,
        inputs: &NamedTensorMap<Tensor>,
        attrs: &NamedAttrMap,
        gradient: Option<TapeGradient>,
    ) -> Result<Vec<Tensor>> {
        for t in inputs.values() {
            t.ensure_live()?;
        }
        let backend_name = self.resolve_backend(kernel)?;
        for t in inputs.values() {
            self.move_data(t.data_id(), t.shape(), &backend_name)?;
        }
        let kernel_fn = self.kernels.lookup(kernel, &backend_name)?.kernel_fn;
        let infos = inputs.map(|t| t.info());

        log::trace!("dispatching '{kernel}' on '{backend_name}'");
        let start = self.config.debug.then(Instant::now);
        let backend = self.backend_mut(&backend_name)?;
        let out_infos = kernel_fn(KernelArgs {
            kernel,
            inputs: &infos,
            attrs,
            backend: backend.as_mut(),
        })?;
        let outputs: Vec<Tensor> = out_infos
            .into_iter()
            .map(|info| self.track_new(info, &backend_name))
            .collect();

        if let Some(start) = start {
            log::debug!("'{kernel}' took {:?}", start.elapsed());
            self.check_for_nan(kernel, &outputs)?;
        }

        if self.is_recording() {
            self.record(kernel, inputs, &outputs, attrs, gradient)?;
        }
        Ok(outputs)
    }

    fn resolve_backend(&self, kernel: KernelName) -> Result<String> {
        let active = self.backend_name()?;
        if self.kernels.contains(kernel, active) {
            return Ok(active.to_string());
        }
        if let Some(fallback) = &self.config.cpu_fallback {
            if fallback != active
                && self.backends.contains_key(fallback)
                && self.kernels.contains(kernel, fallback)
            {
                log::warn!(
                    "kernel '{kernel}' is not registered for backend '{active}', \
                     falling back to '{fallback}'"
                );
                return Ok(fallback.clone());
            }
        }
        Err(Error::KernelNotFound {
            kernel,
            backend: active.to_string(),
        })
    }

    /// Move a buffer to `target`, keeping its id.
    fn move_data(&mut self, data_id: DataId, shape: &Shape, target: &str) -> Result<()> {
        let source = match self.data.get(&data_id) {
            Some(entry) if entry.backend != target => entry.backend.clone(),
            Some(_) => return Ok(()),
            None => {
                return Err(Error::Backend(format!(
                    "{data_id} is not held by any backend"
                )))
            }
        };
        log::debug!("moving {data_id} from '{source}' to '{target}'");
        let values = self.backend(&source)?.read_sync(data_id)?;
        self.backend_mut(&source)?.dispose_data(data_id);
        self.backend_mut(target)?.store(data_id, values, shape)?;
        if let Some(entry) = self.data.get_mut(&data_id) {
            entry.backend = target.to_string();
        }
        Ok(())
    }

    fn check_for_nan(&self, kernel: KernelName, outputs: &[Tensor]) -> Result<()> {
        for t in outputs.iter().filter(|t| t.dtype() == DType::Float32) {
            if let TensorValues::Float32(v) = self.read_sync(t)? {
                if v.iter().any(|x| x.is_nan()) {
                    return Err(Error::NanDetected { kernel });
                }
            }
        }
        Ok(())
    }

    /// Count a new tensor over `info` and track it in the current scope.
    fn track_new(&mut self, info: TensorInfo, backend: &str) -> Tensor {
        self.data
            .entry(info.data_id)
            .or_insert_with(|| DataEntry {
                backend: backend.to_string(),
                ref_count: 0,
            })
            .ref_count += 1;
        self.num_tensors += 1;
        let t = Tensor::new(info.data_id, info.shape, info.dtype);
        self.track(&t);
        t
    }

    fn track(&mut self, t: &Tensor) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.tracked.push(t.clone());
        }
    }

    // Tape

    /// Whether kernel invocations are being recorded. A top-level backward
    /// pass is not recorded; a backward pass nested in an outer
    /// `gradients` call is.
    pub fn is_recording(&self) -> bool {
        self.tape.is_some() && self.gradient_depth > 0
    }

    fn record(
        &mut self,
        kernel: KernelName,
        inputs: &NamedTensorMap<Tensor>,
        outputs: &[Tensor],
        attrs: &NamedAttrMap,
        gradient: Option<TapeGradient>,
    ) -> Result<()> {
        let gradient = gradient.unwrap_or_else(|| match self.gradients.get(kernel) {
            Some(config) => TapeGradient::Defined(*config),
            None => TapeGradient::Undefined,
        });

        let mut to_save = Vec::new();
        if let TapeGradient::Defined(config) = gradient {
            for name in config.inputs_to_save {
                to_save.push(inputs.require(kernel, name)?.clone());
            }
            for (i, &save) in config.outputs_to_save.iter().enumerate() {
                if save {
                    let out = outputs.get(i).ok_or_else(|| {
                        Error::msg(format!("{kernel} has no output {i} to save"))
                    })?;
                    to_save.push(out.clone());
                }
            }
        }
        let saved: Vec<Tensor> = to_save.iter().map(|t| self.saved_clone(t)).collect();

        let entry = TapeEntry {
            id: 0,
            kernel,
            inputs: inputs.clone(),
            outputs: outputs.to_vec(),
            saved: saved.clone(),
            attrs: attrs.clone(),
            gradient,
        };
        self.push_entry(entry);
        // Recorded after the kernel so a reverse walk reaches the clone of an
        // output before the entry that produced it.
        for (original, clone) in to_save.iter().zip(saved) {
            self.push_passthrough(original, clone);
        }
        Ok(())
    }

    /// A kept, untracked clone owned by the tape.
    fn saved_clone(&mut self, t: &Tensor) -> Tensor {
        self.bump_ref(t.data_id());
        self.num_tensors += 1;
        let clone = Tensor::new(t.data_id(), t.shape().clone(), t.dtype());
        clone.mark_kept();
        clone
    }

    fn push_entry(&mut self, entry: TapeEntry) {
        if let Some(tape) = self.tape.as_mut() {
            tape.push(entry);
        }
    }

    fn push_passthrough(&mut self, x: &Tensor, y: Tensor) {
        self.push_entry(TapeEntry {
            id: 0,
            kernel: KernelName::Identity,
            inputs: NamedTensorMap::new().with("x", x.clone()),
            outputs: vec![y],
            saved: vec![],
            attrs: NamedAttrMap::new(),
            gradient: TapeGradient::Passthrough,
        });
    }

    fn bump_ref(&mut self, data_id: DataId) {
        if let Some(entry) = self.data.get_mut(&data_id) {
            entry.ref_count += 1;
        }
    }

    fn start_tape(&mut self) {
        if self.tape.is_none() {
            self.tape = Some(Tape::new());
        }
        self.gradient_depth += 1;
    }

    /// Leave one recording level. The entries stay on the tape until
    /// `release_tape` so the current backward pass can still read them.
    fn stop_recording(&mut self) {
        self.gradient_depth = self.gradient_depth.saturating_sub(1);
    }

    /// Drop the tape and its saved tensors once no gradient call is open.
    fn release_tape(&mut self) {
        if self.gradient_depth > 0 {
            return;
        }
        if let Some(tape) = self.tape.take() {
            log::debug!("releasing tape with {} entries", tape.len());
            let saved: Vec<Tensor> = tape.saved_tensors().cloned().collect();
            for t in saved {
                if !t.is_disposed() {
                    self.release(&t);
                }
            }
        }
    }

    // Tensor lifecycle

    /// Dispose a tensor. Fails if it was already disposed.
    pub fn dispose(&mut self, t: &Tensor) -> Result<()> {
        t.ensure_live()?;
        self.release(t);
        Ok(())
    }

    /// Dispose every tensor in `ts`.
    pub fn dispose_all<T: TensorContainer>(&mut self, ts: &T) -> Result<()> {
        for t in ts.tensors() {
            self.dispose(&t)?;
        }
        Ok(())
    }

    fn release(&mut self, t: &Tensor) {
        t.mark_disposed();
        self.num_tensors = self.num_tensors.saturating_sub(1);
        let data_id = t.data_id();
        let free = match self.data.get_mut(&data_id) {
            Some(entry) => {
                entry.ref_count = entry.ref_count.saturating_sub(1);
                (entry.ref_count == 0).then(|| entry.backend.clone())
            }
            None => None,
        };
        if let Some(backend) = free {
            self.data.remove(&data_id);
            if let Some(b) = self.backends.get_mut(&backend) {
                b.dispose_data(data_id);
            }
        }
    }

    /// Exempt a tensor from scope cleanup.
    pub fn keep(&self, t: &Tensor) -> Tensor {
        t.mark_kept();
        t.clone()
    }

    /// A new tensor (new id) over the same buffer.
    pub fn clone_tensor(&mut self, t: &Tensor) -> Result<Tensor> {
        t.ensure_live()?;
        let backend = self.holder(t.data_id())?.to_string();
        let clone = self.track_new(t.info(), &backend);
        if self.is_recording() {
            self.push_passthrough(t, clone.clone());
        }
        Ok(clone)
    }

    /// Identity whose gradient is zero and never fails.
    pub fn stop_gradient(&mut self, t: &Tensor) -> Result<Tensor> {
        let inputs = NamedTensorMap::new().with("x", t.clone());
        let mut out = self.dispatch(
            KernelName::Identity,
            &inputs,
            &NamedAttrMap::new(),
            Some(TapeGradient::Stopped),
        )?;
        out.pop()
            .ok_or_else(|| Error::Backend("Identity returned no output".to_string()))
    }

    pub fn memory(&self) -> MemoryInfo {
        MemoryInfo {
            num_tensors: self.num_tensors,
            num_data_buffers: self.data.len(),
        }
    }

    // Scopes

    /// Open a scope. Returns its id.
    pub fn start_scope(&mut self, name: &str) -> usize {
        let id = self.next_scope_id;
        self.next_scope_id += 1;
        self.scopes.push(Scope {
            id,
            name: name.to_string(),
            tracked: Vec::new(),
        });
        id
    }

    /// Close the innermost scope, keeping the tensors in `result`.
    pub fn end_scope<T: TensorContainer + ?Sized>(&mut self, result: &T) {
        let Some(scope) = self.scopes.pop() else {
            log::warn!("end_scope called without an open scope");
            return;
        };
        let keep: HashSet<TensorId> = result.tensors().iter().map(|t| t.id()).collect();
        let mut disposed = 0;
        let mut moved = 0;
        for t in scope.tracked {
            if t.is_disposed() || t.is_kept() {
                continue;
            }
            if keep.contains(&t.id()) {
                if let Some(parent) = self.scopes.last_mut() {
                    parent.tracked.push(t);
                }
                moved += 1;
            } else {
                self.release(&t);
                disposed += 1;
            }
        }
        log::debug!(
            "scope '{}' ended: {disposed} disposed, {moved} handed to parent",
            scope.name
        );
    }

    fn end_scopes_to(&mut self, id: usize, result: &dyn TensorContainer) {
        while let Some(top) = self.scopes.last() {
            let done = top.id == id;
            self.end_scope(result);
            if done {
                break;
            }
        }
    }

    /// Run `f` in a scope; every tensor it creates that is not part of its
    /// result (or kept) is disposed when it returns, on success or error.
    pub fn tidy<T, F>(&mut self, name: &str, f: F) -> Result<T>
    where
        T: TensorContainer,
        F: FnOnce(&mut Engine) -> Result<T>,
    {
        let id = self.start_scope(name);
        match f(self) {
            Ok(result) => {
                self.end_scopes_to(id, &result);
                Ok(result)
            }
            Err(e) => {
                self.end_scopes_to(id, &());
                Err(e)
            }
        }
    }

    // Gradients

    /// Evaluate `f` and the gradient of its result with respect to each of
    /// `xs`. The seed is `dy` when given (it must match the result's shape),
    /// ones otherwise.
    pub fn gradients<F>(&mut self, f: F, xs: &[&Tensor], dy: Option<&Tensor>) -> Result<Gradients>
    where
        F: FnOnce(&mut Engine) -> Result<Tensor>,
    {
        for x in xs {
            x.ensure_live()?;
        }
        self.start_tape();
        // Everything created here but not returned, including the value
        // when the backward pass fails, is disposed by the outer scope.
        let result = self.tidy("gradients", |engine| {
            let forward = engine.tidy("forward", f);
            engine.stop_recording();
            let value = forward?;
            let grads = engine.backward(&value, xs, dy)?;
            Ok(Gradients { value, grads })
        });
        self.release_tape();
        result
    }

    fn backward(&mut self, y: &Tensor, xs: &[&Tensor], dy: Option<&Tensor>) -> Result<Vec<Option<Tensor>>> {
        if let Some(dy) = dy {
            dy.ensure_live()?;
            if dy.shape() != y.shape() {
                return Err(Error::shape_mismatch(format!(
                    "the shape of dy {} must match the shape of y {}",
                    dy.shape(),
                    y.shape()
                )));
            }
        }
        let filtered = match self.tape.as_ref() {
            Some(tape) => backprop::filter_tape(tape.entries(), xs, y),
            None => Vec::new(),
        };
        log::debug!("backward pass over {} tape entries", filtered.len());

        self.tidy("backward", |engine| {
            let mut foreign = HashSet::new();
            let seed = match dy {
                Some(dy) => {
                    foreign.insert(dy.id());
                    dy.clone()
                }
                None => engine.fill(y.shape(), 1.0, DType::Float32)?,
            };
            let mut grads = GradStore::new();
            grads.insert(y.id(), seed);
            backprop::backpropagate(engine, &filtered, &mut grads, &foreign)?;
            Ok(xs
                .iter()
                .map(|x| grads.get(x.id()).cloned())
                .collect::<Vec<Option<Tensor>>>())
        })
    }
}
