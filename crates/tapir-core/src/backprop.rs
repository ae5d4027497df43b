// Backpropagation: Reverse-mode automatic differentiation over the tape
//
// While `Engine::gradients` runs its forward function, every kernel
// invocation is appended to the tape as a TapeEntry: the kernel, its named
// inputs, its outputs, the tensors its gradient descriptor asked to keep,
// and the descriptor itself.
//
// HOW IT WORKS:
//
//   1. filter_tape() keeps only the entries on a path from one of the xs to
//      y. Forward pass: an entry is reachable from xs if any input is. A
//      backward pass marks the entries whose outputs lead to y. Entries in
//      both sets survive, with their inputs pruned to those reachable from
//      xs. Stopped entries break reachability in both directions.
//
//   2. backpropagate() walks the filtered entries in reverse. For each one
//      it collects one gradient per output (zeros where none arrived), asks
//      the descriptor for its input thunks, forces the thunks of the pruned
//      inputs and sums the results into the running gradient of each input.
//
// ACCUMULATION: a tensor used by several entries receives the SUM of their
// contributions (multivariate chain rule). The previous partial sum is
// disposed as soon as it has been added in.
//
// HIGHER ORDER: the thunks run normal ops. When gradients are nested, the
// outer tape records those ops too, so the outer backward pass can
// differentiate through the inner one. Saved tensors are clones of the
// forward values, recorded as Passthrough entries to keep the graph
// connected.

use std::collections::{HashMap, HashSet};

use crate::dtype::DType;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::gradient::{GradConfig, GradContext};
use crate::kernel::{NamedAttrMap, NamedTensorMap};
use crate::op::{KernelName, TensorId};
use crate::tensor::{Tensor, TensorContainer};

/// How the backward pass treats a tape entry.
#[derive(Debug, Clone, Copy)]
pub enum TapeGradient {
    /// Use the registered descriptor.
    Defined(GradConfig),
    /// The single output's gradient is the single input's gradient.
    Passthrough,
    /// Marked non-differentiable: contributes nothing and never fails.
    Stopped,
    /// No descriptor registered. Fails if the backward pass reaches it.
    Undefined,
}

/// One recorded kernel invocation.
#[derive(Debug, Clone)]
pub struct TapeEntry {
    pub id: usize,
    pub kernel: KernelName,
    pub inputs: NamedTensorMap<Tensor>,
    pub outputs: Vec<Tensor>,
    pub saved: Vec<Tensor>,
    pub attrs: NamedAttrMap,
    pub gradient: TapeGradient,
}

/// Ordered log of recorded kernel invocations.
#[derive(Debug, Default)]
pub struct Tape {
    entries: Vec<TapeEntry>,
    next_id: usize,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, assigning its id.
    pub fn push(&mut self, mut entry: TapeEntry) {
        entry.id = self.next_id;
        self.next_id += 1;
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TapeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every saved tensor on the tape.
    pub fn saved_tensors(&self) -> impl Iterator<Item = &Tensor> {
        self.entries.iter().flat_map(|e| e.saved.iter())
    }
}

/// Entries of `tape` on a path from any of `xs` to `y`, in tape order.
pub fn filter_tape(tape: &[TapeEntry], xs: &[&Tensor], y: &Tensor) -> Vec<TapeEntry> {
    let mut from_x: HashSet<TensorId> = xs.iter().map(|x| x.id()).collect();
    let mut entries_from_x = HashSet::new();
    for entry in tape {
        if matches!(entry.gradient, TapeGradient::Stopped) {
            continue;
        }
        if entry.inputs.values().any(|t| from_x.contains(&t.id())) {
            from_x.extend(entry.outputs.iter().map(|o| o.id()));
            entries_from_x.insert(entry.id);
        }
    }

    let mut lead_to_y: HashSet<TensorId> = HashSet::from([y.id()]);
    let mut entries_to_y = HashSet::new();
    for entry in tape.iter().rev() {
        if matches!(entry.gradient, TapeGradient::Stopped) {
            continue;
        }
        if entry.outputs.iter().any(|o| lead_to_y.contains(&o.id())) {
            lead_to_y.extend(entry.inputs.values().map(|t| t.id()));
            entries_to_y.insert(entry.id);
        }
    }

    tape.iter()
        .filter(|e| entries_from_x.contains(&e.id) && entries_to_y.contains(&e.id))
        .map(|e| TapeEntry {
            inputs: e.inputs.filter(|t| from_x.contains(&t.id())),
            ..e.clone()
        })
        .collect()
}

/// Running gradients keyed by tensor.
#[derive(Debug, Default)]
pub struct GradStore {
    grads: HashMap<TensorId, Tensor>,
    /// Ids of the stored gradients themselves.
    held: HashSet<TensorId>,
}

impl GradStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: TensorId) -> Option<&Tensor> {
        self.grads.get(&id)
    }

    pub fn insert(&mut self, id: TensorId, grad: Tensor) {
        let grad_id = grad.id();
        if let Some(old) = self.grads.insert(id, grad) {
            self.held.remove(&old.id());
        }
        self.held.insert(grad_id);
    }

    /// Whether `t` is already stored as somebody's gradient.
    pub fn holds(&self, t: &Tensor) -> bool {
        self.held.contains(&t.id())
    }
}

/// Walk `filtered` in reverse, accumulating gradients into `grads`.
///
/// `foreign` lists tensors owned by the caller (an explicit seed); they are
/// never disposed here.
pub fn backpropagate(
    engine: &mut Engine,
    filtered: &[TapeEntry],
    grads: &mut GradStore,
    foreign: &HashSet<TensorId>,
) -> Result<()> {
    for entry in filtered.iter().rev() {
        if !entry.outputs.iter().any(|o| grads.get(o.id()).is_some()) {
            continue;
        }
        let mut dys = Vec::with_capacity(entry.outputs.len());
        for o in &entry.outputs {
            match grads.get(o.id()) {
                Some(g) => dys.push(g.clone()),
                None => dys.push(engine.fill(o.shape(), 0.0, o.dtype())?),
            }
        }

        match entry.gradient {
            TapeGradient::Stopped => continue,
            TapeGradient::Undefined => {
                return Err(Error::GradientNotDefined {
                    kernel: entry.kernel,
                });
            }
            TapeGradient::Passthrough => {
                for (name, x) in entry.inputs.iter() {
                    let dy = dys[0].clone();
                    accumulate(engine, entry.kernel, name, x, dy, grads, foreign)?;
                }
            }
            TapeGradient::Defined(config) => {
                let ctx = GradContext {
                    dys: &dys,
                    saved: &entry.saved,
                    attrs: &entry.attrs,
                };
                let mut thunks = (config.grad_fn)(engine, &ctx)?;
                let available = thunks.names();
                for (name, x) in entry.inputs.iter() {
                    let thunk = thunks.take(name).ok_or_else(|| Error::MissingGradient {
                        kernel: entry.kernel,
                        input: name.to_string(),
                        available: available.clone(),
                    })?;
                    let dx = engine.tidy("gradient", |e| thunk(e))?;
                    accumulate(engine, entry.kernel, name, x, dx, grads, foreign)?;
                }
            }
        }
    }
    Ok(())
}

fn accumulate(
    engine: &mut Engine,
    kernel: KernelName,
    name: &str,
    x: &Tensor,
    dx: Tensor,
    grads: &mut GradStore,
    foreign: &HashSet<TensorId>,
) -> Result<()> {
    if dx.dtype() != DType::Float32 {
        return Err(Error::DTypeMismatch {
            arg: name.to_string(),
            op: format!("gradient of {kernel}"),
            expected: "a float32".to_string(),
            got: dx.dtype(),
        });
    }
    if dx.shape() != x.shape() {
        return Err(Error::shape_mismatch(format!(
            "error in gradient for op {kernel}: the gradient of input '{name}' has shape {}, \
             which does not match the shape of the input {}",
            dx.shape(),
            x.shape()
        )));
    }
    // Every stored gradient must be its own tensor so disposing a partial
    // sum never frees a value that is still in use.
    let dx = if grads.holds(&dx) || dx.is_kept() || foreign.contains(&dx.id()) {
        engine.clone_tensor(&dx)?
    } else {
        dx
    };
    let sum = match grads.get(x.id()) {
        None => dx,
        Some(current) => {
            let current = current.clone();
            let sum = engine.add_tensors(&current, &dx)?;
            if !current.is_kept() && !foreign.contains(&current.id()) && !current.is_disposed() {
                engine.dispose(&current)?;
            }
            sum
        }
    };
    grads.insert(x.id(), sum);
    Ok(())
}

// Gradients: the result of Engine::gradients

/// The value of the differentiated function and one gradient per input.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub value: Tensor,
    /// `None` where the input does not reach the value.
    pub grads: Vec<Option<Tensor>>,
}

impl Gradients {
    /// The gradient of the `i`-th input.
    pub fn grad(&self, i: usize) -> Option<&Tensor> {
        self.grads.get(i).and_then(|g| g.as_ref())
    }
}

impl TensorContainer for Gradients {
    fn collect_tensors(&self, out: &mut Vec<Tensor>) {
        out.push(self.value.clone());
        self.grads.collect_tensors(out);
    }
}
