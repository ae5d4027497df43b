use std::borrow::Cow;
use std::collections::HashMap;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::kernel::NamedAttrMap;
use crate::op::KernelName;
use crate::tensor::Tensor;

// Gradient: Registry of gradient descriptors
//
// A descriptor says, for one kernel, which forward values the backward pass
// needs (`inputs_to_save`, `outputs_to_save`) and how to turn an output
// gradient into one gradient per input.
//
// `grad_fn` does not compute anything itself. It returns a GradMap of
// thunks, one per differentiable input, and the backward pass forces only
// the thunks whose input leads to a requested tensor. A thunk may call any
// op, including ops that are themselves recorded when gradients are nested.

/// Lazily computed gradient for one input.
pub type GradThunk = Box<dyn FnOnce(&mut Engine) -> Result<Tensor>>;

/// Gradient thunks by input name.
#[derive(Default)]
pub struct GradMap(Vec<(Cow<'static, str>, GradThunk)>);

impl GradMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(
        mut self,
        name: impl Into<Cow<'static, str>>,
        thunk: impl FnOnce(&mut Engine) -> Result<Tensor> + 'static,
    ) -> Self {
        self.0.push((name.into(), Box::new(thunk)));
        self
    }

    /// Remove and return the thunk for `name`.
    pub fn take(&mut self, name: &str) -> Option<GradThunk> {
        let pos = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.swap_remove(pos).1)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|(n, _)| n.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What a gradient function is called with.
pub struct GradContext<'a> {
    /// One gradient per kernel output, zeros where an output got none.
    pub dys: &'a [Tensor],
    /// Saved inputs in `inputs_to_save` order, then saved outputs.
    pub saved: &'a [Tensor],
    pub attrs: &'a NamedAttrMap,
}

impl GradContext<'_> {
    /// The gradient of the first output.
    pub fn dy(&self) -> Result<Tensor> {
        self.dys
            .first()
            .cloned()
            .ok_or_else(|| Error::msg("gradient function called without an output gradient"))
    }

    pub fn saved(&self, i: usize) -> Result<Tensor> {
        self.saved
            .get(i)
            .cloned()
            .ok_or_else(|| Error::msg(format!("saved tensor {i} is missing")))
    }
}

/// Builds the input gradient thunks of one kernel.
pub type GradFn = fn(&mut Engine, &GradContext<'_>) -> Result<GradMap>;

/// Gradient descriptor for one kernel.
#[derive(Clone, Copy)]
pub struct GradConfig {
    pub kernel: KernelName,
    pub inputs_to_save: &'static [&'static str],
    /// One flag per kernel output.
    pub outputs_to_save: &'static [bool],
    pub grad_fn: GradFn,
}

impl std::fmt::Debug for GradConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GradConfig")
            .field("kernel", &self.kernel)
            .field("inputs_to_save", &self.inputs_to_save)
            .field("outputs_to_save", &self.outputs_to_save)
            .finish()
    }
}

/// Mapping of kernel to gradient descriptor.
#[derive(Debug, Default)]
pub struct GradientRegistry {
    grads: HashMap<KernelName, GradConfig>,
}

impl GradientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, config: GradConfig) -> Result<()> {
        if self.grads.contains_key(&config.kernel) {
            return Err(Error::DuplicateRegistration {
                what: "gradient",
                key: config.kernel.to_string(),
            });
        }
        self.grads.insert(config.kernel, config);
        Ok(())
    }

    pub fn register_override(&mut self, config: GradConfig) {
        if self.grads.insert(config.kernel, config).is_some() {
            log::warn!("overriding gradient for kernel '{}'", config.kernel);
        }
    }

    pub fn lookup(&self, kernel: KernelName) -> Result<&GradConfig> {
        self.grads
            .get(&kernel)
            .ok_or(Error::GradientNotDefined { kernel })
    }

    pub fn get(&self, kernel: KernelName) -> Option<&GradConfig> {
        self.grads.get(&kernel)
    }

    pub fn contains(&self, kernel: KernelName) -> bool {
        self.grads.contains_key(&kernel)
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_grads(_engine: &mut Engine, _ctx: &GradContext<'_>) -> Result<GradMap> {
        Ok(GradMap::new())
    }

    fn config(kernel: KernelName) -> GradConfig {
        GradConfig {
            kernel,
            inputs_to_save: &["x"],
            outputs_to_save: &[],
            grad_fn: no_grads,
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = GradientRegistry::new();
        reg.register(config(KernelName::Exp)).unwrap();
        assert_eq!(reg.lookup(KernelName::Exp).unwrap().inputs_to_save, &["x"]);
        assert!(matches!(
            reg.lookup(KernelName::Log),
            Err(Error::GradientNotDefined { kernel: KernelName::Log })
        ));
    }

    #[test]
    fn test_duplicate_gradient() {
        let mut reg = GradientRegistry::new();
        reg.register(config(KernelName::Exp)).unwrap();
        assert!(matches!(
            reg.register(config(KernelName::Exp)),
            Err(Error::DuplicateRegistration { what: "gradient", .. })
        ));
        reg.register_override(config(KernelName::Exp));
        assert_eq!(reg.len(), 1);
    }
}
