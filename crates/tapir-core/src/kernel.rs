use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use crate::backend::{Backend, TensorInfo};
use crate::dtype::{DType, TensorValues};
use crate::error::{Error, Result};
use crate::op::KernelName;
use crate::shape::Shape;

// Kernel: Registry of backend-specific kernel functions
//
// A kernel is a plain function pointer keyed by (KernelName, backend name).
// The engine resolves it at dispatch time and calls it with the inputs'
// TensorInfos, the attributes and the executing backend. The kernel reads
// input values from the backend, computes, writes its outputs back and
// returns their TensorInfos.
//
// Registration is write-once per key: a second `register` for the same
// pair fails, `register_override` replaces and warns.

// Attributes

/// One kernel attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    DType(DType),
    Str(String),
    Shape(Shape),
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(v: Vec<i64>) -> Self {
        AttrValue::Ints(v)
    }
}

impl From<Vec<f64>> for AttrValue {
    fn from(v: Vec<f64>) -> Self {
        AttrValue::Floats(v)
    }
}

impl From<DType> for AttrValue {
    fn from(v: DType) -> Self {
        AttrValue::DType(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<Shape> for AttrValue {
    fn from(v: Shape) -> Self {
        AttrValue::Shape(v)
    }
}

/// Kernel attributes by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedAttrMap(BTreeMap<&'static str, AttrValue>);

macro_rules! attr_getter {
    ($fn_name:ident, $variant:ident, $ty:ty, $expected:literal) => {
        pub fn $fn_name(&self, name: &str) -> Result<$ty> {
            match self.get(name)? {
                AttrValue::$variant(v) => Ok(v.clone()),
                _ => Err(Error::AttrType {
                    name: name.to_string(),
                    expected: $expected,
                }),
            }
        }
    };
}

impl NamedAttrMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &'static str, value: impl Into<AttrValue>) -> Self {
        self.0.insert(name, value.into());
        self
    }

    pub fn insert(&mut self, name: &'static str, value: impl Into<AttrValue>) {
        self.0.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Result<&AttrValue> {
        self.0.get(name).ok_or_else(|| Error::MissingAttr(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    attr_getter!(get_bool, Bool, bool, "a bool");
    attr_getter!(get_int, Int, i64, "an int");
    attr_getter!(get_ints, Ints, Vec<i64>, "a list of ints");
    attr_getter!(get_floats, Floats, Vec<f64>, "a list of floats");
    attr_getter!(get_dtype, DType, DType, "a dtype");
    attr_getter!(get_str, Str, String, "a string");
    attr_getter!(get_shape, Shape, Shape, "a shape");

    /// Float attribute; integer values are accepted too.
    pub fn get_float(&self, name: &str) -> Result<f64> {
        match self.get(name)? {
            AttrValue::Float(v) => Ok(*v),
            AttrValue::Int(v) => Ok(*v as f64),
            _ => Err(Error::AttrType {
                name: name.to_string(),
                expected: "a float",
            }),
        }
    }

    /// Bool attribute, `default` when absent.
    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool> {
        if self.contains(name) {
            self.get_bool(name)
        } else {
            Ok(default)
        }
    }

    /// Integer-list attribute, `None` when absent.
    pub fn ints_opt(&self, name: &str) -> Result<Option<Vec<i64>>> {
        if self.contains(name) {
            self.get_ints(name).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &AttrValue)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }
}

// Named inputs

/// Ordered kernel inputs by name. Variadic kernels such as Pack name their
/// inputs by position ("0", "1", ...).
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensorMap<T>(Vec<(Cow<'static, str>, T)>);

impl<T> Default for NamedTensorMap<T> {
    fn default() -> Self {
        NamedTensorMap(Vec::new())
    }
}

impl<T> NamedTensorMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inputs named by their position.
    pub fn indexed(values: impl IntoIterator<Item = T>) -> Self {
        NamedTensorMap(
            values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Cow::Owned(i.to_string()), v))
                .collect(),
        )
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<Cow<'static, str>>, value: T) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace the input called `name`.
    pub fn insert(&mut self, name: impl Into<Cow<'static, str>>, value: T) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// The input called `name`, or `MissingInput`.
    pub fn require(&self, kernel: KernelName, name: &str) -> Result<&T> {
        self.get(name).ok_or_else(|| Error::MissingInput {
            kernel,
            name: name.to_string(),
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|(n, _)| n.as_ref()).collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.0.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(n, v)| (n.as_ref(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> NamedTensorMap<U> {
        NamedTensorMap(self.0.iter().map(|(n, v)| (n.clone(), f(v))).collect())
    }

    /// The inputs for which `keep` holds, names unchanged.
    pub fn filter(&self, mut keep: impl FnMut(&T) -> bool) -> Self
    where
        T: Clone,
    {
        NamedTensorMap(self.0.iter().filter(|(_, v)| keep(v)).cloned().collect())
    }
}

// Kernel functions

/// Everything a kernel function is called with.
pub struct KernelArgs<'a> {
    pub kernel: KernelName,
    pub inputs: &'a NamedTensorMap<TensorInfo>,
    pub attrs: &'a NamedAttrMap,
    pub backend: &'a mut dyn Backend,
}

impl KernelArgs<'_> {
    pub fn input(&self, name: &str) -> Result<&TensorInfo> {
        self.inputs.require(self.kernel, name)
    }

    /// Read the values of the input called `name`.
    pub fn read(&self, name: &str) -> Result<TensorValues> {
        let info = self.input(name)?;
        self.backend.read_sync(info.data_id)
    }

    /// Store `values` as a new output buffer.
    pub fn write(&mut self, values: TensorValues, shape: Shape) -> Result<TensorInfo> {
        if values.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: values.len(),
                shape,
            });
        }
        let dtype = values.dtype();
        let data_id = self.backend.write(values, &shape)?;
        Ok(TensorInfo::new(data_id, shape, dtype))
    }
}

/// A backend kernel.
pub type KernelFn = fn(KernelArgs<'_>) -> Result<Vec<TensorInfo>>;

/// One registered kernel.
#[derive(Clone)]
pub struct KernelConfig {
    pub kernel: KernelName,
    pub backend: String,
    pub kernel_fn: KernelFn,
}

impl KernelConfig {
    pub fn new(kernel: KernelName, backend: impl Into<String>, kernel_fn: KernelFn) -> Self {
        KernelConfig {
            kernel,
            backend: backend.into(),
            kernel_fn,
        }
    }
}

impl std::fmt::Debug for KernelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KernelConfig({} on {})", self.kernel, self.backend)
    }
}

/// Mapping of (kernel, backend) to kernel function.
#[derive(Debug, Default)]
pub struct KernelRegistry {
    kernels: HashMap<(KernelName, String), KernelConfig>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kernel. Fails if the (kernel, backend) pair is taken.
    pub fn register(&mut self, config: KernelConfig) -> Result<()> {
        let key = (config.kernel, config.backend.clone());
        if self.kernels.contains_key(&key) {
            return Err(Error::DuplicateRegistration {
                what: "kernel",
                key: format!("{} on backend '{}'", config.kernel, config.backend),
            });
        }
        self.kernels.insert(key, config);
        Ok(())
    }

    /// Register a kernel, replacing any existing one for the same pair.
    pub fn register_override(&mut self, config: KernelConfig) {
        let key = (config.kernel, config.backend.clone());
        if self.kernels.contains_key(&key) {
            log::warn!(
                "overriding kernel '{}' for backend '{}'",
                config.kernel,
                config.backend
            );
        }
        self.kernels.insert(key, config);
    }

    pub fn lookup(&self, kernel: KernelName, backend: &str) -> Result<&KernelConfig> {
        self.kernels
            .get(&(kernel, backend.to_string()))
            .ok_or_else(|| Error::KernelNotFound {
                kernel,
                backend: backend.to_string(),
            })
    }

    pub fn contains(&self, kernel: KernelName, backend: &str) -> bool {
        self.kernels.contains_key(&(kernel, backend.to_string()))
    }

    pub fn unregister(&mut self, kernel: KernelName, backend: &str) -> Option<KernelConfig> {
        self.kernels.remove(&(kernel, backend.to_string()))
    }

    /// Every kernel registered for `backend`, sorted.
    pub fn kernels_for_backend(&self, backend: &str) -> Vec<KernelName> {
        let mut names: Vec<_> = self
            .kernels
            .values()
            .filter(|c| c.backend == backend)
            .map(|c| c.kernel)
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
