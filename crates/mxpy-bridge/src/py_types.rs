//! Dynamic-object host value model.
//!
//! ## Type Hierarchy
//!
//! - `PyValue`: enum covering every value the bridge understands
//! - `PyList` / `PyDict`: shared, mutable containers
//! - `PyCallable`: a callable value
//! - `PyObject`: anything else (opaque)
//!
//! Containers are reference types: cloning a `PyList` clones the handle,
//! not the items. Arrays live in [`crate::py_array`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use num_complex::Complex64;
use parking_lot::RwLock;
use smol_str::SmolStr;

use crate::error::{BridgeError, BridgeResult};
use crate::ownership::MxWrapper;
use crate::py_array::NdArray;

// ============================================================================
// PyValue
// ============================================================================

/// Any dynamic-object host value
#[derive(Debug, Clone)]
pub enum PyValue {
    /// `None`
    None,

    /// `bool`
    Bool(bool),

    /// `int` (i64 on the bridge)
    Int(i64),

    /// `float`
    Float(f64),

    /// `complex`
    Complex(Complex64),

    /// `str`
    String(SmolStr),

    /// `list`
    List(PyList),

    /// `tuple`
    Tuple(Vec<PyValue>),

    /// `dict`
    Dict(PyDict),

    /// Strided array
    Array(NdArray),

    /// Function or other callable
    Callable(PyCallable),

    /// Opaque container around an array-host object
    Wrapped(MxWrapper),

    /// Anything else
    Object(PyObject),
}

impl PyValue {
    /// Get the type name for this value
    pub fn type_name(&self) -> &str {
        match self {
            PyValue::None => "NoneType",
            PyValue::Bool(_) => "bool",
            PyValue::Int(_) => "int",
            PyValue::Float(_) => "float",
            PyValue::Complex(_) => "complex",
            PyValue::String(_) => "str",
            PyValue::List(_) => "list",
            PyValue::Tuple(_) => "tuple",
            PyValue::Dict(_) => "dict",
            PyValue::Array(_) => "ndarray",
            PyValue::Callable(_) => "function",
            PyValue::Wrapped(_) => MxWrapper::TYPE_NAME,
            PyValue::Object(obj) => obj.type_name(),
        }
    }

    /// Check if this value is None
    pub fn is_none(&self) -> bool {
        matches!(self, PyValue::None)
    }

    /// Check if this is a list or tuple
    pub fn is_sequence(&self) -> bool {
        matches!(self, PyValue::List(_) | PyValue::Tuple(_))
    }

    /// Check if this value can be called
    pub fn is_callable(&self) -> bool {
        matches!(self, PyValue::Callable(_))
    }

    /// Try to extract as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to extract as i64
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PyValue::Int(n) => Some(*n),
            PyValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Try to extract as f64. Booleans and integers widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PyValue::Float(f) => Some(*f),
            PyValue::Int(n) => Some(*n as f64),
            PyValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Try to extract as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PyValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to extract as list
    pub fn as_list(&self) -> Option<&PyList> {
        match self {
            PyValue::List(list) => Some(list),
            _ => None,
        }
    }

    /// Try to extract as dict
    pub fn as_dict(&self) -> Option<&PyDict> {
        match self {
            PyValue::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    /// Try to extract as array
    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            PyValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to extract as callable
    pub fn as_callable(&self) -> Option<&PyCallable> {
        match self {
            PyValue::Callable(f) => Some(f),
            _ => None,
        }
    }
}

impl PartialEq for PyValue {
    /// Scalars and containers compare by value; arrays, callables,
    /// wrappers and opaque objects by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PyValue::None, PyValue::None) => true,
            (PyValue::Bool(a), PyValue::Bool(b)) => a == b,
            (PyValue::Int(a), PyValue::Int(b)) => a == b,
            (PyValue::Float(a), PyValue::Float(b)) => a == b,
            (PyValue::Complex(a), PyValue::Complex(b)) => a == b,
            (PyValue::String(a), PyValue::String(b)) => a == b,
            (PyValue::List(a), PyValue::List(b)) => a == b,
            (PyValue::Tuple(a), PyValue::Tuple(b)) => a == b,
            (PyValue::Dict(a), PyValue::Dict(b)) => a == b,
            (PyValue::Array(a), PyValue::Array(b)) => a.ptr_eq(b),
            (PyValue::Callable(a), PyValue::Callable(b)) => a.ptr_eq(b),
            (PyValue::Wrapped(a), PyValue::Wrapped(b)) => a.array().ptr_eq(b.array()),
            (PyValue::Object(a), PyValue::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for PyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PyValue::None => write!(f, "None"),
            PyValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            PyValue::Int(n) => write!(f, "{}", n),
            PyValue::Float(n) => write!(f, "{}", n),
            PyValue::Complex(c) => write!(f, "({}{:+}j)", c.re, c.im),
            PyValue::String(s) => write!(f, "'{}'", s),
            PyValue::List(list) => write!(f, "{}", list),
            PyValue::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            PyValue::Dict(dict) => write!(f, "{}", dict),
            PyValue::Array(arr) => write!(f, "{}", arr),
            PyValue::Callable(func) => write!(f, "<function {}>", func.name()),
            PyValue::Wrapped(w) => write!(f, "<{} {}>", MxWrapper::TYPE_NAME, w.array()),
            PyValue::Object(obj) => write!(f, "<{} object>", obj.type_name()),
        }
    }
}

impl Default for PyValue {
    fn default() -> Self {
        PyValue::None
    }
}

// ============================================================================
// PyObject - opaque object
// ============================================================================

/// Opaque object the bridge cannot convert.
#[derive(Debug, Clone)]
pub struct PyObject {
    id: u64,
    type_name: SmolStr,
    attributes: Arc<RwLock<IndexMap<SmolStr, PyValue>>>,
}

impl PyObject {
    /// Create a new object with a given type name
    pub fn new(type_name: impl Into<SmolStr>) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            type_name: type_name.into(),
            attributes: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    /// Get the type name of this object
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of live handles
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.attributes)
    }

    /// Set an attribute on this object
    pub fn set_attr(&self, name: impl Into<SmolStr>, value: PyValue) {
        self.attributes.write().insert(name.into(), value);
    }

    /// Get an attribute from this object
    pub fn get_attr(&self, name: &str) -> Option<PyValue> {
        self.attributes.read().get(name).cloned()
    }
}

impl PartialEq for PyObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

// ============================================================================
// PyList
// ============================================================================

/// Mutable, ordered, shared collection
#[derive(Debug, Clone, Default)]
pub struct PyList {
    items: Arc<RwLock<Vec<PyValue>>>,
}

impl PyList {
    /// Create a new empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a list from a vector
    pub fn from_vec(items: Vec<PyValue>) -> Self {
        Self {
            items: Arc::new(RwLock::new(items)),
        }
    }

    /// Get the length of the list
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Check if the list is empty
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Get an item by index
    pub fn get(&self, index: usize) -> Option<PyValue> {
        self.items.read().get(index).cloned()
    }

    /// Set an item by index
    pub fn set(&self, index: usize, value: PyValue) -> BridgeResult<()> {
        let mut items = self.items.write();
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(BridgeError::conversion_failed(
                "index",
                "list",
                format!("list index {} out of range", index),
            )),
        }
    }

    /// Append an item to the list
    pub fn append(&self, value: PyValue) {
        self.items.write().push(value);
    }

    /// Snapshot of the items
    pub fn to_vec(&self) -> Vec<PyValue> {
        self.items.read().clone()
    }

    /// Check if two handles refer to the same list
    pub fn ptr_eq(&self, other: &PyList) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }
}

impl PartialEq for PyList {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.to_vec() == other.to_vec()
    }
}

impl fmt::Display for PyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, item) in self.to_vec().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", item)?;
        }
        write!(f, "]")
    }
}

impl FromIterator<PyValue> for PyList {
    fn from_iter<I: IntoIterator<Item = PyValue>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

// ============================================================================
// PyDict
// ============================================================================

/// Hashable dictionary key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Str(SmolStr),
    Int(i64),
    Bool(bool),
    None,
}

impl DictKey {
    /// Get the type name of the key
    pub fn type_name(&self) -> &'static str {
        match self {
            DictKey::Str(_) => "str",
            DictKey::Int(_) => "int",
            DictKey::Bool(_) => "bool",
            DictKey::None => "NoneType",
        }
    }

    /// Text of a string key
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DictKey::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for DictKey {
    fn from(s: &str) -> Self {
        DictKey::Str(s.into())
    }
}

impl From<String> for DictKey {
    fn from(s: String) -> Self {
        DictKey::Str(s.into())
    }
}

impl From<SmolStr> for DictKey {
    fn from(s: SmolStr) -> Self {
        DictKey::Str(s)
    }
}

impl From<i64> for DictKey {
    fn from(n: i64) -> Self {
        DictKey::Int(n)
    }
}

impl fmt::Display for DictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictKey::Str(s) => write!(f, "'{}'", s),
            DictKey::Int(n) => write!(f, "{}", n),
            DictKey::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            DictKey::None => write!(f, "None"),
        }
    }
}

/// Insertion-ordered, shared mapping
#[derive(Debug, Clone, Default)]
pub struct PyDict {
    items: Arc<RwLock<IndexMap<DictKey, PyValue>>>,
}

impl PyDict {
    /// Create a new empty dict
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of items
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Check if the dict is empty
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Get a value by string key
    pub fn get(&self, key: &str) -> Option<PyValue> {
        self.items.read().get(&DictKey::from(key)).cloned()
    }

    /// Set a value
    pub fn set(&self, key: impl Into<DictKey>, value: PyValue) {
        self.items.write().insert(key.into(), value);
    }

    /// Remove a string key
    pub fn remove(&self, key: &str) -> Option<PyValue> {
        self.items.write().shift_remove(&DictKey::from(key))
    }

    /// Check if a string key exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.items.read().contains_key(&DictKey::from(key))
    }

    /// Get all keys
    pub fn keys(&self) -> Vec<DictKey> {
        self.items.read().keys().cloned().collect()
    }

    /// Snapshot of the items in insertion order
    pub fn items(&self) -> Vec<(DictKey, PyValue)> {
        self.items
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Check if two handles refer to the same dict
    pub fn ptr_eq(&self, other: &PyDict) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }
}

impl PartialEq for PyDict {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let theirs = other.items.read().clone();
        *self.items.read() == theirs
    }
}

impl fmt::Display for PyDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.items().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}

// ============================================================================
// PyCallable
// ============================================================================

type CallableFn = dyn Fn(&[PyValue]) -> BridgeResult<PyValue> + Send + Sync;

struct CallableInner {
    name: SmolStr,
    func: Box<CallableFn>,
}

/// A callable value
#[derive(Clone)]
pub struct PyCallable {
    inner: Arc<CallableInner>,
}

impl PyCallable {
    /// Wrap a Rust closure as a callable
    pub fn new<F>(name: impl Into<SmolStr>, func: F) -> Self
    where
        F: Fn(&[PyValue]) -> BridgeResult<PyValue> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(CallableInner {
                name: name.into(),
                func: Box::new(func),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Invoke with positional arguments
    pub fn call(&self, args: &[PyValue]) -> BridgeResult<PyValue> {
        (self.inner.func)(args)
    }

    /// Address of the callable, stable for its lifetime
    pub fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Number of live handles
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Check if two handles refer to the same callable
    pub fn ptr_eq(&self, other: &PyCallable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PyCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PyCallable")
            .field("name", &self.inner.name)
            .field("address", &self.address())
            .finish()
    }
}
