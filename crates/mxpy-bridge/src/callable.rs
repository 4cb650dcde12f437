//! Callable Bridge
//!
//! Object-host callables cross into the array host as opaque string keys.
//! The registry maps each key back to the callable and holds a reference
//! to it, so the callable stays alive while the array host may still use
//! the key. Entries are never evicted automatically; callers `remove` them.
//!
//! In the array host a wrapped callable is a 1x1 struct with a single
//! char field, [`CALLABLE_KEY_FIELD`], holding the key.

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::error::{BridgeError, BridgeResult};
use crate::gil::GilGuard;
use crate::mx_types::{MxArray, StructFields};
use crate::py_types::{PyCallable, PyValue};
use crate::session;
use crate::type_map::MxClass;

/// Field name of the struct form of a wrapped callable
pub const CALLABLE_KEY_FIELD: &str = "mxpy_func_ptr";

/// Key -> callable table
#[derive(Debug, Default)]
pub struct CallableRegistry {
    entries: FxHashMap<SmolStr, PyCallable>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for `callable`: the decimal string of its address
    pub fn key_for(callable: &PyCallable) -> SmolStr {
        SmolStr::new(callable.address().to_string())
    }

    /// Register `callable` and return its key. Registering the same
    /// callable again yields the same key.
    pub fn register(&mut self, callable: &PyCallable) -> SmolStr {
        let key = Self::key_for(callable);
        if self.entries.insert(key.clone(), callable.clone()).is_none() {
            tracing::debug!(key = %key, name = callable.name(), "callable registered");
        }
        key
    }

    /// Register `value`, which must be callable
    pub fn wrap(&mut self, value: &PyValue) -> BridgeResult<SmolStr> {
        match value {
            PyValue::Callable(callable) => Ok(self.register(callable)),
            other => Err(BridgeError::not_callable(other.type_name())),
        }
    }

    /// Callable registered under `key`
    pub fn get(&self, key: &str) -> Option<&PyCallable> {
        self.entries.get(key)
    }

    /// Callable registered under `key`, or [`BridgeError::UnknownKey`]
    pub fn unwrap(&self, key: &str) -> BridgeResult<PyCallable> {
        self.get(key)
            .cloned()
            .ok_or_else(|| BridgeError::unknown_key(key))
    }

    /// Delete the entry for `key`, dropping the registry's reference
    pub fn remove(&mut self, key: &str) -> BridgeResult<PyCallable> {
        let callable = self
            .entries
            .remove(key)
            .ok_or_else(|| BridgeError::unknown_key(key))?;
        tracing::debug!(key = key, name = callable.name(), "callable removed");
        Ok(callable)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, returning how many there were
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

// ============================================================================
// Struct form
// ============================================================================

/// Array-host struct carrying `key`
pub fn callable_struct(key: &str) -> MxArray {
    let mut fields = StructFields::new();
    fields.insert(SmolStr::new(CALLABLE_KEY_FIELD), MxArray::char_array(key));
    MxArray::struct_scalar(fields)
}

/// Key carried by a struct built with [`callable_struct`]
pub fn callable_key(array: &MxArray) -> Option<SmolStr> {
    if array.class() != MxClass::Struct || array.len() != 1 {
        return None;
    }
    let names = array.field_names()?;
    if names.len() != 1 || names[0] != CALLABLE_KEY_FIELD {
        return None;
    }
    let rows = array.field(0, CALLABLE_KEY_FIELD)?.char_rows().ok()?;
    match rows.as_slice() {
        [key] => Some(SmolStr::new(key)),
        _ => None,
    }
}

// ============================================================================
// Session-level operations
// ============================================================================

/// Register `value` in the session registry and return its key
pub fn wrap_callable(value: &PyValue) -> BridgeResult<SmolStr> {
    let gil = GilGuard::acquire()?;
    session::with_state(&gil, |state| state.callables.wrap(value))?
}

/// Callable registered under `key`
pub fn unwrap(key: &str) -> BridgeResult<PyCallable> {
    let gil = GilGuard::acquire()?;
    session::with_state(&gil, |state| state.callables.unwrap(key))?
}

/// Delete the registry entry for `key`
pub fn remove(key: &str) -> BridgeResult<()> {
    let gil = GilGuard::acquire()?;
    session::with_state(&gil, |state| state.callables.remove(key))?.map(drop)
}

/// Invoke the callable registered under `key`.
///
/// The registry is not locked while the callable runs, so it may itself
/// convert values or register callables.
pub fn call(key: &str, args: &[PyValue]) -> BridgeResult<PyValue> {
    let gil = GilGuard::acquire()?;
    let callable = session::with_state(&gil, |state| state.callables.unwrap(key))??;
    tracing::trace!(key = key, name = callable.name(), "calling wrapped callable");
    callable.call(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn double() -> PyCallable {
        PyCallable::new("double", |args: &[PyValue]| {
            let x = args
                .first()
                .and_then(PyValue::as_float)
                .ok_or_else(|| BridgeError::type_mismatch("float", "missing"))?;
            Ok(PyValue::Float(2.0 * x))
        })
    }

    #[test]
    fn test_register_is_stable() {
        let mut registry = CallableRegistry::new();
        let f = double();
        let key = registry.register(&f);
        assert_eq!(key, f.address().to_string());
        assert_eq!(registry.register(&f), key);
        assert_eq!(registry.len(), 1);
        assert_eq!(f.ref_count(), 2);
    }

    #[test]
    fn test_remove_then_unwrap_fails() {
        let mut registry = CallableRegistry::new();
        let key = registry.wrap(&PyValue::Callable(double())).unwrap();
        assert!(registry.unwrap(&key).is_ok());
        registry.remove(&key).unwrap();
        assert!(matches!(
            registry.unwrap(&key),
            Err(BridgeError::UnknownKey { .. })
        ));
        assert!(matches!(
            registry.remove(&key),
            Err(BridgeError::UnknownKey { .. })
        ));
    }

    #[test]
    fn test_wrap_rejects_non_callable() {
        let mut registry = CallableRegistry::new();
        let err = registry.wrap(&PyValue::Int(3)).unwrap_err();
        assert!(matches!(err, BridgeError::NotCallable { .. }));
        assert!(err.is_callable_error());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_struct_form() {
        let s = callable_struct("12345");
        assert_eq!(callable_key(&s).as_deref(), Some("12345"));

        let mut fields = StructFields::new();
        fields.insert("other".into(), MxArray::char_array("12345"));
        assert_eq!(callable_key(&MxArray::struct_scalar(fields)), None);
        assert_eq!(callable_key(&MxArray::char_array("12345")), None);
    }
}
