//! Cross-host conversion.
//!
//! [`Converter`] turns array-host values into object-host values
//! ([`Converter::to_python`]) and back ([`Converter::to_mx`]). Dense
//! arrays are wrapped without copying when they are large and contiguous,
//! copied as a block when small, and gathered element by element when
//! strided. Structs, cells, lists, tuples and dicts convert recursively.
//!
//! Every conversion runs under the interpreter token and is atomic: cache
//! entries and callable registrations it creates are staged and only
//! published once the whole value converted. A failing conversion leaves
//! the session untouched.

mod nested;
mod to_mx;
mod to_py;

use smol_str::SmolStr;

use crate::adapter::RawPointerAdapter;
use crate::buffer::{BufferBinding, DataPtr};
use crate::cache::{alias_matches, view_matches, CacheStats, ReleaseReport};
use crate::callable::CallableRegistry;
use crate::config::{BridgeConfig, CopyPolicy};
use crate::error::BridgeResult;
use crate::gil::GilGuard;
use crate::mx_types::MxArray;
use crate::py_array::NdArray;
use crate::py_types::{PyCallable, PyValue};
use crate::session;

// ============================================================================
// Converter
// ============================================================================

/// Conversion settings for one or more calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Converter {
    policy: CopyPolicy,
    wrap_threshold: usize,
}

impl Default for Converter {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

impl Converter {
    pub fn new(policy: CopyPolicy, wrap_threshold: usize) -> Self {
        Self {
            policy,
            wrap_threshold,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.copy_policy, config.wrap_threshold)
    }

    /// Converter using the session's active configuration
    pub fn from_session(gil: &GilGuard) -> BridgeResult<Self> {
        session::config(gil).map(|config| Self::from_config(&config))
    }

    /// Same settings with a different copy policy
    pub fn with_policy(self, policy: CopyPolicy) -> Self {
        Self { policy, ..self }
    }

    pub fn policy(&self) -> CopyPolicy {
        self.policy
    }

    pub fn wrap_threshold(&self) -> usize {
        self.wrap_threshold
    }

    /// Array host to object host
    pub fn to_python(&self, gil: &GilGuard, array: &MxArray) -> BridgeResult<PyValue> {
        let mut ctx = ConvertCtx::new(gil, *self);
        let value = to_py::convert(&mut ctx, array)?;
        ctx.commit()?;
        Ok(value)
    }

    /// Object host to array host
    pub fn to_mx(&self, gil: &GilGuard, value: &PyValue) -> BridgeResult<MxArray> {
        let mut ctx = ConvertCtx::new(gil, *self);
        let array = to_mx::convert(&mut ctx, value)?;
        ctx.commit()?;
        Ok(array)
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// A value from either host
#[derive(Debug, Clone)]
pub enum HostValue {
    /// Array-host value
    Array(MxArray),
    /// Object-host value
    Object(PyValue),
}

impl HostValue {
    pub fn as_array(&self) -> Option<&MxArray> {
        match self {
            HostValue::Array(array) => Some(array),
            HostValue::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&PyValue> {
        match self {
            HostValue::Object(value) => Some(value),
            HostValue::Array(_) => None,
        }
    }
}

impl From<MxArray> for HostValue {
    fn from(array: MxArray) -> Self {
        HostValue::Array(array)
    }
}

impl From<PyValue> for HostValue {
    fn from(value: PyValue) -> Self {
        HostValue::Object(value)
    }
}

/// Convert `value` into the other host's representation.
///
/// Acquires the interpreter token for the duration of the call.
pub fn to_other_host(value: &HostValue, policy: CopyPolicy) -> BridgeResult<HostValue> {
    let gil = GilGuard::acquire()?;
    let converter = Converter::from_session(&gil)?.with_policy(policy);
    match value {
        HostValue::Array(array) => converter.to_python(&gil, array).map(HostValue::Object),
        HostValue::Object(value) => converter.to_mx(&gil, value).map(HostValue::Array),
    }
}

/// Sweep the buffer cache, releasing aliases neither host still needs.
///
/// Call at a quiescent point, for example after an array-host call
/// returns. Aliases that are still referenced stay cached and are retried
/// on the next sweep; that is never an error.
pub fn release_pending_buffers() -> BridgeResult<ReleaseReport> {
    let gil = GilGuard::acquire()?;
    let report = session::with_state(&gil, |state| {
        let max_attempts = state.config.max_release_attempts;
        state.cache.sweep(max_attempts)
    })?;
    if report != ReleaseReport::default() {
        tracing::debug!(report = %report, "released pending buffers");
    }
    Ok(report)
}

// ============================================================================
// Per-call context
// ============================================================================

#[derive(Debug)]
struct PendingAlias {
    array: MxArray,
    object: NdArray,
    needs_placeholder: bool,
}

/// State of one conversion call: settings plus everything staged for the
/// session.
#[derive(Debug)]
pub(crate) struct ConvertCtx<'g> {
    gil: &'g GilGuard,
    converter: Converter,
    views: Vec<(DataPtr, NdArray)>,
    aliases: Vec<PendingAlias>,
    callables: Vec<PyCallable>,
    stats: CacheStats,
}

impl<'g> ConvertCtx<'g> {
    fn new(gil: &'g GilGuard, converter: Converter) -> Self {
        Self {
            gil,
            converter,
            views: Vec::new(),
            aliases: Vec::new(),
            callables: Vec::new(),
            stats: CacheStats::default(),
        }
    }

    /// Whether the buffer cache takes part in this conversion
    fn caching(&self) -> bool {
        self.converter.policy == CopyPolicy::Wrap
    }

    /// Whether `elements` elements are copied rather than wrapped
    fn should_copy(&self, elements: usize) -> bool {
        !self.caching() || elements == 0 || elements < self.converter.wrap_threshold
    }

    /// Object-host array already sharing the bytes of `handle` with the
    /// same geometry
    fn find_object(&mut self, handle: &MxArray, ptr: DataPtr) -> BridgeResult<Option<NdArray>> {
        if !self.caching() {
            return Ok(None);
        }
        let staged = self
            .views
            .iter()
            .find(|(staged, view)| *staged == ptr && view_matches(view, handle))
            .map(|(_, view)| view.clone())
            .or_else(|| {
                self.aliases
                    .iter()
                    .find(|alias| alias.object.data_ptr() == ptr && alias_matches(&alias.array, handle))
                    .map(|alias| alias.object.clone())
            });
        if staged.is_some() {
            self.stats.hits += 1;
            return Ok(staged);
        }
        session::with_state(self.gil, |state| state.cache.lookup_object(handle))
    }

    /// Array-host handle already aliasing `object`
    fn find_array(&mut self, object: &NdArray) -> BridgeResult<Option<MxArray>> {
        if !self.caching() {
            return Ok(None);
        }
        let staged = self
            .aliases
            .iter()
            .find(|alias| alias.object.ptr_eq(object))
            .map(|alias| alias.array.clone());
        if staged.is_some() {
            self.stats.hits += 1;
            return Ok(staged);
        }
        session::with_state(self.gil, |state| state.cache.lookup_array(object))
    }

    fn stage_view(&mut self, ptr: DataPtr, view: &NdArray) {
        self.stats.wraps += 1;
        self.views.push((ptr, view.clone()));
    }

    fn stage_alias(&mut self, array: &MxArray, object: &NdArray, needs_placeholder: bool) {
        self.stats.wraps += 1;
        self.aliases.push(PendingAlias {
            array: array.clone(),
            object: object.clone(),
            needs_placeholder,
        });
    }

    /// Stage `callable` for registration and return its key
    fn stage_callable(&mut self, callable: &PyCallable) -> SmolStr {
        if !self.callables.iter().any(|staged| staged.ptr_eq(callable)) {
            self.callables.push(callable.clone());
        }
        CallableRegistry::key_for(callable)
    }

    /// Callable registered, or staged, under `key`
    fn find_callable(&self, key: &str) -> BridgeResult<Option<PyCallable>> {
        let staged = self
            .callables
            .iter()
            .find(|callable| CallableRegistry::key_for(callable).as_str() == key)
            .cloned();
        if staged.is_some() {
            return Ok(staged);
        }
        session::with_state(self.gil, |state| state.callables.get(key).cloned())
    }

    /// Publish staged entries to the session
    fn commit(&mut self) -> BridgeResult<()> {
        if self.views.is_empty()
            && self.aliases.is_empty()
            && self.callables.is_empty()
            && self.stats == CacheStats::default()
        {
            return Ok(());
        }
        let (views, aliases, callables, delta) =
            (&self.views, &self.aliases, &self.callables, self.stats);
        session::with_state(self.gil, |state| {
            for (ptr, view) in views {
                state.cache.register_view(*ptr, view);
            }
            for alias in aliases {
                state
                    .cache
                    .register_alias(&alias.array, &alias.object, alias.needs_placeholder);
            }
            for callable in callables {
                state.callables.register(callable);
            }
            let stats = state.cache.stats_mut();
            stats.hits += delta.hits;
            stats.wraps += delta.wraps;
            stats.copies += delta.copies;
            stats.strided_copies += delta.strided_copies;
        })?;
        self.views.clear();
        self.aliases.clear();
        self.callables.clear();
        self.stats = CacheStats::default();
        Ok(())
    }

    /// Undo staged aliases so no handle ever frees object-host memory
    fn abort(&mut self) {
        for alias in self.aliases.drain(..) {
            if alias.needs_placeholder {
                let width = alias.array.element_type().map_or(1, |e| e.byte_width());
                if let Err(err) = alias.array.rebind_raw_pointer(BufferBinding::placeholder(width)) {
                    tracing::error!(error = %err, "placeholder substitution failed");
                }
            }
        }
        self.views.clear();
        self.callables.clear();
    }
}

impl Drop for ConvertCtx<'_> {
    fn drop(&mut self) {
        if !self.aliases.is_empty() {
            tracing::debug!(aliases = self.aliases.len(), "conversion failed; staged aliases dropped");
        }
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session;
    use pretty_assertions::assert_eq;

    fn setup() -> GilGuard {
        session::initialize(BridgeConfig::default()).unwrap();
        GilGuard::acquire().unwrap()
    }

    #[test]
    fn test_converter_settings() {
        let gil = setup();
        let converter = Converter::from_session(&gil).unwrap();
        assert_eq!(converter.wrap_threshold(), 1000);
        let copy = converter.with_policy(CopyPolicy::Copy);
        assert_eq!(copy.policy(), CopyPolicy::Copy);
        assert_eq!(copy.wrap_threshold(), 1000);
    }

    #[test]
    fn test_to_other_host_roundtrip_scalar() {
        let _gil = setup();
        let value = HostValue::from(PyValue::Float(2.5));
        let there = to_other_host(&value, CopyPolicy::Wrap).unwrap();
        let array = there.as_array().unwrap();
        assert_eq!(array.get::<f64>(&[0, 0]).unwrap(), 2.5);

        let back = to_other_host(&there, CopyPolicy::Wrap).unwrap();
        let nd = back.as_object().and_then(PyValue::as_array).unwrap();
        assert_eq!(nd.shape(), &[1, 1]);
        assert_eq!(nd.get::<f64>(&[0, 0]).unwrap(), 2.5);
    }

    #[test]
    fn test_failed_conversion_stages_nothing() {
        let gil = setup();
        let converter = Converter::from_session(&gil).unwrap();
        let before = session::cache_len(&gil).unwrap();
        let big = NdArray::from_vec_fortran(vec![1.0; 2000], vec![2000, 1]).unwrap();
        let value = PyValue::Tuple(vec![
            PyValue::Array(big.clone()),
            PyValue::Object(crate::py_types::PyObject::new("socket")),
        ]);
        assert!(converter.to_mx(&gil, &value).is_err());
        assert_eq!(session::cache_len(&gil).unwrap(), before);
        assert_eq!(big.get::<f64>(&[1999, 0]).unwrap(), 1.0);
        assert!(crate::buffer::audit().is_clean());
    }
}
