//! Bridge session.
//!
//! One per process: owns the buffer cache, the callable registry and the
//! active configuration. `initialize` and `finalize` bracket its life;
//! everything in between reaches the state through [`with_state`], which
//! requires the interpreter token.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::buffer::DataPtr;
use crate::cache::{BufferCache, CacheStats, ReleaseReport};
use crate::callable::CallableRegistry;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::gil::{self, GilGuard};
use crate::ownership::BufferState;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

static STATE: Mutex<Option<BridgeState>> = parking_lot::const_mutex(None);

/// Process-wide bridge state
#[derive(Debug)]
pub struct BridgeState {
    pub(crate) cache: BufferCache,
    pub(crate) callables: CallableRegistry,
    pub(crate) config: BridgeConfig,
}

impl BridgeState {
    fn new(config: BridgeConfig) -> Self {
        Self {
            cache: BufferCache::new(),
            callables: CallableRegistry::new(),
            config,
        }
    }

    pub fn cache(&self) -> &BufferCache {
        &self.cache
    }

    pub fn callables(&self) -> &CallableRegistry {
        &self.callables
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

/// Start the session. A second call while running keeps the existing
/// session and its configuration.
pub fn initialize(config: BridgeConfig) -> BridgeResult<()> {
    crate::init_tracing();
    let _token = gil::raw_token();
    let mut state = STATE.lock();
    if state.is_some() {
        tracing::trace!("bridge session already running");
        return Ok(());
    }
    tracing::debug!(
        copy_policy = %config.copy_policy,
        wrap_threshold = config.wrap_threshold,
        max_release_attempts = config.max_release_attempts,
        "bridge session started"
    );
    *state = Some(BridgeState::new(config));
    INITIALIZED.store(true, Ordering::Release);
    Ok(())
}

/// Start the session with configuration from the environment
pub fn initialize_default() -> BridgeResult<()> {
    initialize(BridgeConfig::from_env()?)
}

/// Check if the session is running
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// End the session.
///
/// Sweeps the cache one last time, force-detaching aliases that are still
/// referenced, and clears the callable registry. Calling it without a
/// running session does nothing.
pub fn finalize() -> BridgeResult<ReleaseReport> {
    let _token = gil::raw_token();
    let Some(mut state) = STATE.lock().take() else {
        return Ok(ReleaseReport::default());
    };
    INITIALIZED.store(false, Ordering::Release);

    let report = state.cache.drain();
    let callables = state.callables.clear();
    tracing::debug!(
        report = %report,
        stats = %state.cache.stats(),
        callables,
        "bridge session finished"
    );
    Ok(report)
}

/// Run `f` against the session state
pub(crate) fn with_state<R>(
    _gil: &GilGuard,
    f: impl FnOnce(&mut BridgeState) -> R,
) -> BridgeResult<R> {
    gil::assert_held("bridge state")?;
    let mut guard = STATE.lock();
    let state = guard.as_mut().ok_or(BridgeError::SessionNotInitialized)?;
    Ok(f(state))
}

/// Active configuration
pub fn config(gil: &GilGuard) -> BridgeResult<BridgeConfig> {
    with_state(gil, |state| state.config.clone())
}

/// Replace the active configuration
pub fn set_config(gil: &GilGuard, config: BridgeConfig) -> BridgeResult<()> {
    with_state(gil, |state| {
        tracing::debug!(copy_policy = %config.copy_policy, "bridge configuration replaced");
        state.config = config;
    })
}

/// Cache counters so far
pub fn cache_stats(gil: &GilGuard) -> BridgeResult<CacheStats> {
    with_state(gil, |state| state.cache.stats())
}

/// Number of live cache entries
pub fn cache_len(gil: &GilGuard) -> BridgeResult<usize> {
    with_state(gil, |state| state.cache.len())
}

/// Release state of the cached alias at `ptr`; `None` once it left the cache
pub fn buffer_state(gil: &GilGuard, ptr: DataPtr) -> BridgeResult<Option<BufferState>> {
    with_state(gil, |state| state.cache.state_of(ptr))
}

/// Number of registered callables
pub fn callable_count(gil: &GilGuard) -> BridgeResult<usize> {
    with_state(gil, |state| state.callables.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        initialize(BridgeConfig::default()).unwrap();
        initialize(BridgeConfig::default()).unwrap();
        assert!(is_initialized());

        let gil = GilGuard::acquire().unwrap();
        let config = config(&gil).unwrap();
        assert!(config.max_release_attempts >= 1);
    }

    #[test]
    fn test_with_state_under_gil() {
        initialize(BridgeConfig::default()).unwrap();
        let gil = GilGuard::acquire().unwrap();
        let before = callable_count(&gil).unwrap();
        let registered = with_state(&gil, |state| state.callables.len()).unwrap();
        assert_eq!(before, registered);
    }
}
