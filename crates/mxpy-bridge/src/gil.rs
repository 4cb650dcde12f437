//! Interpreter token.
//!
//! The object host is single-threaded. Touching its values, and mutating
//! the buffer cache or the callable registry, requires holding one
//! process-wide token: the object host's global interpreter lock.
//!
//! - [`GilGuard`] holds the token for a scope and nests on one thread
//! - [`GilState`] reports what the current thread holds
//! - [`GilGuard::allow_threads`] hands the token back around work that
//!   touches no object-host state
//!
//! Conversion entry points take `&GilGuard`, so a caller cannot reach the
//! session without the token.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::error::{BridgeError, BridgeResult};
use crate::session;

static TOKEN: ReentrantMutex<()> = parking_lot::const_reentrant_mutex(());

static ACQUISITIONS: AtomicU64 = AtomicU64::new(0);
static CONTENDED: AtomicU64 = AtomicU64::new(0);

/// What this thread holds
#[derive(Debug, Clone, Copy, Default)]
struct Hold {
    /// Live guards on this thread
    depth: usize,
    /// Inside `allow_threads`: guards exist but the token is lent out
    suspended: bool,
}

thread_local! {
    static HOLD: Cell<Hold> = const { Cell::new(Hold { depth: 0, suspended: false }) };
}

fn update_hold(f: impl FnOnce(&mut Hold)) {
    HOLD.with(|cell| {
        let mut hold = cell.get();
        f(&mut hold);
        cell.set(hold);
    });
}

/// Token state of the current thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GilState {
    NotHeld,
    Held,
    /// A guard is alive but the token was handed back with `allow_threads`
    Suspended,
}

impl GilState {
    pub fn current() -> Self {
        let hold = HOLD.with(Cell::get);
        match (hold.depth, hold.suspended) {
            (0, _) => GilState::NotHeld,
            (_, true) => GilState::Suspended,
            _ => GilState::Held,
        }
    }

    /// Whether this thread may touch object-host state right now
    pub fn is_held() -> bool {
        Self::current() == GilState::Held
    }

    /// Number of live guards on this thread
    pub fn depth() -> usize {
        HOLD.with(Cell::get).depth
    }
}

impl fmt::Display for GilState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GilState::NotHeld => "not held",
            GilState::Held => "held",
            GilState::Suspended => "suspended",
        };
        f.write_str(name)
    }
}

/// Lock the token without session checks or thread bookkeeping.
///
/// Session start-up and shutdown serialize with conversions this way
/// before a session exists or after it is gone.
pub(crate) fn raw_token() -> ReentrantMutexGuard<'static, ()> {
    TOKEN.lock()
}

/// Fail with [`BridgeError::GilNotHeld`] unless this thread holds the token
pub fn assert_held(context: &str) -> BridgeResult<()> {
    match GilState::current() {
        GilState::Held => Ok(()),
        GilState::NotHeld | GilState::Suspended => Err(BridgeError::gil_not_held(context)),
    }
}

/// Scoped hold on the interpreter token.
///
/// Nested guards on one thread succeed immediately; the token is released
/// when the outermost guard drops. Not `Send`: a guard never leaves the
/// thread that took it.
///
/// ```ignore
/// let gil = GilGuard::acquire()?;
/// let value = Converter::from_session(&gil)?.to_python(&gil, &array)?;
/// ```
#[derive(Debug)]
pub struct GilGuard {
    guard: ReentrantMutexGuard<'static, ()>,
    outermost: bool,
    /// Suspension this guard cleared on acquire, restored on drop
    was_suspended: bool,
}

impl GilGuard {
    /// Take the token, blocking while another thread holds it.
    ///
    /// Fails with `SessionNotInitialized` before [`session::initialize`].
    pub fn acquire() -> BridgeResult<Self> {
        if !session::is_initialized() {
            return Err(BridgeError::SessionNotInitialized);
        }

        let guard = match TOKEN.try_lock() {
            Some(guard) => guard,
            None => {
                CONTENDED.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("waiting for the interpreter token");
                TOKEN.lock()
            }
        };
        ACQUISITIONS.fetch_add(1, Ordering::Relaxed);

        let outermost = GilState::depth() == 0;
        let mut was_suspended = false;
        update_hold(|hold| {
            was_suspended = std::mem::replace(&mut hold.suspended, false);
            hold.depth += 1;
        });
        Ok(Self {
            guard,
            outermost,
            was_suspended,
        })
    }

    pub fn state(&self) -> GilState {
        GilState::current()
    }

    /// Whether another guard on this thread was already alive
    pub fn is_nested(&self) -> bool {
        !self.outermost
    }

    /// Run `f` with the token handed back.
    ///
    /// `f` must not touch object-host values unless it acquires a guard of
    /// its own. Other threads can take the token meanwhile only when this
    /// is the thread's outermost guard. The previous state comes back when
    /// `f` returns or unwinds.
    pub fn allow_threads<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _restore = Suspension::begin();
        ReentrantMutexGuard::unlocked(&mut self.guard, f)
    }
}

impl Drop for GilGuard {
    fn drop(&mut self) {
        let was_suspended = self.was_suspended;
        update_hold(|hold| {
            hold.depth = hold.depth.saturating_sub(1);
            hold.suspended = was_suspended;
        });
    }
}

/// Marks the thread suspended until dropped
struct Suspension {
    previous: bool,
}

impl Suspension {
    fn begin() -> Self {
        let mut previous = false;
        update_hold(|hold| previous = std::mem::replace(&mut hold.suspended, true));
        Self { previous }
    }
}

impl Drop for Suspension {
    fn drop(&mut self) {
        let previous = self.previous;
        update_hold(|hold| hold.suspended = previous);
    }
}

/// Token usage so far
pub fn gil_stats() -> GilStats {
    GilStats {
        acquisitions: ACQUISITIONS.load(Ordering::Relaxed),
        contended: CONTENDED.load(Ordering::Relaxed),
        depth: GilState::depth(),
        state: GilState::current(),
    }
}

/// Process-wide token counters plus the current thread's hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GilStats {
    /// Successful acquisitions, nested ones included
    pub acquisitions: u64,
    /// Acquisitions that had to wait for another thread
    pub contended: u64,
    /// Live guards on this thread
    pub depth: usize,
    pub state: GilState,
}

impl fmt::Display for GilStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acquisitions={}, contended={}, depth={}, state={}",
            self.acquisitions, self.contended, self.depth, self.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    fn start_session() {
        session::initialize(BridgeConfig::default()).unwrap();
    }

    #[test]
    fn test_guard_scopes_the_token() {
        start_session();
        assert_eq!(GilState::current(), GilState::NotHeld);
        {
            let gil = GilGuard::acquire().unwrap();
            assert_eq!(gil.state(), GilState::Held);
            assert!(assert_held("conversion").is_ok());
        }
        assert_eq!(GilState::current(), GilState::NotHeld);
        let err = assert_held("conversion").unwrap_err();
        assert!(matches!(err, BridgeError::GilNotHeld { .. }));
    }

    #[test]
    fn test_nesting_releases_at_outermost() {
        start_session();
        let outer = GilGuard::acquire().unwrap();
        let inner = GilGuard::acquire().unwrap();
        assert!(!outer.is_nested());
        assert!(inner.is_nested());
        assert_eq!(GilState::depth(), 2);

        drop(inner);
        assert!(GilState::is_held());
        drop(outer);
        assert_eq!(GilState::depth(), 0);
        assert!(!GilState::is_held());
    }

    #[test]
    fn test_other_threads_wait() {
        start_session();
        let gil = GilGuard::acquire().unwrap();
        let entered = Arc::new(AtomicBool::new(false));

        let flag = entered.clone();
        let waiter = std::thread::spawn(move || {
            let _gil = GilGuard::acquire().unwrap();
            flag.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));
        drop(gil);
        waiter.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn test_allow_threads_lends_the_token() {
        start_session();
        let mut gil = GilGuard::acquire().unwrap();
        let from_other_thread = gil.allow_threads(|| {
            assert_eq!(GilState::current(), GilState::Suspended);
            assert!(assert_held("lent").is_err());
            std::thread::spawn(|| GilGuard::acquire().map(|g| g.state()))
                .join()
                .unwrap()
                .unwrap()
        });
        assert_eq!(from_other_thread, GilState::Held);
        assert_eq!(gil.state(), GilState::Held);
    }

    #[test]
    fn test_acquire_inside_allow_threads() {
        start_session();
        let mut gil = GilGuard::acquire().unwrap();
        let converted = gil.allow_threads(|| {
            let inner = GilGuard::acquire().unwrap();
            assert_eq!(inner.state(), GilState::Held);
            assert!(assert_held("nested").is_ok());
            let value = crate::convert::to_other_host(
                &crate::convert::HostValue::Object(crate::py_types::PyValue::Float(1.0)),
                crate::config::CopyPolicy::Wrap,
            );
            drop(inner);
            assert_eq!(GilState::current(), GilState::Suspended);
            value
        });
        assert!(converted.is_ok());
        assert_eq!(gil.state(), GilState::Held);
    }

    #[test]
    fn test_allow_threads_restores_state_on_panic() {
        start_session();
        let mut gil = GilGuard::acquire().unwrap();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            gil.allow_threads(|| panic!("worker failed"))
        }));
        assert!(outcome.is_err());
        assert_eq!(gil.state(), GilState::Held);
        assert!(assert_held("after panic").is_ok());
    }

    #[test]
    fn test_stats_track_acquisitions() {
        start_session();
        let before = gil_stats();
        let gil = GilGuard::acquire().unwrap();
        let during = gil_stats();
        assert!(during.acquisitions > before.acquisitions);
        assert_eq!(during.depth, 1);
        assert_eq!(during.state, GilState::Held);
        drop(gil);
        assert_eq!(gil_stats().state, GilState::NotHeld);
        assert!(gil_stats().to_string().contains("state=not held"));
    }
}
