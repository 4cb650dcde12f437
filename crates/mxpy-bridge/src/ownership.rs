//! Ownership Bridge
//!
//! Lets one host hold a zero-copy view of the other host's memory without
//! either side freeing bytes the other still needs.
//!
//! ## Pieces
//!
//! - [`OwnerToken`]: owns nothing itself, pins an array-host handle so the
//!   buffer under an object-host view stays alive.
//! - [`MxWrapper`]: opaque object-host container around array-host values
//!   that have no native counterpart (class instances).
//! - [`BufferState`]: lifecycle of a wrapped buffer, tracked by the cache.
//!
//! ## State machine
//!
//! ```text
//! Created -> Wrapped -> PendingRelease -> Released
//!                             |
//!                             +--------> Blocked -> (retried) PendingRelease
//! ```
//!
//! `Blocked` means the array-host handle was still referenced from
//! elsewhere when release was attempted. It is never an error: holding a
//! buffer longer than needed is safe, freeing it early is not.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::adapter::RawPointerAdapter;
use crate::buffer::DataPtr;
use crate::mx_types::MxArray;

static LIVE_OWNER_TOKENS: AtomicUsize = AtomicUsize::new(0);

/// Number of owner tokens currently alive
pub fn live_owner_tokens() -> usize {
    LIVE_OWNER_TOKENS.load(Ordering::Relaxed)
}

// ============================================================================
// OwnerToken
// ============================================================================

/// Pins an array-host handle for as long as an object-host view exists.
///
/// Dropping the token releases the pinned handle. The drop path takes no
/// locks, so it is safe wherever the last view happens to die.
#[derive(Debug)]
pub struct OwnerToken {
    source: MxArray,
    ptr: DataPtr,
}

impl OwnerToken {
    /// Pin `source`, recording the data pointer the view aliases
    pub(crate) fn new(source: MxArray, ptr: DataPtr) -> Self {
        LIVE_OWNER_TOKENS.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(array = source.id(), ptr = %ptr, "owner token created");
        Self { source, ptr }
    }

    /// The pinned handle
    pub fn source(&self) -> &MxArray {
        &self.source
    }

    /// Data pointer of the pinned buffer when the token was created
    pub fn ptr(&self) -> DataPtr {
        self.ptr
    }

    /// Whether the pinned handle still points at the aliased bytes
    pub fn is_current(&self) -> bool {
        self.source.raw_pointer() == Some(self.ptr)
    }
}

impl Drop for OwnerToken {
    fn drop(&mut self) {
        LIVE_OWNER_TOKENS.fetch_sub(1, Ordering::Relaxed);
        tracing::trace!(array = self.source.id(), ptr = %self.ptr, "owner token released");
    }
}

// ============================================================================
// MxWrapper
// ============================================================================

/// Opaque object-host container for an array-host value.
///
/// Converting it back yields the wrapped handle itself.
#[derive(Debug, Clone)]
pub struct MxWrapper {
    array: MxArray,
}

impl MxWrapper {
    /// Type name the object host reports
    pub const TYPE_NAME: &'static str = "mxpy.MxWrapper";

    pub fn new(array: MxArray) -> Self {
        Self { array }
    }

    pub fn array(&self) -> &MxArray {
        &self.array
    }

    pub fn into_inner(self) -> MxArray {
        self.array
    }
}

// ============================================================================
// BufferState
// ============================================================================

/// Lifecycle state of a wrapped buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// Owned by its host, unknown to the other
    Created,
    /// Aliased by the other host
    Wrapped,
    /// The other host let go; release in progress
    PendingRelease,
    /// Detached; the owning host may deallocate safely
    Released,
    /// Release deferred because the handle is still referenced
    Blocked,
}

impl BufferState {
    /// Whether the buffer is still shared across hosts
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            BufferState::Wrapped | BufferState::PendingRelease | BufferState::Blocked
        )
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BufferState::Created => "Created",
            BufferState::Wrapped => "Wrapped",
            BufferState::PendingRelease => "PendingRelease",
            BufferState::Released => "Released",
            BufferState::Blocked => "Blocked",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_pins_source() {
        let arr = MxArray::from_slice(&[1.0, 2.0], &[1, 2]).unwrap();
        let ptr = arr.raw_pointer().unwrap();
        let token = OwnerToken::new(arr.clone(), ptr);
        assert_eq!(arr.ref_count(), 2);
        assert!(token.is_current());
        assert!(token.source().ptr_eq(&arr));
        drop(token);
        assert_eq!(arr.ref_count(), 1);
    }

    #[test]
    fn test_wrapper_roundtrip() {
        let obj = MxArray::object("containers.Map", true);
        let wrapper = MxWrapper::new(obj.clone());
        assert!(wrapper.into_inner().ptr_eq(&obj));
    }

    #[test]
    fn test_state_liveness() {
        assert!(BufferState::Blocked.is_live());
        assert!(!BufferState::Released.is_live());
        assert_eq!(BufferState::PendingRelease.to_string(), "PendingRelease");
    }
}
