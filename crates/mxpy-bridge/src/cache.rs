//! Buffer Cache
//!
//! Table of live cross-host aliases, keyed by data pointer. It is small
//! (one entry per live alias) and scanned linearly.
//!
//! Two kinds of entry:
//!
//! - **view**: an object-host view over array-host memory. Held weakly;
//!   it lets a second conversion of the same array return the existing
//!   view. It expires when the view dies.
//! - **alias**: an array-host handle over object-host memory. The cache
//!   holds both sides until [`BufferCache::sweep`] finds the handle
//!   unreferenced (refcount <= 1), substitutes a placeholder buffer when
//!   the handle would otherwise free foreign bytes, and drops the entry.
//!
//! An alias still referenced at sweep time is `Blocked` and retried on
//! the next sweep. While the object side also holds the array, both hosts
//! are using the shared bytes and the entry just waits. Once the object
//! side has let go, `max_attempts` further blocked sweeps force-detach
//! it: its bytes are copied into a fresh array-host buffer and the handle
//! is rebound to it. [`BufferCache::drain`] force-detaches regardless.
//!
//! Lookups match on the full geometry (element type, dims, strides), not
//! just the data pointer: a transposed or sliced view can start at the
//! same address as a cached one.

use std::fmt;

use crate::adapter::RawPointerAdapter;
use crate::buffer::{Buffer, BufferBinding, DataPtr, Host};
use crate::error::BridgeResult;
use crate::layout::strides_for;
use crate::mx_types::MxArray;
use crate::ownership::BufferState;
use crate::py_array::{NdArray, WeakNdArray};
use crate::type_map::DType;

/// Whether `view` is exactly the array a fresh wrap of `handle` would build
pub(crate) fn view_matches(view: &NdArray, handle: &MxArray) -> bool {
    let Some(element) = handle.element_type() else {
        return false;
    };
    view.dtype() == DType::from_element(element)
        && view.shape() == handle.dims()
        && view.strides() == strides_for(handle.dims(), element.byte_width(), handle.layout()).as_slice()
}

/// Whether the cached alias `array` describes the bytes of `handle` the
/// same way
pub(crate) fn alias_matches(array: &MxArray, handle: &MxArray) -> bool {
    array.ptr_eq(handle)
        || (array.raw_pointer() == handle.raw_pointer()
            && array.dims() == handle.dims()
            && array.layout() == handle.layout()
            && array.element_type() == handle.element_type())
}

/// How a sweep treats aliases that are still referenced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detach {
    /// Count a blocked sweep only once the object side has let go
    WhenOrphaned,
    /// Count every blocked sweep (shutdown)
    Always,
}

#[derive(Debug)]
enum EntryKind {
    View {
        view: WeakNdArray,
    },
    Alias {
        array: MxArray,
        object: NdArray,
        needs_placeholder: bool,
    },
}

/// One cached alias
#[derive(Debug)]
pub struct CacheEntry {
    ptr: DataPtr,
    kind: EntryKind,
    state: BufferState,
    blocked_sweeps: u32,
}

impl CacheEntry {
    pub fn ptr(&self) -> DataPtr {
        self.ptr
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Sweeps that found the entry blocked after the object side let go
    pub fn blocked_sweeps(&self) -> u32 {
        self.blocked_sweeps
    }

    /// Advance the entry's release state by one sweep.
    fn advance(&mut self, max_attempts: u32, detach: Detach, report: &mut ReleaseReport) {
        match &self.kind {
            EntryKind::View { view } => {
                if !view.is_alive() {
                    self.state = BufferState::Released;
                    report.expired_views += 1;
                }
            }
            EntryKind::Alias {
                array,
                object,
                needs_placeholder,
            } => {
                self.state = BufferState::PendingRelease;
                if array.host_refcount() <= 1 {
                    if *needs_placeholder {
                        substitute_placeholder(array);
                    }
                    tracing::debug!(ptr = %self.ptr, "cached alias released");
                    self.state = BufferState::Released;
                    report.released += 1;
                    return;
                }

                // The cache's own handle is the only one left on the object side
                let orphaned = object.ref_count() <= 1;
                if orphaned || detach == Detach::Always {
                    self.blocked_sweeps += 1;
                }
                if self.blocked_sweeps >= max_attempts {
                    match force_detach(array) {
                        Ok(()) => {
                            tracing::warn!(
                                ptr = %self.ptr,
                                refs = array.host_refcount(),
                                sweeps = self.blocked_sweeps,
                                "alias still referenced; copied and detached"
                            );
                            self.state = BufferState::Released;
                            report.forced += 1;
                            return;
                        }
                        Err(err) => {
                            tracing::error!(ptr = %self.ptr, error = %err, "force detach failed");
                        }
                    }
                }
                tracing::debug!(
                    ptr = %self.ptr,
                    refs = array.host_refcount(),
                    sweeps = self.blocked_sweeps,
                    orphaned,
                    "cached alias blocked"
                );
                self.state = BufferState::Blocked;
                report.blocked += 1;
            }
        }
    }
}

/// Swap a one-element array-host buffer into `array` so that its own
/// deallocation never sees the foreign address.
fn substitute_placeholder(array: &MxArray) {
    let width = array.element_type().map_or(1, |e| e.byte_width());
    // The displaced binding points at object-host memory; dropping it
    // without applying its deleter is the point.
    if let Err(err) = array.rebind_raw_pointer(BufferBinding::placeholder(width)) {
        tracing::error!(array = array.id(), error = %err, "placeholder substitution failed");
    }
}

/// Give `array` its own copy of the bytes it aliases.
fn force_detach(array: &MxArray) -> BridgeResult<()> {
    let bytes = array.storage_bytes()?;
    let binding = BufferBinding::owned(Buffer::new(Host::Array, bytes));
    array.rebind_raw_pointer(binding)?;
    Ok(())
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReleaseReport {
    /// Aliases released normally
    pub released: usize,
    /// Aliases still referenced, deferred to a later sweep
    pub blocked: usize,
    /// Aliases copied and detached after too many blocked sweeps
    pub forced: usize,
    /// Views whose object-host handles are all gone
    pub expired_views: usize,
}

impl ReleaseReport {
    /// Nothing left pending
    pub fn is_settled(&self) -> bool {
        self.blocked == 0
    }

    fn merge(&mut self, other: ReleaseReport) {
        self.released += other.released;
        self.blocked += other.blocked;
        self.forced += other.forced;
        self.expired_views += other.expired_views;
    }
}

impl fmt::Display for ReleaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "released={}, blocked={}, forced={}, expired_views={}",
            self.released, self.blocked, self.forced, self.expired_views
        )
    }
}

/// Counters over the cache's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Conversions answered from the cache
    pub hits: u64,
    /// Zero-copy wraps performed
    pub wraps: u64,
    /// Contiguous block copies
    pub copies: u64,
    /// Element-by-element strided copies
    pub strided_copies: u64,
    /// Aliases released
    pub released: u64,
    /// Blocked sweep outcomes
    pub blocked: u64,
    /// Forced detaches
    pub forced_detaches: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={}, wraps={}, copies={}, strided_copies={}, released={}, blocked={}, forced_detaches={}",
            self.hits,
            self.wraps,
            self.copies,
            self.strided_copies,
            self.released,
            self.blocked,
            self.forced_detaches
        )
    }
}

/// Table of live aliases
#[derive(Debug, Default)]
pub struct BufferCache {
    entries: Vec<CacheEntry>,
    stats: CacheStats,
}

impl BufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut CacheStats {
        &mut self.stats
    }

    /// Cached entries
    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// Record an object-host view over array-host memory
    pub fn register_view(&mut self, ptr: DataPtr, view: &NdArray) {
        tracing::trace!(ptr = %ptr, "view cached");
        self.entries.push(CacheEntry {
            ptr,
            kind: EntryKind::View {
                view: view.downgrade(),
            },
            state: BufferState::Wrapped,
            blocked_sweeps: 0,
        });
    }

    /// Record an array-host handle over object-host memory
    pub fn register_alias(&mut self, array: &MxArray, object: &NdArray, needs_placeholder: bool) {
        let ptr = object.data_ptr();
        tracing::trace!(ptr = %ptr, placeholder = needs_placeholder, "alias cached");
        self.entries.push(CacheEntry {
            ptr,
            kind: EntryKind::Alias {
                array: array.clone(),
                object: object.clone(),
                needs_placeholder,
            },
            state: BufferState::Wrapped,
            blocked_sweeps: 0,
        });
    }

    /// Existing object-host array sharing the bytes of `handle` with the
    /// same element type, dims and strides
    pub fn lookup_object(&mut self, handle: &MxArray) -> Option<NdArray> {
        let ptr = handle.raw_pointer()?;
        let found = self.entries.iter().find_map(|entry| {
            if entry.ptr != ptr || entry.state == BufferState::Released {
                return None;
            }
            match &entry.kind {
                EntryKind::View { view } => view.upgrade().filter(|view| view_matches(view, handle)),
                EntryKind::Alias { array, object, .. } => {
                    // A rebound alias no longer shares the object's bytes
                    (array.raw_pointer() == Some(ptr) && alias_matches(array, handle)).then(|| object.clone())
                }
            }
        });
        if found.is_some() {
            self.stats.hits += 1;
        }
        found
    }

    /// Array-host handle already aliasing `object`
    pub fn lookup_array(&mut self, object: &NdArray) -> Option<MxArray> {
        let found = self.entries.iter().find_map(|entry| match &entry.kind {
            EntryKind::Alias {
                array,
                object: cached,
                ..
            } if cached.ptr_eq(object) && array.raw_pointer() == Some(entry.ptr) => {
                Some(array.clone())
            }
            _ => None,
        });
        if found.is_some() {
            self.stats.hits += 1;
        }
        found
    }

    /// State of the entry for `ptr`; `None` once it has left the cache
    pub fn state_of(&self, ptr: DataPtr) -> Option<BufferState> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.ptr == ptr)
            .map(|entry| entry.state)
    }

    /// Attempt to release every entry.
    pub fn sweep(&mut self, max_attempts: u32) -> ReleaseReport {
        self.sweep_with(max_attempts, Detach::WhenOrphaned)
    }

    fn sweep_with(&mut self, max_attempts: u32, detach: Detach) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        for entry in &mut self.entries {
            entry.advance(max_attempts, detach, &mut report);
        }
        let (done, kept): (Vec<CacheEntry>, Vec<CacheEntry>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.state == BufferState::Released);
        self.entries = kept;

        self.stats.released += report.released as u64;
        self.stats.blocked += report.blocked as u64;
        self.stats.forced_detaches += report.forced as u64;

        // Last references to released pairs go here, after the table is
        // consistent again.
        drop(done);
        report
    }

    /// Release everything, force-detaching whatever is still referenced
    pub fn drain(&mut self) -> ReleaseReport {
        let mut report = self.sweep_with(u32::MAX, Detach::WhenOrphaned);
        if !self.is_empty() {
            report.merge(self.sweep_with(1, Detach::Always));
            report.blocked = 0;
        }
        report
    }
}
