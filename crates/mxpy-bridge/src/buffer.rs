//! Raw buffers shared between the two hosts.
//!
//! A [`Buffer`] is a block of bytes allocated by exactly one host. Either
//! host may hold a [`BufferBinding`] onto it, but only the allocating host
//! may free it. Frees by the wrong host, second frees and accesses after a
//! free are counted by the deallocation audit ([`audit`]) and logged; the
//! bridge is correct only while the audit stays clean.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use num_complex::Complex;
use parking_lot::RwLock;

use crate::type_map::ElementType;

// ============================================================================
// Deallocation Audit
// ============================================================================

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);
static FOREIGN_FREES: AtomicU64 = AtomicU64::new(0);
static DOUBLE_FREES: AtomicU64 = AtomicU64::new(0);
static STALE_ACCESSES: AtomicU64 = AtomicU64::new(0);

/// Process-wide deallocation violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferAudit {
    /// A host freed a buffer the other host allocated
    pub foreign_frees: u64,
    /// A buffer was freed twice
    pub double_frees: u64,
    /// A buffer was read or written after being freed
    pub stale_accesses: u64,
}

impl BufferAudit {
    /// No violation recorded
    pub fn is_clean(&self) -> bool {
        *self == BufferAudit::default()
    }
}

impl fmt::Display for BufferAudit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "foreign_frees={}, double_frees={}, stale_accesses={}",
            self.foreign_frees, self.double_frees, self.stale_accesses
        )
    }
}

/// Snapshot of the deallocation audit
pub fn audit() -> BufferAudit {
    BufferAudit {
        foreign_frees: FOREIGN_FREES.load(Ordering::Relaxed),
        double_frees: DOUBLE_FREES.load(Ordering::Relaxed),
        stale_accesses: STALE_ACCESSES.load(Ordering::Relaxed),
    }
}

// ============================================================================
// Buffer
// ============================================================================

/// The host that allocated a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Host {
    /// Numeric-array host
    Array,
    /// Dynamic-object host
    Object,
}

/// Identity of a buffer position: which buffer, and how far into it.
///
/// This is what both hosts call the "data pointer".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataPtr {
    pub buffer: u64,
    pub offset: usize,
}

impl fmt::Display for DataPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}+{}", self.buffer, self.offset)
    }
}

/// A host allocation
#[derive(Debug)]
pub struct Buffer {
    id: u64,
    owner: Host,
    bytes: RwLock<Vec<u8>>,
    freed: AtomicBool,
}

impl Buffer {
    /// Take ownership of `bytes` on behalf of `owner`
    pub fn new(owner: Host, bytes: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            owner,
            bytes: RwLock::new(bytes),
            freed: AtomicBool::new(false),
        })
    }

    /// Zero-filled allocation
    pub fn zeroed(owner: Host, len: usize) -> Arc<Self> {
        Self::new(owner, vec![0u8; len])
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn owner(&self) -> Host {
        self.owner
    }

    /// Length in bytes (zero once freed)
    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }

    /// Run `f` over the bytes
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.note_access("read");
        let bytes = self.bytes.read();
        f(&bytes)
    }

    /// Run `f` over the bytes mutably
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.note_access("write");
        let mut bytes = self.bytes.write();
        f(&mut bytes)
    }

    /// Host deallocation. Returns `true` when the free was legitimate.
    pub fn free(&self, by: Host) -> bool {
        if by != self.owner {
            FOREIGN_FREES.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                buffer = self.id,
                owner = ?self.owner,
                by = ?by,
                "host freed a buffer it does not own"
            );
            return false;
        }
        if self.freed.swap(true, Ordering::AcqRel) {
            DOUBLE_FREES.fetch_add(1, Ordering::Relaxed);
            tracing::error!(buffer = self.id, "buffer freed twice");
            return false;
        }
        tracing::trace!(buffer = self.id, owner = ?self.owner, "buffer freed");
        *self.bytes.write() = Vec::new();
        true
    }

    fn note_access(&self, what: &str) {
        if self.is_freed() {
            STALE_ACCESSES.fetch_add(1, Ordering::Relaxed);
            tracing::error!(buffer = self.id, access = what, "access to a freed buffer");
        }
    }
}

// ============================================================================
// BufferBinding
// ============================================================================

/// What a handle does with its buffer when the handle is destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deleter {
    /// Free the buffer as the holding host
    Free,
    /// Leave the buffer alone
    Noop,
}

/// A handle's view of a buffer: which buffer, where element zero sits,
/// and what happens to it when the handle goes away.
#[derive(Debug, Clone)]
pub struct BufferBinding {
    buffer: Arc<Buffer>,
    offset: usize,
    deleter: Deleter,
}

impl BufferBinding {
    /// Binding to a buffer the holder allocated itself
    pub fn owned(buffer: Arc<Buffer>) -> Self {
        Self {
            buffer,
            offset: 0,
            deleter: Deleter::Free,
        }
    }

    /// Binding with an explicit offset and deleter
    pub fn new(buffer: Arc<Buffer>, offset: usize, deleter: Deleter) -> Self {
        Self {
            buffer,
            offset,
            deleter,
        }
    }

    /// Single-element buffer owned by the array host, substituted into a
    /// handle before its own deallocation runs.
    pub fn placeholder(width: usize) -> Self {
        Self::owned(Buffer::zeroed(Host::Array, width.max(1)))
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn deleter(&self) -> Deleter {
        self.deleter
    }

    pub fn data_ptr(&self) -> DataPtr {
        DataPtr {
            buffer: self.buffer.id(),
            offset: self.offset,
        }
    }

    /// Copy `len` bytes starting at element zero
    pub fn copy_bytes(&self, len: usize) -> Option<Vec<u8>> {
        self.buffer
            .read(|bytes| bytes.get(self.offset..self.offset + len).map(<[u8]>::to_vec))
    }

    /// Apply the deleter on behalf of `host`
    pub(crate) fn release(&self, host: Host) {
        if self.deleter == Deleter::Free {
            self.buffer.free(host);
        }
    }
}

// ============================================================================
// Element - typed access to raw bytes
// ============================================================================

/// Rust types that can be read from and written to a buffer.
pub trait Element: Copy + Send + Sync + 'static {
    /// Element type this Rust type stores
    const ELEMENT: ElementType;

    /// Decode from native-endian bytes (`bytes.len() >= width`)
    fn read_ne(bytes: &[u8]) -> Self;

    /// Encode into native-endian bytes (`out.len() >= width`)
    fn write_ne(&self, out: &mut [u8]);

    /// Whether values of this type may be read from elements of `element`.
    /// Character data is readable as `u16`.
    fn compatible(element: ElementType) -> bool {
        element == Self::ELEMENT
            || (element == ElementType::Char && Self::ELEMENT == ElementType::UInt16)
    }
}

macro_rules! impl_element {
    ($($ty:ty => $element:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const ELEMENT: ElementType = ElementType::$element;

                fn read_ne(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                    <$ty>::from_ne_bytes(raw)
                }

                fn write_ne(&self, out: &mut [u8]) {
                    out[..std::mem::size_of::<$ty>()].copy_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_element!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Single,
    f64 => Double,
);

impl Element for bool {
    const ELEMENT: ElementType = ElementType::Bool;

    fn read_ne(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write_ne(&self, out: &mut [u8]) {
        out[0] = u8::from(*self);
    }
}

impl Element for Complex<f32> {
    const ELEMENT: ElementType = ElementType::ComplexSingle;

    fn read_ne(bytes: &[u8]) -> Self {
        Complex::new(f32::read_ne(&bytes[..4]), f32::read_ne(&bytes[4..8]))
    }

    fn write_ne(&self, out: &mut [u8]) {
        self.re.write_ne(&mut out[..4]);
        self.im.write_ne(&mut out[4..8]);
    }
}

impl Element for Complex<f64> {
    const ELEMENT: ElementType = ElementType::ComplexDouble;

    fn read_ne(bytes: &[u8]) -> Self {
        Complex::new(f64::read_ne(&bytes[..8]), f64::read_ne(&bytes[8..16]))
    }

    fn write_ne(&self, out: &mut [u8]) {
        self.re.write_ne(&mut out[..8]);
        self.im.write_ne(&mut out[8..16]);
    }
}

/// Encode a slice of elements into native-endian bytes
pub fn encode<T: Element>(values: &[T]) -> Vec<u8> {
    let width = T::ELEMENT.byte_width();
    let mut out = vec![0u8; values.len() * width];
    for (value, chunk) in values.iter().zip(out.chunks_exact_mut(width)) {
        value.write_ne(chunk);
    }
    out
}

/// Decode native-endian bytes into elements
pub fn decode<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(T::ELEMENT.byte_width())
        .map(T::read_ne)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_element_roundtrip_bits() {
        let values = [f64::NAN, -0.0, 1.5e300];
        let back: Vec<f64> = decode(&encode(&values));
        for (a, b) in values.iter().zip(&back) {
            assert_eq!(a.to_bits(), b.to_bits());
        }

        let c = [Complex::new(1.0f32, -2.0)];
        assert_eq!(decode::<Complex<f32>>(&encode(&c)), c.to_vec());
        assert_eq!(decode::<bool>(&encode(&[true, false])), vec![true, false]);
    }

    #[test]
    fn test_char_readable_as_u16() {
        assert!(u16::compatible(ElementType::Char));
        assert!(!i16::compatible(ElementType::Char));
        assert!(!f32::compatible(ElementType::Double));
    }

    #[test]
    fn test_binding_identity() {
        let buffer = Buffer::zeroed(Host::Object, 32);
        let a = BufferBinding::new(buffer.clone(), 8, Deleter::Noop);
        let b = BufferBinding::new(buffer.clone(), 8, Deleter::Free);
        let c = BufferBinding::owned(buffer);
        assert_eq!(a.data_ptr(), b.data_ptr());
        assert_ne!(a.data_ptr(), c.data_ptr());
        assert_eq!(a.copy_bytes(24).map(|v| v.len()), Some(24));
        assert_eq!(a.copy_bytes(25), None);
    }

    #[test]
    fn test_free_by_owner() {
        let buffer = Buffer::zeroed(Host::Array, 8);
        assert!(buffer.free(Host::Array));
        assert!(buffer.is_freed());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_noop_binding_does_not_free() {
        let buffer = Buffer::zeroed(Host::Object, 8);
        BufferBinding::new(buffer.clone(), 0, Deleter::Noop).release(Host::Array);
        assert!(!buffer.is_freed());
    }
}
