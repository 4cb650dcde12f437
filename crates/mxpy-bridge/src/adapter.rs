//! Platform adapter for array-host handles.
//!
//! The only code that reaches into a handle's storage to find or replace
//! the buffer backing it. Everything else goes through
//! [`RawPointerAdapter`], so a change in the host's internal layout is
//! confined to this module.

use crate::buffer::{BufferBinding, DataPtr};
use crate::error::{BridgeError, BridgeResult};
use crate::mx_types::MxArray;

/// Read and replace the buffer behind an opaque array handle.
pub trait RawPointerAdapter {
    /// Data pointer of the backing buffer, for dense arrays
    fn raw_pointer(&self) -> Option<DataPtr>;

    /// Current binding, for dense arrays
    fn raw_binding(&self) -> Option<BufferBinding>;

    /// Point the handle at `binding`, returning the binding it replaced.
    ///
    /// Dimensions are not checked against the new buffer: a placeholder
    /// substituted just before deallocation is smaller than the array.
    fn rebind_raw_pointer(&self, binding: BufferBinding) -> BridgeResult<BufferBinding>;

    /// The host's reference count on the handle
    fn host_refcount(&self) -> usize;
}

impl RawPointerAdapter for MxArray {
    fn raw_pointer(&self) -> Option<DataPtr> {
        self.dense_slot().map(|slot| slot.lock().data_ptr())
    }

    fn raw_binding(&self) -> Option<BufferBinding> {
        self.dense_slot().map(|slot| slot.lock().clone())
    }

    fn rebind_raw_pointer(&self, binding: BufferBinding) -> BridgeResult<BufferBinding> {
        let slot = self
            .dense_slot()
            .ok_or_else(|| BridgeError::type_mismatch("dense array", self.class().name()))?;
        let previous = std::mem::replace(&mut *slot.lock(), binding);
        tracing::trace!(
            array = self.id(),
            from = %previous.data_ptr(),
            "array rebound to a new buffer"
        );
        Ok(previous)
    }

    fn host_refcount(&self) -> usize {
        self.ref_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, Deleter, Host};

    #[test]
    fn test_rebind_swaps_buffer() {
        let arr = MxArray::from_slice(&[1.0, 2.0], &[1, 2]).unwrap();
        let before = arr.raw_pointer().unwrap();
        let replacement = BufferBinding::owned(Buffer::new(
            Host::Array,
            crate::buffer::encode(&[5.0, 6.0]),
        ));
        let after = replacement.data_ptr();

        let previous = arr.rebind_raw_pointer(replacement).unwrap();
        assert_eq!(previous.data_ptr(), before);
        assert_eq!(arr.raw_pointer(), Some(after));
        assert_eq!(arr.to_vec::<f64>().unwrap(), vec![5.0, 6.0]);

        // The displaced buffer is still the array host's to free
        assert!(previous.buffer().free(Host::Array));
    }

    #[test]
    fn test_non_dense_has_no_pointer() {
        let cell = MxArray::cell_row(vec![]);
        assert_eq!(cell.raw_pointer(), None);
        let noop = BufferBinding::new(Buffer::zeroed(Host::Object, 8), 0, Deleter::Noop);
        assert!(cell.rebind_raw_pointer(noop).is_err());
    }
}
