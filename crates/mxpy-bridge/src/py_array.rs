//! Object-host strided arrays.
//!
//! An [`NdArray`] is a dtype, an [`ArrayLayout`] (shape, byte strides,
//! offset) and a buffer. It either owns its buffer (the object host
//! allocated it) or borrows one through a base: another array it is a
//! view of, or an [`OwnerToken`] pinning an array-host handle.
//!
//! ## Zero-copy views
//!
//! A view built over array-host memory never frees that memory. Its
//! `OwnerToken` keeps the source handle alive until the last clone of the
//! view is dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::buffer::{encode, Buffer, DataPtr, Element, Host};
use crate::error::{BridgeError, BridgeResult};
use crate::layout::{element_count, unravel, ArrayLayout, MemoryLayout};
use crate::ownership::OwnerToken;
use crate::type_map::DType;

static NEXT_NDARRAY_ID: AtomicU64 = AtomicU64::new(1);

/// What keeps a borrowed array's memory alive
#[derive(Debug)]
pub enum ArrayBase {
    /// View of another object-host array
    Array(NdArray),
    /// View of array-host memory
    Owner(OwnerToken),
}

#[derive(Debug)]
pub(crate) struct NdInner {
    id: u64,
    dtype: DType,
    layout: ArrayLayout,
    buffer: Arc<Buffer>,
    owns_data: bool,
    base: Option<ArrayBase>,
}

impl Drop for NdInner {
    fn drop(&mut self) {
        if self.owns_data {
            self.buffer.free(Host::Object);
        }
    }
}

/// Handle to an object-host array
#[derive(Debug, Clone)]
pub struct NdArray(Arc<NdInner>);

/// Non-owning handle, used by the buffer cache
#[derive(Debug, Clone)]
pub struct WeakNdArray(Weak<NdInner>);

impl WeakNdArray {
    /// The array, if any handle to it is still alive
    pub fn upgrade(&self) -> Option<NdArray> {
        self.0.upgrade().map(NdArray)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl NdArray {
    fn build(
        dtype: DType,
        layout: ArrayLayout,
        buffer: Arc<Buffer>,
        owns_data: bool,
        base: Option<ArrayBase>,
    ) -> Self {
        NdArray(Arc::new(NdInner {
            id: NEXT_NDARRAY_ID.fetch_add(1, Ordering::Relaxed),
            dtype,
            layout,
            buffer,
            owns_data,
            base,
        }))
    }

    /// Array owning a fresh copy of `bytes` in the given ordering
    pub fn from_bytes(
        dtype: DType,
        shape: Vec<usize>,
        order: MemoryLayout,
        bytes: Vec<u8>,
    ) -> BridgeResult<Self> {
        let layout = ArrayLayout::contiguous(shape, dtype.size(), order);
        if bytes.len() != layout.nbytes() {
            return Err(BridgeError::shape_mismatch(format!(
                "{} bytes do not fill a {} array of shape {:?}",
                bytes.len(),
                dtype,
                layout.shape
            )));
        }
        let buffer = Buffer::new(Host::Object, bytes);
        Ok(Self::build(dtype, layout, buffer, true, None))
    }

    /// Row-major array from data in row-major order
    pub fn from_vec<T: Element>(data: Vec<T>, shape: Vec<usize>) -> BridgeResult<Self> {
        Self::from_bytes(DType::from_element(T::ELEMENT), shape, MemoryLayout::RowMajor, encode(&data))
    }

    /// Column-major array from data in column-major order
    pub fn from_vec_fortran<T: Element>(data: Vec<T>, shape: Vec<usize>) -> BridgeResult<Self> {
        Self::from_bytes(
            DType::from_element(T::ELEMENT),
            shape,
            MemoryLayout::ColumnMajor,
            encode(&data),
        )
    }

    /// Zero-filled array
    pub fn zeros(dtype: DType, shape: Vec<usize>, order: MemoryLayout) -> Self {
        let layout = ArrayLayout::contiguous(shape, dtype.size(), order);
        let buffer = Buffer::zeroed(Host::Object, layout.nbytes());
        Self::build(dtype, layout, buffer, true, None)
    }

    /// View of array-host memory pinned by `token`
    pub(crate) fn wrap_foreign(
        dtype: DType,
        layout: ArrayLayout,
        buffer: Arc<Buffer>,
        token: OwnerToken,
    ) -> Self {
        Self::build(dtype, layout, buffer, false, Some(ArrayBase::Owner(token)))
    }

    /// View of this array's memory with a different layout.
    ///
    /// Strides may be negative; every addressed byte must lie inside the
    /// buffer.
    pub fn as_strided(&self, shape: Vec<usize>, strides: Vec<isize>, offset: usize) -> BridgeResult<Self> {
        if shape.len() != strides.len() {
            return Err(BridgeError::shape_mismatch(format!(
                "{} dimensions but {} strides",
                shape.len(),
                strides.len()
            )));
        }
        let layout = ArrayLayout {
            shape,
            strides,
            elem_size: self.0.dtype.size(),
            offset,
        };
        if let Some((low, high)) = layout.byte_extent() {
            if low < 0 || high as usize > self.0.buffer.len() {
                return Err(BridgeError::conversion_failed(
                    "strided view",
                    "ndarray",
                    format!(
                        "bytes {}..{} fall outside the {}-byte buffer",
                        low,
                        high,
                        self.0.buffer.len()
                    ),
                ));
            }
        }
        Ok(self.view(layout))
    }

    /// Reversed-axes view
    pub fn transpose(&self) -> Self {
        self.view(self.0.layout.transpose())
    }

    /// Every `step`-th element along `axis`
    pub fn step(&self, axis: usize, step: usize) -> BridgeResult<Self> {
        let layout = &self.0.layout;
        if axis >= layout.ndim() || step == 0 {
            return Err(BridgeError::shape_mismatch(format!(
                "cannot step axis {} by {} on a {}-d array",
                axis,
                step,
                layout.ndim()
            )));
        }
        let mut shape = layout.shape.clone();
        let mut strides = layout.strides.clone();
        shape[axis] = shape[axis].div_ceil(step);
        strides[axis] *= step as isize;
        self.as_strided(shape, strides, layout.offset)
    }

    /// View walking `axis` backwards
    pub fn reversed(&self, axis: usize) -> BridgeResult<Self> {
        let layout = &self.0.layout;
        if axis >= layout.ndim() {
            return Err(BridgeError::shape_mismatch(format!(
                "axis {} out of range for a {}-d array",
                axis,
                layout.ndim()
            )));
        }
        let mut strides = layout.strides.clone();
        let last = layout.shape[axis].saturating_sub(1) as isize;
        let offset = layout.offset as isize + last * strides[axis];
        strides[axis] = -strides[axis];
        self.as_strided(layout.shape.clone(), strides, offset.max(0) as usize)
    }

    fn view(&self, layout: ArrayLayout) -> Self {
        Self::build(
            self.0.dtype,
            layout,
            self.0.buffer.clone(),
            false,
            Some(ArrayBase::Array(self.clone())),
        )
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn dtype(&self) -> DType {
        self.0.dtype
    }

    pub fn layout(&self) -> &ArrayLayout {
        &self.0.layout
    }

    pub fn shape(&self) -> &[usize] {
        &self.0.layout.shape
    }

    /// Byte strides
    pub fn strides(&self) -> &[isize] {
        &self.0.layout.strides
    }

    pub fn ndim(&self) -> usize {
        self.0.layout.ndim()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        element_count(self.shape())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_c_contiguous(&self) -> bool {
        self.0.layout.is_c_contiguous()
    }

    pub fn is_f_contiguous(&self) -> bool {
        self.0.layout.is_f_contiguous()
    }

    /// Whether this array frees its buffer when dropped
    pub fn owns_data(&self) -> bool {
        self.0.owns_data
    }

    pub fn base(&self) -> Option<&ArrayBase> {
        self.0.base.as_ref()
    }

    /// Token pinning array-host memory, when this is a direct view of it
    pub fn owner_token(&self) -> Option<&OwnerToken> {
        match &self.0.base {
            Some(ArrayBase::Owner(token)) => Some(token),
            _ => None,
        }
    }

    /// Identity of element zero
    pub fn data_ptr(&self) -> DataPtr {
        DataPtr {
            buffer: self.0.buffer.id(),
            offset: self.0.layout.offset,
        }
    }

    pub(crate) fn buffer(&self) -> &Arc<Buffer> {
        &self.0.buffer
    }

    /// Number of live handles
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Check if two handles refer to the same array
    pub fn ptr_eq(&self, other: &NdArray) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakNdArray {
        WeakNdArray(Arc::downgrade(&self.0))
    }

    // ------------------------------------------------------------------
    // Element access
    // ------------------------------------------------------------------

    fn checked_offset<T: Element>(&self, indices: &[usize]) -> BridgeResult<usize> {
        let element = self.0.dtype.to_element()?;
        if !T::compatible(element) {
            return Err(BridgeError::type_mismatch(self.0.dtype.name(), T::ELEMENT.class_name()));
        }
        self.0.layout.byte_offset(indices).ok_or_else(|| {
            BridgeError::conversion_failed(
                format!("index {:?}", indices),
                "ndarray",
                format!("out of bounds for shape {:?}", self.shape()),
            )
        })
    }

    /// Element at `indices`
    pub fn get<T: Element>(&self, indices: &[usize]) -> BridgeResult<T> {
        let start = self.checked_offset::<T>(indices)?;
        let width = T::ELEMENT.byte_width();
        self.0.buffer.read(|bytes| {
            bytes
                .get(start..start + width)
                .map(T::read_ne)
                .ok_or_else(|| BridgeError::conversion_failed("ndarray", "element", "buffer too small"))
        })
    }

    /// Overwrite the element at `indices`
    pub fn set<T: Element>(&self, indices: &[usize], value: T) -> BridgeResult<()> {
        let start = self.checked_offset::<T>(indices)?;
        let width = T::ELEMENT.byte_width();
        self.0.buffer.write(|bytes| match bytes.get_mut(start..start + width) {
            Some(slot) => {
                value.write_ne(slot);
                Ok(())
            }
            None => Err(BridgeError::conversion_failed("element", "ndarray", "buffer too small")),
        })
    }

    /// All elements in row-major (natural index) order
    pub fn to_vec<T: Element>(&self) -> BridgeResult<Vec<T>> {
        (0..self.len())
            .map(|i| self.get(&unravel(i, self.shape(), MemoryLayout::RowMajor)))
            .collect()
    }

    /// Dense copy of the addressed bytes in `order`
    pub(crate) fn gather(&self, order: MemoryLayout) -> BridgeResult<Vec<u8>> {
        self.0.buffer.read(|bytes| self.0.layout.gather(bytes, order))
    }

    /// Bytes of a contiguous array as one block, in storage order
    pub(crate) fn block_bytes(&self) -> BridgeResult<Vec<u8>> {
        let start = self.0.layout.offset;
        let len = self.0.layout.nbytes();
        self.0.buffer.read(|bytes| {
            bytes
                .get(start..start + len)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| {
                    BridgeError::conversion_failed("ndarray", "bytes", "buffer too small")
                })
        })
    }
}

impl fmt::Display for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape().iter().map(|d| d.to_string()).collect();
        let trailing = if dims.len() == 1 { "," } else { "" };
        write!(f, "<ndarray shape=({}{}) dtype={}>", dims.join(", "), trailing, self.0.dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_row_major_indexing() {
        let arr = NdArray::from_vec((0..6).map(f64::from).collect(), vec![2, 3]).unwrap();
        assert!(arr.is_c_contiguous());
        assert!(!arr.is_f_contiguous());
        assert_eq!(arr.strides(), &[24, 8]);
        assert_eq!(arr.get::<f64>(&[1, 0]).unwrap(), 3.0);
        assert!(arr.get::<f64>(&[2, 0]).is_err());
        assert!(arr.get::<i64>(&[0, 0]).is_err());
    }

    #[test]
    fn test_fortran_indexing() {
        let arr = NdArray::from_vec_fortran(vec![1i32, 2, 3, 4, 5, 6], vec![2, 3]).unwrap();
        assert!(arr.is_f_contiguous());
        assert_eq!(arr.to_vec::<i32>().unwrap(), vec![1, 3, 5, 2, 4, 6]);
    }

    #[test]
    fn test_transpose_shares_buffer() {
        let arr = NdArray::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        let t = arr.transpose();
        assert_eq!(t.shape(), &[3, 2]);
        assert!(t.is_f_contiguous());
        assert!(!t.owns_data());
        assert_eq!(t.data_ptr(), arr.data_ptr());
        t.set(&[2, 1], 60.0f32).unwrap();
        assert_eq!(arr.get::<f32>(&[1, 2]).unwrap(), 60.0);
    }

    #[test]
    fn test_step_view() {
        let arr = NdArray::from_vec((0..10).map(|i| i as f64).collect(), vec![10]).unwrap();
        let odd = arr.step(0, 2).unwrap();
        assert_eq!(odd.shape(), &[5]);
        assert!(!odd.is_c_contiguous());
        assert_eq!(odd.to_vec::<f64>().unwrap(), vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_reversed_view() {
        let arr = NdArray::from_vec(vec![1u8, 2, 3], vec![3]).unwrap();
        let rev = arr.reversed(0).unwrap();
        assert_eq!(rev.strides(), &[-1]);
        assert_eq!(rev.to_vec::<u8>().unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn test_as_strided_bounds() {
        let arr = NdArray::zeros(DType::Float64, vec![4], MemoryLayout::RowMajor);
        assert!(arr.as_strided(vec![4], vec![16], 0).is_err());
        assert!(arr.as_strided(vec![2], vec![16], 0).is_ok());
    }

    #[test]
    fn test_unsupported_dtype_access() {
        let arr = NdArray::zeros(DType::LongDouble, vec![2], MemoryLayout::RowMajor);
        let err = arr.get::<f64>(&[0]).unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedDtype { .. }));
    }

    #[test]
    fn test_display() {
        let arr = NdArray::zeros(DType::Int16, vec![5], MemoryLayout::RowMajor);
        assert_eq!(arr.to_string(), "<ndarray shape=(5,) dtype=int16>");
    }
}
