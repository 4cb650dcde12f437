//! Layout Transform
//!
//! Pure stride arithmetic for the two major orderings, and the
//! ravel/unravel remap used when a strided array has to be copied.
//!
//! ## Memory Layout
//!
//! - Column-major: `stride[0] = elem`, `stride[i] = stride[i-1] * d[i-1]`
//! - Row-major: `stride[n-1] = elem`, `stride[i] = stride[i+1] * d[i+1]`
//!
//! All strides are in bytes.

use std::fmt;

use crate::error::{BridgeError, BridgeResult};

/// Major ordering of a dense buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLayout {
    /// Last axis contiguous
    RowMajor,
    /// First axis contiguous
    ColumnMajor,
}

impl fmt::Display for MemoryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryLayout::RowMajor => write!(f, "row-major"),
            MemoryLayout::ColumnMajor => write!(f, "column-major"),
        }
    }
}

/// Total element count of a shape. A 0-d shape holds one element.
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Byte strides for a dense buffer of `shape` in the given ordering.
pub fn strides_for(shape: &[usize], elem_size: usize, order: MemoryLayout) -> Vec<isize> {
    let mut strides = vec![0isize; shape.len()];
    let mut stride = elem_size as isize;
    match order {
        MemoryLayout::ColumnMajor => {
            for (axis, &dim) in shape.iter().enumerate() {
                strides[axis] = stride;
                stride *= dim as isize;
            }
        }
        MemoryLayout::RowMajor => {
            for (axis, &dim) in shape.iter().enumerate().rev() {
                strides[axis] = stride;
                stride *= dim as isize;
            }
        }
    }
    strides
}

/// Decompose a linear index into per-axis coordinates.
pub fn unravel(mut index: usize, shape: &[usize], order: MemoryLayout) -> Vec<usize> {
    let mut coords = vec![0usize; shape.len()];
    let axes: Vec<usize> = match order {
        MemoryLayout::ColumnMajor => (0..shape.len()).collect(),
        MemoryLayout::RowMajor => (0..shape.len()).rev().collect(),
    };
    for axis in axes {
        let dim = shape[axis].max(1);
        coords[axis] = index % dim;
        index /= dim;
    }
    coords
}

/// Recompose coordinates into a byte offset under `strides`.
pub fn ravel(coords: &[usize], strides: &[isize]) -> isize {
    coords
        .iter()
        .zip(strides)
        .map(|(&c, &s)| c as isize * s)
        .sum()
}

/// Map a linear index in one ordering to the linear index of the same
/// element in the other ordering.
pub fn remap_index(index: usize, shape: &[usize], from: MemoryLayout, to: MemoryLayout) -> usize {
    if from == to {
        return index;
    }
    let coords = unravel(index, shape, from);
    ravel(&coords, &strides_for(shape, 1, to)) as usize
}

/// Reorder a dense buffer between orderings.
pub fn reorder<T: Copy>(data: &[T], shape: &[usize], from: MemoryLayout, to: MemoryLayout) -> Vec<T> {
    if from == to || shape.len() < 2 {
        return data.to_vec();
    }
    let mut out = data.to_vec();
    for (index, value) in data.iter().enumerate() {
        out[remap_index(index, shape, from, to)] = *value;
    }
    out
}

/// Reject negative strides.
pub fn validate_strides(strides: &[isize]) -> BridgeResult<()> {
    match strides.iter().position(|&s| s < 0) {
        Some(axis) => Err(BridgeError::invalid_stride(axis, strides[axis])),
        None => Ok(()),
    }
}

// ============================================================================
// ArrayLayout
// ============================================================================

/// Shape, byte strides and offset of a (possibly strided) array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayLayout {
    /// Dimensions
    pub shape: Vec<usize>,
    /// Strides in bytes for each dimension
    pub strides: Vec<isize>,
    /// Size of one element in bytes
    pub elem_size: usize,
    /// Offset of element zero from the start of the buffer
    pub offset: usize,
}

impl ArrayLayout {
    /// Dense layout in the given ordering
    pub fn contiguous(shape: Vec<usize>, elem_size: usize, order: MemoryLayout) -> Self {
        let strides = strides_for(&shape, elem_size, order);
        Self {
            shape,
            strides,
            elem_size,
            offset: 0,
        }
    }

    /// Get the number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get the total number of elements
    pub fn size(&self) -> usize {
        element_count(&self.shape)
    }

    /// Get the dense size in bytes
    pub fn nbytes(&self) -> usize {
        self.size() * self.elem_size
    }

    /// Check whether the strides match a dense buffer in `order`.
    /// Axes of length one never break contiguity.
    pub fn is_contiguous_in(&self, order: MemoryLayout) -> bool {
        if self.shape.iter().any(|&d| d == 0) {
            return true;
        }
        let dense = strides_for(&self.shape, self.elem_size, order);
        self.shape
            .iter()
            .zip(&self.strides)
            .zip(&dense)
            .all(|((&dim, &actual), &expected)| dim == 1 || actual == expected)
    }

    /// Check if layout is row-major contiguous
    pub fn is_c_contiguous(&self) -> bool {
        self.is_contiguous_in(MemoryLayout::RowMajor)
    }

    /// Check if layout is column-major contiguous
    pub fn is_f_contiguous(&self) -> bool {
        self.is_contiguous_in(MemoryLayout::ColumnMajor)
    }

    /// Dense ordering of this layout. Column-major wins when both hold.
    pub fn order(&self) -> Option<MemoryLayout> {
        if self.is_f_contiguous() {
            Some(MemoryLayout::ColumnMajor)
        } else if self.is_c_contiguous() {
            Some(MemoryLayout::RowMajor)
        } else {
            None
        }
    }

    /// Absolute byte offset of the element at `indices`, bounds-checked.
    pub fn byte_offset(&self, indices: &[usize]) -> Option<usize> {
        if indices.len() != self.ndim() {
            return None;
        }
        if indices.iter().zip(&self.shape).any(|(&i, &d)| i >= d) {
            return None;
        }
        let offset = self.offset as isize + ravel(indices, &self.strides);
        usize::try_from(offset).ok()
    }

    /// Lowest and one-past-highest byte touched, relative to the buffer
    /// start. `None` for empty arrays.
    pub fn byte_extent(&self) -> Option<(isize, isize)> {
        if self.size() == 0 {
            return None;
        }
        let mut low = self.offset as isize;
        let mut high = self.offset as isize;
        for (&dim, &stride) in self.shape.iter().zip(&self.strides) {
            let span = (dim as isize - 1) * stride;
            if span < 0 {
                low += span;
            } else {
                high += span;
            }
        }
        Some((low, high + self.elem_size as isize))
    }

    /// Reverse dimensions and strides
    pub fn transpose(&self) -> Self {
        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape.reverse();
        strides.reverse();
        Self {
            shape,
            strides,
            elem_size: self.elem_size,
            offset: self.offset,
        }
    }

    /// Copy the elements this layout addresses out of `src` into a dense
    /// buffer in `order`.
    pub fn gather(&self, src: &[u8], order: MemoryLayout) -> BridgeResult<Vec<u8>> {
        validate_strides(&self.strides)?;
        let count = self.size();
        let width = self.elem_size;
        let mut out = vec![0u8; count * width];
        for (index, chunk) in out.chunks_exact_mut(width.max(1)).enumerate().take(count) {
            let coords = unravel(index, &self.shape, order);
            let start = self.offset + ravel(&coords, &self.strides) as usize;
            let bytes = src.get(start..start + width).ok_or_else(|| {
                BridgeError::conversion_failed(
                    "strided array",
                    order.to_string(),
                    format!("element {} lies outside the {}-byte buffer", index, src.len()),
                )
            })?;
            chunk.copy_from_slice(bytes);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_column_major_strides() {
        assert_eq!(strides_for(&[3, 4, 2], 8, MemoryLayout::ColumnMajor), vec![8, 24, 96]);
    }

    #[test]
    fn test_row_major_strides() {
        assert_eq!(strides_for(&[3, 4, 2], 8, MemoryLayout::RowMajor), vec![64, 16, 8]);
        assert!(strides_for(&[], 8, MemoryLayout::RowMajor).is_empty());
    }

    #[test]
    fn test_unravel() {
        assert_eq!(unravel(5, &[2, 3], MemoryLayout::ColumnMajor), vec![1, 2]);
        assert_eq!(unravel(5, &[2, 3], MemoryLayout::RowMajor), vec![1, 2]);
        assert_eq!(unravel(1, &[2, 3], MemoryLayout::ColumnMajor), vec![1, 0]);
        assert_eq!(unravel(1, &[2, 3], MemoryLayout::RowMajor), vec![0, 1]);
    }

    #[test]
    fn test_reorder_row_to_column() {
        // [[1, 2, 3], [4, 5, 6]]
        let row = [1, 2, 3, 4, 5, 6];
        let col = reorder(&row, &[2, 3], MemoryLayout::RowMajor, MemoryLayout::ColumnMajor);
        assert_eq!(col, vec![1, 4, 2, 5, 3, 6]);
        let back = reorder(&col, &[2, 3], MemoryLayout::ColumnMajor, MemoryLayout::RowMajor);
        assert_eq!(back, row.to_vec());
    }

    #[test]
    fn test_contiguity() {
        let c = ArrayLayout::contiguous(vec![3, 4], 8, MemoryLayout::RowMajor);
        assert!(c.is_c_contiguous());
        assert!(!c.is_f_contiguous());
        assert_eq!(c.order(), Some(MemoryLayout::RowMajor));
        assert_eq!(c.transpose().order(), Some(MemoryLayout::ColumnMajor));

        // Vectors are both; column-major is reported first
        let v = ArrayLayout::contiguous(vec![5], 4, MemoryLayout::RowMajor);
        assert_eq!(v.order(), Some(MemoryLayout::ColumnMajor));
    }

    #[test]
    fn test_strided_not_contiguous() {
        let mut every_other = ArrayLayout::contiguous(vec![4], 8, MemoryLayout::RowMajor);
        every_other.strides = vec![16];
        assert_eq!(every_other.order(), None);
    }

    #[test]
    fn test_gather_transposed() {
        // Row-major 2x3 of u8 values 0..6, read as column-major
        let src: Vec<u8> = (0..6).collect();
        let layout = ArrayLayout::contiguous(vec![2, 3], 1, MemoryLayout::RowMajor);
        let out = layout.gather(&src, MemoryLayout::ColumnMajor).unwrap();
        assert_eq!(out, vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_gather_rejects_negative_stride() {
        let layout = ArrayLayout {
            shape: vec![3],
            strides: vec![-8],
            elem_size: 8,
            offset: 16,
        };
        let err = layout.gather(&[0u8; 24], MemoryLayout::ColumnMajor).unwrap_err();
        assert_eq!(err, BridgeError::invalid_stride(0, -8));
    }

    #[test]
    fn test_byte_extent() {
        let layout = ArrayLayout {
            shape: vec![3],
            strides: vec![-8],
            elem_size: 8,
            offset: 16,
        };
        assert_eq!(layout.byte_extent(), Some((0, 24)));
        assert_eq!(layout.byte_offset(&[2]), Some(0));
        assert_eq!(layout.byte_offset(&[3]), None);
    }
}
