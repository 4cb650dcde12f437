//! Array-host value model.
//!
//! [`MxArray`] is a reference-counted handle to an array-host value:
//! dense numeric/logical/char arrays backed by a [`BufferBinding`], plus
//! string, struct, cell and object arrays. Clones share the value; the
//! handle count is the host's reference count.
//!
//! Dense arrays always have at least two dimensions. Element order is
//! column-major unless the array was built over a row-major buffer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smol_str::SmolStr;

use crate::buffer::{Buffer, BufferBinding, Element, Host};
use crate::error::{BridgeError, BridgeResult};
use crate::layout::{element_count, strides_for, unravel, MemoryLayout};
use crate::type_map::{ElementType, MxClass};

static NEXT_ARRAY_ID: AtomicU64 = AtomicU64::new(1);

/// Fields of one struct element
pub type StructFields = IndexMap<SmolStr, MxArray>;

#[derive(Debug)]
pub(crate) enum MxData {
    Dense(Mutex<BufferBinding>),
    Strings(Vec<SmolStr>),
    Struct {
        fields: Vec<SmolStr>,
        elements: Vec<StructFields>,
    },
    Cell(Vec<MxArray>),
    Object {
        class_name: SmolStr,
    },
    Opaque,
}

#[derive(Debug)]
struct MxInner {
    id: u64,
    class: MxClass,
    dims: Vec<usize>,
    layout: MemoryLayout,
    data: MxData,
}

impl Drop for MxInner {
    fn drop(&mut self) {
        if let MxData::Dense(binding) = &mut self.data {
            binding.get_mut().release(Host::Array);
        }
    }
}

/// Handle to an array-host value
#[derive(Debug, Clone)]
pub struct MxArray(Arc<MxInner>);

/// Pad to the host's two-dimension minimum
fn normalize_dims(dims: &[usize]) -> Vec<usize> {
    let mut dims = dims.to_vec();
    while dims.len() < 2 {
        dims.push(1);
    }
    dims
}

fn check_count(dims: &[usize], len: usize, what: &str) -> BridgeResult<()> {
    let expected = element_count(dims);
    if expected != len {
        return Err(BridgeError::shape_mismatch(format!(
            "{} has {} elements but dimensions {:?} need {}",
            what, len, dims, expected
        )));
    }
    Ok(())
}

impl MxArray {
    fn build(class: MxClass, dims: Vec<usize>, layout: MemoryLayout, data: MxData) -> Self {
        MxArray(Arc::new(MxInner {
            id: NEXT_ARRAY_ID.fetch_add(1, Ordering::Relaxed),
            class,
            dims,
            layout,
            data,
        }))
    }

    // ------------------------------------------------------------------
    // Dense constructors
    // ------------------------------------------------------------------

    /// Dense array from column-major data
    pub fn from_slice<T: Element>(data: &[T], dims: &[usize]) -> BridgeResult<Self> {
        Self::from_slice_in(data, dims, MemoryLayout::ColumnMajor)
    }

    /// Dense array from data in the given ordering
    pub fn from_slice_in<T: Element>(
        data: &[T],
        dims: &[usize],
        layout: MemoryLayout,
    ) -> BridgeResult<Self> {
        let dims = normalize_dims(dims);
        check_count(&dims, data.len(), "data")?;
        Ok(Self::from_bytes(
            T::ELEMENT,
            dims,
            layout,
            crate::buffer::encode(data),
        ))
    }

    /// 1x1 array
    pub fn scalar<T: Element>(value: T) -> Self {
        Self::from_bytes(
            T::ELEMENT,
            vec![1, 1],
            MemoryLayout::ColumnMajor,
            crate::buffer::encode(&[value]),
        )
    }

    /// 0x0 double
    pub fn empty() -> Self {
        Self::from_bytes(ElementType::Double, vec![0, 0], MemoryLayout::ColumnMajor, Vec::new())
    }

    /// Dense array over freshly allocated bytes the array host owns
    pub(crate) fn from_bytes(
        element: ElementType,
        dims: Vec<usize>,
        layout: MemoryLayout,
        bytes: Vec<u8>,
    ) -> Self {
        let binding = BufferBinding::owned(Buffer::new(Host::Array, bytes));
        Self::from_binding(element, dims, layout, binding)
    }

    /// Dense array over an existing binding, possibly foreign memory
    pub(crate) fn from_binding(
        element: ElementType,
        dims: Vec<usize>,
        layout: MemoryLayout,
        binding: BufferBinding,
    ) -> Self {
        Self::build(
            MxClass::for_element(element),
            normalize_dims(&dims),
            layout,
            MxData::Dense(Mutex::new(binding)),
        )
    }

    // ------------------------------------------------------------------
    // Text constructors
    // ------------------------------------------------------------------

    /// 1xN character array
    pub fn char_array(text: &str) -> Self {
        let units: Vec<u16> = text.encode_utf16().collect();
        let dims = vec![1, units.len()];
        Self::from_bytes(
            ElementType::Char,
            dims,
            MemoryLayout::ColumnMajor,
            crate::buffer::encode(&units),
        )
    }

    /// Character matrix with one row per string; rows must be equally long
    pub fn char_matrix(rows: &[&str]) -> BridgeResult<Self> {
        let rows: Vec<Vec<u16>> = rows.iter().map(|r| r.encode_utf16().collect()).collect();
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != width) {
            return Err(BridgeError::shape_mismatch(
                "character matrix rows differ in length",
            ));
        }
        let mut units = vec![0u16; rows.len() * width];
        for (r, row) in rows.iter().enumerate() {
            for (c, &unit) in row.iter().enumerate() {
                units[r + c * rows.len()] = unit;
            }
        }
        Ok(Self::from_bytes(
            ElementType::Char,
            vec![rows.len(), width],
            MemoryLayout::ColumnMajor,
            crate::buffer::encode(&units),
        ))
    }

    /// 1xN string array
    pub fn string_array<S: AsRef<str>>(values: &[S]) -> Self {
        let values: Vec<SmolStr> = values.iter().map(|s| SmolStr::new(s.as_ref())).collect();
        let dims = vec![1, values.len()];
        Self::build(MxClass::String, dims, MemoryLayout::ColumnMajor, MxData::Strings(values))
    }

    // ------------------------------------------------------------------
    // Composite constructors
    // ------------------------------------------------------------------

    /// Struct array. Every element must carry exactly `fields`.
    pub fn struct_array<S: AsRef<str>>(
        fields: &[S],
        elements: Vec<StructFields>,
        dims: &[usize],
    ) -> BridgeResult<Self> {
        let dims = normalize_dims(dims);
        check_count(&dims, elements.len(), "struct array")?;
        let fields: Vec<SmolStr> = fields.iter().map(|f| SmolStr::new(f.as_ref())).collect();
        for element in &elements {
            let same = element.len() == fields.len()
                && fields.iter().all(|f| element.contains_key(f));
            if !same {
                return Err(BridgeError::shape_mismatch(
                    "struct element fields differ from the array's field names",
                ));
            }
        }
        Ok(Self::build(
            MxClass::Struct,
            dims,
            MemoryLayout::ColumnMajor,
            MxData::Struct { fields, elements },
        ))
    }

    /// 1x1 struct with the given fields, in order
    pub fn struct_scalar(fields: StructFields) -> Self {
        let names: Vec<SmolStr> = fields.keys().cloned().collect();
        Self::build(
            MxClass::Struct,
            vec![1, 1],
            MemoryLayout::ColumnMajor,
            MxData::Struct {
                fields: names,
                elements: vec![fields],
            },
        )
    }

    /// Cell array with column-major elements
    pub fn cell(elements: Vec<MxArray>, dims: &[usize]) -> BridgeResult<Self> {
        let dims = normalize_dims(dims);
        check_count(&dims, elements.len(), "cell array")?;
        Ok(Self::build(MxClass::Cell, dims, MemoryLayout::ColumnMajor, MxData::Cell(elements)))
    }

    /// 1xN cell array
    pub fn cell_row(elements: Vec<MxArray>) -> Self {
        let dims = vec![1, elements.len()];
        Self::build(MxClass::Cell, dims, MemoryLayout::ColumnMajor, MxData::Cell(elements))
    }

    /// Scalar class instance
    pub fn object(class_name: impl Into<SmolStr>, handle: bool) -> Self {
        Self::build(
            MxClass::Object { handle },
            vec![1, 1],
            MemoryLayout::ColumnMajor,
            MxData::Object {
                class_name: class_name.into(),
            },
        )
    }

    /// Value of a class the bridge does not convert (enumerations, sparse)
    pub fn opaque(class: MxClass, dims: &[usize]) -> Self {
        Self::build(class, normalize_dims(dims), MemoryLayout::ColumnMajor, MxData::Opaque)
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn class(&self) -> MxClass {
        self.0.class
    }

    pub fn dims(&self) -> &[usize] {
        &self.0.dims
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        element_count(&self.0.dims)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn layout(&self) -> MemoryLayout {
        self.0.layout
    }

    /// Element type of dense arrays
    pub fn element_type(&self) -> Option<ElementType> {
        self.0.class.element_type()
    }

    /// Host reference count
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Check if two handles refer to the same value
    pub fn ptr_eq(&self, other: &MxArray) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn dense_slot(&self) -> Option<&Mutex<BufferBinding>> {
        match &self.0.data {
            MxData::Dense(slot) => Some(slot),
            _ => None,
        }
    }

    fn binding(&self) -> BridgeResult<BufferBinding> {
        self.dense_slot()
            .map(|slot| slot.lock().clone())
            .ok_or_else(|| {
                BridgeError::type_mismatch("dense array", self.0.class.name())
            })
    }

    // ------------------------------------------------------------------
    // Dense element access
    // ------------------------------------------------------------------

    fn element_offset<T: Element>(&self, linear: usize) -> BridgeResult<usize> {
        let element = self.element_type().ok_or_else(|| {
            BridgeError::type_mismatch(T::ELEMENT.class_name(), self.0.class.name())
        })?;
        if !T::compatible(element) {
            return Err(BridgeError::type_mismatch(element.class_name(), T::ELEMENT.class_name()));
        }
        if linear >= self.len() {
            return Err(BridgeError::conversion_failed(
                self.0.class.name(),
                T::ELEMENT.class_name(),
                format!("index {} out of bounds for {} elements", linear, self.len()),
            ));
        }
        let width = element.byte_width();
        let coords = unravel(linear, &self.0.dims, MemoryLayout::ColumnMajor);
        let strides = strides_for(&self.0.dims, width, self.0.layout);
        let offset: isize = coords.iter().zip(&strides).map(|(&c, &s)| c as isize * s).sum();
        Ok(offset as usize)
    }

    /// Linear index of a subscript, column-major
    fn linear_index(&self, subscripts: &[usize]) -> BridgeResult<usize> {
        let dims = &self.0.dims;
        let mut linear = 0;
        let mut step = 1;
        for (axis, &dim) in dims.iter().enumerate() {
            let sub = subscripts.get(axis).copied().unwrap_or(0);
            if sub >= dim {
                return Err(BridgeError::conversion_failed(
                    format!("subscript {:?}", subscripts),
                    self.0.class.name(),
                    format!("out of bounds for dimensions {:?}", dims),
                ));
            }
            linear += sub * step;
            step *= dim;
        }
        if subscripts.len() > dims.len() && subscripts[dims.len()..].iter().any(|&s| s != 0) {
            return Err(BridgeError::conversion_failed(
                format!("subscript {:?}", subscripts),
                self.0.class.name(),
                "too many subscripts",
            ));
        }
        Ok(linear)
    }

    /// Element at a column-major linear index
    pub fn get_linear<T: Element>(&self, linear: usize) -> BridgeResult<T> {
        let offset = self.element_offset::<T>(linear)?;
        let binding = self.binding()?;
        let start = binding.offset() + offset;
        let width = T::ELEMENT.byte_width();
        binding.buffer().read(|bytes| {
            bytes.get(start..start + width).map(T::read_ne).ok_or_else(|| {
                BridgeError::conversion_failed(self.0.class.name(), "element", "buffer too small")
            })
        })
    }

    /// Overwrite the element at a column-major linear index
    pub fn set_linear<T: Element>(&self, linear: usize, value: T) -> BridgeResult<()> {
        let offset = self.element_offset::<T>(linear)?;
        let binding = self.binding()?;
        let start = binding.offset() + offset;
        let width = T::ELEMENT.byte_width();
        binding.buffer().write(|bytes| match bytes.get_mut(start..start + width) {
            Some(slot) => {
                value.write_ne(slot);
                Ok(())
            }
            None => Err(BridgeError::conversion_failed(
                "element",
                self.0.class.name(),
                "buffer too small",
            )),
        })
    }

    /// Element at a subscript
    pub fn get<T: Element>(&self, subscripts: &[usize]) -> BridgeResult<T> {
        self.get_linear(self.linear_index(subscripts)?)
    }

    /// Overwrite the element at a subscript
    pub fn set<T: Element>(&self, subscripts: &[usize], value: T) -> BridgeResult<()> {
        self.set_linear(self.linear_index(subscripts)?, value)
    }

    /// All elements in column-major order
    pub fn to_vec<T: Element>(&self) -> BridgeResult<Vec<T>> {
        (0..self.len()).map(|i| self.get_linear(i)).collect()
    }

    /// Raw bytes of a dense array in storage order
    pub(crate) fn storage_bytes(&self) -> BridgeResult<Vec<u8>> {
        let width = self.element_type().map_or(0, |e| e.byte_width());
        let binding = self.binding()?;
        binding.copy_bytes(self.len() * width).ok_or_else(|| {
            BridgeError::conversion_failed(self.0.class.name(), "bytes", "buffer too small")
        })
    }

    // ------------------------------------------------------------------
    // Text access
    // ------------------------------------------------------------------

    /// UTF-16 code units of a char array, column-major
    pub fn utf16(&self) -> BridgeResult<Vec<u16>> {
        if self.0.class != MxClass::Char {
            return Err(BridgeError::type_mismatch("char", self.0.class.name()));
        }
        self.to_vec::<u16>()
    }

    /// Rows of a char matrix as text
    pub fn char_rows(&self) -> BridgeResult<Vec<String>> {
        let units = self.utf16()?;
        let rows = self.0.dims[0];
        let cols = self.len().checked_div(rows).unwrap_or(0);
        (0..rows)
            .map(|r| {
                let row: Vec<u16> = (0..cols).map(|c| units[r + c * rows]).collect();
                String::from_utf16(&row).map_err(|e| {
                    BridgeError::conversion_failed("char", "str", e.to_string())
                })
            })
            .collect()
    }

    /// Elements of a string array
    pub fn strings(&self) -> Option<&[SmolStr]> {
        match &self.0.data {
            MxData::Strings(values) => Some(values),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Composite access
    // ------------------------------------------------------------------

    /// Field names of a struct array
    pub fn field_names(&self) -> Option<&[SmolStr]> {
        match &self.0.data {
            MxData::Struct { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Struct elements, column-major
    pub fn struct_elements(&self) -> Option<&[StructFields]> {
        match &self.0.data {
            MxData::Struct { elements, .. } => Some(elements),
            _ => None,
        }
    }

    /// Field value of struct element `index`
    pub fn field(&self, index: usize, name: &str) -> Option<&MxArray> {
        self.struct_elements()?.get(index)?.get(name)
    }

    /// Elements of a cell array, column-major
    pub fn cell_elements(&self) -> Option<&[MxArray]> {
        match &self.0.data {
            MxData::Cell(elements) => Some(elements),
            _ => None,
        }
    }

    /// Class name of an object instance
    pub fn class_name(&self) -> Option<&str> {
        match &self.0.data {
            MxData::Object { class_name } => Some(class_name),
            _ => None,
        }
    }
}

impl fmt::Display for MxArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.0.dims.iter().map(|d| d.to_string()).collect();
        write!(f, "{} {}", dims.join("x"), self.0.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_column_major_subscripts() {
        // [[1, 3, 5], [2, 4, 6]]
        let arr = MxArray::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        assert_eq!(arr.get::<f64>(&[0, 1]).unwrap(), 3.0);
        assert_eq!(arr.get::<f64>(&[1, 2]).unwrap(), 6.0);
        assert!(arr.get::<f64>(&[2, 0]).is_err());
        assert!(arr.get::<f32>(&[0, 0]).is_err());
    }

    #[test]
    fn test_row_major_storage() {
        // Same logical matrix stored row-major
        let arr = MxArray::from_slice_in(
            &[1.0, 3.0, 5.0, 2.0, 4.0, 6.0],
            &[2, 3],
            MemoryLayout::RowMajor,
        )
        .unwrap();
        assert_eq!(arr.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_dims_normalized() {
        let arr = MxArray::from_slice(&[1i32, 2, 3, 4, 5], &[5]).unwrap();
        assert_eq!(arr.dims(), &[5, 1]);
        assert_eq!(MxArray::scalar(2u8).dims(), &[1, 1]);
        assert_eq!(MxArray::empty().len(), 0);
        assert!(MxArray::from_slice(&[1.0], &[2, 2]).is_err());
    }

    #[test]
    fn test_set_shared_between_clones() {
        let arr = MxArray::from_slice(&[0.0; 4], &[2, 2]).unwrap();
        let other = arr.clone();
        arr.set(&[1, 1], 7.0).unwrap();
        assert_eq!(other.get::<f64>(&[1, 1]).unwrap(), 7.0);
        assert_eq!(arr.ref_count(), 2);
    }

    #[test]
    fn test_char_matrix_rows() {
        let text = MxArray::char_array("héllo");
        assert_eq!(text.dims(), &[1, 5]);
        assert_eq!(text.char_rows().unwrap(), vec!["héllo".to_string()]);

        let matrix = MxArray::char_matrix(&["ab", "cd"]).unwrap();
        assert_eq!(matrix.utf16().unwrap(), "acbd".encode_utf16().collect::<Vec<_>>());
        assert_eq!(matrix.char_rows().unwrap(), vec!["ab", "cd"]);
        assert!(MxArray::char_matrix(&["ab", "c"]).is_err());
    }

    #[test]
    fn test_struct_array_fields() {
        let mut element = StructFields::new();
        element.insert("x".into(), MxArray::scalar(1.0));
        let arr = MxArray::struct_array(&["x"], vec![element.clone(), element], &[1, 2]).unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr.field(1, "x").unwrap().get::<f64>(&[0, 0]).unwrap(), 1.0);

        let mut wrong = StructFields::new();
        wrong.insert("y".into(), MxArray::empty());
        assert!(MxArray::struct_array(&["x"], vec![wrong], &[1, 1]).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(MxArray::cell_row(vec![]).to_string(), "1x0 cell");
        assert_eq!(MxArray::scalar(1.0f32).to_string(), "1x1 single");
    }
}
