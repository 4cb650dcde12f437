//! Lists toward the array host.
//!
//! A list of same-kind numeric scalars becomes a `[1, N]` array. A list of
//! rectangular nested sequences with numeric leaves becomes one
//! N-dimensional array. Anything else becomes a cell row.
//!
//! Nested numeric lists must be rectangular, may not mix scalars and
//! sequences at one depth, and may not mix lists and tuples at one depth;
//! violations fail with `ShapeMismatch` instead of silently producing a
//! cell.

use num_complex::Complex64;

use crate::conversion::FromPython;
use crate::error::{BridgeError, BridgeResult};
use crate::layout::{reorder, MemoryLayout};
use crate::mx_types::MxArray;
use crate::py_types::PyValue;

use super::{to_mx, ConvertCtx};

/// Numeric kind of a scalar leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeafKind {
    /// bool, int or float: stored as double
    Real,
    /// complex: stored as complex double
    Complex,
}

fn leaf_kind(value: &PyValue) -> Option<LeafKind> {
    match value {
        PyValue::Bool(_) | PyValue::Int(_) | PyValue::Float(_) => Some(LeafKind::Real),
        PyValue::Complex(_) => Some(LeafKind::Complex),
        _ => None,
    }
}

/// Sequence kind, for the same-kind-per-depth rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeqKind {
    List,
    Tuple,
}

fn seq_items(value: &PyValue) -> Option<(SeqKind, Vec<PyValue>)> {
    match value {
        PyValue::List(list) => Some((SeqKind::List, list.to_vec())),
        PyValue::Tuple(items) => Some((SeqKind::Tuple, items.clone())),
        _ => None,
    }
}

pub(super) fn list_to_mx(ctx: &mut ConvertCtx<'_>, items: &[PyValue]) -> BridgeResult<MxArray> {
    if items.is_empty() {
        return Ok(MxArray::cell_row(Vec::new()));
    }

    if items.iter().any(PyValue::is_sequence) {
        return match numeric_leaves(items) {
            Some(kind) => numeric_block(items, kind),
            None => cell_row(ctx, items),
        };
    }

    // Flat list: the first element sets the kind; the first element of
    // another kind turns the whole list into a cell row.
    let Some(kind) = leaf_kind(&items[0]) else {
        return cell_row(ctx, items);
    };
    if items.iter().any(|item| leaf_kind(item) != Some(kind)) {
        return cell_row(ctx, items);
    }
    let len = items.len();
    match kind {
        LeafKind::Real => {
            let values = items.iter().map(f64::from_python).collect::<BridgeResult<Vec<_>>>()?;
            MxArray::from_slice(&values, &[1, len])
        }
        LeafKind::Complex => {
            let values = items
                .iter()
                .map(Complex64::from_python)
                .collect::<BridgeResult<Vec<_>>>()?;
            MxArray::from_slice(&values, &[1, len])
        }
    }
}

fn cell_row(ctx: &mut ConvertCtx<'_>, items: &[PyValue]) -> BridgeResult<MxArray> {
    let elements = items
        .iter()
        .map(|item| to_mx::convert(ctx, item))
        .collect::<BridgeResult<Vec<_>>>()?;
    Ok(MxArray::cell_row(elements))
}

/// Widest leaf kind when every leaf under `items` is a numeric scalar
fn numeric_leaves(items: &[PyValue]) -> Option<LeafKind> {
    let mut widest = LeafKind::Real;
    for item in items {
        let kind = match seq_items(item) {
            Some((_, inner)) if inner.is_empty() => LeafKind::Real,
            Some((_, inner)) => numeric_leaves(&inner)?,
            None => leaf_kind(item)?,
        };
        if kind == LeafKind::Complex {
            widest = LeafKind::Complex;
        }
    }
    Some(widest)
}

/// Shape and per-depth sequence kinds, read off the first element at
/// every depth
fn infer_shape(items: &[PyValue]) -> (Vec<usize>, Vec<SeqKind>) {
    let mut shape = vec![items.len()];
    let mut kinds = vec![SeqKind::List];
    let mut first = items.first().and_then(seq_items);
    while let Some((kind, inner)) = first {
        shape.push(inner.len());
        kinds.push(kind);
        first = inner.first().and_then(seq_items);
    }
    (shape, kinds)
}

/// Collect leaves in row-major order, checking every sequence against the
/// inferred shape
fn collect_leaves(
    value: &PyValue,
    depth: usize,
    shape: &[usize],
    kinds: &[SeqKind],
    leaves: &mut Vec<PyValue>,
) -> BridgeResult<()> {
    match seq_items(value) {
        None if depth == shape.len() => {
            leaves.push(value.clone());
            Ok(())
        }
        None => Err(BridgeError::shape_mismatch(format!(
            "scalar found at depth {} where a sequence of length {} was expected",
            depth, shape[depth]
        ))),
        Some(_) if depth == shape.len() => Err(BridgeError::shape_mismatch(format!(
            "sequence found at depth {} where a scalar was expected",
            depth
        ))),
        Some((kind, _)) if kind != kinds[depth] => Err(BridgeError::shape_mismatch(format!(
            "lists and tuples mixed at depth {}",
            depth
        ))),
        Some((_, inner)) if inner.len() != shape[depth] => {
            Err(BridgeError::shape_mismatch(format!(
                "ragged nested sequence: length {} at depth {}, expected {}",
                inner.len(),
                depth,
                shape[depth]
            )))
        }
        Some((_, inner)) => inner
            .iter()
            .try_for_each(|item| collect_leaves(item, depth + 1, shape, kinds, leaves)),
    }
}

/// Rectangular nested numeric list to one N-dimensional array
fn numeric_block(items: &[PyValue], kind: LeafKind) -> BridgeResult<MxArray> {
    let (shape, kinds) = infer_shape(items);
    let mut leaves = Vec::with_capacity(shape.iter().product());
    for item in items {
        collect_leaves(item, 1, &shape, &kinds, &mut leaves)?;
    }
    tracing::trace!(shape = ?shape, "nested numeric list flattened");
    match kind {
        LeafKind::Real => {
            let values = leaves.iter().map(f64::from_python).collect::<BridgeResult<Vec<_>>>()?;
            let values = reorder(&values, &shape, MemoryLayout::RowMajor, MemoryLayout::ColumnMajor);
            MxArray::from_slice(&values, &shape)
        }
        LeafKind::Complex => {
            let values = leaves
                .iter()
                .map(Complex64::from_python)
                .collect::<BridgeResult<Vec<_>>>()?;
            let values = reorder(&values, &shape, MemoryLayout::RowMajor, MemoryLayout::ColumnMajor);
            MxArray::from_slice(&values, &shape)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::Converter;
    use crate::config::BridgeConfig;
    use crate::error::BridgeError;
    use crate::gil::GilGuard;
    use crate::py_types::{PyList, PyValue};
    use crate::session;
    use crate::type_map::{ElementType, MxClass};
    use num_complex::Complex64;
    use pretty_assertions::assert_eq;

    fn list(items: Vec<PyValue>) -> PyValue {
        PyValue::List(PyList::from_vec(items))
    }

    fn ints(values: &[i64]) -> PyValue {
        list(values.iter().map(|&v| PyValue::Int(v)).collect())
    }

    fn convert(value: &PyValue) -> crate::error::BridgeResult<crate::mx_types::MxArray> {
        session::initialize(BridgeConfig::default()).unwrap();
        let gil = GilGuard::acquire().unwrap();
        Converter::from_session(&gil).unwrap().to_mx(&gil, value)
    }

    #[test]
    fn test_flat_numeric_list_is_row() {
        let arr = convert(&list(vec![PyValue::Int(1), PyValue::Float(2.5), PyValue::Bool(true)])).unwrap();
        assert_eq!(arr.dims(), &[1, 3]);
        assert_eq!(arr.to_vec::<f64>().unwrap(), vec![1.0, 2.5, 1.0]);
    }

    #[test]
    fn test_complex_list() {
        let arr = convert(&list(vec![
            PyValue::Complex(Complex64::new(0.0, 1.0)),
            PyValue::Complex(Complex64::new(2.0, 0.0)),
        ]))
        .unwrap();
        assert_eq!(arr.element_type(), Some(ElementType::ComplexDouble));
        assert_eq!(arr.dims(), &[1, 2]);
    }

    #[test]
    fn test_first_divergent_kind_gives_cell() {
        let arr = convert(&list(vec![PyValue::Int(1), PyValue::String("x".into())])).unwrap();
        assert_eq!(arr.class(), MxClass::Cell);
        assert_eq!(arr.dims(), &[1, 2]);

        let mixed = convert(&list(vec![
            PyValue::Float(1.0),
            PyValue::Complex(Complex64::new(0.0, 1.0)),
        ]))
        .unwrap();
        assert_eq!(mixed.class(), MxClass::Cell);
    }

    #[test]
    fn test_nested_list_is_matrix() {
        // [[1, 2, 3], [4, 5, 6]]
        let arr = convert(&list(vec![ints(&[1, 2, 3]), ints(&[4, 5, 6])])).unwrap();
        assert_eq!(arr.dims(), &[2, 3]);
        assert_eq!(arr.get::<f64>(&[1, 0]).unwrap(), 4.0);
        assert_eq!(arr.get::<f64>(&[0, 2]).unwrap(), 3.0);
    }

    #[test]
    fn test_nested_three_deep() {
        let plane = || list(vec![ints(&[1, 2]), ints(&[3, 4]), ints(&[5, 6])]);
        let arr = convert(&list(vec![plane(), plane()])).unwrap();
        assert_eq!(arr.dims(), &[2, 3, 2]);
        assert_eq!(arr.get::<f64>(&[1, 2, 1]).unwrap(), 6.0);
    }

    #[test]
    fn test_ragged_is_rejected() {
        let err = convert(&list(vec![ints(&[1, 2]), ints(&[3])])).unwrap_err();
        assert!(matches!(err, BridgeError::ShapeMismatch { .. }));

        let err = convert(&list(vec![ints(&[1, 2]), PyValue::Int(3)])).unwrap_err();
        assert!(err.is_shape_error());

        let tuple = PyValue::Tuple(vec![PyValue::Int(3), PyValue::Int(4)]);
        let err = convert(&list(vec![ints(&[1, 2]), tuple])).unwrap_err();
        assert!(matches!(err, BridgeError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_nested_with_text_is_cell() {
        let arr = convert(&list(vec![
            ints(&[1, 2]),
            list(vec![PyValue::String("a".into())]),
        ]))
        .unwrap();
        assert_eq!(arr.class(), MxClass::Cell);
        let inner = &arr.cell_elements().unwrap()[0];
        assert_eq!(inner.dims(), &[1, 2]);
    }

    #[test]
    fn test_empty_list_is_empty_cell() {
        let arr = convert(&list(vec![])).unwrap();
        assert_eq!(arr.class(), MxClass::Cell);
        assert_eq!(arr.dims(), &[1, 0]);
    }
}
