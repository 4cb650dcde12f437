//! Array host to object host.

use crate::adapter::RawPointerAdapter;
use crate::callable::callable_key;
use crate::conversion::ToPython;
use crate::error::{BridgeError, BridgeResult};
use crate::layout::ArrayLayout;
use crate::mx_types::MxArray;
use crate::ownership::{MxWrapper, OwnerToken};
use crate::py_array::NdArray;
use crate::py_types::{PyDict, PyList, PyValue};
use crate::type_map::{DType, ElementType, MxClass};

use super::ConvertCtx;

pub(super) fn convert(ctx: &mut ConvertCtx<'_>, array: &MxArray) -> BridgeResult<PyValue> {
    match array.class() {
        MxClass::Numeric(element) => dense(ctx, array, element).map(PyValue::Array),
        MxClass::Logical => logical(array),
        MxClass::Char => text(array),
        MxClass::String => strings(array),
        MxClass::Struct => structure(ctx, array),
        MxClass::Cell => {
            let elements = array
                .cell_elements()
                .ok_or_else(|| BridgeError::type_mismatch("cell payload", array.class().name()))?;
            let items = elements
                .iter()
                .map(|element| convert(ctx, element))
                .collect::<BridgeResult<Vec<_>>>()?;
            Ok(PyValue::List(PyList::from_vec(items)))
        }
        MxClass::Object { .. } => Ok(PyValue::Wrapped(MxWrapper::new(array.clone()))),
        class @ (MxClass::Enumeration | MxClass::Sparse) => {
            Err(BridgeError::unsupported_type(class.name()))
        }
    }
}

/// Numeric array: existing view, block copy, or zero-copy wrap
fn dense(ctx: &mut ConvertCtx<'_>, array: &MxArray, element: ElementType) -> BridgeResult<NdArray> {
    let binding = array
        .raw_binding()
        .ok_or_else(|| BridgeError::type_mismatch("dense array", array.class().name()))?;
    let ptr = binding.data_ptr();

    if let Some(existing) = ctx.find_object(array, ptr)? {
        tracing::trace!(ptr = %ptr, array = %array, "reusing object-host array");
        return Ok(existing);
    }

    let dtype = DType::from_element(element);
    let elements = array.len();
    if ctx.should_copy(elements) {
        tracing::debug!(array = %array, elements, policy = %ctx.converter.policy, "copying to object host");
        ctx.stats.copies += 1;
        return NdArray::from_bytes(dtype, array.dims().to_vec(), array.layout(), array.storage_bytes()?);
    }

    let mut layout = ArrayLayout::contiguous(array.dims().to_vec(), element.byte_width(), array.layout());
    layout.offset = binding.offset();
    let token = OwnerToken::new(array.clone(), ptr);
    let view = NdArray::wrap_foreign(dtype, layout, binding.buffer().clone(), token);
    tracing::debug!(array = %array, ptr = %ptr, "wrapped for object host");
    ctx.stage_view(ptr, &view);
    Ok(view)
}

/// Logical scalar to bool, otherwise a list of bools in column-major order
fn logical(array: &MxArray) -> BridgeResult<PyValue> {
    let values: Vec<bool> = array.to_vec()?;
    match values.as_slice() {
        [single] => Ok(PyValue::Bool(*single)),
        _ => Ok(values.to_python()),
    }
}

/// Char row to text, a char matrix to a list of its rows
fn text(array: &MxArray) -> BridgeResult<PyValue> {
    let mut rows = array.char_rows()?;
    if array.dims()[0] <= 1 {
        return Ok(rows.pop().unwrap_or_default().to_python());
    }
    Ok(rows.to_python())
}

fn strings(array: &MxArray) -> BridgeResult<PyValue> {
    let values = array
        .strings()
        .ok_or_else(|| BridgeError::type_mismatch("string payload", array.class().name()))?;
    match values {
        [single] => Ok(single.to_python()),
        _ => Ok(values.to_python()),
    }
}

/// 1x1 struct to a dict (or the callable it stands for), a struct array
/// to a list of dicts
fn structure(ctx: &mut ConvertCtx<'_>, array: &MxArray) -> BridgeResult<PyValue> {
    if let Some(key) = callable_key(array) {
        if let Some(callable) = ctx.find_callable(&key)? {
            return Ok(PyValue::Callable(callable));
        }
        tracing::debug!(key = %key, "callable key not registered; converting as struct");
    }

    let elements = array
        .struct_elements()
        .ok_or_else(|| BridgeError::type_mismatch("struct payload", array.class().name()))?;
    let mut dicts = Vec::with_capacity(elements.len());
    for fields in elements {
        let dict = PyDict::new();
        for (name, value) in fields {
            dict.set(name.clone(), convert(ctx, value)?);
        }
        dicts.push(PyValue::Dict(dict));
    }
    if array.len() == 1 {
        if let Some(dict) = dicts.pop() {
            return Ok(dict);
        }
    }
    Ok(PyValue::List(PyList::from_vec(dicts)))
}

#[cfg(test)]
mod tests {
    use super::super::Converter;
    use crate::buffer::audit;
    use crate::config::{BridgeConfig, CopyPolicy};
    use crate::gil::GilGuard;
    use crate::mx_types::{MxArray, StructFields};
    use crate::py_types::PyValue;
    use crate::session;
    use crate::type_map::MxClass;
    use pretty_assertions::assert_eq;

    fn setup() -> (GilGuard, Converter) {
        session::initialize(BridgeConfig::default()).unwrap();
        let gil = GilGuard::acquire().unwrap();
        let converter = Converter::from_session(&gil).unwrap();
        (gil, converter)
    }

    #[test]
    fn test_small_array_is_copied() {
        let (gil, converter) = setup();
        let arr = MxArray::from_slice(&[1i16, 2, 3, 4, 5, 6], &[2, 3]).unwrap();
        let value = converter.to_python(&gil, &arr).unwrap();
        let nd = value.as_array().unwrap();
        assert!(nd.owns_data());
        assert!(nd.is_f_contiguous());
        assert_eq!(nd.get::<i16>(&[1, 2]).unwrap(), 6);

        arr.set(&[0, 0], 9i16).unwrap();
        assert_eq!(nd.get::<i16>(&[0, 0]).unwrap(), 1);
    }

    #[test]
    fn test_large_array_is_wrapped_once() {
        let (gil, converter) = setup();
        let arr = MxArray::from_slice(&vec![0.0; 1200], &[30, 40]).unwrap();
        let first = converter.to_python(&gil, &arr).unwrap();
        let view = first.as_array().unwrap();
        assert!(!view.owns_data());
        assert!(view.owner_token().unwrap().source().ptr_eq(&arr));

        let second = converter.to_python(&gil, &arr).unwrap();
        assert!(second.as_array().unwrap().ptr_eq(view));

        arr.set(&[0, 0], 7.0).unwrap();
        assert_eq!(view.get::<f64>(&[0, 0]).unwrap(), 7.0);
    }

    #[test]
    fn test_copy_policy_never_wraps() {
        let (gil, converter) = setup();
        let converter = converter.with_policy(CopyPolicy::Copy);
        let arr = MxArray::from_slice(&vec![1u8; 1500], &[1500]).unwrap();
        let value = converter.to_python(&gil, &arr).unwrap();
        let nd = value.as_array().unwrap();
        assert!(nd.owns_data());
        assert_eq!(nd.shape(), &[1500, 1]);
    }

    #[test]
    fn test_text_and_logical() {
        let (gil, converter) = setup();
        let text = converter.to_python(&gil, &MxArray::char_array("abc")).unwrap();
        assert_eq!(text, PyValue::String("abc".into()));

        let rows = MxArray::char_matrix(&["ab", "cd"]).unwrap();
        assert_eq!(converter.to_python(&gil, &rows).unwrap().to_string(), "['ab', 'cd']");

        let flag = converter.to_python(&gil, &MxArray::scalar(true)).unwrap();
        assert_eq!(flag, PyValue::Bool(true));
        let flags = MxArray::from_slice(&[true, false, true], &[1, 3]).unwrap();
        assert_eq!(
            converter.to_python(&gil, &flags).unwrap().to_string(),
            "[True, False, True]"
        );

        let names = MxArray::string_array(&["x", "y"]);
        assert_eq!(converter.to_python(&gil, &names).unwrap().to_string(), "['x', 'y']");
    }

    #[test]
    fn test_struct_and_cell() {
        let (gil, converter) = setup();
        let mut fields = StructFields::new();
        fields.insert("name".into(), MxArray::char_array("sensor"));
        fields.insert("ok".into(), MxArray::scalar(false));
        let value = converter.to_python(&gil, &MxArray::struct_scalar(fields.clone())).unwrap();
        let dict = value.as_dict().unwrap();
        assert_eq!(dict.get("name"), Some(PyValue::String("sensor".into())));
        assert_eq!(dict.get("ok"), Some(PyValue::Bool(false)));

        let array = MxArray::struct_array(&["name", "ok"], vec![fields.clone(), fields], &[2, 1]).unwrap();
        let list = converter.to_python(&gil, &array).unwrap();
        assert_eq!(list.as_list().map(|l| l.len()), Some(2));

        let cell = MxArray::cell_row(vec![MxArray::char_array("a"), MxArray::scalar(true)]);
        assert_eq!(converter.to_python(&gil, &cell).unwrap().to_string(), "['a', True]");
    }

    #[test]
    fn test_objects_and_unsupported_classes() {
        let (gil, converter) = setup();
        let handle = MxArray::object("containers.Map", true);
        match converter.to_python(&gil, &handle).unwrap() {
            PyValue::Wrapped(wrapper) => assert!(wrapper.array().ptr_eq(&handle)),
            other => panic!("expected wrapper, got {}", other),
        }

        let sparse = MxArray::opaque(MxClass::Sparse, &[3, 3]);
        let err = converter.to_python(&gil, &sparse).unwrap_err();
        assert_eq!(err.identifier(), "mxpy:unsupportedType");
        assert!(audit().is_clean());
    }

    #[test]
    fn test_composite_class_without_payload_is_type_mismatch() {
        let (gil, converter) = setup();
        for (class, expected) in [
            (MxClass::Cell, "cell payload"),
            (MxClass::Struct, "struct payload"),
            (MxClass::String, "string payload"),
        ] {
            let hollow = MxArray::opaque(class, &[1, 2]);
            let err = converter.to_python(&gil, &hollow).unwrap_err();
            assert_eq!(err.identifier(), "mxpy:typeMismatch");
            assert!(err.to_string().contains(expected), "{}", err);
        }
    }
}
