//! Object host to array host.

use smol_str::SmolStr;

use crate::buffer::{BufferBinding, Deleter};
use crate::callable::callable_struct;
use crate::conversion::FromPython;
use crate::error::{BridgeError, BridgeResult};
use crate::layout::{strides_for, MemoryLayout};
use crate::mx_types::{MxArray, StructFields};
use crate::py_array::NdArray;
use crate::py_types::{PyDict, PyValue};

use super::{nested, ConvertCtx};

pub(super) fn convert(ctx: &mut ConvertCtx<'_>, value: &PyValue) -> BridgeResult<MxArray> {
    match value {
        PyValue::None => Ok(MxArray::empty()),
        PyValue::Bool(_) | PyValue::Int(_) | PyValue::Float(_) => {
            Ok(MxArray::scalar(f64::from_python(value)?))
        }
        PyValue::Complex(c) => Ok(MxArray::scalar(*c)),
        PyValue::String(s) => Ok(MxArray::char_array(s)),
        PyValue::List(list) => nested::list_to_mx(ctx, &list.to_vec()),
        PyValue::Tuple(items) => {
            let elements = items
                .iter()
                .map(|item| convert(ctx, item))
                .collect::<BridgeResult<Vec<_>>>()?;
            Ok(MxArray::cell_row(elements))
        }
        PyValue::Dict(dict) => mapping(ctx, dict),
        PyValue::Array(array) => dense(ctx, array),
        PyValue::Callable(callable) => {
            let key = ctx.stage_callable(callable);
            Ok(callable_struct(&key))
        }
        PyValue::Wrapped(wrapper) => Ok(wrapper.array().clone()),
        PyValue::Object(object) => Err(BridgeError::unsupported_type(object.type_name())),
    }
}

/// Dict with text keys to a 1x1 struct, keys in insertion order
fn mapping(ctx: &mut ConvertCtx<'_>, dict: &PyDict) -> BridgeResult<MxArray> {
    let mut fields = StructFields::new();
    for (key, value) in dict.items() {
        let name = key
            .as_str()
            .ok_or_else(|| BridgeError::non_string_key(key.type_name()))?;
        fields.insert(SmolStr::new(name), convert(ctx, &value)?);
    }
    Ok(MxArray::struct_scalar(fields))
}

/// Object-host array: identity, cached alias, block copy, zero-copy wrap,
/// or strided gather
fn dense(ctx: &mut ConvertCtx<'_>, array: &NdArray) -> BridgeResult<MxArray> {
    let element = array.dtype().to_element()?;

    if ctx.caching() {
        if let Some(source) = pinned_source(array) {
            tracing::trace!(array = %array, "returning pinned array-host handle");
            ctx.stats.hits += 1;
            return Ok(source);
        }
        if let Some(existing) = ctx.find_array(array)? {
            tracing::trace!(array = %array, "reusing cached alias");
            return Ok(existing);
        }
    }

    let dims = match array.shape() {
        [] => vec![1, 1],
        [n] => vec![1, *n],
        shape => shape.to_vec(),
    };

    let Some(order) = array.layout().order() else {
        tracing::debug!(array = %array, strides = ?array.strides(), "strided copy to array host");
        let bytes = array.gather(MemoryLayout::ColumnMajor)?;
        ctx.stats.strided_copies += 1;
        return Ok(MxArray::from_bytes(element, dims, MemoryLayout::ColumnMajor, bytes));
    };

    if ctx.should_copy(array.len()) {
        tracing::debug!(array = %array, policy = %ctx.converter.policy, "copying to array host");
        ctx.stats.copies += 1;
        return Ok(MxArray::from_bytes(element, dims, order, array.block_bytes()?));
    }

    // The array host frees a column-major buffer itself, so that alias
    // gets a placeholder before release. Row-major handles never free it.
    let deleter = match order {
        MemoryLayout::ColumnMajor => Deleter::Free,
        MemoryLayout::RowMajor => Deleter::Noop,
    };
    let binding = BufferBinding::new(array.buffer().clone(), array.layout().offset, deleter);
    let handle = MxArray::from_binding(element, dims, order, binding);
    tracing::debug!(array = %array, order = %order, "wrapped for array host");
    ctx.stage_alias(&handle, array, deleter == Deleter::Free);
    Ok(handle)
}

/// The array-host handle a view was made from, when `array` is still an
/// unmodified whole view of it
fn pinned_source(array: &NdArray) -> Option<MxArray> {
    let token = array.owner_token()?;
    let source = token.source();
    let width = source.element_type()?.byte_width();
    let whole = token.is_current()
        && array.data_ptr() == token.ptr()
        && array.shape() == source.dims()
        && array.strides() == strides_for(source.dims(), width, source.layout()).as_slice();
    whole.then(|| source.clone())
}
