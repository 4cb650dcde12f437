//! Scalar Conversion Traits
//!
//! Element-level conversions between Rust values and object-host values.
//! The array converters use these for the leaves of the values they
//! build: logical arrays become lists of `bool`, numeric lists are read
//! back as `f64` or complex.
//!
//! ## Traits
//!
//! - `ToPython`: Rust value to object-host value (infallible)
//! - `FromPython`: object-host value to Rust value (fallible)
//!
//! Integers and booleans widen to floating point on the way in, matching
//! how the array host stores untyped numeric literals as doubles.

use num_complex::{Complex32, Complex64};
use smol_str::SmolStr;

use crate::error::{BridgeError, BridgeResult};
use crate::py_types::{PyList, PyValue};

// ============================================================================
// ToPython Trait
// ============================================================================

/// Trait for converting Rust values to object-host values.
///
/// # Example
///
/// ```ignore
/// use mxpy_bridge::ToPython;
///
/// let value = 42i32.to_python();
/// assert!(matches!(value, PyValue::Int(42)));
/// ```
pub trait ToPython {
    /// Convert this value to an object-host value.
    fn to_python(&self) -> PyValue;
}

impl ToPython for () {
    fn to_python(&self) -> PyValue {
        PyValue::None
    }
}

impl ToPython for bool {
    fn to_python(&self) -> PyValue {
        PyValue::Bool(*self)
    }
}

macro_rules! int_to_python {
    ($($ty:ty),*) => {
        $(
            impl ToPython for $ty {
                fn to_python(&self) -> PyValue {
                    PyValue::Int(i64::from(*self))
                }
            }
        )*
    };
}

int_to_python!(i8, i16, i32, i64, u8, u16, u32);

impl ToPython for u64 {
    fn to_python(&self) -> PyValue {
        // Values past i64::MAX keep their magnitude as a float
        match i64::try_from(*self) {
            Ok(n) => PyValue::Int(n),
            Err(_) => PyValue::Float(*self as f64),
        }
    }
}

impl ToPython for f32 {
    fn to_python(&self) -> PyValue {
        PyValue::Float(f64::from(*self))
    }
}

impl ToPython for f64 {
    fn to_python(&self) -> PyValue {
        PyValue::Float(*self)
    }
}

impl ToPython for Complex32 {
    fn to_python(&self) -> PyValue {
        PyValue::Complex(Complex64::new(f64::from(self.re), f64::from(self.im)))
    }
}

impl ToPython for Complex64 {
    fn to_python(&self) -> PyValue {
        PyValue::Complex(*self)
    }
}

impl ToPython for str {
    fn to_python(&self) -> PyValue {
        PyValue::String(SmolStr::new(self))
    }
}

impl ToPython for String {
    fn to_python(&self) -> PyValue {
        PyValue::String(SmolStr::new(self))
    }
}

impl ToPython for SmolStr {
    fn to_python(&self) -> PyValue {
        PyValue::String(self.clone())
    }
}

impl<T: ToPython> ToPython for Option<T> {
    fn to_python(&self) -> PyValue {
        match self {
            Some(v) => v.to_python(),
            None => PyValue::None,
        }
    }
}

impl<T: ToPython> ToPython for [T] {
    fn to_python(&self) -> PyValue {
        PyValue::List(self.iter().map(ToPython::to_python).collect())
    }
}

impl<T: ToPython> ToPython for Vec<T> {
    fn to_python(&self) -> PyValue {
        self.as_slice().to_python()
    }
}

// ============================================================================
// FromPython Trait
// ============================================================================

/// Trait for converting object-host values to Rust values.
pub trait FromPython: Sized {
    /// Try to convert an object-host value to this type.
    fn from_python(value: &PyValue) -> BridgeResult<Self>;
}

impl FromPython for () {
    fn from_python(value: &PyValue) -> BridgeResult<Self> {
        match value {
            PyValue::None => Ok(()),
            _ => Err(BridgeError::type_mismatch("None", value.type_name())),
        }
    }
}

impl FromPython for bool {
    fn from_python(value: &PyValue) -> BridgeResult<Self> {
        match value {
            PyValue::Bool(b) => Ok(*b),
            PyValue::Int(n) => Ok(*n != 0),
            _ => Err(BridgeError::type_mismatch("bool", value.type_name())),
        }
    }
}

impl FromPython for i64 {
    fn from_python(value: &PyValue) -> BridgeResult<Self> {
        match value {
            PyValue::Int(n) => Ok(*n),
            PyValue::Bool(b) => Ok(i64::from(*b)),
            PyValue::Float(f) if f.fract() == 0.0 => {
                if *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Ok(*f as i64)
                } else {
                    Err(BridgeError::numeric_overflow(f.to_string(), "i64"))
                }
            }
            _ => Err(BridgeError::type_mismatch("int", value.type_name())),
        }
    }
}

macro_rules! narrow_from_python {
    ($($ty:ty),*) => {
        $(
            impl FromPython for $ty {
                fn from_python(value: &PyValue) -> BridgeResult<Self> {
                    let n = i64::from_python(value)?;
                    <$ty>::try_from(n).map_err(|_| {
                        BridgeError::numeric_overflow(n.to_string(), stringify!($ty))
                    })
                }
            }
        )*
    };
}

narrow_from_python!(i8, i16, i32, u8, u16, u32, u64, usize);

impl FromPython for f64 {
    fn from_python(value: &PyValue) -> BridgeResult<Self> {
        value
            .as_float()
            .ok_or_else(|| BridgeError::type_mismatch("float", value.type_name()))
    }
}

impl FromPython for f32 {
    fn from_python(value: &PyValue) -> BridgeResult<Self> {
        let f = f64::from_python(value)?;
        if !f.is_finite() || f.abs() <= f32::MAX as f64 {
            // inf and nan carry over
            Ok(f as f32)
        } else {
            Err(BridgeError::numeric_overflow(f.to_string(), "f32"))
        }
    }
}

impl FromPython for Complex64 {
    fn from_python(value: &PyValue) -> BridgeResult<Self> {
        match value {
            PyValue::Complex(c) => Ok(*c),
            other => other
                .as_float()
                .map(|re| Complex64::new(re, 0.0))
                .ok_or_else(|| BridgeError::type_mismatch("complex", other.type_name())),
        }
    }
}

impl FromPython for String {
    fn from_python(value: &PyValue) -> BridgeResult<Self> {
        match value {
            PyValue::String(s) => Ok(s.to_string()),
            _ => Err(BridgeError::type_mismatch("str", value.type_name())),
        }
    }
}

impl FromPython for SmolStr {
    fn from_python(value: &PyValue) -> BridgeResult<Self> {
        match value {
            PyValue::String(s) => Ok(s.clone()),
            _ => Err(BridgeError::type_mismatch("str", value.type_name())),
        }
    }
}

impl<T: FromPython> FromPython for Option<T> {
    fn from_python(value: &PyValue) -> BridgeResult<Self> {
        match value {
            PyValue::None => Ok(None),
            other => T::from_python(other).map(Some),
        }
    }
}

impl<T: FromPython> FromPython for Vec<T> {
    fn from_python(value: &PyValue) -> BridgeResult<Self> {
        let items = match value {
            PyValue::List(list) => list.to_vec(),
            PyValue::Tuple(items) => items.clone(),
            _ => return Err(BridgeError::type_mismatch("list", value.type_name())),
        };
        items.iter().map(T::from_python).collect()
    }
}

/// Build a list from Rust values
pub fn to_py_list<T: ToPython>(values: &[T]) -> PyList {
    values.iter().map(ToPython::to_python).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_int_to_python() {
        assert_eq!(42i8.to_python(), PyValue::Int(42));
        assert_eq!(7u32.to_python(), PyValue::Int(7));
        assert_eq!(u64::MAX.to_python(), PyValue::Float(u64::MAX as f64));
    }

    #[test]
    fn test_collections_to_python() {
        let list = vec![true, false].to_python();
        assert_eq!(list.to_string(), "[True, False]");
        assert_eq!(Some(1.5f32).to_python(), PyValue::Float(1.5));
        assert_eq!(None::<i32>.to_python(), PyValue::None);
        assert_eq!(
            Complex32::new(1.0, -1.0).to_python(),
            PyValue::Complex(Complex64::new(1.0, -1.0))
        );
    }

    #[test]
    fn test_widening_from_python() {
        assert_eq!(f64::from_python(&PyValue::Int(3)).unwrap(), 3.0);
        assert_eq!(f64::from_python(&PyValue::Bool(true)).unwrap(), 1.0);
        assert_eq!(
            Complex64::from_python(&PyValue::Float(2.0)).unwrap(),
            Complex64::new(2.0, 0.0)
        );
        assert!(f64::from_python(&PyValue::String("1".into())).is_err());
    }

    #[test]
    fn test_narrowing_overflow() {
        assert_eq!(u8::from_python(&PyValue::Int(255)).unwrap(), 255);
        let err = u8::from_python(&PyValue::Int(256)).unwrap_err();
        assert!(matches!(err, BridgeError::NumericOverflow { .. }));
        assert!(i64::from_python(&PyValue::Float(1.5)).is_err());
        assert!(f32::from_python(&PyValue::Float(1e300)).is_err());
        assert!(f32::from_python(&PyValue::Float(f64::INFINITY)).is_ok());
    }

    #[test]
    fn test_vec_from_python() {
        let list = PyValue::List(to_py_list(&[1.0, 2.0]));
        assert_eq!(Vec::<f64>::from_python(&list).unwrap(), vec![1.0, 2.0]);
        let tuple = PyValue::Tuple(vec![PyValue::Int(1), PyValue::None]);
        assert_eq!(
            Vec::<Option<i64>>::from_python(&tuple).unwrap(),
            vec![Some(1), None]
        );
    }
}
