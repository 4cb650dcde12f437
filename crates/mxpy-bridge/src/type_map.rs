//! Type Map
//!
//! Static correspondence between element types on both sides of the
//! bridge.
//!
//! - [`ElementType`]: the element types the bridge can move
//! - [`MxClass`]: array-host classes, including the ones it refuses
//! - [`DType`]: object-host array dtypes, including the ones it refuses
//!
//! Mapping is symmetric: `ElementType -> DType -> ElementType` is the
//! identity for every numeric type. Only text narrows (UTF-16 code units
//! travel as `uint16` when they are forced through the array path).

use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, BridgeResult};

// ============================================================================
// ElementType
// ============================================================================

/// Broad kind of a scalar element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Signed or unsigned integer
    Integer,
    /// IEEE float
    Float,
    /// Pair of IEEE floats
    Complex,
    /// Boolean / logical
    Bool,
    /// UTF-16 code unit
    Text,
}

/// Element types shared by both hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Single,
    Double,
    ComplexSingle,
    ComplexDouble,
    /// UTF-16 code unit of a character array
    Char,
}

impl ElementType {
    /// Every element type, in table order
    pub const ALL: [ElementType; 14] = [
        ElementType::Bool,
        ElementType::Int8,
        ElementType::Int16,
        ElementType::Int32,
        ElementType::Int64,
        ElementType::UInt8,
        ElementType::UInt16,
        ElementType::UInt32,
        ElementType::UInt64,
        ElementType::Single,
        ElementType::Double,
        ElementType::ComplexSingle,
        ElementType::ComplexDouble,
        ElementType::Char,
    ];

    /// Scalar kind of this element type
    pub fn scalar_kind(&self) -> ScalarKind {
        match self {
            ElementType::Bool => ScalarKind::Bool,
            ElementType::Int8
            | ElementType::Int16
            | ElementType::Int32
            | ElementType::Int64
            | ElementType::UInt8
            | ElementType::UInt16
            | ElementType::UInt32
            | ElementType::UInt64 => ScalarKind::Integer,
            ElementType::Single | ElementType::Double => ScalarKind::Float,
            ElementType::ComplexSingle | ElementType::ComplexDouble => ScalarKind::Complex,
            ElementType::Char => ScalarKind::Text,
        }
    }

    /// Size of one element in bytes
    pub fn byte_width(&self) -> usize {
        match self {
            ElementType::Bool | ElementType::Int8 | ElementType::UInt8 => 1,
            ElementType::Int16 | ElementType::UInt16 | ElementType::Char => 2,
            ElementType::Int32 | ElementType::UInt32 | ElementType::Single => 4,
            ElementType::Int64
            | ElementType::UInt64
            | ElementType::Double
            | ElementType::ComplexSingle => 8,
            ElementType::ComplexDouble => 16,
        }
    }

    /// Array-host class name for this element type
    pub fn class_name(&self) -> &'static str {
        match self {
            ElementType::Bool => "logical",
            ElementType::Int8 => "int8",
            ElementType::Int16 => "int16",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::UInt8 => "uint8",
            ElementType::UInt16 => "uint16",
            ElementType::UInt32 => "uint32",
            ElementType::UInt64 => "uint64",
            ElementType::Single => "single",
            ElementType::Double => "double",
            ElementType::ComplexSingle => "single (complex)",
            ElementType::ComplexDouble => "double (complex)",
            ElementType::Char => "char",
        }
    }

    /// Check if this is a signed numeric type
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            ElementType::Int8
                | ElementType::Int16
                | ElementType::Int32
                | ElementType::Int64
                | ElementType::Single
                | ElementType::Double
                | ElementType::ComplexSingle
                | ElementType::ComplexDouble
        )
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class_name())
    }
}

// ============================================================================
// MxClass - array-host classes
// ============================================================================

/// Class of an array-host value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MxClass {
    /// Integer, float or complex array
    Numeric(ElementType),
    /// Boolean array
    Logical,
    /// UTF-16 character array
    Char,
    /// String array
    String,
    /// Struct array
    Struct,
    /// Cell array
    Cell,
    /// Class instance; `handle` marks reference semantics
    Object { handle: bool },
    /// Enumeration instance
    Enumeration,
    /// Sparse matrix
    Sparse,
}

impl MxClass {
    /// Class holding dense elements of the given type
    pub fn for_element(element: ElementType) -> Self {
        match element {
            ElementType::Bool => MxClass::Logical,
            ElementType::Char => MxClass::Char,
            other => MxClass::Numeric(other),
        }
    }

    /// Element type for dense classes
    pub fn element_type(&self) -> Option<ElementType> {
        match self {
            MxClass::Numeric(element) => Some(*element),
            MxClass::Logical => Some(ElementType::Bool),
            MxClass::Char => Some(ElementType::Char),
            _ => None,
        }
    }

    /// Element type for classes the array path can carry, failing with
    /// `UnsupportedType` otherwise.
    pub fn require_element(&self) -> BridgeResult<ElementType> {
        self.element_type()
            .ok_or_else(|| BridgeError::unsupported_type(self.name()))
    }

    /// Check whether the bridge can convert this class at all
    pub fn is_supported(&self) -> bool {
        !matches!(self, MxClass::Enumeration | MxClass::Sparse)
    }

    /// Class name as the array host reports it
    pub fn name(&self) -> &'static str {
        match self {
            MxClass::Numeric(element) => element.class_name(),
            MxClass::Logical => "logical",
            MxClass::Char => "char",
            MxClass::String => "string",
            MxClass::Struct => "struct",
            MxClass::Cell => "cell",
            MxClass::Object { handle: false } => "object",
            MxClass::Object { handle: true } => "handle",
            MxClass::Enumeration => "enumeration",
            MxClass::Sparse => "sparse",
        }
    }
}

impl fmt::Display for MxClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// DType - object-host dtypes
// ============================================================================

/// Object-host array dtype.
///
/// Includes the dtypes the bridge refuses so that arrays carrying them
/// can exist on the object side and fail with `UnsupportedDtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Two `float32`
    Complex64,
    /// Two `float64`
    Complex128,
    /// Extended precision float
    LongDouble,
    /// Extended precision complex
    CLongDouble,
    /// Fixed-width UCS-4 text
    Unicode,
    /// Boxed object references
    Object,
}

impl DType {
    /// Size in bytes of one element
    pub fn size(&self) -> usize {
        match self.to_element() {
            Ok(element) => element.byte_width(),
            Err(_) => match self {
                DType::LongDouble => 16,
                DType::CLongDouble => 32,
                DType::Unicode => 4,
                _ => std::mem::size_of::<usize>(),
            },
        }
    }

    /// Dtype name (e.g. "float64")
    pub fn name(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
            DType::LongDouble => "longdouble",
            DType::CLongDouble => "clongdouble",
            DType::Unicode => "str",
            DType::Object => "object",
        }
    }

    /// Element type for this dtype, or `UnsupportedDtype`.
    pub fn to_element(&self) -> BridgeResult<ElementType> {
        Ok(match self {
            DType::Bool => ElementType::Bool,
            DType::Int8 => ElementType::Int8,
            DType::Int16 => ElementType::Int16,
            DType::Int32 => ElementType::Int32,
            DType::Int64 => ElementType::Int64,
            DType::UInt8 => ElementType::UInt8,
            DType::UInt16 => ElementType::UInt16,
            DType::UInt32 => ElementType::UInt32,
            DType::UInt64 => ElementType::UInt64,
            DType::Float32 => ElementType::Single,
            DType::Float64 => ElementType::Double,
            DType::Complex64 => ElementType::ComplexSingle,
            DType::Complex128 => ElementType::ComplexDouble,
            DType::LongDouble | DType::CLongDouble | DType::Unicode | DType::Object => {
                return Err(BridgeError::unsupported_dtype(self.name()))
            }
        })
    }

    /// Dtype carrying the given element type.
    pub fn from_element(element: ElementType) -> Self {
        match element {
            ElementType::Bool => DType::Bool,
            ElementType::Int8 => DType::Int8,
            ElementType::Int16 => DType::Int16,
            ElementType::Int32 => DType::Int32,
            ElementType::Int64 => DType::Int64,
            ElementType::UInt8 => DType::UInt8,
            ElementType::UInt16 | ElementType::Char => DType::UInt16,
            ElementType::UInt32 => DType::UInt32,
            ElementType::UInt64 => DType::UInt64,
            ElementType::Single => DType::Float32,
            ElementType::Double => DType::Float64,
            ElementType::ComplexSingle => DType::Complex64,
            ElementType::ComplexDouble => DType::Complex128,
        }
    }

    /// Check whether the bridge can move arrays of this dtype
    pub fn is_supported(&self) -> bool {
        self.to_element().is_ok()
    }
}

impl FromStr for DType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bool" | "bool_" | "?" => DType::Bool,
            "int8" | "i1" => DType::Int8,
            "int16" | "i2" => DType::Int16,
            "int32" | "i4" => DType::Int32,
            "int64" | "i8" => DType::Int64,
            "uint8" | "u1" => DType::UInt8,
            "uint16" | "u2" => DType::UInt16,
            "uint32" | "u4" => DType::UInt32,
            "uint64" | "u8" => DType::UInt64,
            "float32" | "f4" => DType::Float32,
            "float64" | "f8" | "float" => DType::Float64,
            "complex64" | "c8" => DType::Complex64,
            "complex128" | "c16" | "complex" => DType::Complex128,
            "longdouble" | "float128" | "f16" => DType::LongDouble,
            "clongdouble" | "complex256" | "c32" => DType::CLongDouble,
            "str" | "unicode" | "U" => DType::Unicode,
            "object" | "O" => DType::Object,
            other => return Err(BridgeError::unsupported_dtype(other)),
        })
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
