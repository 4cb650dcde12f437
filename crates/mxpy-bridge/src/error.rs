//! Error Types for the Bridge
//!
//! Every failure a conversion can produce. All of them are local,
//! synchronous and not retryable: the caller decides what to do at a
//! higher level.
//!
//! ## Error Categories
//!
//! - Type mapping failures (`UnsupportedType`, `UnsupportedDtype`)
//! - Composite shape failures (`NonStringKey`, `ShapeMismatch`)
//! - Layout failures (`InvalidStride`)
//! - Callable bridge misuse (`UnknownKey`, `NotCallable`)
//! - Session / exclusivity token misuse
//!
//! Buffer release never shows up here. A buffer that cannot be released
//! yet is deferred by the cache, not reported.

use std::fmt;
use thiserror::Error;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Element kind or array class with no mapping in the other host
    #[error("unsupported type: {type_name}")]
    UnsupportedType {
        /// Name of the offending class or object type
        type_name: String,
    },

    /// Array dtype not supported
    #[error("unsupported array dtype: {dtype}")]
    UnsupportedDtype {
        /// The unsupported dtype string
        dtype: String,
    },

    /// Mapping key that cannot become a struct field name
    #[error("can only convert mappings with text keys, found a key of type {key_type}")]
    NonStringKey {
        /// Type name of the key
        key_type: String,
    },

    /// Nested numeric sequence that is not rectangular
    #[error("shape mismatch: {reason}")]
    ShapeMismatch {
        /// What was not rectangular
        reason: String,
    },

    /// Negative or otherwise unusable stride
    #[error("invalid stride {stride} on axis {axis}")]
    InvalidStride {
        /// Axis carrying the stride
        axis: usize,
        /// The declared byte stride
        stride: isize,
    },

    /// Callable registry lookup for a key that is not registered
    #[error("no callable registered under key '{key}'")]
    UnknownKey {
        /// The registry key
        key: String,
    },

    /// Attempt to register a value that is not callable
    #[error("value of type {type_name} is not callable")]
    NotCallable {
        /// Type name of the value
        type_name: String,
    },

    /// Generic conversion failure
    #[error("conversion failed: cannot convert {from_type} to {to_type}: {reason}")]
    ConversionFailed {
        /// Source type name
        from_type: String,
        /// Target type name
        to_type: String,
        /// Reason for failure
        reason: String,
    },

    /// Type mismatch when extracting a Rust value
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type
        expected: String,
        /// Actual type received
        actual: String,
    },

    /// Numeric overflow during extraction
    #[error("numeric overflow: {value} cannot be represented as {target_type}")]
    NumericOverflow {
        /// String representation of the value
        value: String,
        /// Target type name
        target_type: String,
    },

    /// Bridge session not initialized
    #[error("bridge session not initialized")]
    SessionNotInitialized,

    /// Exclusivity token not held when required
    #[error("exclusivity token not held: {context}")]
    GilNotHeld {
        /// Description of the operation that required the token
        context: String,
    },
}

impl BridgeError {
    /// Create an unsupported type error
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        BridgeError::UnsupportedType {
            type_name: type_name.into(),
        }
    }

    /// Create an unsupported dtype error
    pub fn unsupported_dtype(dtype: impl Into<String>) -> Self {
        BridgeError::UnsupportedDtype {
            dtype: dtype.into(),
        }
    }

    /// Create a non-string key error
    pub fn non_string_key(key_type: impl Into<String>) -> Self {
        BridgeError::NonStringKey {
            key_type: key_type.into(),
        }
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(reason: impl Into<String>) -> Self {
        BridgeError::ShapeMismatch {
            reason: reason.into(),
        }
    }

    /// Create an invalid stride error
    pub fn invalid_stride(axis: usize, stride: isize) -> Self {
        BridgeError::InvalidStride { axis, stride }
    }

    /// Create an unknown key error
    pub fn unknown_key(key: impl Into<String>) -> Self {
        BridgeError::UnknownKey { key: key.into() }
    }

    /// Create a not callable error
    pub fn not_callable(type_name: impl Into<String>) -> Self {
        BridgeError::NotCallable {
            type_name: type_name.into(),
        }
    }

    /// Create a conversion failed error
    pub fn conversion_failed(
        from_type: impl Into<String>,
        to_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        BridgeError::ConversionFailed {
            from_type: from_type.into(),
            to_type: to_type.into(),
            reason: reason.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        BridgeError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a numeric overflow error
    pub fn numeric_overflow(value: impl Into<String>, target_type: impl Into<String>) -> Self {
        BridgeError::NumericOverflow {
            value: value.into(),
            target_type: target_type.into(),
        }
    }

    /// Create a token not held error
    pub fn gil_not_held(context: impl Into<String>) -> Self {
        BridgeError::GilNotHeld {
            context: context.into(),
        }
    }

    /// Check if this is a type-related error
    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            BridgeError::UnsupportedType { .. }
                | BridgeError::UnsupportedDtype { .. }
                | BridgeError::ConversionFailed { .. }
                | BridgeError::TypeMismatch { .. }
                | BridgeError::NumericOverflow { .. }
        )
    }

    /// Check if this is a shape or layout error
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            BridgeError::ShapeMismatch { .. } | BridgeError::InvalidStride { .. }
        )
    }

    /// Check if this is a callable bridge error
    pub fn is_callable_error(&self) -> bool {
        matches!(
            self,
            BridgeError::UnknownKey { .. } | BridgeError::NotCallable { .. }
        )
    }

    /// Message identifier in the array host's `component:mnemonic` form.
    pub fn identifier(&self) -> &'static str {
        match self {
            BridgeError::UnsupportedType { .. } => "mxpy:unsupportedType",
            BridgeError::UnsupportedDtype { .. } => "mxpy:unsupportedDtype",
            BridgeError::NonStringKey { .. } => "mxpy:nonStringKey",
            BridgeError::ShapeMismatch { .. } => "mxpy:shapeMismatch",
            BridgeError::InvalidStride { .. } => "mxpy:invalidStride",
            BridgeError::UnknownKey { .. } => "mxpy:unknownKey",
            BridgeError::NotCallable { .. } => "mxpy:notCallable",
            BridgeError::ConversionFailed { .. } => "mxpy:conversionFailed",
            BridgeError::TypeMismatch { .. } => "mxpy:typeMismatch",
            BridgeError::NumericOverflow { .. } => "mxpy:numericOverflow",
            BridgeError::SessionNotInitialized => "mxpy:notInitialized",
            BridgeError::GilNotHeld { .. } => "mxpy:gilNotHeld",
        }
    }

    /// The single user-visible string surfaced through the array host's
    /// error channel.
    pub fn host_message(&self) -> String {
        HostMessage(self).to_string()
    }
}

/// Display adapter producing `identifier: message`.
struct HostMessage<'a>(&'a BridgeError);

impl fmt::Display for HostMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0.identifier(), self.0)
    }
}
