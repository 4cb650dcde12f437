//! # mxpy-bridge
//!
//! Marshaling engine between a column-major numeric-array host and a
//! dynamic object host.
//!
//! Values cross in both directions. Large contiguous numeric arrays are
//! shared without copying; everything else is converted structurally
//! (structs to dicts, cells to lists, char arrays to text and back).
//!
//! ## Overview
//!
//! - Value models for both hosts (`MxArray`, `PyValue`, `NdArray`)
//! - Element-type and dtype mapping, row-major and column-major layouts
//! - A buffer cache that tracks every shared buffer until both hosts let go
//! - Callable handles that let the array host hold object-host functions
//! - An exclusivity token serializing access to object-host state
//!
//! ## Ownership
//!
//! A buffer is always freed by exactly one host. Object-host views of
//! array-host memory pin the source array through an [`OwnerToken`].
//! Array-host handles over object-host memory either never free it
//! (row-major) or get a placeholder pointer substituted before release
//! (column-major). [`buffer::audit`] records any release that broke this.
//!
//! ## Example
//!
//! ```no_run
//! use mxpy_bridge::{session, BridgeConfig, Converter, GilGuard, MxArray};
//!
//! session::initialize(BridgeConfig::default())?;
//! let gil = GilGuard::acquire()?;
//! let converter = Converter::from_session(&gil)?;
//!
//! let matrix = MxArray::from_slice(&vec![0.0f64; 4096], &[64, 64])?;
//! let view = converter.to_python(&gil, &matrix)?;
//! let back = converter.to_mx(&gil, &view)?;
//! assert!(back.ptr_eq(&matrix));
//! # Ok::<(), mxpy_bridge::BridgeError>(())
//! ```
//!
//! ## Module Structure
//!
//! - [`type_map`]: element types, array classes and dtypes
//! - [`layout`]: shapes, strides and index order
//! - [`buffer`]: raw buffers, bindings and the deallocation audit
//! - [`mx_types`]: array-host values
//! - [`py_types`], [`py_array`]: object-host values
//! - [`adapter`]: raw data-pointer access on array-host handles
//! - [`ownership`]: owner tokens, wrappers and buffer states
//! - [`cache`]: the shared-buffer cache
//! - [`conversion`]: scalar and collection conversion traits
//! - [`convert`]: whole-value conversion between hosts
//! - [`callable`]: callable handles
//! - [`gil`]: the exclusivity token
//! - [`session`]: bridge lifecycle and shared state
//! - [`config`]: configuration
//! - [`error`]: error types

pub mod adapter;
pub mod buffer;
pub mod cache;
pub mod callable;
pub mod config;
pub mod conversion;
pub mod convert;
pub mod error;
pub mod gil;
pub mod layout;
pub mod mx_types;
pub mod ownership;
pub mod py_array;
pub mod py_types;
pub mod session;
pub mod type_map;

use std::sync::Once;

// Re-export main types for convenience
pub use adapter::RawPointerAdapter;
pub use buffer::{audit, BufferAudit, DataPtr, Element, Host};
pub use cache::{CacheStats, ReleaseReport};
pub use callable::CallableRegistry;
pub use config::{BridgeConfig, CopyPolicy};
pub use conversion::{FromPython, ToPython};
pub use convert::{release_pending_buffers, to_other_host, Converter, HostValue};
pub use error::{BridgeError, BridgeResult};
pub use gil::{GilGuard, GilState};
pub use layout::{ArrayLayout, MemoryLayout};
pub use mx_types::{MxArray, StructFields};
pub use ownership::{BufferState, MxWrapper, OwnerToken};
pub use py_array::NdArray;
pub use py_types::{DictKey, PyCallable, PyDict, PyList, PyObject, PyValue};
pub use type_map::{DType, ElementType, MxClass};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Called by [`session::initialize`]; safe to call more than once.
/// Enable with `RUST_LOG=mxpy_bridge=debug` or `RUST_LOG=mxpy_bridge=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only install a subscriber when RUST_LOG is set, and never replace
        // one the embedding application already installed
        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .try_init();
        }
    });
}
