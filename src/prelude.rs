//! Convenient re-exports for common usage patterns.
//!
//! This module provides a single import to bring all commonly used types
//! into scope.
//!
//! # Example
//!
//! ```ignore
//! use cffi_backend::prelude::*;
//!
//! let backend = Backend::native();
//! let point = backend.new_struct_type("struct point");
//! let int = backend.new_primitive_type("int")?;
//! backend.complete_struct_or_union(
//!     &point,
//!     &[FieldSpec::new("x", &int), FieldSpec::new("y", &int)],
//!     None,
//!     None,
//!     StructFlags::empty(),
//!     None,
//! )?;
//! ```

// Unified error handling
pub use crate::error::{Error, ErrorKind, Result};

// Entry point and configuration
pub use crate::backend::Backend;
pub use crate::config::RuntimeConfig;

// Types and layout
pub use crate::ctype::{CType, PrimitiveKind, TypeKind};
pub use crate::layout::{AbiProfile, BitfieldRule, FieldRef, FieldSpec, StructFlags};

// Values
pub use crate::cdata::{CData, SharedBuffer, Slice};
pub use crate::value::{Complex, HostObject, Value};

// Calls and libraries
pub use crate::call::{CallbackOptions, DiagnosticSink, HostFunction};
pub use crate::library::Library;
