//! A C type-system runtime in the style of cffi's ABI mode.
//!
//! The crate describes C types at runtime, lays out structs and unions the
//! way a given compiler family would, converts between host values and the
//! bytes of C objects, and calls native functions (or lets native code call
//! host functions) through libffi.
//!
//! # Quick Start
//!
//! ```ignore
//! use cffi_backend::prelude::*;
//!
//! let backend = Backend::native();
//! let int = backend.new_primitive_type("int")?;
//! let array = backend.new_array_type(&backend.new_pointer_type(&int), Some(3))?;
//!
//! let data = backend.newp(&array, &Value::List(vec![1.into(), 2.into(), 3.into()]))?;
//! data.set(1, &Value::Int(20))?;
//! assert_eq!(data.get(1)?, Value::Int(20));
//! println!("{}", data); // <cdata 'int[3]' owning 12 bytes>
//! ```
//!
//! # Modules
//!
//! - [`ctype`] - Type descriptors and the structural type registry
//! - [`layout`] - Struct/union layout and bitfield rules
//! - [`convert`] - Primitive value conversions
//! - [`cdata`] - Live C values and the operations on them
//! - [`call`] - libffi calls, callbacks and errno
//! - [`library`] - Shared library loading
//! - [`config`] - TOML runtime configuration
//!
//! # Feature Flags
//!
//! - `logging` - Enable library-level tracing (consumers provide their own subscriber)
//! - `cli` - Enable the command-line inspection tool
//! - `full` - Enable all features

mod backend;
pub mod call;
pub mod cdata;
pub mod config;
pub mod convert;
pub mod ctype;
mod error;
pub mod layout;
pub mod library;
mod logging;
pub mod prelude;
mod value;

// Re-export the unified error type
pub use error::{Error, ErrorKind, Result};

pub use backend::Backend;
pub use call::{CallbackOptions, DiagnosticSink, HostFunction, OnError};
pub use cdata::{CBuffer, CData, Destructor, Scoped, SharedBuffer, Slice};
pub use config::{LayoutFile, RuntimeConfig};
pub use ctype::{CType, LongDoubleFormat, PrimitiveClass, PrimitiveKind, TypeKind};
pub use layout::{
    AbiProfile, BitfieldRule, Endian, Field, FieldRef, FieldSpec, RecordFlags, RecordLayout,
    StructFlags,
};
pub use library::Library;
pub use value::{Complex, HostObject, Value};
