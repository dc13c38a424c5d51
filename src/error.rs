//! Unified error type for the backend.
//!
//! Every operation reports failures through a single [`Error`] enum whose
//! variants mirror the error taxonomy of the C type runtime: a wrong kind of
//! type or initializer is a [`Error::Type`], a numeric value that does not fit
//! is an [`Error::Overflow`], and so on. Callers that need the taxonomy name
//! (for diagnostics or for mapping onto a host language's exceptions) use
//! [`Error::kind`].

use std::fmt;

use thiserror::Error;

/// Unified error type for all backend operations.
///
/// # Example
///
/// ```ignore
/// use cffi_backend::{Backend, Error};
///
/// let backend = Backend::native();
/// match backend.new_primitive_type("int128") {
///     Err(Error::Key(msg)) => println!("unknown primitive: {msg}"),
///     _ => {}
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Wrong ctype kind, wrong initializer shape or signature mismatch.
    #[error("{0}")]
    Type(String),

    /// Value outside its domain for a reason other than numeric overflow.
    #[error("{0}")]
    Value(String),

    /// Value numerically out of range during a strict conversion.
    #[error("{0}")]
    Overflow(String),

    /// Unknown primitive name, unknown field in a mapping, unknown enumerator.
    #[error("{0}")]
    Key(String),

    /// Unknown field, or field access into an opaque type.
    #[error("{0}")]
    Attribute(String),

    /// Out-of-bounds element access or slice.
    #[error("{0}")]
    Index(String),

    /// NULL dereference, released memory, unchecked foreign address.
    #[error("{0}")]
    Runtime(String),

    /// Structurally valid but unsupported by the calling convention.
    #[error("{0}")]
    NotImplemented(String),

    /// Failure reported by the operating system (library loading).
    #[error("{0}")]
    Os(String),

    /// Invalid runtime configuration.
    #[error("{0}")]
    Config(String),
}

/// A [`Result`] type alias using the unified [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Taxonomy name of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TypeError,
    ValueError,
    OverflowError,
    KeyError,
    AttributeError,
    IndexError,
    RuntimeError,
    NotImplementedError,
    OSError,
    ConfigError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::NotImplementedError => "NotImplementedError",
            ErrorKind::OSError => "OSError",
            ErrorKind::ConfigError => "ConfigError",
        };
        f.write_str(name)
    }
}

impl Error {
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::Type(msg.into())
    }

    pub fn value_error(msg: impl Into<String>) -> Self {
        Self::Value(msg.into())
    }

    pub fn overflow(msg: impl Into<String>) -> Self {
        Self::Overflow(msg.into())
    }

    pub fn key_error(msg: impl Into<String>) -> Self {
        Self::Key(msg.into())
    }

    pub fn attribute_error(msg: impl Into<String>) -> Self {
        Self::Attribute(msg.into())
    }

    pub fn index_error(msg: impl Into<String>) -> Self {
        Self::Index(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    /// Returns the taxonomy name of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Type(_) => ErrorKind::TypeError,
            Self::Value(_) => ErrorKind::ValueError,
            Self::Overflow(_) => ErrorKind::OverflowError,
            Self::Key(_) => ErrorKind::KeyError,
            Self::Attribute(_) => ErrorKind::AttributeError,
            Self::Index(_) => ErrorKind::IndexError,
            Self::Runtime(_) => ErrorKind::RuntimeError,
            Self::NotImplemented(_) => ErrorKind::NotImplementedError,
            Self::Os(_) => ErrorKind::OSError,
            Self::Config(_) => ErrorKind::ConfigError,
        }
    }

    /// The message without the taxonomy prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Type(m)
            | Self::Value(m)
            | Self::Overflow(m)
            | Self::Key(m)
            | Self::Attribute(m)
            | Self::Index(m)
            | Self::Runtime(m)
            | Self::NotImplemented(m)
            | Self::Os(m)
            | Self::Config(m) => m,
        }
    }

    /// `"Kind: message"`, the form used in callback diagnostics.
    pub fn describe(&self) -> String {
        format!("{}: {}", self.kind(), self.message())
    }

    pub fn is_type_error(&self) -> bool {
        matches!(self, Self::Type(_))
    }

    pub fn is_value_error(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::Overflow(_))
    }

    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::Key(_))
    }

    pub fn is_attribute_error(&self) -> bool {
        matches!(self, Self::Attribute(_))
    }

    pub fn is_index_error(&self) -> bool {
        matches!(self, Self::Index(_))
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, Self::Runtime(_))
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented(_))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(format!("Failed to parse config: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_describe() {
        let e = Error::overflow("integer 300 does not fit 'signed char'");
        assert_eq!(e.kind(), ErrorKind::OverflowError);
        assert!(e.is_overflow());
        assert_eq!(e.to_string(), "integer 300 does not fit 'signed char'");
        assert_eq!(
            e.describe(),
            "OverflowError: integer 300 does not fit 'signed char'"
        );
    }

    #[test]
    fn test_predicates_are_exclusive() {
        let e = Error::index_error("negative index");
        assert!(e.is_index_error());
        assert!(!e.is_type_error());
        assert!(!e.is_runtime());
    }
}
