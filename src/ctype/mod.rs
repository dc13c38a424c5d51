//! C type descriptors.
//!
//! A [`CType`] is an immutable, reference-counted descriptor. Primitive,
//! pointer, array, function and void types are interned by structure (see
//! [`registry`]), so two of them are the same type exactly when they are the
//! same allocation. Struct, union and enum types are nominal: every
//! constructor call makes a distinct type, even for an identical tag.

mod name;
mod primitive;
pub(crate) mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use crate::call::ffi_types::CallInterface;
use crate::error::{Error, Result};
use crate::layout::{Field, RecordLayout};

pub use name::getcname;
pub use primitive::{LONG_DOUBLE_FORMAT, LongDoubleFormat, PrimitiveClass, PrimitiveKind};

/// Variant name of a [`CType`], as exposed for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Primitive,
    Pointer,
    Array,
    Struct,
    Union,
    Enum,
    Function,
    Void,
}

impl TypeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeKind::Primitive => "primitive",
            TypeKind::Pointer => "pointer",
            TypeKind::Array => "array",
            TypeKind::Struct => "struct",
            TypeKind::Union => "union",
            TypeKind::Enum => "enum",
            TypeKind::Function => "function",
            TypeKind::Void => "void",
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A struct or union body, assigned once by completion.
#[derive(Default)]
pub(crate) struct Record {
    pub(crate) layout: OnceLock<RecordLayout>,
}

pub(crate) struct EnumInfo {
    pub(crate) base: CType,
    pub(crate) members: Vec<(String, i128)>,
}

pub(crate) struct FunctionInfo {
    pub(crate) args: Vec<CType>,
    pub(crate) result: CType,
    pub(crate) ellipsis: bool,
    pub(crate) abi: i32,
    /// Prepared on the first call of a non-variadic function.
    pub(crate) interface: OnceLock<CallInterface>,
}

pub(crate) enum CTypeKind {
    Void,
    Primitive(PrimitiveKind),
    Pointer(CType),
    Array { item: CType, length: Option<usize> },
    Struct(Record),
    Union(Record),
    Enum(EnumInfo),
    Function(FunctionInfo),
}

pub(crate) struct CTypeData {
    pub(crate) kind: CTypeKind,
    pub(crate) cname: String,
    pub(crate) name_position: usize,
}

/// A C type descriptor.
///
/// Cloning is cheap; equality is identity.
#[derive(Clone)]
pub struct CType(pub(crate) Arc<CTypeData>);

impl CType {
    pub(crate) fn from_data(data: CTypeData) -> Self {
        Self(Arc::new(data))
    }

    pub(crate) fn repr_kind(&self) -> &CTypeKind {
        &self.0.kind
    }

    /// Identity key used by the interning table.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn kind(&self) -> TypeKind {
        match &self.0.kind {
            CTypeKind::Void => TypeKind::Void,
            CTypeKind::Primitive(_) => TypeKind::Primitive,
            CTypeKind::Pointer(_) => TypeKind::Pointer,
            CTypeKind::Array { .. } => TypeKind::Array,
            CTypeKind::Struct(_) => TypeKind::Struct,
            CTypeKind::Union(_) => TypeKind::Union,
            CTypeKind::Enum(_) => TypeKind::Enum,
            CTypeKind::Function(_) => TypeKind::Function,
        }
    }

    /// Canonical C spelling, e.g. `int *[5]` or `int(*)(int, long)`.
    pub fn cname(&self) -> &str {
        &self.0.cname
    }

    pub(crate) fn name_position(&self) -> usize {
        self.0.name_position
    }

    pub fn is_void(&self) -> bool {
        matches!(self.0.kind, CTypeKind::Void)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.0.kind, CTypeKind::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.0.kind, CTypeKind::Array { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self.0.kind, CTypeKind::Function(_))
    }

    pub fn is_struct_or_union(&self) -> bool {
        matches!(self.0.kind, CTypeKind::Struct(_) | CTypeKind::Union(_))
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.0.kind, CTypeKind::Enum(_))
    }

    /// Pointers, arrays and function pointers: values that are addresses.
    pub fn is_pointer_like(&self) -> bool {
        matches!(
            self.0.kind,
            CTypeKind::Pointer(_) | CTypeKind::Array { .. } | CTypeKind::Function(_)
        )
    }

    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match &self.0.kind {
            CTypeKind::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }

    /// The integer primitive this type is stored as: integer-like
    /// primitives themselves, and the base type of enums.
    pub fn integer_kind(&self) -> Option<PrimitiveKind> {
        match &self.0.kind {
            CTypeKind::Primitive(kind) if kind.is_integer_like() => Some(*kind),
            CTypeKind::Enum(info) => info.base.primitive(),
            _ => None,
        }
    }

    /// Pointee of a pointer, item of an array.
    pub fn item(&self) -> Option<&CType> {
        match &self.0.kind {
            CTypeKind::Pointer(pointee) => Some(pointee),
            CTypeKind::Array { item, .. } => Some(item),
            _ => None,
        }
    }

    /// Array length; `None` for unknown-length arrays and non-arrays.
    pub fn length(&self) -> Option<usize> {
        match &self.0.kind {
            CTypeKind::Array { length, .. } => *length,
            _ => None,
        }
    }

    pub(crate) fn record(&self) -> Option<&Record> {
        match &self.0.kind {
            CTypeKind::Struct(record) | CTypeKind::Union(record) => Some(record),
            _ => None,
        }
    }

    /// Layout of a completed struct or union.
    pub fn record_layout(&self) -> Option<&RecordLayout> {
        self.record().and_then(|r| r.layout.get())
    }

    /// Members of a completed struct or union; `None` while opaque.
    pub fn fields(&self) -> Option<&[Field]> {
        self.record_layout().map(|l| l.fields())
    }

    pub fn is_opaque(&self) -> bool {
        self.record().is_some_and(|r| r.layout.get().is_none())
    }

    pub(crate) fn function(&self) -> Option<&FunctionInfo> {
        match &self.0.kind {
            CTypeKind::Function(info) => Some(info),
            _ => None,
        }
    }

    pub fn args(&self) -> Option<&[CType]> {
        self.function().map(|f| f.args.as_slice())
    }

    pub fn result(&self) -> Option<&CType> {
        self.function().map(|f| &f.result)
    }

    pub fn ellipsis(&self) -> bool {
        self.function().is_some_and(|f| f.ellipsis)
    }

    pub fn abi(&self) -> Option<i32> {
        self.function().map(|f| f.abi)
    }

    pub(crate) fn call_interface(&self) -> Option<&OnceLock<CallInterface>> {
        self.function().map(|f| &f.interface)
    }

    pub(crate) fn enum_info(&self) -> Option<&EnumInfo> {
        match &self.0.kind {
            CTypeKind::Enum(info) => Some(info),
            _ => None,
        }
    }

    pub fn enum_base(&self) -> Option<&CType> {
        self.enum_info().map(|e| &e.base)
    }

    /// Value to name; for duplicated values the first declared name wins.
    pub fn elements(&self) -> Option<BTreeMap<i128, String>> {
        self.enum_info().map(|info| {
            let mut map = BTreeMap::new();
            for (name, value) in info.members.iter().rev() {
                map.insert(*value, name.clone());
            }
            map
        })
    }

    /// Name to value.
    pub fn relements(&self) -> Option<BTreeMap<String, i128>> {
        self.enum_info().map(|info| {
            info.members
                .iter()
                .map(|(name, value)| (name.clone(), *value))
                .collect()
        })
    }

    /// Size in bytes, `None` when unknown (void, opaque records,
    /// unknown-length arrays).
    pub fn size_opt(&self) -> Option<usize> {
        match &self.0.kind {
            CTypeKind::Void => None,
            CTypeKind::Primitive(kind) => Some(kind.size()),
            CTypeKind::Pointer(_) | CTypeKind::Function(_) => Some(size_of::<usize>()),
            CTypeKind::Array { item, length } => {
                let n = (*length)?;
                item.size_opt().map(|s| s * n)
            }
            CTypeKind::Struct(record) | CTypeKind::Union(record) => {
                record.layout.get().map(|l| l.size)
            }
            CTypeKind::Enum(info) => info.base.size_opt(),
        }
    }

    pub fn alignment_opt(&self) -> Option<usize> {
        match &self.0.kind {
            CTypeKind::Void => None,
            CTypeKind::Primitive(kind) => Some(kind.alignment()),
            CTypeKind::Pointer(_) | CTypeKind::Function(_) => Some(align_of::<usize>()),
            CTypeKind::Array { item, .. } => item.alignment_opt(),
            CTypeKind::Struct(record) | CTypeKind::Union(record) => {
                record.layout.get().map(|l| l.alignment)
            }
            CTypeKind::Enum(info) => info.base.alignment_opt(),
        }
    }

    /// `sizeof`; ValueError for types of unknown size.
    pub fn sizeof(&self) -> Result<usize> {
        self.size_opt().ok_or_else(|| {
            Error::value_error(format!("ctype '{}' is of unknown size", self.cname()))
        })
    }

    /// `alignof`; ValueError for types of unknown alignment.
    pub fn alignof(&self) -> Result<usize> {
        self.alignment_opt().ok_or_else(|| {
            Error::value_error(format!(
                "ctype '{}' is of unknown alignment",
                self.cname()
            ))
        })
    }

    /// Pointer to `void` or to a one-byte char type: pointer kinds that
    /// convert to and from any other pointer.
    pub fn is_generic_pointer(&self) -> bool {
        match self.item() {
            Some(item) if self.is_pointer() => {
                item.is_void()
                    || matches!(
                        item.primitive(),
                        Some(PrimitiveKind::Char)
                            | Some(PrimitiveKind::SignedChar)
                            | Some(PrimitiveKind::UnsignedChar)
                    )
            }
            _ => false,
        }
    }

    pub fn is_void_pointer(&self) -> bool {
        self.is_pointer() && self.item().is_some_and(CType::is_void)
    }

    /// Pointer or array whose items are a char or wide char type.
    pub(crate) fn text_item(&self) -> Option<PrimitiveKind> {
        if !(self.is_pointer() || self.is_array()) {
            return None;
        }
        self.item()?.primitive().filter(|k| {
            matches!(
                k.class(),
                PrimitiveClass::Char | PrimitiveClass::WideChar
            )
        })
    }
}

impl PartialEq for CType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CType {}

impl Hash for CType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cname())
    }
}

impl fmt::Debug for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ctype '{}'>", self.cname())
    }
}
