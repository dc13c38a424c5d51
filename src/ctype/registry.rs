//! Type constructors and the structural interning table.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, OnceLock, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::layout::{self, AbiProfile, FieldSpec, StructFlags};
use crate::logging::{debug, trace};

use super::name::{array_name, function_name, pointer_name};
use super::{CType, CTypeData, CTypeKind, EnumInfo, FunctionInfo, PrimitiveKind, Record};

/// Structural identity of an interned type; derived types refer to their
/// components by identity, which stays valid because an interned type
/// holds its components alive.
#[derive(Debug, Hash, PartialEq, Eq)]
enum InternKey {
    Void,
    Primitive(PrimitiveKind),
    Pointer(usize),
    Array(usize, Option<usize>),
    Function(Vec<usize>, usize, bool, i32),
}

static TYPES: LazyLock<Mutex<HashMap<InternKey, Weak<CTypeData>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn intern(key: InternKey, build: impl FnOnce() -> CTypeData) -> CType {
    let mut table = TYPES.lock();
    if let Some(existing) = table.get(&key).and_then(Weak::upgrade) {
        trace!(key = ?key, "ctype cache hit");
        return CType(existing);
    }
    let ctype = CType::from_data(build());
    if table.len() >= 256 && table.len().is_power_of_two() {
        table.retain(|_, weak| weak.strong_count() > 0);
    }
    trace!(ctype = ctype.cname(), "ctype interned");
    table.insert(key, Arc::downgrade(&ctype.0));
    ctype
}

pub fn new_primitive_type(name: &str) -> Result<CType> {
    let kind = PrimitiveKind::from_name(name)
        .ok_or_else(|| Error::key_error(format!("unknown primitive type name '{}'", name)))?;
    Ok(primitive(kind))
}

pub(crate) fn primitive(kind: PrimitiveKind) -> CType {
    intern(InternKey::Primitive(kind), || CTypeData {
        kind: CTypeKind::Primitive(kind),
        cname: kind.name().to_string(),
        name_position: kind.name().len(),
    })
}

pub fn new_void_type() -> CType {
    intern(InternKey::Void, || CTypeData {
        kind: CTypeKind::Void,
        cname: "void".to_string(),
        name_position: 4,
    })
}

pub fn new_pointer_type(pointee: &CType) -> CType {
    intern(InternKey::Pointer(pointee.identity()), || {
        let (cname, name_position) = pointer_name(pointee);
        CTypeData {
            kind: CTypeKind::Pointer(pointee.clone()),
            cname,
            name_position,
        }
    })
}

/// `new_array_type(T *, length)`: an array of `T`.
pub fn new_array_type(pointer: &CType, length: Option<i64>) -> Result<CType> {
    let item = match pointer.repr_kind() {
        CTypeKind::Pointer(item) => item,
        _ => {
            return Err(Error::type_error(format!(
                "first arg must be a pointer ctype, not '{}'",
                pointer.cname()
            )));
        }
    };
    let item_size = item.size_opt().ok_or_else(|| {
        Error::value_error(format!("array item of unknown size: '{}'", item.cname()))
    })?;
    let length = match length {
        None => None,
        Some(n) if n < 0 => return Err(Error::value_error("negative array length")),
        Some(n) => {
            let n = usize::try_from(n)
                .map_err(|_| Error::overflow("array size would overflow a ssize_t"))?;
            let total = n
                .checked_mul(item_size)
                .filter(|t| *t <= isize::MAX as usize);
            if total.is_none() {
                return Err(Error::overflow("array size would overflow a ssize_t"));
            }
            Some(n)
        }
    };
    Ok(intern(InternKey::Array(item.identity(), length), || {
        let (cname, name_position) = array_name(item, length);
        CTypeData {
            kind: CTypeKind::Array {
                item: item.clone(),
                length,
            },
            cname,
            name_position,
        }
    }))
}

fn record_type(tag: &str, union: bool) -> CType {
    let record = Record::default();
    CType::from_data(CTypeData {
        kind: if union {
            CTypeKind::Union(record)
        } else {
            CTypeKind::Struct(record)
        },
        cname: tag.to_string(),
        name_position: tag.len(),
    })
}

/// An opaque struct; `tag` is used verbatim as the cname (`"struct foo"`).
pub fn new_struct_type(tag: &str) -> CType {
    record_type(tag, false)
}

pub fn new_union_type(tag: &str) -> CType {
    record_type(tag, true)
}

/// Assign the layout of an opaque struct or union, exactly once.
pub fn complete_struct_or_union(
    ctype: &CType,
    fields: &[FieldSpec],
    total_size: Option<usize>,
    total_alignment: Option<usize>,
    sflags: StructFlags,
    pack: Option<usize>,
    profile: &AbiProfile,
) -> Result<()> {
    let record = ctype.record().ok_or_else(|| {
        Error::type_error(format!(
            "first arg must be a non-initialized struct or union ctype, not '{}'",
            ctype.cname()
        ))
    })?;
    if record.layout.get().is_some() {
        return Err(Error::type_error(format!(
            "ctype '{}' is already completed",
            ctype.cname()
        )));
    }
    let computed = layout::compute_layout(
        ctype,
        fields,
        total_size,
        total_alignment,
        sflags,
        pack,
        profile,
    )?;
    record.layout.set(computed).map_err(|_| {
        Error::type_error(format!("ctype '{}' is already completed", ctype.cname()))
    })
}

pub fn new_enum_type(tag: &str, names: &[&str], values: &[i128], base: &CType) -> Result<CType> {
    if names.len() != values.len() {
        return Err(Error::value_error(
            "enumerator names and values must have the same length",
        ));
    }
    let kind = base.primitive().filter(|k| k.is_integer()).ok_or_else(|| {
        Error::type_error(format!(
            "expected a primitive signed or unsigned base type, got '{}'",
            base.cname()
        ))
    })?;
    let (min, max) = kind.integer_range();
    let mut members = Vec::with_capacity(names.len());
    for (name, value) in names.iter().zip(values) {
        if *value < min || *value > max {
            return Err(Error::overflow(format!(
                "enum value {} of '{}' does not fit '{}'",
                value,
                name,
                base.cname()
            )));
        }
        members.push((name.to_string(), *value));
    }
    Ok(CType::from_data(CTypeData {
        kind: CTypeKind::Enum(EnumInfo {
            base: base.clone(),
            members,
        }),
        cname: tag.to_string(),
        name_position: tag.len(),
    }))
}

/// A function pointer type. Array arguments decay to pointers.
pub fn new_function_type(
    args: &[CType],
    result: &CType,
    ellipsis: bool,
    abi: i32,
) -> Result<CType> {
    if result.is_array() {
        return Err(Error::type_error(format!(
            "invalid result type: '{}'",
            result.cname()
        )));
    }
    let mut fixed = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        if arg.is_void() {
            return Err(Error::type_error(format!(
                "argument {} is of type 'void', which is not allowed",
                i + 1
            )));
        }
        match arg.item() {
            Some(item) if arg.is_array() => fixed.push(new_pointer_type(item)),
            _ => fixed.push(arg.clone()),
        }
    }
    let key = InternKey::Function(
        fixed.iter().map(CType::identity).collect(),
        result.identity(),
        ellipsis,
        abi,
    );
    let ctype = intern(key, || {
        let (cname, name_position) = function_name(&fixed, result, ellipsis);
        CTypeData {
            kind: CTypeKind::Function(FunctionInfo {
                args: fixed.clone(),
                result: result.clone(),
                ellipsis,
                abi,
                interface: OnceLock::new(),
            }),
            cname,
            name_position,
        }
    });
    debug!(ctype = ctype.cname(), "function type ready");
    Ok(ctype)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_identity() -> Result<()> {
        let a = new_primitive_type("int")?;
        let b = new_primitive_type("int")?;
        assert_eq!(a, b);
        assert_eq!(new_pointer_type(&a), new_pointer_type(&b));
        Ok(())
    }

    #[test]
    fn test_records_are_nominal() {
        let a = new_struct_type("struct foo");
        let b = new_struct_type("struct foo");
        assert_ne!(a, b);
        assert_ne!(new_pointer_type(&a), new_pointer_type(&b));
    }

    #[test]
    fn test_cnames() -> Result<()> {
        let int = new_primitive_type("int")?;
        let long = new_primitive_type("long")?;
        let p = new_pointer_type(&int);
        assert_eq!(p.cname(), "int *");
        assert_eq!(new_pointer_type(&p).cname(), "int * *");
        let a5 = new_array_type(&p, Some(5))?;
        assert_eq!(a5.cname(), "int[5]");
        assert_eq!(new_pointer_type(&a5).cname(), "int(*)[5]");
        let ap = new_array_type(&new_pointer_type(&p), Some(5))?;
        assert_eq!(ap.cname(), "int *[5]");
        assert_eq!(new_array_type(&p, None)?.cname(), "int[]");
        let f = new_function_type(&[int.clone(), long], &int, false, 0)?;
        assert_eq!(f.cname(), "int(*)(int, long)");
        let v = new_function_type(&[int.clone()], &int, true, 0)?;
        assert_eq!(v.cname(), "int(*)(int, ...)");
        let n = new_function_type(&[], &int, false, 0)?;
        assert_eq!(n.cname(), "int(*)()");
        Ok(())
    }

    #[test]
    fn test_array_errors() -> Result<()> {
        let int = new_primitive_type("int")?;
        let err = new_array_type(&int, Some(3)).err();
        assert!(err.is_some_and(|e| e.is_type_error()));
        let p = new_pointer_type(&int);
        assert!(new_array_type(&p, Some(-1)).is_err_and(|e| e.is_value_error()));
        assert!(new_array_type(&p, Some(i64::MAX)).is_err_and(|e| e.is_overflow()));
        let open = new_array_type(&p, None)?;
        let nested = new_array_type(&new_pointer_type(&open), Some(2));
        assert!(nested.is_err_and(|e| e.is_value_error()));
        Ok(())
    }

    #[test]
    fn test_function_errors() -> Result<()> {
        let int = new_primitive_type("int")?;
        let void = new_void_type();
        let void_arg = new_function_type(&[void.clone()], &int, false, 0);
        assert!(void_arg.is_err_and(|e| e.is_type_error()));
        let arr = new_array_type(&new_pointer_type(&int), Some(3))?;
        assert!(new_function_type(&[], &arr, false, 0).is_err_and(|e| e.is_type_error()));
        let decayed = new_function_type(&[arr], &void, false, 0)?;
        assert_eq!(decayed.cname(), "void(*)(int *)");
        Ok(())
    }
}
