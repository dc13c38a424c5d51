//! Making cdata: allocation, casts and addresses of members.

use crate::convert::{Conversion, encode_primitive};
use crate::convert::buffer::align_to;
use crate::ctype::{CType, CTypeKind};
use crate::error::{Error, Result};
use crate::layout::FieldFlags;
use crate::logging::trace;
use crate::value::Value;

use super::access::{initializer_length, write_value};
use super::memory::MemoryBlock;
use super::{CData, ViewKind};

fn unknown_size(ct: &CType) -> Error {
    Error::type_error(format!(
        "cannot instantiate ctype '{}' of unknown size",
        ct.cname()
    ))
}

/// Size of a struct whose last member is an array of open length, grown
/// to hold what `init` puts into that member.
fn var_record_size(record: &CType, init: &Value) -> Result<usize> {
    let size = record.sizeof()?;
    let Some(layout) = record.record_layout() else {
        return Ok(size);
    };
    let Some(var) = layout.var_array_field() else {
        return Ok(size);
    };
    let member_init = match init {
        Value::List(items) => {
            let position = layout
                .fields()
                .iter()
                .filter(|f| !f.flags().contains(FieldFlags::IGNORE_IN_CTOR))
                .position(|f| f.name() == var.name());
            position.and_then(|p| items.get(p))
        }
        Value::Map(entries) => entries
            .iter()
            .find(|(name, _)| name == var.name())
            .map(|(_, v)| v),
        _ => None,
    };
    let (Some(item), Some(member_init)) = (var.ctype().item(), member_init) else {
        return Ok(size);
    };
    let count = match member_init {
        Value::Int(n) if *n < 0 => return Err(Error::value_error("negative array length")),
        Value::Int(n) => usize::try_from(*n)
            .map_err(|_| Error::overflow("array size would overflow a ssize_t"))?,
        other => initializer_length(item, other).unwrap_or(0),
    };
    let needed = count
        .checked_mul(item.sizeof()?)
        .and_then(|n| n.checked_add(var.offset()))
        .ok_or_else(|| Error::overflow("array size would overflow a ssize_t"))?;
    Ok(size.max(align_to(needed, layout.alignment())))
}

/// Allocate zeroed memory for a pointer's item or an array and apply
/// `init` (`Value::None` for none). An integer `init` gives the item
/// count of an array of open length.
pub fn newp(ctype: &CType, init: &Value) -> Result<CData> {
    match ctype.repr_kind() {
        CTypeKind::Pointer(item) => {
            if item.is_void() || item.is_opaque() || item.is_function() {
                return Err(unknown_size(ctype));
            }
            let size = if item.is_struct_or_union() {
                var_record_size(item, init)?
            } else {
                item.size_opt().ok_or_else(|| unknown_size(ctype))?
            };
            let block = MemoryBlock::new(size, item.alignof()?)?;
            let cd = CData::owned(ctype.clone(), block, None);
            if !init.is_none() {
                write_value(item, cd.address(), init, Some(size))?;
            }
            trace!(ctype = ctype.cname(), size, "newp");
            Ok(cd)
        }
        CTypeKind::Array { item, length } => {
            let (count, apply) = match (length, init) {
                (Some(n), _) => (*n, !init.is_none()),
                (None, Value::Int(n)) => {
                    if *n < 0 {
                        return Err(Error::value_error("negative array length"));
                    }
                    (usize::try_from(*n).map_err(|_| {
                        Error::overflow("array size would overflow a ssize_t")
                    })?, false)
                }
                (None, Value::None) => {
                    return Err(Error::type_error(format!(
                        "ctype '{}' needs an explicit length or an initializer",
                        ctype.cname()
                    )));
                }
                (None, other) => match initializer_length(item, other) {
                    Some(n) => (n, true),
                    None => {
                        return Err(crate::convert::convert_error(
                            ctype,
                            "list or tuple",
                            other,
                        ));
                    }
                },
            };
            let size = count
                .checked_mul(item.sizeof()?)
                .filter(|s| *s <= isize::MAX as usize)
                .ok_or_else(|| Error::overflow("array size would overflow a ssize_t"))?;
            let block = MemoryBlock::new(size, item.alignof()?)?;
            let explicit = if length.is_none() { Some(count) } else { None };
            let cd = CData::owned(ctype.clone(), block, explicit);
            if apply {
                write_value(ctype, cd.address(), init, Some(size))?;
            }
            trace!(ctype = ctype.cname(), size, "newp");
            Ok(cd)
        }
        _ => Err(Error::type_error(format!(
            "expected a pointer or array ctype, got '{}'",
            ctype.cname()
        ))),
    }
}

/// C cast of `value` to `ctype`.
///
/// Casting a non-zero integer to a pointer gives a cdata that must be
/// acknowledged with [`CData::assume_valid`] before it is dereferenced.
pub fn cast(ctype: &CType, value: &Value) -> Result<CData> {
    match ctype.repr_kind() {
        CTypeKind::Primitive(_) | CTypeKind::Enum(_) => {
            let mut buf = vec![0u8; ctype.sizeof()?];
            encode_primitive(ctype, value, &mut buf, Conversion::Cast)?;
            CData::inline(ctype, &buf)
        }
        CTypeKind::Pointer(_) | CTypeKind::Function(_) => {
            let address = match value {
                Value::CData(cd) if cd.ctype().is_pointer_like() => {
                    return Ok(CData::view(
                        ctype.clone(),
                        cd.address(),
                        cd,
                        ViewKind::Derived,
                        None,
                        None,
                    ));
                }
                Value::CData(cd) => match cd.scalar()? {
                    Some(crate::convert::Scalar::Int(v)) => v as usize,
                    _ => return Err(cast_error(ctype, value)),
                },
                Value::Int(v) => *v as usize,
                Value::Bool(b) => usize::from(*b),
                Value::Object(obj) => match obj.as_index() {
                    Some(v) => v as usize,
                    None => return Err(cast_error(ctype, value)),
                },
                _ => return Err(cast_error(ctype, value)),
            };
            Ok(CData::foreign(ctype.clone(), address, address == 0))
        }
        _ => Err(Error::type_error(format!(
            "cannot cast to ctype '{}'",
            ctype.cname()
        ))),
    }
}

fn cast_error(ctype: &CType, value: &Value) -> Error {
    Error::type_error(format!(
        "cannot cast {} to ctype '{}'",
        value.type_name(),
        ctype.cname()
    ))
}

/// A `ctype` pointer to `offset` bytes into what `cdata` designates,
/// keeping `cdata` alive.
pub fn rawaddressof(ctype: &CType, cdata: &CData, offset: usize) -> Result<CData> {
    if !ctype.is_pointer() {
        return Err(Error::type_error(format!(
            "expected a pointer ctype, got '{}'",
            ctype.cname()
        )));
    }
    let source = cdata.ctype();
    if !(source.is_struct_or_union() || source.is_array() || source.is_pointer()) {
        return Err(Error::type_error(format!(
            "expected a cdata struct/union/array/pointer object, got cdata '{}'",
            source.cname()
        )));
    }
    cdata.check_live()?;
    Ok(CData::view(
        ctype.clone(),
        cdata.address() + offset,
        cdata,
        ViewKind::Derived,
        None,
        None,
    ))
}
