//! Reading and writing typed values at raw addresses.
//!
//! Callers check liveness and acknowledgment of the cdata that owns or
//! designates the memory; the functions here trust the address they get.

use crate::convert::buffer::{decode_int, encode_int};
use crate::convert::chars::encode_wide;
use crate::convert::{Conversion, convert_error, decode_primitive, encode_primitive};
use crate::ctype::registry::new_pointer_type;
use crate::ctype::{CType, CTypeKind, PrimitiveClass};
use crate::error::{Error, Result};
use crate::layout::{Field, FieldFlags, bitfield_range, extract, insert};
use crate::logging::warn;
use crate::value::Value;

use super::memory;
use super::{CData, ViewKind};

/// Read the value of type `ct` stored at `address`.
///
/// Aggregates come back as views keeping `owner` alive; pointers read out
/// of memory are acknowledged.
pub(crate) fn read_value(ct: &CType, address: usize, owner: &CData) -> Result<Value> {
    match ct.repr_kind() {
        CTypeKind::Primitive(_) | CTypeKind::Enum(_) => {
            // SAFETY: see the module documentation.
            let bytes = unsafe { memory::read(address, ct.sizeof()?) };
            decode_primitive(ct, &bytes)
        }
        CTypeKind::Pointer(_) | CTypeKind::Function(_) => {
            // SAFETY: see the module documentation.
            let target = unsafe { memory::read_address(address) };
            Ok(Value::CData(CData::foreign(ct.clone(), target, true)))
        }
        CTypeKind::Array { .. } => Ok(Value::CData(CData::view(
            ct.clone(),
            address,
            owner,
            ViewKind::Derived,
            None,
            ct.size_opt(),
        ))),
        CTypeKind::Struct(_) | CTypeKind::Union(_) => {
            if ct.is_opaque() {
                return Err(incomplete(ct));
            }
            Ok(Value::CData(CData::view(
                ct.clone(),
                address,
                owner,
                ViewKind::Derived,
                None,
                ct.size_opt(),
            )))
        }
        CTypeKind::Void => Err(Error::type_error(format!(
            "cannot read a value of ctype '{}'",
            ct.cname()
        ))),
    }
}

pub(crate) fn incomplete(ct: &CType) -> Error {
    Error::type_error(format!("ctype '{}' has incomplete type", ct.cname()))
}

/// Write `value` as a `ct` at `address`. `available` bounds the bytes an
/// array of open length may fill.
pub(crate) fn write_value(
    ct: &CType,
    address: usize,
    value: &Value,
    available: Option<usize>,
) -> Result<()> {
    match ct.repr_kind() {
        CTypeKind::Primitive(_) | CTypeKind::Enum(_) => {
            let mut buf = vec![0u8; ct.sizeof()?];
            encode_primitive(ct, value, &mut buf, Conversion::Strict)?;
            // SAFETY: see the module documentation.
            unsafe { memory::write(address, &buf) };
            Ok(())
        }
        CTypeKind::Pointer(_) | CTypeKind::Function(_) => {
            let target = pointer_from_value(ct, value)?;
            // SAFETY: see the module documentation.
            unsafe { memory::write_address(address, target) };
            Ok(())
        }
        CTypeKind::Array { item, length } => {
            let length = length.or_else(|| {
                let size = item.size_opt().filter(|s| *s > 0)?;
                available.map(|a| a / size)
            });
            if length.is_none() && item.size_opt() != Some(0) {
                return Err(Error::index_error(format!(
                    "cannot fill '{}' of unknown extent",
                    ct.cname()
                )));
            }
            write_array(ct, item, length, address, value)
        }
        CTypeKind::Struct(_) | CTypeKind::Union(_) => write_record(ct, address, value, available),
        CTypeKind::Void => Err(Error::type_error(format!(
            "cannot write a value of ctype '{}'",
            ct.cname()
        ))),
    }
}

/// Address stored by assigning `value` to a pointer or function type.
pub(crate) fn pointer_from_value(target: &CType, value: &Value) -> Result<usize> {
    let Value::CData(cd) = value else {
        return Err(convert_error(target, "cdata pointer", value));
    };
    let source = cd.ctype();
    let as_pointer = match source.repr_kind() {
        CTypeKind::Pointer(_) | CTypeKind::Function(_) => source.clone(),
        CTypeKind::Array { item, .. } => new_pointer_type(item),
        _ => return Err(convert_error(target, "cdata pointer", value)),
    };
    if &as_pointer != target {
        if target.is_void_pointer() || as_pointer.is_void_pointer() {
            // void * converts both ways
        } else if target.is_generic_pointer() || as_pointer.is_generic_pointer() {
            warn!(
                target = target.cname(),
                source = source.cname(),
                "implicit cast to char pointer from a different pointer type"
            );
        } else if as_pointer.cname() == target.cname() {
            return Err(convert_error(target, "pointer to same type", value));
        } else {
            return Err(Error::type_error(format!(
                "initializer for ctype '{}' must be a pointer to same type, not cdata '{}'",
                target.cname(),
                source.cname()
            )));
        }
    }
    cd.check_live()?;
    Ok(cd.address())
}

/// Number of items an initializer for an array of open length supplies.
pub(crate) fn initializer_length(item: &CType, value: &Value) -> Option<usize> {
    match value {
        Value::List(items) => Some(items.len()),
        Value::Bytes(b) if item.primitive().is_some_and(|k| k.class() == PrimitiveClass::Char) => {
            Some(b.len() + 1)
        }
        Value::Str(s) => match item.primitive() {
            Some(kind) if kind.class() == PrimitiveClass::WideChar => {
                Some(encode_wide(kind, s).len() + 1)
            }
            _ => None,
        },
        _ => None,
    }
}

fn write_array(
    ct: &CType,
    item: &CType,
    length: Option<usize>,
    address: usize,
    value: &Value,
) -> Result<()> {
    let item_size = item.sizeof()?;
    let text_kind = item
        .primitive()
        .filter(|k| matches!(k.class(), PrimitiveClass::Char | PrimitiveClass::WideChar));
    match value {
        Value::List(items) => {
            if let Some(n) = length
                && items.len() > n
            {
                return Err(Error::index_error(format!(
                    "too many initializers for '{}' ({} > {})",
                    ct.cname(),
                    items.len(),
                    n
                )));
            }
            for (i, v) in items.iter().enumerate() {
                write_value(item, address + i * item_size, v, None)?;
            }
            Ok(())
        }
        Value::Bytes(bytes) if text_kind.is_some_and(|k| k.class() == PrimitiveClass::Char) => {
            let units = bytes.iter().map(|b| i128::from(*b)).collect();
            write_text(ct, length, address, item_size, units)
        }
        Value::Str(text) if text_kind.is_some_and(|k| k.class() == PrimitiveClass::WideChar) => {
            let kind = item.primitive().ok_or_else(|| convert_error(ct, "list or tuple", value))?;
            let units = encode_wide(kind, text).into_iter().map(i128::from).collect();
            write_text(ct, length, address, item_size, units)
        }
        Value::CData(cd) if cd.ctype() == ct => {
            cd.check_access()?;
            let size = ct.sizeof()?;
            // SAFETY: both arrays have the same complete type.
            unsafe { memory::copy(address, cd.address(), size) };
            Ok(())
        }
        _ => Err(convert_error(ct, "list or tuple", value)),
    }
}

fn write_text(
    ct: &CType,
    length: Option<usize>,
    address: usize,
    item_size: usize,
    units: Vec<i128>,
) -> Result<()> {
    if let Some(n) = length
        && units.len() > n
    {
        return Err(Error::index_error(format!(
            "initializer string is too long for '{}' (got {} characters)",
            ct.cname(),
            units.len()
        )));
    }
    let mut buf = vec![0u8; item_size];
    for (i, unit) in units.iter().enumerate() {
        encode_int(*unit, &mut buf)?;
        // SAFETY: see the module documentation.
        unsafe { memory::write(address + i * item_size, &buf) };
    }
    if length.is_some_and(|n| units.len() < n) {
        buf.fill(0);
        // SAFETY: there is room for the terminator.
        unsafe { memory::write(address + units.len() * item_size, &buf) };
    }
    Ok(())
}

fn write_record(ct: &CType, address: usize, value: &Value, available: Option<usize>) -> Result<()> {
    let layout = ct.record_layout().ok_or_else(|| incomplete(ct))?;
    match value {
        Value::List(items) => {
            let fields: Vec<&Field> = layout
                .fields()
                .iter()
                .filter(|f| !f.flags().contains(FieldFlags::IGNORE_IN_CTOR))
                .collect();
            if items.len() > fields.len() {
                return Err(Error::value_error(format!(
                    "too many initializers for '{}' (got {})",
                    ct.cname(),
                    items.len()
                )));
            }
            for (field, v) in fields.into_iter().zip(items) {
                write_field(field, address, v, available)?;
            }
            Ok(())
        }
        Value::Map(entries) => {
            for (name, v) in entries {
                let field = layout
                    .field(name)
                    .ok_or_else(|| Error::key_error(format!("'{}'", name)))?;
                write_field(field, address, v, available)?;
            }
            Ok(())
        }
        Value::CData(cd) if cd.ctype() == ct => {
            cd.check_access()?;
            // SAFETY: both sides hold a complete value of this type.
            unsafe { memory::copy(address, cd.address(), layout.size()) };
            Ok(())
        }
        _ => Err(convert_error(
            ct,
            "list or tuple or dict or struct-cdata",
            value,
        )),
    }
}

/// Assign one member of the record at `base`.
pub(crate) fn write_field(
    field: &Field,
    base: usize,
    value: &Value,
    available: Option<usize>,
) -> Result<()> {
    if field.is_bitfield() {
        return write_bitfield(field, base, value);
    }
    let remaining = available.map(|a| a.saturating_sub(field.offset()));
    write_value(field.ctype(), base + field.offset(), value, remaining)
}

/// Read one member of the record at `base`.
pub(crate) fn read_field(field: &Field, base: usize, owner: &CData) -> Result<Value> {
    if field.is_bitfield() {
        return read_bitfield(field, base);
    }
    let ct = field.ctype();
    let address = base + field.offset();
    if let (Some(item), None) = (ct.item(), ct.length())
        && ct.is_array()
    {
        let item_size = item.sizeof()?;
        return Ok(Value::CData(match owner.extent() {
            Some(extent) if item_size > 0 => {
                let bytes = extent.saturating_sub(field.offset());
                CData::view(
                    ct.clone(),
                    address,
                    owner,
                    ViewKind::Derived,
                    Some(bytes / item_size),
                    Some(bytes),
                )
            }
            _ => CData::view(
                new_pointer_type(item),
                address,
                owner,
                ViewKind::Derived,
                None,
                None,
            ),
        }));
    }
    read_value(ct, address, owner)
}

fn bitfield_unit(field: &Field, base: usize) -> Result<(usize, u64)> {
    let size = field.ctype().sizeof()?;
    let address = base + field.offset();
    // SAFETY: see the module documentation.
    let bytes = unsafe { memory::read(address, size) };
    Ok((address, decode_int(&bytes, false)? as u64))
}

fn read_bitfield(field: &Field, base: usize) -> Result<Value> {
    let kind = field
        .ctype()
        .integer_kind()
        .ok_or_else(|| {
            Error::type_error(format!("bad bitfield type '{}'", field.ctype().cname()))
        })?;
    let (_, unit) = bitfield_unit(field, base)?;
    let v = extract(
        unit,
        field.bitshift() as u32,
        field.bitsize() as u32,
        kind.is_signed(),
    );
    Ok(match kind.class() {
        PrimitiveClass::Bool => Value::Bool(v != 0),
        _ => Value::Int(v),
    })
}

fn write_bitfield(field: &Field, base: usize, value: &Value) -> Result<()> {
    let ct = field.ctype();
    let kind = ct
        .integer_kind()
        .ok_or_else(|| Error::type_error(format!("bad bitfield type '{}'", ct.cname())))?;
    let v = match value {
        Value::Int(v) => *v,
        Value::Bool(b) => i128::from(*b),
        Value::Object(obj) => obj.as_index().ok_or_else(|| convert_error(ct, "int", value))?,
        Value::CData(cd) if cd.ctype().integer_kind().is_some() => match cd.scalar()? {
            Some(crate::convert::Scalar::Int(v)) => v,
            _ => return Err(convert_error(ct, "int", value)),
        },
        _ => return Err(convert_error(ct, "int", value)),
    };
    let bits = field.bitsize() as u32;
    let (min, max) = bitfield_range(kind.is_signed(), bits);
    if v < min || v > max {
        return Err(Error::overflow(format!(
            "value {} outside the range allowed by the bit field width: {} <= x <= {}",
            v, min, max
        )));
    }
    let (address, unit) = bitfield_unit(field, base)?;
    let updated = insert(unit, field.bitshift() as u32, bits, v);
    let mut buf = vec![0u8; ct.sizeof()?];
    encode_int(updated as i128, &mut buf)?;
    // SAFETY: see the module documentation.
    unsafe { memory::write(address, &buf) };
    Ok(())
}
