//! Bulk reads out of C memory: `string`, `unpack` and `memmove`.

use crate::convert::buffer::decode_int;
use crate::convert::chars::decode_wide;
use crate::ctype::{CType, PrimitiveClass, PrimitiveKind};
use crate::error::{Error, Result};
use crate::value::Value;

use super::access::read_value;
use super::{CData, memory};

fn text_kind(ct: &CType) -> Option<PrimitiveKind> {
    ct.text_item()
        .filter(|k| *k == PrimitiveKind::Char || k.class() == PrimitiveClass::WideChar)
}

/// Read `item`-sized units at `address` until a zero unit or `limit`.
fn scan_units(
    address: usize,
    item_size: usize,
    signed: bool,
    limit: Option<usize>,
) -> Result<Vec<i128>> {
    let mut units = Vec::new();
    loop {
        if limit.is_some_and(|n| units.len() >= n) {
            break;
        }
        // SAFETY: the caller checked access; scanning stops at the
        // terminator or the known extent.
        let bytes = unsafe { memory::read(address + units.len() * item_size, item_size) };
        let unit = decode_int(&bytes, signed)?;
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    Ok(units)
}

/// `string(cdata, maxlen)`: text behind a `char` or wide char pointer or
/// array up to the terminator, a char value, an enum's name, or an
/// integer in decimal.
pub fn string(cdata: &CData, maxlen: Option<usize>) -> Result<Value> {
    let ct = cdata.ctype();
    if let Some(kind) = text_kind(ct) {
        if cdata.address() == 0 {
            return Err(Error::runtime(format!(
                "cannot use string() on {}",
                cdata
            )));
        }
        cdata.check_access()?;
        let limit = if ct.is_array() {
            let n = cdata.len()?;
            Some(maxlen.map_or(n, |m| m.min(n)))
        } else {
            maxlen
        };
        let units = scan_units(cdata.address(), kind.size(), kind.is_signed(), limit)?;
        return if kind == PrimitiveKind::Char {
            Ok(Value::Bytes(units.into_iter().map(|u| u as u8).collect()))
        } else {
            decode_wide(kind, &units).map(Value::Str)
        };
    }
    if ct.is_enum() || ct.integer_kind().is_some() {
        let value = cdata.value()?;
        if let (Some(elements), Value::Int(v)) = (ct.elements(), &value) {
            return Ok(Value::Str(
                elements.get(v).cloned().unwrap_or_else(|| v.to_string()),
            ));
        }
        return Ok(match value {
            Value::Int(v) => Value::Str(v.to_string()),
            Value::Bool(b) => Value::Str(u8::from(b).to_string()),
            other => other,
        });
    }
    Err(Error::type_error(format!(
        "string(): unexpected cdata '{}' argument",
        ct.cname()
    )))
}

/// `unpack(cdata, length)`: `length` items behind a pointer or array, as
/// bytes for `char`, text for wide chars and a list otherwise.
pub fn unpack(cdata: &CData, length: usize) -> Result<Value> {
    let ct = cdata.ctype();
    let item = match ct.item() {
        Some(item) if !item.is_void() => item,
        _ => {
            return Err(Error::type_error(format!(
                "expected a pointer or array, got cdata '{}'",
                ct.cname()
            )));
        }
    };
    if ct.is_pointer() && cdata.address() == 0 {
        return Err(Error::runtime(format!(
            "cannot use unpack() on {}",
            cdata
        )));
    }
    cdata.check_access()?;
    let item_size = item.sizeof()?;
    match item.primitive() {
        Some(PrimitiveKind::Char) => {
            // SAFETY: access checked above; the caller vouches for `length`.
            Ok(Value::Bytes(unsafe { memory::read(cdata.address(), length) }))
        }
        Some(kind) if kind.class() == PrimitiveClass::WideChar => {
            // SAFETY: access checked above; the caller vouches for `length`.
            let bytes = unsafe { memory::read(cdata.address(), length * item_size) };
            let units = bytes
                .chunks(item_size)
                .map(|chunk| decode_int(chunk, kind.is_signed()))
                .collect::<Result<Vec<_>>>()?;
            decode_wide(kind, &units).map(Value::Str)
        }
        _ => (0..length)
            .map(|i| read_value(item, cdata.address() + i * item_size, cdata))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
    }
}

fn writable_address(cdata: &CData, what: &str) -> Result<usize> {
    let ct = cdata.ctype();
    if !(ct.is_pointer() || ct.is_array()) {
        return Err(Error::type_error(format!(
            "{} must be a pointer or array cdata, not cdata '{}'",
            what,
            ct.cname()
        )));
    }
    cdata.check_access()?;
    Ok(cdata.address())
}

/// `memmove(dest, src, n)`; `src` is a pointer or array cdata or bytes.
pub fn memmove(dest: &CData, src: &Value, n: usize) -> Result<()> {
    let dest_address = writable_address(dest, "dest")?;
    match src {
        Value::CData(cd) => {
            let src_address = writable_address(cd, "src")?;
            // SAFETY: both sides were checked; the caller vouches for `n`.
            unsafe { memory::copy(dest_address, src_address, n) };
            Ok(())
        }
        Value::Bytes(bytes) => {
            let data = bytes.get(..n).ok_or_else(|| {
                Error::value_error(format!(
                    "source buffer is only {} bytes long, cannot copy {}",
                    bytes.len(),
                    n
                ))
            })?;
            // SAFETY: dest was checked; the caller vouches for `n`.
            unsafe { memory::write(dest_address, data) };
            Ok(())
        }
        other => Err(Error::type_error(format!(
            "src must be a cdata or bytes, not {}",
            other.type_name()
        ))),
    }
}
