//! Conversions between host values and the raw bytes of primitive C types.
//!
//! Every primitive falls into a [`PrimitiveClass`]; the class selects the
//! conversion rules. Two modes exist: [`Conversion::Strict`] is used by
//! initializers and assignments and rejects values that do not fit, while
//! [`Conversion::Cast`] follows C cast semantics and wraps or truncates.

pub mod buffer;
pub mod chars;
pub mod float;

use crate::cdata::CData;
use crate::ctype::{CType, PrimitiveClass, PrimitiveKind};
use crate::error::{Error, Result};
use crate::value::{Complex, Value};

use buffer::{decode_int, encode_int, read_slice, write_slice};
use chars::{single_char, unit_to_char};
use float::{decode_float, decode_long_double, encode_float, encode_long_double};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Initializers and assignments: out-of-range values are errors.
    Strict,
    /// `cast()`: C conversion rules, integers wrap.
    Cast,
}

/// The numeric content of a primitive or pointer cdata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Scalar {
    Int(i128),
    Float(f64),
    Complex(Complex),
    Address(usize),
}

/// `initializer for ctype 'T' must be a EXPECTED, not KIND`, or the
/// same-name-different-type variant when a cdata's type only looks right.
pub(crate) fn convert_error(target: &CType, expected: &str, value: &Value) -> Error {
    if let Value::CData(cd) = value
        && cd.ctype().cname() == target.cname()
        && cd.ctype() != target
    {
        return Error::type_error(format!(
            "initializer for ctype '{}' appears indeed to be '{}', but the types are \
             different (check that you are not e.g. mixing up different ffi instances)",
            target.cname(),
            cd.ctype().cname()
        ));
    }
    Error::type_error(format!(
        "initializer for ctype '{}' must be a {}, not {}",
        target.cname(),
        expected,
        value.type_name()
    ))
}

fn cast_error(target: &CType, value: &Value) -> Error {
    Error::type_error(format!(
        "cannot cast {} to ctype '{}'",
        value.type_name(),
        target.cname()
    ))
}

fn storage_kind(target: &CType) -> Result<PrimitiveKind> {
    target
        .integer_kind()
        .or_else(|| target.primitive())
        .ok_or_else(|| {
            Error::type_error(format!("ctype '{}' is not a primitive", target.cname()))
        })
}

fn cdata_scalar(cd: &CData) -> Result<Option<Scalar>> {
    cd.scalar()
}

fn check_range(target: &CType, kind: PrimitiveKind, v: i128) -> Result<i128> {
    let (min, max) = kind.integer_range();
    if v < min || v > max {
        return Err(Error::overflow(format!(
            "integer {} does not fit '{}'",
            v,
            target.cname()
        )));
    }
    Ok(v)
}

fn enum_lookup(target: &CType, name: &str) -> Result<Option<i128>> {
    match target.relements() {
        Some(map) => map.get(name).copied().map(Some).ok_or_else(|| {
            Error::key_error(format!(
                "'{}' is not an enumerator for {}",
                name,
                target.cname()
            ))
        }),
        None => Ok(None),
    }
}

/// Integer for an initializer; range-checked against `kind`.
fn strict_integer(target: &CType, kind: PrimitiveKind, value: &Value) -> Result<i128> {
    let v = match value {
        Value::Int(v) => *v,
        Value::Bool(b) => i128::from(*b),
        Value::Str(name) if target.is_enum() => match enum_lookup(target, name)? {
            Some(v) => v,
            None => return Err(convert_error(target, "int", value)),
        },
        Value::Object(obj) => obj
            .as_index()
            .ok_or_else(|| convert_error(target, "int", value))?,
        Value::CData(cd) if cd.ctype().integer_kind().is_some() => match cdata_scalar(cd)? {
            Some(Scalar::Int(v)) => v,
            _ => return Err(convert_error(target, "int", value)),
        },
        _ => return Err(convert_error(target, "int", value)),
    };
    check_range(target, kind, v)
}

/// Integer for a cast; the caller truncates to the storage width.
pub(crate) fn cast_integer(target: &CType, value: &Value) -> Result<i128> {
    match value {
        Value::Int(v) => Ok(*v),
        Value::Bool(b) => Ok(i128::from(*b)),
        Value::Float(f) => float::float_to_wrapped_int(*f),
        Value::Bytes(b) if b.len() == 1 => Ok(i128::from(b[0])),
        Value::Str(s) => {
            if target.is_enum()
                && let Some(v) = enum_lookup(target, s)?
            {
                return Ok(v);
            }
            single_char(s)
                .map(|c| i128::from(u32::from(c)))
                .ok_or_else(|| cast_error(target, value))
        }
        Value::Object(obj) => match (obj.as_index(), obj.as_float()) {
            (Some(v), _) => Ok(v),
            (None, Some(f)) => float::float_to_wrapped_int(f),
            _ => Err(cast_error(target, value)),
        },
        Value::CData(cd) => match cdata_scalar(cd)? {
            Some(Scalar::Int(v)) => Ok(v),
            Some(Scalar::Float(f)) => float::float_to_wrapped_int(f),
            Some(Scalar::Address(a)) => Ok(a as i128),
            Some(Scalar::Complex(_)) | None => Err(cast_error(target, value)),
        },
        _ => Err(cast_error(target, value)),
    }
}

fn bool_from_number(target: &CType, v: f64, text: String) -> Result<bool> {
    if v == 0.0 {
        Ok(false)
    } else if v == 1.0 {
        Ok(true)
    } else {
        Err(Error::overflow(format!(
            "value {} does not fit '{}'",
            text,
            target.cname()
        )))
    }
}

fn strict_bool(target: &CType, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Int(v) => match v {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::overflow(format!(
                "integer {} does not fit '{}'",
                v,
                target.cname()
            ))),
        },
        Value::Float(f) => bool_from_number(target, *f, value.repr()),
        Value::Object(obj) => {
            if let Some(v) = obj.as_index() {
                return bool_from_number(target, v as f64, v.to_string());
            }
            if let Some(f) = obj.as_float() {
                return bool_from_number(target, f, float::py_float_repr(f));
            }
            obj.truthy()
                .ok_or_else(|| convert_error(target, "int", value))
        }
        Value::CData(cd) => match cdata_scalar(cd)? {
            Some(Scalar::Int(v)) => bool_from_number(target, v as f64, v.to_string()),
            Some(Scalar::Float(f)) => bool_from_number(target, f, float::py_float_repr(f)),
            _ => Err(convert_error(target, "int", value)),
        },
        _ => Err(convert_error(target, "int", value)),
    }
}

fn cast_truth(target: &CType, value: &Value) -> Result<bool> {
    match value {
        Value::Float(f) => Ok(*f != 0.0),
        Value::Object(obj) if obj.as_index().is_none() => match (obj.as_float(), obj.truthy()) {
            (Some(f), _) => Ok(f != 0.0),
            (None, Some(b)) => Ok(b),
            _ => Err(cast_error(target, value)),
        },
        Value::CData(cd) => match cdata_scalar(cd)? {
            Some(Scalar::Float(f)) => Ok(f != 0.0),
            Some(Scalar::Complex(c)) => Ok(c.re != 0.0 || c.im != 0.0),
            Some(Scalar::Int(v)) => Ok(v != 0),
            Some(Scalar::Address(a)) => Ok(a != 0),
            None => Err(cast_error(target, value)),
        },
        _ => Ok(cast_integer(target, value)? != 0),
    }
}

fn strict_char(target: &CType, value: &Value) -> Result<u8> {
    match value {
        Value::Bytes(b) if b.len() == 1 => Ok(b[0]),
        Value::CData(cd) if cd.ctype().primitive() == Some(PrimitiveKind::Char) => {
            match cdata_scalar(cd)? {
                Some(Scalar::Int(v)) => Ok(v as u8),
                _ => Err(convert_error(target, "bytes of length 1", value)),
            }
        }
        _ => Err(convert_error(target, "bytes of length 1", value)),
    }
}

fn strict_wide(target: &CType, kind: PrimitiveKind, value: &Value) -> Result<i128> {
    let code = match value {
        Value::Str(s) => match single_char(s) {
            Some(c) => u32::from(c),
            None => return Err(convert_error(target, "unicode string of length 1", value)),
        },
        Value::CData(cd)
            if cd
                .ctype()
                .primitive()
                .is_some_and(|k| k.class() == PrimitiveClass::WideChar) =>
        {
            match cdata_scalar(cd)? {
                Some(Scalar::Int(v)) => return Ok(v),
                _ => return Err(convert_error(target, "unicode string of length 1", value)),
            }
        }
        _ => return Err(convert_error(target, "unicode string of length 1", value)),
    };
    if chars::is_utf16(kind) && code > 0xFFFF {
        return Err(Error::type_error(format!(
            "initializer for ctype '{}': character U+{:04X} would need a surrogate pair",
            target.cname(),
            code
        )));
    }
    Ok(i128::from(code))
}

/// A real number from `value`.
pub(crate) fn float_from(target: &CType, value: &Value, mode: Conversion) -> Result<f64> {
    let fail = || match mode {
        Conversion::Strict => convert_error(target, "float", value),
        Conversion::Cast => cast_error(target, value),
    };
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(v) => Ok(*v as f64),
        Value::Bool(b) => Ok(f64::from(u8::from(*b))),
        Value::Object(obj) => obj
            .as_float()
            .or_else(|| obj.as_index().map(|v| v as f64))
            .ok_or_else(fail),
        Value::CData(cd) => match cdata_scalar(cd)? {
            Some(Scalar::Int(v)) => Ok(v as f64),
            Some(Scalar::Float(f)) => Ok(f),
            _ => Err(fail()),
        },
        Value::Bytes(b) if mode == Conversion::Cast && b.len() == 1 => Ok(f64::from(b[0])),
        Value::Str(s) if mode == Conversion::Cast => single_char(s)
            .map(|c| f64::from(u32::from(c)))
            .ok_or_else(fail),
        _ => Err(fail()),
    }
}

fn complex_from(target: &CType, value: &Value, mode: Conversion) -> Result<Complex> {
    match value {
        Value::Complex(c) => Ok(*c),
        Value::Object(obj) if obj.as_complex().is_some() => {
            obj.as_complex().ok_or_else(|| convert_error(target, "complex", value))
        }
        Value::CData(cd) => match cdata_scalar(cd)? {
            Some(Scalar::Complex(c)) => Ok(c),
            Some(Scalar::Int(v)) => Ok(Complex::new(v as f64, 0.0)),
            Some(Scalar::Float(f)) => Ok(Complex::new(f, 0.0)),
            _ => Err(convert_error(target, "complex", value)),
        },
        _ => float_from(target, value, mode)
            .map(|re| Complex::new(re, 0.0))
            .map_err(|_| convert_error(target, "complex", value)),
    }
}

/// Raw bytes of a `long double` cdata, copied without rounding.
fn long_double_bytes(value: &Value) -> Result<Option<Vec<u8>>> {
    match value {
        Value::CData(cd) if cd.ctype().primitive() == Some(PrimitiveKind::LongDouble) => {
            cd.raw_bytes().map(Some)
        }
        _ => Ok(None),
    }
}

/// Write `value` as the primitive or enum `target` into `out`
/// (exactly `sizeof(target)` bytes).
pub(crate) fn encode_primitive(
    target: &CType,
    value: &Value,
    out: &mut [u8],
    mode: Conversion,
) -> Result<()> {
    let kind = storage_kind(target)?;
    match kind.class() {
        PrimitiveClass::Signed | PrimitiveClass::Unsigned => {
            let v = match mode {
                Conversion::Strict => strict_integer(target, kind, value)?,
                Conversion::Cast => cast_integer(target, value)?,
            };
            encode_int(v, out)
        }
        PrimitiveClass::Char => {
            let byte = match mode {
                Conversion::Strict => strict_char(target, value)?,
                Conversion::Cast => cast_integer(target, value)? as u8,
            };
            write_slice(out, 0, &[byte])
        }
        PrimitiveClass::WideChar => {
            let v = match mode {
                Conversion::Strict => strict_wide(target, kind, value)?,
                Conversion::Cast => cast_integer(target, value)?,
            };
            encode_int(v, out)
        }
        PrimitiveClass::Bool => {
            let b = match mode {
                Conversion::Strict => strict_bool(target, value)?,
                Conversion::Cast => cast_truth(target, value)?,
            };
            write_slice(out, 0, &[u8::from(b)])
        }
        PrimitiveClass::Float => encode_float(float_from(target, value, mode)?, out),
        PrimitiveClass::LongDouble => match long_double_bytes(value)? {
            Some(raw) => write_slice(out, 0, read_slice(&raw, 0, out.len())?),
            None => encode_long_double(float_from(target, value, mode)?, out),
        },
        PrimitiveClass::Complex => {
            let c = complex_from(target, value, mode)?;
            let (re, im) = out.split_at_mut(kind.size() / 2);
            encode_float(c.re, re)?;
            encode_float(c.im, im)
        }
    }
}

/// Read a primitive or enum value from its raw bytes.
pub(crate) fn decode_primitive(target: &CType, bytes: &[u8]) -> Result<Value> {
    let kind = storage_kind(target)?;
    let bytes = read_slice(bytes, 0, kind.size())?;
    Ok(match kind.class() {
        PrimitiveClass::Signed | PrimitiveClass::Unsigned => {
            Value::Int(decode_int(bytes, kind.is_signed())?)
        }
        PrimitiveClass::Bool => match decode_int(bytes, false)? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            n => {
                return Err(Error::value_error(format!(
                    "got a _Bool of value {}, expected 0 or 1",
                    n
                )));
            }
        },
        PrimitiveClass::Char => Value::Bytes(bytes.to_vec()),
        PrimitiveClass::WideChar => {
            let unit = decode_int(bytes, kind.is_signed())?;
            Value::Str(unit_to_char(kind, unit)?.to_string())
        }
        PrimitiveClass::Float => Value::Float(decode_float(bytes)?),
        PrimitiveClass::LongDouble => Value::CData(CData::long_double(target, bytes)?),
        PrimitiveClass::Complex => {
            let (re, im) = bytes.split_at(kind.size() / 2);
            Value::Complex(Complex::new(decode_float(re)?, decode_float(im)?))
        }
    })
}

/// The numeric content of a primitive's raw bytes, without validation.
pub(crate) fn decode_scalar(target: &CType, bytes: &[u8]) -> Result<Scalar> {
    let kind = storage_kind(target)?;
    let bytes = read_slice(bytes, 0, kind.size())?;
    Ok(match kind.class() {
        PrimitiveClass::Float => Scalar::Float(decode_float(bytes)?),
        PrimitiveClass::LongDouble => Scalar::Float(decode_long_double(bytes)?),
        PrimitiveClass::Complex => {
            let (re, im) = bytes.split_at(kind.size() / 2);
            Scalar::Complex(Complex::new(decode_float(re)?, decode_float(im)?))
        }
        _ => Scalar::Int(decode_int(bytes, kind.is_signed())?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctype::registry::{new_enum_type, new_primitive_type};

    fn encode(name: &str, value: Value, mode: Conversion) -> Result<Vec<u8>> {
        let ct = new_primitive_type(name)?;
        let mut out = vec![0u8; ct.sizeof()?];
        encode_primitive(&ct, &value, &mut out, mode)?;
        Ok(out)
    }

    fn round_trip(name: &str, value: Value, mode: Conversion) -> Result<Value> {
        let ct = new_primitive_type(name)?;
        decode_primitive(&ct, &encode(name, value, mode)?)
    }

    #[test]
    fn test_strict_integer_bounds() -> Result<()> {
        assert_eq!(
            round_trip("signed char", Value::Int(127), Conversion::Strict)?,
            Value::Int(127)
        );
        let err = encode("signed char", Value::Int(128), Conversion::Strict).err();
        assert_eq!(
            err.map(|e| e.to_string()),
            Some("integer 128 does not fit 'signed char'".to_string())
        );
        let negative = encode("unsigned int", Value::Int(-1), Conversion::Strict);
        assert!(negative.is_err_and(|e| e.is_overflow()));
        Ok(())
    }

    #[test]
    fn test_cast_wraps() -> Result<()> {
        assert_eq!(
            round_trip("signed char", Value::Int(128), Conversion::Cast)?,
            Value::Int(-128)
        );
        assert_eq!(
            round_trip("unsigned short", Value::Int(-1), Conversion::Cast)?,
            Value::Int(65535)
        );
        assert_eq!(round_trip("int", Value::Float(-3.9), Conversion::Cast)?, Value::Int(-3));
        assert_eq!(
            round_trip("char", Value::Int(300), Conversion::Cast)?,
            Value::Bytes(vec![44])
        );
        Ok(())
    }

    #[test]
    fn test_float_rejected_for_int_initializer() {
        let err = encode("int", Value::Float(1.5), Conversion::Strict).err();
        assert_eq!(
            err.map(|e| e.to_string()),
            Some("initializer for ctype 'int' must be a int, not float".to_string())
        );
    }

    #[test]
    fn test_bool_rules() -> Result<()> {
        assert_eq!(
            round_trip("_Bool", Value::Float(1.0), Conversion::Strict)?,
            Value::Bool(true)
        );
        assert!(encode("_Bool", Value::Int(2), Conversion::Strict).is_err_and(|e| e.is_overflow()));
        let bytes = encode("_Bool", Value::Bytes(b"ab".to_vec()), Conversion::Strict);
        assert!(bytes.is_err_and(|e| e.is_type_error()));
        assert_eq!(round_trip("_Bool", Value::Int(42), Conversion::Cast)?, Value::Bool(true));
        let ct = new_primitive_type("_Bool")?;
        assert!(decode_primitive(&ct, &[2]).is_err_and(|e| e.is_value_error()));
        Ok(())
    }

    #[test]
    fn test_chars() -> Result<()> {
        assert_eq!(
            round_trip("char", Value::Bytes(b"A".to_vec()), Conversion::Strict)?,
            Value::Bytes(b"A".to_vec())
        );
        let int = encode("char", Value::Int(65), Conversion::Strict);
        assert!(int.is_err_and(|e| e.is_type_error()));
        assert_eq!(
            round_trip("char32_t", Value::from("\u{1F600}"), Conversion::Strict)?,
            Value::from("\u{1F600}")
        );
        let astral = encode("char16_t", Value::from("\u{1F600}"), Conversion::Strict);
        assert!(astral.is_err_and(|e| e.is_type_error()));
        Ok(())
    }

    #[test]
    fn test_float_narrowing() -> Result<()> {
        let back = round_trip("float", Value::Float(0.1), Conversion::Strict)?;
        assert_eq!(back, Value::Float(f64::from(0.1f32)));
        let text = encode("double", Value::from("x"), Conversion::Strict);
        assert!(text.is_err_and(|e| e.is_type_error()));
        Ok(())
    }

    #[test]
    fn test_complex() -> Result<()> {
        let value = Value::Complex(Complex::new(1.0, 2.0));
        let back = round_trip("double _Complex", value, Conversion::Strict)?;
        assert_eq!(back, Value::Complex(Complex::new(1.0, 2.0)));
        let back = round_trip("float _Complex", Value::Int(3), Conversion::Strict)?;
        assert_eq!(back, Value::Complex(Complex::new(3.0, 0.0)));
        Ok(())
    }

    #[test]
    fn test_enum_names() -> Result<()> {
        let int = new_primitive_type("int")?;
        let e = new_enum_type("enum foo", &["AA", "BB"], &[0, 5], &int)?;
        let mut out = [0u8; 4];
        encode_primitive(&e, &Value::from("BB"), &mut out, Conversion::Strict)?;
        assert_eq!(decode_primitive(&e, &out)?, Value::Int(5));
        let err = encode_primitive(&e, &Value::from("CC"), &mut out, Conversion::Strict);
        assert!(err.is_err_and(|e| e.is_key_error()));
        Ok(())
    }
}
