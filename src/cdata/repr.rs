//! Human-readable forms: `<cdata 'TYPE' DETAIL>` and host-style literals.

use crate::convert::float::{c_exp_repr, decode_long_double, py_float_repr};
use crate::ctype::{CType, PrimitiveKind};
use crate::value::{Complex, Value};

use super::{CData, Storage, ViewKind};

fn quote_for(has_single: bool, has_double: bool) -> char {
    if has_single && !has_double { '"' } else { '\'' }
}

/// `b'...'`
pub fn bytes_repr(bytes: &[u8]) -> String {
    let quote = quote_for(bytes.contains(&b'\''), bytes.contains(&b'"'));
    let mut out = format!("b{}", quote);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            _ if b == quote as u8 => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push(quote);
    out
}

/// `'...'`
pub fn str_repr(text: &str) -> String {
    let quote = quote_for(text.contains('\''), text.contains('"'));
    let mut out = String::from(quote);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ if c == quote => {
                out.push('\\');
                out.push(c);
            }
            _ if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32))
            }
            _ => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn imag_text(x: f64) -> String {
    let text = py_float_repr(x);
    match text.strip_suffix(".0") {
        Some(short) => short.to_string(),
        None => text,
    }
}

/// `(1+2j)`, `2j`, `(1-0.5j)`.
pub fn complex_repr(c: Complex) -> String {
    if c.re == 0.0 && c.re.is_sign_positive() {
        return format!("{}j", imag_text(c.im));
    }
    let sign = if c.im >= 0.0 || c.im.is_nan() { "+" } else { "" };
    format!("({}{}{}j)", imag_text(c.re), sign, imag_text(c.im))
}

fn address_text(address: usize) -> String {
    if address == 0 {
        "NULL".to_string()
    } else {
        format!("0x{:x}", address)
    }
}

fn primitive_text(cd: &CData, ct: &CType) -> String {
    let Ok(bytes) = cd.raw_bytes() else {
        return "?".to_string();
    };
    if ct.primitive() == Some(PrimitiveKind::LongDouble) {
        return decode_long_double(&bytes)
            .map(c_exp_repr)
            .unwrap_or_else(|_| "?".to_string());
    }
    let value = match cd.value() {
        Ok(v) => v,
        Err(_) => {
            return crate::convert::decode_scalar(ct, &bytes)
                .map(|s| format!("{:?}", s))
                .unwrap_or_else(|_| "?".to_string());
        }
    };
    if let (Some(elements), Value::Int(v)) = (ct.elements(), &value)
        && let Some(name) = elements.get(v)
    {
        return format!("{}: {}", v, name);
    }
    value.repr()
}

/// `<cdata 'TYPE' DETAIL>`.
pub(crate) fn cdata_repr(cd: &CData) -> String {
    let ct = cd.ctype();
    let name = ct.cname();
    if cd.is_released() {
        let detail = match cd.storage() {
            Storage::Buffer(_) => "buffer RELEASED",
            _ => "RELEASED",
        };
        return format!("<cdata '{}' {}>", name, detail);
    }
    match cd.storage() {
        Storage::Owned(block) => format!("<cdata '{}' owning {} bytes>", name, block.size()),
        Storage::View {
            parent,
            kind: ViewKind::Member,
        } => format!(
            "<cdata '{} &' owning {} bytes>",
            name,
            parent.extent().unwrap_or(0)
        ),
        Storage::View {
            kind: ViewKind::Slice,
            ..
        } => format!(
            "<cdata '{}' sliced length {}>",
            name,
            cd.explicit_length().unwrap_or(0)
        ),
        Storage::Buffer(export) => format!(
            "<cdata '{}' buffer len {} from '{}' object>",
            name,
            export.len(),
            export.source_type()
        ),
        Storage::Handle(entry) => format!("<cdata '{}' handle to {}>", name, entry.held().repr()),
        Storage::Callback(state) => format!(
            "<cdata '{}' calling <function {}>>",
            name,
            state.function_name()
        ),
        _ if ct.is_struct_or_union() => {
            format!("<cdata '{} &' {}>", name, address_text(cd.address()))
        }
        _ if ct.primitive().is_some() || ct.is_enum() => {
            format!("<cdata '{}' {}>", name, primitive_text(cd, ct))
        }
        _ => format!("<cdata '{}' {}>", name, address_text(cd.address())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_repr() {
        assert_eq!(bytes_repr(b"abc"), "b'abc'");
        assert_eq!(bytes_repr(b"a\x00\xff"), "b'a\\x00\\xff'");
        assert_eq!(bytes_repr(b"it's"), "b\"it's\"");
    }

    #[test]
    fn test_str_repr() {
        assert_eq!(str_repr("x"), "'x'");
        assert_eq!(str_repr("a\nb"), "'a\\nb'");
        assert_eq!(str_repr("\u{e9}"), "'\u{e9}'");
    }

    #[test]
    fn test_complex_repr() {
        assert_eq!(complex_repr(Complex::new(1.0, 2.0)), "(1+2j)");
        assert_eq!(complex_repr(Complex::new(0.0, 2.0)), "2j");
        assert_eq!(complex_repr(Complex::new(1.5, -0.5)), "(1.5-0.5j)");
    }
}
