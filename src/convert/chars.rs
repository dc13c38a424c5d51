//! Text units: `char`, `wchar_t`, `char16_t` and `char32_t`.

use crate::ctype::PrimitiveKind;
use crate::error::{Error, Result};

/// Whether a wide char type stores UTF-16 code units.
pub fn is_utf16(kind: PrimitiveKind) -> bool {
    kind.size() == 2
}

/// Encode text for storage in an array of `kind`; code points outside
/// the BMP become surrogate pairs in 2-byte storage.
pub fn encode_wide(kind: PrimitiveKind, text: &str) -> Vec<u32> {
    if is_utf16(kind) {
        text.encode_utf16().map(u32::from).collect()
    } else {
        text.chars().map(u32::from).collect()
    }
}

/// Decode units read from storage of `kind`. Surrogate pairs combine; a
/// lone surrogate is a ValueError.
pub fn decode_wide(kind: PrimitiveKind, units: &[i128]) -> Result<String> {
    let mut out = String::with_capacity(units.len());
    let mut i = 0;
    while i < units.len() {
        let unit = units[i];
        if (0xD800..0xDC00).contains(&unit)
            && let Some(low) = units.get(i + 1).copied()
            && (0xDC00..0xE000).contains(&low)
        {
            let code = 0x10000 + (((unit - 0xD800) << 10) | (low - 0xDC00));
            out.push(unit_to_char(kind, code)?);
            i += 2;
            continue;
        }
        out.push(unit_to_char(kind, unit)?);
        i += 1;
    }
    Ok(out)
}

/// The character a single stored unit denotes.
pub fn unit_to_char(kind: PrimitiveKind, unit: i128) -> Result<char> {
    u32::try_from(unit)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| {
            let text = if unit < 0 {
                format!("-0x{:x}", -unit)
            } else {
                format!("0x{:x}", unit)
            };
            Error::value_error(format!(
                "{} out of range for conversion to unicode: {}",
                kind.name(),
                text
            ))
        })
}

/// Code point of a one-character string.
pub fn single_char(text: &str) -> Option<char> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}
