//! Floating-point storage formats and textual forms.

use crate::ctype::{LONG_DOUBLE_FORMAT, LongDoubleFormat};
use crate::error::{Error, Result};

use super::buffer::{read_slice, write_slice};

/// `v * 2^exp` without intermediate overflow or underflow.
fn ldexp(mut v: f64, mut exp: i32) -> f64 {
    let step = 2f64.powi(1000);
    let inv_step = 2f64.powi(-1000);
    while exp > 1000 {
        v *= step;
        exp -= 1000;
    }
    while exp < -1000 {
        v *= inv_step;
        exp += 1000;
    }
    v * 2f64.powi(exp)
}

fn x87_from_f64(x: f64) -> [u8; 10] {
    let bits = x.to_bits();
    let sign = ((bits >> 63) as u16) << 15;
    let exp = ((bits >> 52) & 0x7ff) as i32;
    let frac = bits & ((1u64 << 52) - 1);
    let (e, mantissa): (u16, u64) = if exp == 0 && frac == 0 {
        (0, 0)
    } else if exp == 0x7ff {
        (0x7fff, (1u64 << 63) | (frac << 11))
    } else if exp == 0 {
        let lz = frac.leading_zeros() as i32;
        ((15372 - lz) as u16, frac << lz)
    } else {
        ((exp - 1023 + 16383) as u16, (1u64 << 63) | (frac << 11))
    };
    let mut out = [0u8; 10];
    out[..8].copy_from_slice(&mantissa.to_le_bytes());
    out[8..].copy_from_slice(&(sign | e).to_le_bytes());
    out
}

fn x87_to_f64(bytes: &[u8]) -> Result<f64> {
    let mut m = [0u8; 8];
    m.copy_from_slice(read_slice(bytes, 0, 8)?);
    let mantissa = u64::from_le_bytes(m);
    let mut se = [0u8; 2];
    se.copy_from_slice(read_slice(bytes, 8, 2)?);
    let se = u16::from_le_bytes(se);
    let negative = se & 0x8000 != 0;
    let e = i32::from(se & 0x7fff);
    let magnitude = if e == 0x7fff {
        if mantissa << 1 == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else if mantissa == 0 {
        0.0
    } else {
        ldexp(mantissa as f64, e - 16383 - 63)
    };
    Ok(if negative { -magnitude } else { magnitude })
}

fn binary128_from_f64(x: f64) -> [u8; 16] {
    let bits = x.to_bits();
    let sign = u128::from(bits >> 63) << 127;
    let exp = ((bits >> 52) & 0x7ff) as i64;
    let frac = bits & ((1u64 << 52) - 1);
    let (e, frac128): (u128, u128) = if exp == 0 && frac == 0 {
        (0, 0)
    } else if exp == 0x7ff {
        (0x7fff, u128::from(frac) << 60)
    } else if exp == 0 {
        let p = 63 - i64::from(frac.leading_zeros());
        let rest = u128::from(frac ^ (1u64 << p));
        ((p - 1074 + 16383) as u128, rest << (112 - p))
    } else {
        ((exp - 1023 + 16383) as u128, u128::from(frac) << 60)
    };
    (sign | (e << 112) | frac128).to_le_bytes()
}

fn binary128_to_f64(bytes: &[u8]) -> Result<f64> {
    let mut raw = [0u8; 16];
    raw.copy_from_slice(read_slice(bytes, 0, 16)?);
    let bits = u128::from_le_bytes(raw);
    let negative = bits >> 127 != 0;
    let e = ((bits >> 112) & 0x7fff) as i32;
    let frac = bits & ((1u128 << 112) - 1);
    let magnitude = if e == 0x7fff {
        if frac == 0 { f64::INFINITY } else { f64::NAN }
    } else if e == 0 {
        // Subnormal binary128 values are far below the f64 range.
        0.0
    } else {
        let m = (1u128 << 112) | frac;
        let half = 1u128 << 59;
        let rem = m & ((1u128 << 60) - 1);
        let mut top = (m >> 60) as u64;
        if rem > half || (rem == half && top & 1 == 1) {
            top += 1;
        }
        ldexp(top as f64, e - 16383 - 52)
    };
    Ok(if negative { -magnitude } else { magnitude })
}

/// Store `x` in the host `long double` format.
pub fn encode_long_double(x: f64, out: &mut [u8]) -> Result<()> {
    out.fill(0);
    match LONG_DOUBLE_FORMAT {
        LongDoubleFormat::Double => write_slice(out, 0, &x.to_ne_bytes()),
        LongDoubleFormat::X87Extended => write_slice(out, 0, &x87_from_f64(x)),
        LongDoubleFormat::Binary128 => write_slice(out, 0, &binary128_from_f64(x)),
    }
}

/// Read a host `long double`, rounded to `f64`.
pub fn decode_long_double(bytes: &[u8]) -> Result<f64> {
    match LONG_DOUBLE_FORMAT {
        LongDoubleFormat::Double => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(read_slice(bytes, 0, 8)?);
            Ok(f64::from_ne_bytes(raw))
        }
        LongDoubleFormat::X87Extended => x87_to_f64(bytes),
        LongDoubleFormat::Binary128 => binary128_to_f64(bytes),
    }
}

/// Read a `float` or `double` of `bytes.len()` bytes.
pub fn decode_float(bytes: &[u8]) -> Result<f64> {
    match bytes.len() {
        4 => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(bytes);
            Ok(f64::from(f32::from_ne_bytes(raw)))
        }
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Ok(f64::from_ne_bytes(raw))
        }
        n => Err(Error::runtime(format!("unsupported float size {}", n))),
    }
}

/// Store a `float` (narrowing) or `double`.
pub fn encode_float(x: f64, out: &mut [u8]) -> Result<()> {
    match out.len() {
        4 => write_slice(out, 0, &(x as f32).to_ne_bytes()),
        8 => write_slice(out, 0, &x.to_ne_bytes()),
        n => Err(Error::runtime(format!("unsupported float size {}", n))),
    }
}

/// Shortest round-tripping text in the host-language style:
/// `1.0`, `0.1`, `1e+20`, `1.5e-07`, `inf`, `nan`.
pub fn py_float_repr(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let sci = format!("{:e}", x.abs());
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let sign = if x < 0.0 { "-" } else { "" };

    if (-4..16).contains(&exp) {
        if exp >= 0 {
            let int_len = exp as usize + 1;
            let (int_part, frac_part) = if digits.len() > int_len {
                (digits[..int_len].to_string(), digits[int_len..].to_string())
            } else {
                (
                    format!("{}{}", digits, "0".repeat(int_len - digits.len())),
                    "0".to_string(),
                )
            };
            format!("{}{}.{}", sign, int_part, frac_part)
        } else {
            format!("{}0.{}{}", sign, "0".repeat((-exp - 1) as usize), digits)
        }
    } else {
        let mut out = String::from(sign);
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let exp_sign = if exp < 0 { '-' } else { '+' };
        out.push_str(&format!("e{}{:02}", exp_sign, exp.abs()));
        out
    }
}

/// C `%LE` formatting: `1.230000E+00`.
pub fn c_exp_repr(x: f64) -> String {
    if x.is_nan() {
        return "NAN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    let text = format!("{:.6E}", x);
    match text.split_once('E') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let exp_sign = if exp < 0 { '-' } else { '+' };
            format!("{}E{}{:02}", mantissa, exp_sign, exp.abs())
        }
        None => text,
    }
}

/// Truncate toward zero and reduce modulo 2^64, as a C cast from a huge
/// `double` to an integer does on the supported targets.
pub fn float_to_wrapped_int(x: f64) -> Result<i128> {
    if x.is_nan() {
        return Err(Error::value_error("cannot convert float NaN to integer"));
    }
    if x.is_infinite() {
        return Err(Error::overflow("cannot convert float infinity to integer"));
    }
    let t = x.trunc();
    if t.abs() < 2f64.powi(127) {
        Ok(t as i128)
    } else {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_py_float_repr() {
        assert_eq!(py_float_repr(1.0), "1.0");
        assert_eq!(py_float_repr(0.1), "0.1");
        assert_eq!(py_float_repr(-2.5), "-2.5");
        assert_eq!(py_float_repr(1e20), "1e+20");
        assert_eq!(py_float_repr(1e16), "1e+16");
        assert_eq!(py_float_repr(1e15), "1000000000000000.0");
        assert_eq!(py_float_repr(1.5e-7), "1.5e-07");
        assert_eq!(py_float_repr(0.0001), "0.0001");
        assert_eq!(py_float_repr(f64::from(0.1f32)), "0.10000000149011612");
    }

    #[test]
    fn test_c_exp_repr() {
        assert_eq!(c_exp_repr(1.23), "1.230000E+00");
        assert_eq!(c_exp_repr(-4.5e-10), "-4.500000E-10");
    }

    #[test]
    fn test_long_double_round_trip() -> Result<()> {
        let size = crate::ctype::PrimitiveKind::LongDouble.size();
        for x in [0.0, -0.0, 1.5, -1e300, 5e-324, f64::INFINITY, 123456.789] {
            let mut buf = vec![0u8; size];
            encode_long_double(x, &mut buf)?;
            let back = decode_long_double(&buf)?;
            assert_eq!(back.to_bits(), x.to_bits(), "{}", x);
        }
        Ok(())
    }

    #[test]
    fn test_wrapped_truncation() -> Result<()> {
        assert_eq!(float_to_wrapped_int(-3.9)?, -3);
        assert_eq!(float_to_wrapped_int(1e40)?, 0);
        assert!(float_to_wrapped_int(f64::INFINITY).is_err_and(|e| e.is_overflow()));
        assert!(float_to_wrapped_int(f64::NAN).is_err_and(|e| e.is_value_error()));
        Ok(())
    }
}
