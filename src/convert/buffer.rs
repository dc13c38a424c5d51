//! Byte-level helpers shared by the layout and conversion code.

use crate::error::{Error, Result};

/// Align a value up to the nearest multiple of alignment (a power of two).
#[inline]
pub fn align_to(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

fn out_of_range(needed: usize, available: usize) -> Error {
    Error::runtime(format!(
        "access of {} bytes outside a region of {} bytes",
        needed, available
    ))
}

/// Bounds-checked slice read.
#[inline]
pub fn read_slice(buffer: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    let end = start.checked_add(len).ok_or_else(|| out_of_range(usize::MAX, buffer.len()))?;
    buffer
        .get(start..end)
        .ok_or_else(|| out_of_range(end, buffer.len()))
}

/// Bounds-checked slice write.
#[inline]
pub fn write_slice(buffer: &mut [u8], start: usize, data: &[u8]) -> Result<()> {
    let end = start + data.len();
    let len = buffer.len();
    buffer
        .get_mut(start..end)
        .ok_or_else(|| out_of_range(end, len))?
        .copy_from_slice(data);
    Ok(())
}

/// Read a native-endian integer of `bytes.len()` bytes (at most 8).
pub fn decode_int(bytes: &[u8], signed: bool) -> Result<i128> {
    let size = bytes.len();
    let mut raw = [0u8; 8];
    if size > raw.len() {
        return Err(out_of_range(size, raw.len()));
    }
    let unsigned = if cfg!(target_endian = "little") {
        write_slice(&mut raw, 0, bytes)?;
        u64::from_le_bytes(raw)
    } else {
        write_slice(&mut raw, 8 - size, bytes)?;
        u64::from_be_bytes(raw)
    };
    let bits = 8 * size as u32;
    if signed && bits > 0 && bits < 128 && unsigned & (1u64 << (bits - 1)) != 0 {
        Ok(unsigned as i128 - (1i128 << bits))
    } else {
        Ok(unsigned as i128)
    }
}

/// Write the low `out.len()` bytes of `value` in native byte order.
pub fn encode_int(value: i128, out: &mut [u8]) -> Result<()> {
    let size = out.len();
    if size > 8 {
        return Err(out_of_range(size, 8));
    }
    let raw = value as u64;
    if cfg!(target_endian = "little") {
        write_slice(out, 0, read_slice(&raw.to_le_bytes(), 0, size)?)
    } else {
        write_slice(out, 0, read_slice(&raw.to_be_bytes(), 8 - size, size)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(0, 4), 0);
        assert_eq!(align_to(5, 4), 8);
        assert_eq!(align_to(8, 8), 8);
    }

    #[test]
    fn test_int_codec() -> Result<()> {
        let mut out = [0u8; 2];
        encode_int(-2, &mut out)?;
        assert_eq!(decode_int(&out, true)?, -2);
        assert_eq!(decode_int(&out, false)?, 0xfffe);
        Ok(())
    }

    #[test]
    fn test_out_of_bounds() {
        let buf = [0u8; 4];
        assert!(read_slice(&buf, 2, 4).is_err_and(|e| e.is_runtime()));
    }
}
