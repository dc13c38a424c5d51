//! Bitfield placement and bit-level access.
//!
//! Placement follows the two compiler families: GCC packs a bitfield into
//! the current aligned unit whenever it fits, MSVC only shares a unit between
//! consecutive bitfields whose declared types have the same size.

use crate::error::{Error, Result};
use crate::convert::buffer::align_to;

use super::StructFlags;

/// Running position of a record layout, in bits.
#[derive(Debug, Default)]
pub(crate) struct BitCursor {
    pub(crate) boffset: usize,
    prev_bitfield_size: usize,
    prev_bitfield_free: usize,
}

/// Where a named bitfield landed: the start of its storage unit and the shift
/// of its lowest bit inside that unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    pub(crate) offset: usize,
    pub(crate) bitshift: i32,
}

impl BitCursor {
    /// A regular field ends any run of bitfields.
    pub(crate) fn end_run(&mut self) {
        self.prev_bitfield_size = 0;
    }

    /// `T :0;` pads to the next unit boundary on GCC and is a pure run
    /// separator on MSVC.
    pub(crate) fn zero_width(&mut self, falign: usize, flags: StructFlags) {
        if !flags.contains(StructFlags::MSVC_BITFIELDS) {
            let mut unit_start = (self.boffset / 8) & !(falign - 1);
            if self.boffset > unit_start * 8 {
                unit_start += falign;
            }
            self.boffset = unit_start * 8;
        }
        self.prev_bitfield_size = 0;
    }

    /// Place a bitfield of `bits` bits whose declared type is `size` bytes
    /// with effective alignment `falign`.
    pub(crate) fn place(
        &mut self,
        size: usize,
        falign: usize,
        bits: usize,
        flags: StructFlags,
        qualified_name: &str,
    ) -> Result<Placement> {
        let mut unit_start = (self.boffset / 8) & !(falign - 1);
        let mut bitshift;

        if !flags.contains(StructFlags::MSVC_BITFIELDS) {
            let occupied = self.boffset - unit_start * 8;
            if occupied + bits > 8 * size {
                if flags.contains(StructFlags::PACKED) && occupied % 8 != 0 {
                    return Err(Error::not_implemented(format!(
                        "with 'packed', gcc would compile field '{}' to reuse some bits in the previous field",
                        qualified_name
                    )));
                }
                unit_start += falign;
                self.boffset = unit_start * 8;
                bitshift = 0;
            } else {
                bitshift = occupied;
            }
            self.boffset += bits;
        } else {
            if self.prev_bitfield_size == size && self.prev_bitfield_free >= bits {
                bitshift = 8 * size - self.prev_bitfield_free;
            } else {
                self.boffset = align_to(self.boffset, falign * 8);
                self.boffset += size * 8;
                bitshift = 0;
                self.prev_bitfield_size = size;
                self.prev_bitfield_free = 8 * size;
            }
            self.prev_bitfield_free -= bits;
            unit_start = self.boffset / 8 - size;
        }

        if flags.contains(StructFlags::GCC_BIG_ENDIAN) {
            bitshift = 8 * size - bits - bitshift;
        }

        Ok(Placement {
            offset: unit_start,
            bitshift: bitshift as i32,
        })
    }
}

/// Inclusive range a bitfield of `bits` bits accepts on assignment.
///
/// A signed one-bit field also accepts `1`, so that `int flag:1` can be set
/// from a boolean.
pub fn bitfield_range(signed: bool, bits: u32) -> (i128, i128) {
    if signed {
        let min = -(1i128 << (bits - 1));
        let mut max = (1i128 << (bits - 1)) - 1;
        if max == 0 {
            max = 1;
        }
        (min, max)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Extract a bitfield from its storage unit value.
pub(crate) fn extract(unit: u64, bitshift: u32, bits: u32, signed: bool) -> i128 {
    let raw = (unit >> bitshift) & mask(bits);
    if signed && bits > 0 && raw & (1u64 << (bits - 1)) != 0 {
        raw as i128 - (1i128 << bits)
    } else {
        raw as i128
    }
}

/// Replace a bitfield inside its storage unit value.
pub(crate) fn insert(unit: u64, bitshift: u32, bits: u32, value: i128) -> u64 {
    let field_mask = mask(bits) << bitshift;
    let raw = ((value as u64) & mask(bits)) << bitshift;
    (unit & !field_mask) | raw
}
