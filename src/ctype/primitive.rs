//! Primitive C types and their host ABI properties.

use std::ffi::{c_char, c_int, c_long, c_longlong, c_short};
use std::mem::{align_of, size_of};

/// Storage format of `long double` on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongDoubleFormat {
    /// Same representation as `double` (MSVC, 32-bit ARM, macOS on ARM).
    Double,
    /// x87 80-bit extended precision, padded to the type size.
    X87Extended,
    /// IEEE-754 binary128 (AArch64 Linux).
    Binary128,
}

#[cfg(all(any(target_arch = "x86_64", target_arch = "x86"), not(target_env = "msvc")))]
pub const LONG_DOUBLE_FORMAT: LongDoubleFormat = LongDoubleFormat::X87Extended;

#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
pub const LONG_DOUBLE_FORMAT: LongDoubleFormat = LongDoubleFormat::Binary128;

#[cfg(not(any(
    all(any(target_arch = "x86_64", target_arch = "x86"), not(target_env = "msvc")),
    all(target_arch = "aarch64", target_os = "linux")
)))]
pub const LONG_DOUBLE_FORMAT: LongDoubleFormat = LongDoubleFormat::Double;

const LONG_DOUBLE_SIZE: usize = match LONG_DOUBLE_FORMAT {
    LongDoubleFormat::Double => size_of::<f64>(),
    LongDoubleFormat::X87Extended => {
        if size_of::<usize>() == 8 {
            16
        } else {
            12
        }
    }
    LongDoubleFormat::Binary128 => 16,
};

const LONG_DOUBLE_ALIGN: usize = match LONG_DOUBLE_FORMAT {
    LongDoubleFormat::Double => align_of::<f64>(),
    LongDoubleFormat::X87Extended => {
        if size_of::<usize>() == 8 {
            16
        } else {
            4
        }
    }
    LongDoubleFormat::Binary128 => 16,
};

#[cfg(windows)]
const WCHAR: (usize, bool) = (2, false);

#[cfg(all(
    not(windows),
    any(target_arch = "arm", target_arch = "aarch64"),
    not(target_vendor = "apple")
))]
const WCHAR: (usize, bool) = (4, false);

#[cfg(all(
    not(windows),
    not(all(
        any(target_arch = "arm", target_arch = "aarch64"),
        not(target_vendor = "apple")
    ))
))]
const WCHAR: (usize, bool) = (4, true);

/// Conversion class of a primitive; drives the value conversion tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveClass {
    Signed,
    Unsigned,
    Bool,
    /// `char`: a one-byte text unit.
    Char,
    /// `wchar_t`, `char16_t`, `char32_t`.
    WideChar,
    Float,
    LongDouble,
    Complex,
}

/// Every primitive name the registry recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveKind {
    Char,
    SignedChar,
    UnsignedChar,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Long,
    UnsignedLong,
    LongLong,
    UnsignedLongLong,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    IntPtr,
    UIntPtr,
    PtrDiff,
    Size,
    SSize,
    IntMax,
    UIntMax,
    Bool,
    Float,
    Double,
    LongDouble,
    FloatComplex,
    DoubleComplex,
    WChar,
    Char16,
    Char32,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 35] = [
        PrimitiveKind::Char,
        PrimitiveKind::SignedChar,
        PrimitiveKind::UnsignedChar,
        PrimitiveKind::Short,
        PrimitiveKind::UnsignedShort,
        PrimitiveKind::Int,
        PrimitiveKind::UnsignedInt,
        PrimitiveKind::Long,
        PrimitiveKind::UnsignedLong,
        PrimitiveKind::LongLong,
        PrimitiveKind::UnsignedLongLong,
        PrimitiveKind::Int8,
        PrimitiveKind::UInt8,
        PrimitiveKind::Int16,
        PrimitiveKind::UInt16,
        PrimitiveKind::Int32,
        PrimitiveKind::UInt32,
        PrimitiveKind::Int64,
        PrimitiveKind::UInt64,
        PrimitiveKind::IntPtr,
        PrimitiveKind::UIntPtr,
        PrimitiveKind::PtrDiff,
        PrimitiveKind::Size,
        PrimitiveKind::SSize,
        PrimitiveKind::IntMax,
        PrimitiveKind::UIntMax,
        PrimitiveKind::Bool,
        PrimitiveKind::Float,
        PrimitiveKind::Double,
        PrimitiveKind::LongDouble,
        PrimitiveKind::FloatComplex,
        PrimitiveKind::DoubleComplex,
        PrimitiveKind::WChar,
        PrimitiveKind::Char16,
        PrimitiveKind::Char32,
    ];

    /// Look up a primitive by its C spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// The C spelling, which is also the type's cname.
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Char => "char",
            PrimitiveKind::SignedChar => "signed char",
            PrimitiveKind::UnsignedChar => "unsigned char",
            PrimitiveKind::Short => "short",
            PrimitiveKind::UnsignedShort => "unsigned short",
            PrimitiveKind::Int => "int",
            PrimitiveKind::UnsignedInt => "unsigned int",
            PrimitiveKind::Long => "long",
            PrimitiveKind::UnsignedLong => "unsigned long",
            PrimitiveKind::LongLong => "long long",
            PrimitiveKind::UnsignedLongLong => "unsigned long long",
            PrimitiveKind::Int8 => "int8_t",
            PrimitiveKind::UInt8 => "uint8_t",
            PrimitiveKind::Int16 => "int16_t",
            PrimitiveKind::UInt16 => "uint16_t",
            PrimitiveKind::Int32 => "int32_t",
            PrimitiveKind::UInt32 => "uint32_t",
            PrimitiveKind::Int64 => "int64_t",
            PrimitiveKind::UInt64 => "uint64_t",
            PrimitiveKind::IntPtr => "intptr_t",
            PrimitiveKind::UIntPtr => "uintptr_t",
            PrimitiveKind::PtrDiff => "ptrdiff_t",
            PrimitiveKind::Size => "size_t",
            PrimitiveKind::SSize => "ssize_t",
            PrimitiveKind::IntMax => "intmax_t",
            PrimitiveKind::UIntMax => "uintmax_t",
            PrimitiveKind::Bool => "_Bool",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
            PrimitiveKind::LongDouble => "long double",
            PrimitiveKind::FloatComplex => "float _Complex",
            PrimitiveKind::DoubleComplex => "double _Complex",
            PrimitiveKind::WChar => "wchar_t",
            PrimitiveKind::Char16 => "char16_t",
            PrimitiveKind::Char32 => "char32_t",
        }
    }

    pub fn size(self) -> usize {
        match self {
            PrimitiveKind::Char | PrimitiveKind::SignedChar | PrimitiveKind::UnsignedChar => {
                size_of::<c_char>()
            }
            PrimitiveKind::Short | PrimitiveKind::UnsignedShort => size_of::<c_short>(),
            PrimitiveKind::Int | PrimitiveKind::UnsignedInt => size_of::<c_int>(),
            PrimitiveKind::Long | PrimitiveKind::UnsignedLong => size_of::<c_long>(),
            PrimitiveKind::LongLong | PrimitiveKind::UnsignedLongLong => size_of::<c_longlong>(),
            PrimitiveKind::Int8 | PrimitiveKind::UInt8 | PrimitiveKind::Bool => 1,
            PrimitiveKind::Int16 | PrimitiveKind::UInt16 | PrimitiveKind::Char16 => 2,
            PrimitiveKind::Int32 | PrimitiveKind::UInt32 | PrimitiveKind::Char32 => 4,
            PrimitiveKind::Int64
            | PrimitiveKind::UInt64
            | PrimitiveKind::IntMax
            | PrimitiveKind::UIntMax => 8,
            PrimitiveKind::IntPtr
            | PrimitiveKind::UIntPtr
            | PrimitiveKind::PtrDiff
            | PrimitiveKind::Size
            | PrimitiveKind::SSize => size_of::<usize>(),
            PrimitiveKind::Float => size_of::<f32>(),
            PrimitiveKind::Double => size_of::<f64>(),
            PrimitiveKind::LongDouble => LONG_DOUBLE_SIZE,
            PrimitiveKind::FloatComplex => 2 * size_of::<f32>(),
            PrimitiveKind::DoubleComplex => 2 * size_of::<f64>(),
            PrimitiveKind::WChar => WCHAR.0,
        }
    }

    pub fn alignment(self) -> usize {
        match self {
            PrimitiveKind::Char
            | PrimitiveKind::SignedChar
            | PrimitiveKind::UnsignedChar
            | PrimitiveKind::Int8
            | PrimitiveKind::UInt8
            | PrimitiveKind::Bool => 1,
            PrimitiveKind::Short | PrimitiveKind::UnsignedShort => align_of::<c_short>(),
            PrimitiveKind::Int | PrimitiveKind::UnsignedInt => align_of::<c_int>(),
            PrimitiveKind::Long | PrimitiveKind::UnsignedLong => align_of::<c_long>(),
            PrimitiveKind::LongLong | PrimitiveKind::UnsignedLongLong => align_of::<c_longlong>(),
            PrimitiveKind::Int16 | PrimitiveKind::UInt16 | PrimitiveKind::Char16 => {
                align_of::<i16>()
            }
            PrimitiveKind::Int32 | PrimitiveKind::UInt32 | PrimitiveKind::Char32 => {
                align_of::<i32>()
            }
            PrimitiveKind::Int64
            | PrimitiveKind::UInt64
            | PrimitiveKind::IntMax
            | PrimitiveKind::UIntMax => align_of::<i64>(),
            PrimitiveKind::IntPtr
            | PrimitiveKind::UIntPtr
            | PrimitiveKind::PtrDiff
            | PrimitiveKind::Size
            | PrimitiveKind::SSize => align_of::<usize>(),
            PrimitiveKind::Float | PrimitiveKind::FloatComplex => align_of::<f32>(),
            PrimitiveKind::Double | PrimitiveKind::DoubleComplex => align_of::<f64>(),
            PrimitiveKind::LongDouble => LONG_DOUBLE_ALIGN,
            PrimitiveKind::WChar => WCHAR.0,
        }
    }

    pub fn class(self) -> PrimitiveClass {
        match self {
            PrimitiveKind::SignedChar
            | PrimitiveKind::Short
            | PrimitiveKind::Int
            | PrimitiveKind::Long
            | PrimitiveKind::LongLong
            | PrimitiveKind::Int8
            | PrimitiveKind::Int16
            | PrimitiveKind::Int32
            | PrimitiveKind::Int64
            | PrimitiveKind::IntPtr
            | PrimitiveKind::PtrDiff
            | PrimitiveKind::SSize
            | PrimitiveKind::IntMax => PrimitiveClass::Signed,
            PrimitiveKind::UnsignedChar
            | PrimitiveKind::UnsignedShort
            | PrimitiveKind::UnsignedInt
            | PrimitiveKind::UnsignedLong
            | PrimitiveKind::UnsignedLongLong
            | PrimitiveKind::UInt8
            | PrimitiveKind::UInt16
            | PrimitiveKind::UInt32
            | PrimitiveKind::UInt64
            | PrimitiveKind::UIntPtr
            | PrimitiveKind::Size
            | PrimitiveKind::UIntMax => PrimitiveClass::Unsigned,
            PrimitiveKind::Bool => PrimitiveClass::Bool,
            PrimitiveKind::Char => PrimitiveClass::Char,
            PrimitiveKind::WChar | PrimitiveKind::Char16 | PrimitiveKind::Char32 => {
                PrimitiveClass::WideChar
            }
            PrimitiveKind::Float | PrimitiveKind::Double => PrimitiveClass::Float,
            PrimitiveKind::LongDouble => PrimitiveClass::LongDouble,
            PrimitiveKind::FloatComplex | PrimitiveKind::DoubleComplex => PrimitiveClass::Complex,
        }
    }

    /// Whether the raw storage is interpreted as two's complement.
    ///
    /// `wchar_t` mirrors the platform; `char16_t` and `char32_t` are unsigned.
    pub fn is_signed(self) -> bool {
        match self.class() {
            PrimitiveClass::Signed => true,
            PrimitiveClass::WideChar => self == PrimitiveKind::WChar && WCHAR.1,
            _ => false,
        }
    }

    /// Integers, `_Bool`, `char` and the wide chars: anything stored as a
    /// plain integer of `size()` bytes.
    pub fn is_integer_like(self) -> bool {
        matches!(
            self.class(),
            PrimitiveClass::Signed
                | PrimitiveClass::Unsigned
                | PrimitiveClass::Bool
                | PrimitiveClass::Char
                | PrimitiveClass::WideChar
        )
    }

    /// Plain signed or unsigned integers (the only valid enum bases).
    pub fn is_integer(self) -> bool {
        matches!(
            self.class(),
            PrimitiveClass::Signed | PrimitiveClass::Unsigned
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self.class(),
            PrimitiveClass::Float | PrimitiveClass::LongDouble
        )
    }

    /// Inclusive value range of an integer-like primitive.
    pub fn integer_range(self) -> (i128, i128) {
        let bits = 8 * self.size() as u32;
        match self.class() {
            PrimitiveClass::Bool => (0, 1),
            _ if self.is_signed() => (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1),
            _ => (0, (1i128 << bits) - 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in PrimitiveKind::ALL {
            assert_eq!(PrimitiveKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(PrimitiveKind::from_name("int128_t"), None);
    }

    #[test]
    fn test_host_sizes() {
        assert_eq!(PrimitiveKind::Int.size(), 4);
        assert_eq!(PrimitiveKind::Long.size(), size_of::<c_long>());
        assert_eq!(PrimitiveKind::Size.size(), size_of::<usize>());
        assert_eq!(PrimitiveKind::DoubleComplex.size(), 16);
        assert_eq!(PrimitiveKind::Char16.size(), 2);
    }

    #[test]
    fn test_ranges() {
        assert_eq!(PrimitiveKind::SignedChar.integer_range(), (-128, 127));
        assert_eq!(PrimitiveKind::UInt16.integer_range(), (0, 65535));
        assert_eq!(PrimitiveKind::Bool.integer_range(), (0, 1));
        assert_eq!(
            PrimitiveKind::UInt64.integer_range(),
            (0, u64::MAX as i128)
        );
    }
}
