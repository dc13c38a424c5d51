//! Struct and union layout.
//!
//! [`compute_layout`] assigns offsets, bit positions, the total size and the
//! alignment of a record from an ordered field list. The rule variant
//! (GCC x86, GCC ARM or MSVC bitfields, endianness, packing) comes from the
//! caller's [`StructFlags`], falling back to the backend's [`AbiProfile`] for
//! whatever the flags leave unspecified.

mod bitfield;

use std::collections::HashMap;

use bitflags::bitflags;
use serde::Deserialize;

use crate::convert::buffer::align_to;
use crate::ctype::{CType, TypeKind};
use crate::error::{Error, Result};
use crate::logging::debug;

pub use bitfield::bitfield_range;
pub(crate) use bitfield::{extract, insert};

use bitfield::BitCursor;

/// `bitshift` of a regular, non-bitfield member.
pub const BS_REGULAR: i32 = -1;
/// `bitshift` of an array member of zero or unspecified length.
pub const BS_EMPTY_ARRAY: i32 = -2;

bitflags! {
    /// Layout-rule flags passed to `complete_struct_or_union`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StructFlags: u32 {
        const MSVC_BITFIELDS = 0x01;
        const GCC_ARM_BITFIELDS = 0x02;
        const GCC_BIG_ENDIAN = 0x04;
        const PACKED = 0x08;
        const GCC_X86_BITFIELDS = 0x10;
        const GCC_LITTLE_ENDIAN = 0x40;
        /// Any disagreement with an explicit offset or size is an error.
        const STD_FIELD_POS = 0x80;
    }
}

bitflags! {
    /// Properties of a completed record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u8 {
        /// Explicit offsets, sizes or anonymous members moved fields away
        /// from where the layout rule would put them.
        const CUSTOM_FIELD_POS = 1 << 0;
        /// The last member (possibly nested) is an array of unknown length.
        const WITH_VAR_ARRAY = 1 << 1;
        /// Packing lowered the alignment of at least one member.
        const WITH_PACKED_CHANGE = 1 << 2;
        const WITH_BITFIELDS = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldFlags: u8 {
        /// Union members after the first are skipped by list initializers.
        const IGNORE_IN_CTOR = 1 << 0;
    }
}

/// Bitfield allocation rule of a compiler family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BitfieldRule {
    GccX86,
    GccArm,
    Msvc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Endian {
    Little,
    Big,
}

/// The platform layout rules a backend completes records with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiProfile {
    pub bitfields: BitfieldRule,
    pub endian: Endian,
    /// Default maximum member alignment, `None` for natural alignment.
    pub pack: Option<usize>,
}

impl Default for AbiProfile {
    fn default() -> Self {
        Self::native()
    }
}

impl AbiProfile {
    /// The rules of the compiler family the host normally uses.
    pub fn native() -> Self {
        let bitfields = if cfg!(target_env = "msvc") || cfg!(windows) {
            BitfieldRule::Msvc
        } else if cfg!(any(target_arch = "arm", target_arch = "aarch64")) {
            BitfieldRule::GccArm
        } else {
            BitfieldRule::GccX86
        };
        let endian = if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        };
        Self {
            bitfields,
            endian,
            pack: None,
        }
    }

    /// Fill in the rule and endianness bits the caller left out.
    pub fn complete_flags(&self, mut sflags: StructFlags) -> StructFlags {
        let rules = StructFlags::MSVC_BITFIELDS
            | StructFlags::GCC_ARM_BITFIELDS
            | StructFlags::GCC_X86_BITFIELDS;
        if !sflags.intersects(rules) {
            sflags |= match self.bitfields {
                BitfieldRule::GccX86 => StructFlags::GCC_X86_BITFIELDS,
                BitfieldRule::GccArm => StructFlags::GCC_ARM_BITFIELDS,
                BitfieldRule::Msvc => StructFlags::MSVC_BITFIELDS,
            };
        }
        if !sflags.intersects(StructFlags::GCC_BIG_ENDIAN | StructFlags::GCC_LITTLE_ENDIAN) {
            sflags |= match self.endian {
                Endian::Little => StructFlags::GCC_LITTLE_ENDIAN,
                Endian::Big => StructFlags::GCC_BIG_ENDIAN,
            };
        }
        sflags
    }
}

/// One member as declared, before layout.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ctype: CType,
    /// Bit width, or `None` for a regular member.
    pub bitsize: Option<u32>,
    /// Forced byte offset, or `None` to let the layout rule place it.
    pub offset: Option<usize>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ctype: &CType) -> Self {
        Self {
            name: name.into(),
            ctype: ctype.clone(),
            bitsize: None,
            offset: None,
        }
    }

    /// Declare the member as a bitfield of `width` bits.
    pub fn bits(mut self, width: u32) -> Self {
        self.bitsize = Some(width);
        self
    }

    /// Force the member to a byte offset.
    pub fn at(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A laid-out member of a completed struct or union.
#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) ctype: CType,
    pub(crate) offset: usize,
    pub(crate) bitshift: i32,
    pub(crate) bitsize: i32,
    pub(crate) flags: FieldFlags,
    pub(crate) anonymous: Option<usize>,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ctype(&self) -> &CType {
        &self.ctype
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bit position inside the storage unit, or [`BS_REGULAR`] /
    /// [`BS_EMPTY_ARRAY`] for non-bitfields.
    pub fn bitshift(&self) -> i32 {
        self.bitshift
    }

    /// Bit width, or `-1` for non-bitfields.
    pub fn bitsize(&self) -> i32 {
        self.bitsize
    }

    pub fn flags(&self) -> FieldFlags {
        self.flags
    }

    pub fn is_bitfield(&self) -> bool {
        self.bitsize >= 0
    }

    /// Index of the anonymous member this field was flattened from.
    pub fn anonymous_index(&self) -> Option<usize> {
        self.anonymous
    }
}

/// Final layout of a struct or union.
#[derive(Debug, Clone)]
pub struct RecordLayout {
    pub(crate) fields: Vec<Field>,
    pub(crate) size: usize,
    pub(crate) alignment: usize,
    pub(crate) flags: RecordFlags,
}

impl RecordLayout {
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn flags(&self) -> RecordFlags {
        self.flags
    }

    /// Look a member up by name; the first declaration wins.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The member holding the variable-length array, if any.
    pub(crate) fn var_array_field(&self) -> Option<&Field> {
        if !self.flags.contains(RecordFlags::WITH_VAR_ARRAY) {
            return None;
        }
        self.fields
            .iter()
            .rev()
            .find(|f| f.ctype.is_array() && f.ctype.length().is_none())
    }
}

struct FieldTable {
    fields: Vec<Field>,
    direct: HashMap<String, bool>,
}

impl FieldTable {
    fn add(&mut self, field: Field) -> Result<()> {
        if !field.name.is_empty() {
            let direct = field.anonymous.is_none();
            if let Some(existing_direct) = self.direct.get(&field.name) {
                if direct || *existing_direct {
                    return Err(Error::key_error(format!(
                        "duplicate field name '{}'",
                        field.name
                    )));
                }
            } else {
                self.direct.insert(field.name.clone(), direct);
            }
        }
        self.fields.push(field);
        Ok(())
    }
}

fn detect_custom_layout(
    ct: &CType,
    sflags: StructFlags,
    flags: &mut RecordFlags,
    computed: usize,
    declared: usize,
    what: &str,
) -> Result<()> {
    if computed != declared {
        if sflags.contains(StructFlags::STD_FIELD_POS) {
            return Err(Error::type_error(format!(
                "{}: {} (cdef says {}, but C compiler says {}). fix it or use \"...;\" as the last field in the cdef for {} to make it flexible",
                ct.cname(),
                what,
                computed,
                declared,
                ct.cname()
            )));
        }
        *flags |= RecordFlags::CUSTOM_FIELD_POS;
    }
    Ok(())
}

/// Compute the layout of struct or union `ct` from its member list.
pub(crate) fn compute_layout(
    ct: &CType,
    specs: &[FieldSpec],
    total_size: Option<usize>,
    total_alignment: Option<usize>,
    sflags: StructFlags,
    pack: Option<usize>,
    profile: &AbiProfile,
) -> Result<RecordLayout> {
    let is_union = ct.kind() == TypeKind::Union;
    let mut sflags = profile.complete_flags(sflags);
    let pack = if sflags.contains(StructFlags::PACKED) {
        1
    } else {
        match pack.or(profile.pack).filter(|p| *p > 0) {
            Some(p) => {
                sflags |= StructFlags::PACKED;
                p
            }
            None => usize::MAX,
        }
    };
    let msvc = sflags.contains(StructFlags::MSVC_BITFIELDS);
    let arm = sflags.contains(StructFlags::GCC_ARM_BITFIELDS);

    let mut table = FieldTable {
        fields: Vec::with_capacity(specs.len()),
        direct: HashMap::new(),
    };
    let mut flags = RecordFlags::empty();
    let mut alignment = 1usize;
    let mut cursor = BitCursor::default();
    let mut boffsetmax = 0usize;
    let mut anonymous_count = 0usize;

    for (i, spec) in specs.iter().enumerate() {
        let ftype = &spec.ctype;
        let qualified = format!("{}.{}", ct.cname(), spec.name);
        let fsize = ftype.size_opt();

        match fsize {
            None => {
                let is_last = i + 1 == specs.len();
                if ftype.is_array()
                    && spec.bitsize.is_none()
                    && (is_last || spec.offset.is_some())
                {
                    flags |= RecordFlags::WITH_VAR_ARRAY;
                } else {
                    return Err(Error::type_error(format!(
                        "field '{}' has ctype '{}' of unknown size",
                        qualified,
                        ftype.cname()
                    )));
                }
            }
            Some(_) => {
                if let Some(inner) = ftype.record_layout()
                    && inner.flags.contains(RecordFlags::WITH_VAR_ARRAY)
                {
                    flags |= RecordFlags::WITH_VAR_ARRAY;
                }
            }
        }

        if is_union {
            cursor.boffset = 0;
        }
        let falignorg = ftype.alignment_opt().ok_or_else(|| {
            Error::type_error(format!(
                "field '{}' has ctype '{}' of unknown alignment",
                qualified,
                ftype.cname()
            ))
        })?;
        let falign = falignorg.min(pack);
        if falign < falignorg {
            flags |= RecordFlags::WITH_PACKED_CHANGE;
        }

        let do_align = match spec.bitsize {
            Some(bits) if !arm => {
                if msvc {
                    bits > 0
                } else {
                    !spec.name.is_empty()
                }
            }
            _ => true,
        };
        if do_align && alignment < falign {
            alignment = falign;
        }
        let fflags = if is_union && i > 0 {
            FieldFlags::IGNORE_IN_CTOR
        } else {
            FieldFlags::empty()
        };

        match spec.bitsize {
            None => {
                let bs_flag = if ftype.is_array() && ftype.length().unwrap_or(0) == 0 {
                    BS_EMPTY_ARRAY
                } else {
                    BS_REGULAR
                };
                let mut byteoffset = align_to(cursor.boffset.div_ceil(8), falign);
                if let Some(forced) = spec.offset {
                    detect_custom_layout(
                        ct,
                        sflags,
                        &mut flags,
                        byteoffset,
                        forced,
                        &format!("wrong offset for field '{}'", spec.name),
                    )?;
                    byteoffset = forced;
                }

                if spec.name.is_empty()
                    && let Some(inner) = ftype.record_layout()
                {
                    let index = anonymous_count;
                    anonymous_count += 1;
                    for f in &inner.fields {
                        table.add(Field {
                            name: f.name.clone(),
                            ctype: f.ctype.clone(),
                            offset: byteoffset + f.offset,
                            bitshift: f.bitshift,
                            bitsize: f.bitsize,
                            flags: f.flags | fflags,
                            anonymous: Some(f.anonymous.unwrap_or(index)),
                        })?;
                    }
                    flags |= RecordFlags::CUSTOM_FIELD_POS;
                } else {
                    table.add(Field {
                        name: spec.name.clone(),
                        ctype: ftype.clone(),
                        offset: byteoffset,
                        bitshift: bs_flag,
                        bitsize: -1,
                        flags: fflags,
                        anonymous: None,
                    })?;
                }
                cursor.boffset = (byteoffset + fsize.unwrap_or(0)) * 8;
                cursor.end_run();
            }
            Some(bits) => {
                if spec.offset.is_some() {
                    return Err(Error::type_error(format!(
                        "field '{}' is a bitfield, but a fixed offset is specified",
                        qualified
                    )));
                }
                let Some(kind) = ftype.integer_kind() else {
                    return Err(Error::type_error(format!(
                        "field '{}' declared as '{}' cannot be a bit field",
                        qualified,
                        ftype.cname()
                    )));
                };
                let size = kind.size();
                if bits as usize > 8 * size {
                    return Err(Error::type_error(format!(
                        "bit field '{}' is declared '{}:{}', which exceeds the width of the type",
                        qualified,
                        ftype.cname(),
                        bits
                    )));
                }

                if bits == 0 {
                    if !spec.name.is_empty() {
                        return Err(Error::type_error(format!(
                            "field '{}' is declared with :0",
                            qualified
                        )));
                    }
                    cursor.zero_width(falign, sflags);
                } else {
                    let placement = cursor.place(size, falign, bits as usize, sflags, &qualified)?;
                    flags |= RecordFlags::WITH_BITFIELDS;
                    if !spec.name.is_empty() {
                        table.add(Field {
                            name: spec.name.clone(),
                            ctype: ftype.clone(),
                            offset: placement.offset,
                            bitshift: placement.bitshift,
                            bitsize: bits as i32,
                            flags: fflags,
                            anonymous: None,
                        })?;
                    }
                }
            }
        }

        boffsetmax = boffsetmax.max(cursor.boffset);
    }

    let max_bytes = boffsetmax.div_ceil(8);
    let mut aligned_size = align_to(max_bytes, alignment);
    if aligned_size == 0 {
        aligned_size = 1;
    }

    let size = match total_size {
        None => aligned_size,
        Some(declared) => {
            detect_custom_layout(
                ct,
                sflags,
                &mut flags,
                aligned_size,
                declared,
                "wrong total size",
            )?;
            if declared < max_bytes {
                return Err(Error::type_error(format!(
                    "{} cannot be of size {}: there are fields at least up to {}",
                    ct.cname(),
                    declared,
                    max_bytes
                )));
            }
            declared
        }
    };
    let alignment = match total_alignment {
        None => alignment,
        Some(declared) => {
            detect_custom_layout(
                ct,
                sflags,
                &mut flags,
                alignment,
                declared,
                "wrong total alignment",
            )?;
            declared
        }
    };

    debug!(
        ctype = ct.cname(),
        size,
        alignment,
        fields = table.fields.len(),
        "completed record layout"
    );

    Ok(RecordLayout {
        fields: table.fields,
        size,
        alignment,
        flags,
    })
}

/// Member designator accepted by [`typeoffsetof`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRef<'a> {
    Name(&'a str),
    /// Item index behind a pointer or array.
    Index(i64),
}

impl<'a> From<&'a str> for FieldRef<'a> {
    fn from(name: &'a str) -> Self {
        FieldRef::Name(name)
    }
}

impl From<i64> for FieldRef<'_> {
    fn from(index: i64) -> Self {
        FieldRef::Index(index)
    }
}

/// Type and byte offset of a struct member, or of item `index` behind a
/// pointer or array.
pub fn typeoffsetof(ct: &CType, field: FieldRef<'_>) -> Result<(CType, i64)> {
    match field {
        FieldRef::Name(name) if ct.is_struct_or_union() => {
            let layout = ct.record_layout().ok_or_else(|| {
                Error::type_error(format!("struct/union is opaque: '{}'", ct.cname()))
            })?;
            let found = layout
                .field(name)
                .ok_or_else(|| Error::key_error(name.to_string()))?;
            if found.is_bitfield() {
                return Err(Error::type_error("not supported for bitfields"));
            }
            let offset = i64::try_from(found.offset)
                .map_err(|_| Error::overflow("field offset too large"))?;
            Ok((found.ctype.clone(), offset))
        }
        FieldRef::Index(index) if ct.is_pointer() || ct.is_array() => {
            let item = ct.item().ok_or_else(|| {
                Error::type_error(format!("ctype '{}' has no item type", ct.cname()))
            })?;
            let size = i64::try_from(item.sizeof()?)
                .map_err(|_| Error::overflow("item size too large"))?;
            let offset = index
                .checked_mul(size)
                .ok_or_else(|| Error::overflow("array offset would overflow a ssize_t"))?;
            Ok((item.clone(), offset))
        }
        FieldRef::Name(_) => Err(Error::type_error(format!(
            "expected a struct or union ctype, got '{}'",
            ct.cname()
        ))),
        FieldRef::Index(_) => Err(Error::type_error(format!(
            "expected a pointer or array ctype, got '{}'",
            ct.cname()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctype::registry::{new_primitive_type, new_struct_type, new_union_type};

    fn gcc_little() -> AbiProfile {
        AbiProfile {
            bitfields: BitfieldRule::GccX86,
            endian: Endian::Little,
            pack: None,
        }
    }

    fn layout_of(specs: &[FieldSpec], profile: &AbiProfile) -> Result<RecordLayout> {
        let ct = new_struct_type("struct t");
        compute_layout(&ct, specs, None, None, StructFlags::empty(), None, profile)
    }

    #[test]
    fn test_complete_flags_keeps_explicit_choices() {
        let profile = gcc_little();
        let filled = profile.complete_flags(StructFlags::empty());
        assert!(filled.contains(StructFlags::GCC_X86_BITFIELDS | StructFlags::GCC_LITTLE_ENDIAN));

        let explicit =
            profile.complete_flags(StructFlags::MSVC_BITFIELDS | StructFlags::GCC_BIG_ENDIAN);
        assert!(!explicit.contains(StructFlags::GCC_X86_BITFIELDS));
        assert!(!explicit.contains(StructFlags::GCC_LITTLE_ENDIAN));
    }

    #[test]
    fn test_profile_pack_caps_alignment() -> Result<()> {
        let char_t = new_primitive_type("char")?;
        let int = new_primitive_type("int")?;
        let profile = AbiProfile {
            pack: Some(2),
            ..gcc_little()
        };
        let layout = layout_of(
            &[FieldSpec::new("a", &char_t), FieldSpec::new("b", &int)],
            &profile,
        )?;
        assert_eq!(layout.field("b").map(Field::offset), Some(2));
        assert_eq!((layout.size(), layout.alignment()), (6, 2));
        assert!(layout.flags().contains(RecordFlags::WITH_PACKED_CHANGE));
        Ok(())
    }

    #[test]
    fn test_declared_total_size() -> Result<()> {
        let int = new_primitive_type("int")?;
        let specs = [FieldSpec::new("a", &int), FieldSpec::new("b", &int)];
        let ct = new_struct_type("struct sized");
        let flags = StructFlags::empty();
        let padded = compute_layout(&ct, &specs, Some(16), None, flags, None, &gcc_little())?;
        assert_eq!(padded.size(), 16);
        assert!(padded.flags().contains(RecordFlags::CUSTOM_FIELD_POS));

        let short = compute_layout(&ct, &specs, Some(6), None, flags, None, &gcc_little()).err();
        assert_eq!(
            short.as_ref().map(Error::message),
            Some("struct sized cannot be of size 6: there are fields at least up to 8")
        );
        Ok(())
    }

    #[test]
    fn test_bitfield_declaration_errors() -> Result<()> {
        let char_t = new_primitive_type("char")?;
        let double = new_primitive_type("double")?;
        let profile = gcc_little();

        let wide = layout_of(&[FieldSpec::new("a", &char_t).bits(9)], &profile).err();
        assert!(wide.is_some_and(|e| e.is_type_error()));
        let named_zero = layout_of(&[FieldSpec::new("a", &char_t).bits(0)], &profile).err();
        assert_eq!(
            named_zero.as_ref().map(Error::message),
            Some("field 'struct t.a' is declared with :0")
        );
        let placed = layout_of(&[FieldSpec::new("a", &char_t).bits(3).at(0)], &profile).err();
        assert!(placed.is_some_and(|e| e.is_type_error()));
        let float = layout_of(&[FieldSpec::new("a", &double).bits(3)], &profile).err();
        assert!(float.is_some_and(|e| e.is_type_error()));
        Ok(())
    }

    #[test]
    fn test_union_members_overlap() -> Result<()> {
        let char_t = new_primitive_type("char")?;
        let int = new_primitive_type("int")?;
        let ct = new_union_type("union u");
        let layout = compute_layout(
            &ct,
            &[FieldSpec::new("c", &char_t), FieldSpec::new("i", &int)],
            None,
            None,
            StructFlags::empty(),
            None,
            &gcc_little(),
        )?;
        let offsets: Vec<usize> = layout.fields().iter().map(Field::offset).collect();
        assert_eq!(offsets, vec![0, 0]);
        assert_eq!(layout.size(), 4);
        let second = layout.field("i").map(Field::flags);
        assert_eq!(second, Some(FieldFlags::IGNORE_IN_CTOR));
        Ok(())
    }
}
