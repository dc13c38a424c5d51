//! Struct and union layout under the supported compiler rules.

use cffi_backend::prelude::*;
use cffi_backend::{Endian, LayoutFile, RecordFlags};

fn field_offset(ct: &CType, name: &str) -> anyhow::Result<usize> {
    let layout = ct
        .record_layout()
        .ok_or_else(|| anyhow::anyhow!("{} is opaque", ct.cname()))?;
    let field = layout
        .field(name)
        .ok_or_else(|| anyhow::anyhow!("no field {}", name))?;
    Ok(field.offset())
}

#[test]
fn test_native_struct_layout() -> anyhow::Result<()> {
    let backend = Backend::native();
    let long = backend.new_primitive_type("long")?;
    let char_t = backend.new_primitive_type("char")?;
    let short = backend.new_primitive_type("short")?;
    let s = backend.new_struct_type("struct foo");
    backend.complete_struct_or_union(
        &s,
        &[
            FieldSpec::new("a1", &long),
            FieldSpec::new("a2", &char_t),
            FieldSpec::new("a3", &short),
        ],
        None,
        None,
        StructFlags::empty(),
        None,
    )?;

    let long_size = backend.sizeof(&long)?;
    assert_eq!(backend.sizeof(&s)?, 2 * long_size);
    assert_eq!(backend.alignof(&s)?, backend.alignof(&long)?);
    assert_eq!(field_offset(&s, "a1")?, 0);
    assert_eq!(field_offset(&s, "a2")?, long_size);
    assert_eq!(field_offset(&s, "a3")?, long_size + backend.sizeof(&short)?);
    Ok(())
}

fn bitfield_struct(backend: &Backend) -> anyhow::Result<CType> {
    let char_t = backend.new_primitive_type("char")?;
    let int = backend.new_primitive_type("int")?;
    let uint = backend.new_primitive_type("unsigned int")?;
    let s = backend.new_struct_type("struct bits");
    backend.complete_struct_or_union(
        &s,
        &[
            FieldSpec::new("a", &char_t),
            FieldSpec::new("b1", &int).bits(9),
            FieldSpec::new("b2", &uint).bits(7),
            FieldSpec::new("c", &char_t),
        ],
        None,
        None,
        StructFlags::empty(),
        None,
    )?;
    Ok(s)
}

#[test]
fn test_gcc_bitfields_share_unit() -> anyhow::Result<()> {
    let backend = Backend::with_profile(AbiProfile {
        bitfields: BitfieldRule::GccX86,
        endian: Endian::Little,
        pack: None,
    });
    let s = bitfield_struct(&backend)?;
    let layout = s
        .record_layout()
        .ok_or_else(|| anyhow::anyhow!("opaque"))?;
    let b1 = layout.field("b1").ok_or_else(|| anyhow::anyhow!("b1"))?;
    let b2 = layout.field("b2").ok_or_else(|| anyhow::anyhow!("b2"))?;
    assert_eq!((b1.offset(), b1.bitshift(), b1.bitsize()), (0, 8, 9));
    assert_eq!((b2.offset(), b2.bitshift(), b2.bitsize()), (0, 17, 7));
    assert_eq!(field_offset(&s, "c")?, 3);
    assert_eq!(backend.sizeof(&s)?, 4);
    assert_eq!(backend.alignof(&s)?, 4);
    assert!(layout.flags().contains(RecordFlags::WITH_BITFIELDS));
    Ok(())
}

#[test]
fn test_msvc_bitfields_start_new_unit() -> anyhow::Result<()> {
    let backend = Backend::with_profile(AbiProfile {
        bitfields: BitfieldRule::Msvc,
        endian: Endian::Little,
        pack: None,
    });
    let s = bitfield_struct(&backend)?;
    assert_eq!(field_offset(&s, "c")?, 8);
    assert_eq!(backend.sizeof(&s)?, 12);
    Ok(())
}

#[test]
fn test_bitfield_values_round_trip() -> anyhow::Result<()> {
    let backend = Backend::native();
    let s = bitfield_struct(&backend)?;
    let p = backend.newp(&backend.new_pointer_type(&s), &Value::None)?;
    p.set_field("b1", &Value::Int(-200))?;
    p.set_field("b2", &Value::Int(100))?;
    assert_eq!(p.field("b1")?, Value::Int(-200));
    assert_eq!(p.field("b2")?, Value::Int(100));

    let err = p.set_field("b2", &Value::Int(128)).err();
    assert!(err.is_some_and(|e| e.is_overflow()));
    Ok(())
}

#[test]
fn test_union_layout() -> anyhow::Result<()> {
    let backend = Backend::native();
    let int = backend.new_primitive_type("int")?;
    let double = backend.new_primitive_type("double")?;
    let u = backend.new_union_type("union num");
    backend.complete_struct_or_union(
        &u,
        &[FieldSpec::new("i", &int), FieldSpec::new("d", &double)],
        None,
        None,
        StructFlags::empty(),
        None,
    )?;
    assert_eq!(u.kind(), TypeKind::Union);
    assert_eq!(backend.sizeof(&u)?, 8);
    assert_eq!(field_offset(&u, "i")?, 0);
    assert_eq!(field_offset(&u, "d")?, 0);
    Ok(())
}

#[test]
fn test_packed_struct() -> anyhow::Result<()> {
    let backend = Backend::native();
    let char_t = backend.new_primitive_type("char")?;
    let int = backend.new_primitive_type("int")?;
    let s = backend.new_struct_type("struct packed");
    backend.complete_struct_or_union(
        &s,
        &[FieldSpec::new("a", &char_t), FieldSpec::new("b", &int)],
        None,
        None,
        StructFlags::PACKED,
        None,
    )?;
    assert_eq!(field_offset(&s, "b")?, 1);
    assert_eq!(backend.sizeof(&s)?, 5);
    assert_eq!(backend.alignof(&s)?, 1);
    Ok(())
}

#[test]
fn test_completion_happens_once() -> anyhow::Result<()> {
    let backend = Backend::native();
    let int = backend.new_primitive_type("int")?;
    let s = backend.new_struct_type("struct once");
    let fields = [FieldSpec::new("x", &int)];
    backend.complete_struct_or_union(&s, &fields, None, None, StructFlags::empty(), None)?;
    let again =
        backend.complete_struct_or_union(&s, &fields, None, None, StructFlags::empty(), None);
    assert!(again.is_err_and(|e| e.is_type_error()));
    Ok(())
}

#[test]
fn test_duplicate_field_is_key_error() -> anyhow::Result<()> {
    let backend = Backend::native();
    let int = backend.new_primitive_type("int")?;
    let s = backend.new_struct_type("struct dup");
    let result = backend.complete_struct_or_union(
        &s,
        &[FieldSpec::new("x", &int), FieldSpec::new("x", &int)],
        None,
        None,
        StructFlags::empty(),
        None,
    );
    assert!(result.is_err_and(|e| e.is_key_error()));
    Ok(())
}

#[test]
fn test_flexible_array_member() -> anyhow::Result<()> {
    let backend = Backend::native();
    let int = backend.new_primitive_type("int")?;
    let open = backend.new_array_type(&backend.new_pointer_type(&int), None)?;
    let s = backend.new_struct_type("struct flex");
    backend.complete_struct_or_union(
        &s,
        &[FieldSpec::new("n", &int), FieldSpec::new("items", &open)],
        None,
        None,
        StructFlags::empty(),
        None,
    )?;
    assert_eq!(backend.sizeof(&s)?, 4);
    let layout = s.record_layout().ok_or_else(|| anyhow::anyhow!("opaque"))?;
    assert!(layout.flags().contains(RecordFlags::WITH_VAR_ARRAY));
    assert_eq!(field_offset(&s, "items")?, 4);
    Ok(())
}

#[test]
fn test_typeoffsetof() -> anyhow::Result<()> {
    let backend = Backend::native();
    let short = backend.new_primitive_type("short")?;
    let double = backend.new_primitive_type("double")?;
    let s = backend.new_struct_type("struct pair");
    backend.complete_struct_or_union(
        &s,
        &[FieldSpec::new("tag", &short), FieldSpec::new("value", &double)],
        None,
        None,
        StructFlags::empty(),
        None,
    )?;
    let (ct, offset) = backend.typeoffsetof(&s, "value")?;
    assert_eq!(ct, double);
    assert_eq!(offset, 8);
    let missing = backend.typeoffsetof(&s, "nope").err();
    assert!(missing.is_some_and(|e| e.is_key_error()));

    let opaque = backend.new_struct_type("struct later");
    assert!(backend.typeoffsetof(&opaque, "x").is_err_and(|e| e.is_type_error()));
    Ok(())
}

#[test]
fn test_layout_file_build() -> anyhow::Result<()> {
    let toml = r#"
[[record]]
name = "struct header"

[[record.field]]
name = "magic"
type = "char"
length = 4

[[record.field]]
name = "flags"
type = "unsigned int"
bits = 3

[[record]]
name = "struct packet"
packed = true

[[record.field]]
name = "kind"
type = "uint8_t"

[[record.field]]
name = "header"
type = "struct header"
"#;
    let records = LayoutFile::from_str(toml)?.build(&AbiProfile::native())?;
    assert_eq!(records.len(), 2);
    let packet = records.get(1).ok_or_else(|| anyhow::anyhow!("packet"))?;
    assert_eq!(field_offset(packet, "header")?, 1);
    assert_eq!(packet.sizeof()?, 9);
    Ok(())
}

fn profile(bitfields: BitfieldRule) -> AbiProfile {
    AbiProfile {
        bitfields,
        endian: Endian::Little,
        pack: None,
    }
}

fn pair_struct(backend: &Backend, tag: &str, names: [&str; 2]) -> anyhow::Result<CType> {
    let int = backend.new_primitive_type("int")?;
    let s = backend.new_struct_type(tag);
    backend.complete_struct_or_union(
        &s,
        &[FieldSpec::new(names[0], &int), FieldSpec::new(names[1], &int)],
        None,
        None,
        StructFlags::empty(),
        None,
    )?;
    Ok(s)
}

#[test]
fn test_anonymous_members_are_flattened() -> anyhow::Result<()> {
    let backend = Backend::native();
    let char_t = backend.new_primitive_type("char")?;
    let first = pair_struct(&backend, "struct first", ["x", "y"])?;
    let second = pair_struct(&backend, "struct second", ["x", "z"])?;
    let outer = backend.new_struct_type("struct outer");
    backend.complete_struct_or_union(
        &outer,
        &[
            FieldSpec::new("tag", &char_t),
            FieldSpec::new("", &first),
            FieldSpec::new("", &second),
        ],
        None,
        None,
        StructFlags::empty(),
        None,
    )?;

    let layout = outer.record_layout().ok_or_else(|| anyhow::anyhow!("opaque"))?;
    let placed: Vec<(&str, usize, Option<usize>)> = layout
        .fields()
        .iter()
        .map(|f| (f.name(), f.offset(), f.anonymous_index()))
        .collect();
    assert_eq!(
        placed,
        vec![
            ("tag", 0, None),
            ("x", 4, Some(0)),
            ("y", 8, Some(0)),
            ("x", 12, Some(1)),
            ("z", 16, Some(1)),
        ]
    );
    assert_eq!(backend.sizeof(&outer)?, 20);
    assert!(layout.flags().contains(RecordFlags::CUSTOM_FIELD_POS));

    let p = backend.newp(
        &backend.new_pointer_type(&outer),
        &Value::Map(vec![("x".to_string(), 5.into()), ("z".to_string(), 6.into())]),
    )?;
    assert_eq!(p.field("x")?, Value::Int(5));
    assert_eq!(p.field("z")?, Value::Int(6));
    assert_eq!(backend.typeoffsetof(&outer, "x")?.1, 4);
    Ok(())
}

#[test]
fn test_anonymous_member_cannot_shadow_direct_field() -> anyhow::Result<()> {
    let backend = Backend::native();
    let int = backend.new_primitive_type("int")?;
    let inner = pair_struct(&backend, "struct inner", ["x", "y"])?;
    let outer = backend.new_struct_type("struct clash");
    let result = backend.complete_struct_or_union(
        &outer,
        &[FieldSpec::new("x", &int), FieldSpec::new("", &inner)],
        None,
        None,
        StructFlags::empty(),
        None,
    );
    assert!(result.is_err_and(|e| e.is_key_error()));
    Ok(())
}

fn zero_width_struct(backend: &Backend) -> anyhow::Result<CType> {
    let char_t = backend.new_primitive_type("char")?;
    let int = backend.new_primitive_type("int")?;
    let s = backend.new_struct_type("struct barrier");
    backend.complete_struct_or_union(
        &s,
        &[
            FieldSpec::new("x", &char_t),
            FieldSpec::new("", &int).bits(0),
            FieldSpec::new("y", &char_t),
        ],
        None,
        None,
        StructFlags::empty(),
        None,
    )?;
    Ok(s)
}

#[test]
fn test_zero_width_bitfield_gcc_pads_to_unit() -> anyhow::Result<()> {
    let backend = Backend::with_profile(profile(BitfieldRule::GccX86));
    let s = zero_width_struct(&backend)?;
    assert_eq!(field_offset(&s, "y")?, 4);
    assert_eq!(backend.sizeof(&s)?, 5);
    assert_eq!(backend.alignof(&s)?, 1);
    Ok(())
}

#[test]
fn test_zero_width_bitfield_msvc_only_ends_run() -> anyhow::Result<()> {
    let backend = Backend::with_profile(profile(BitfieldRule::Msvc));
    let s = zero_width_struct(&backend)?;
    assert_eq!(field_offset(&s, "y")?, 1);
    assert_eq!(backend.sizeof(&s)?, 2);

    let int = backend.new_primitive_type("int")?;
    let split = backend.new_struct_type("struct split");
    backend.complete_struct_or_union(
        &split,
        &[
            FieldSpec::new("a", &int).bits(3),
            FieldSpec::new("", &int).bits(0),
            FieldSpec::new("b", &int).bits(5),
        ],
        None,
        None,
        StructFlags::empty(),
        None,
    )?;
    let layout = split.record_layout().ok_or_else(|| anyhow::anyhow!("opaque"))?;
    let b = layout.field("b").ok_or_else(|| anyhow::anyhow!("b"))?;
    assert_eq!((b.offset(), b.bitshift()), (4, 0));
    assert_eq!(backend.sizeof(&split)?, 8);
    Ok(())
}

#[test]
fn test_explicit_offset_marks_custom_layout() -> anyhow::Result<()> {
    let backend = Backend::native();
    let int = backend.new_primitive_type("int")?;
    let s = backend.new_struct_type("struct gap");
    backend.complete_struct_or_union(
        &s,
        &[FieldSpec::new("a", &int), FieldSpec::new("b", &int).at(8)],
        None,
        None,
        StructFlags::empty(),
        None,
    )?;
    assert_eq!(field_offset(&s, "b")?, 8);
    assert_eq!(backend.sizeof(&s)?, 12);
    let layout = s.record_layout().ok_or_else(|| anyhow::anyhow!("opaque"))?;
    assert!(layout.flags().contains(RecordFlags::CUSTOM_FIELD_POS));

    let natural = backend.new_struct_type("struct natural");
    backend.complete_struct_or_union(
        &natural,
        &[FieldSpec::new("a", &int), FieldSpec::new("b", &int).at(4)],
        None,
        None,
        StructFlags::empty(),
        None,
    )?;
    let layout = natural.record_layout().ok_or_else(|| anyhow::anyhow!("opaque"))?;
    assert!(!layout.flags().contains(RecordFlags::CUSTOM_FIELD_POS));

    let strict = backend.new_struct_type("struct strict");
    let result = backend.complete_struct_or_union(
        &strict,
        &[FieldSpec::new("a", &int), FieldSpec::new("b", &int).at(8)],
        None,
        None,
        StructFlags::STD_FIELD_POS,
        None,
    );
    assert!(result.is_err_and(|e| e.is_type_error()));
    Ok(())
}

fn unnamed_bitfield_struct(backend: &Backend) -> anyhow::Result<CType> {
    let char_t = backend.new_primitive_type("char")?;
    let int = backend.new_primitive_type("int")?;
    let s = backend.new_struct_type("struct pad");
    backend.complete_struct_or_union(
        &s,
        &[FieldSpec::new("a", &char_t), FieldSpec::new("", &int).bits(3)],
        None,
        None,
        StructFlags::empty(),
        None,
    )?;
    Ok(s)
}

#[test]
fn test_gcc_arm_unnamed_bitfield_raises_alignment() -> anyhow::Result<()> {
    let x86 = Backend::with_profile(profile(BitfieldRule::GccX86));
    let s = unnamed_bitfield_struct(&x86)?;
    assert_eq!((x86.sizeof(&s)?, x86.alignof(&s)?), (2, 1));

    let arm = Backend::with_profile(profile(BitfieldRule::GccArm));
    let s = unnamed_bitfield_struct(&arm)?;
    assert_eq!((arm.sizeof(&s)?, arm.alignof(&s)?), (4, 4));
    Ok(())
}

#[test]
fn test_big_endian_bitshift_counts_from_msb() -> anyhow::Result<()> {
    let backend = Backend::with_profile(AbiProfile {
        bitfields: BitfieldRule::GccX86,
        endian: Endian::Big,
        pack: None,
    });
    let s = bitfield_struct(&backend)?;
    let layout = s.record_layout().ok_or_else(|| anyhow::anyhow!("opaque"))?;
    let b1 = layout.field("b1").ok_or_else(|| anyhow::anyhow!("b1"))?;
    let b2 = layout.field("b2").ok_or_else(|| anyhow::anyhow!("b2"))?;
    assert_eq!((b1.offset(), b1.bitshift()), (0, 15));
    assert_eq!((b2.offset(), b2.bitshift()), (0, 8));
    assert_eq!(backend.sizeof(&s)?, 4);
    Ok(())
}
