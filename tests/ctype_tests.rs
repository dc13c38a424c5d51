//! Type construction and introspection through the backend facade.

use cffi_backend::prelude::*;

#[test]
fn test_primitive_introspection() -> anyhow::Result<()> {
    let backend = Backend::native();
    let int = backend.new_primitive_type("int")?;
    assert_eq!(int.kind(), TypeKind::Primitive);
    assert_eq!(int.kind().as_str(), "primitive");
    assert_eq!(int.cname(), "int");
    assert_eq!(backend.sizeof(&int)?, 4);
    assert_eq!(backend.alignof(&int)?, 4);

    let err = backend.new_primitive_type("int128").err();
    assert!(err.is_some_and(|e| e.kind() == ErrorKind::KeyError));
    Ok(())
}

#[test]
fn test_void_has_no_size() -> anyhow::Result<()> {
    let backend = Backend::native();
    let void = backend.new_void_type();
    assert_eq!(void.kind().as_str(), "void");
    assert!(backend.sizeof(&void).is_err_and(|e| e.is_value_error()));
    let vp = backend.new_pointer_type(&void);
    assert_eq!(vp.cname(), "void *");
    assert_eq!(backend.sizeof(&vp)?, size_of::<usize>());
    Ok(())
}

#[test]
fn test_structural_types_are_interned() -> anyhow::Result<()> {
    let backend = Backend::native();
    let char_t = backend.new_primitive_type("char")?;
    let a = backend.new_array_type(&backend.new_pointer_type(&char_t), Some(8))?;
    let b = backend.new_array_type(&backend.new_pointer_type(&char_t), Some(8))?;
    assert_eq!(a, b);
    assert_eq!(a.item(), Some(&char_t));
    assert_eq!(a.length(), Some(8));
    Ok(())
}

#[test]
fn test_enum_first_match() -> anyhow::Result<()> {
    let backend = Backend::native();
    let uint = backend.new_primitive_type("unsigned int")?;
    let e = backend.new_enum_type("enum e", &["ab", "cd"], &[5, 5], &uint)?;
    assert_eq!(e.kind().as_str(), "enum");

    let elements = e.elements().ok_or_else(|| anyhow::anyhow!("no elements"))?;
    assert_eq!(elements.len(), 1);
    assert_eq!(elements.get(&5).map(String::as_str), Some("ab"));

    let relements = e.relements().ok_or_else(|| anyhow::anyhow!("no relements"))?;
    assert_eq!(relements.len(), 2);
    assert_eq!(relements.get("ab"), Some(&5));
    assert_eq!(relements.get("cd"), Some(&5));

    let cd = backend.cast(&e, &Value::Int(5))?;
    assert_eq!(backend.string(&cd, None)?, Value::Str("ab".to_string()));
    Ok(())
}

#[test]
fn test_enum_value_must_fit_base() -> anyhow::Result<()> {
    let backend = Backend::native();
    let uchar = backend.new_primitive_type("unsigned char")?;
    let err = backend.new_enum_type("enum small", &["big"], &[256], &uchar).err();
    assert!(err.is_some_and(|e| e.is_overflow()));
    Ok(())
}

#[test]
fn test_function_type_introspection() -> anyhow::Result<()> {
    let backend = Backend::native();
    let int = backend.new_primitive_type("int")?;
    let double = backend.new_primitive_type("double")?;
    let f = backend.new_function_type(&[int.clone(), double.clone()], &double, true, None)?;
    assert_eq!(f.kind().as_str(), "function");
    assert_eq!(f.cname(), "double(*)(int, double, ...)");
    assert_eq!(f.args().map(<[CType]>::len), Some(2));
    assert_eq!(f.result(), Some(&double));
    assert!(f.ellipsis());
    assert_eq!(f.abi(), Some(cffi_backend::call::DEFAULT_ABI));
    Ok(())
}

#[test]
fn test_getcname_inserts_declarator() -> anyhow::Result<()> {
    let backend = Backend::native();
    let int = backend.new_primitive_type("int")?;
    let p = backend.new_pointer_type(&int);
    assert_eq!(backend.getcname(&p, "x"), "int *x");
    let arr = backend.new_array_type(&p, Some(3))?;
    assert_eq!(backend.getcname(&arr, "(*)"), "int(*)[3]");
    Ok(())
}
