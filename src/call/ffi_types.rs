//! libffi type descriptors and prepared call interfaces.

use std::ffi::{c_uint, c_void};
use std::ptr;

use libffi::middle::Type;
use libffi::raw;

use crate::cdata::access::incomplete;
use crate::ctype::{CType, CTypeKind, PrimitiveClass, PrimitiveKind, TypeKind};
use crate::error::{Error, Result};
use crate::layout::{BS_EMPTY_ARRAY, RecordFlags};

/// Where a type appears in a signature; only used in messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    Argument,
    Result,
}

impl Position {
    fn as_str(self) -> &'static str {
        match self {
            Position::Argument => "argument",
            Position::Result => "return value",
        }
    }
}

fn unsupported(ct: &CType, position: Position, reason: &str) -> Error {
    Error::not_implemented(format!(
        "ctype '{}' not supported as {} ({})",
        ct.cname(),
        position.as_str(),
        reason
    ))
}

fn integer_type(size: usize, signed: bool) -> Option<Type> {
    Some(match (size, signed) {
        (1, true) => Type::i8(),
        (1, false) => Type::u8(),
        (2, true) => Type::i16(),
        (2, false) => Type::u16(),
        (4, true) => Type::i32(),
        (4, false) => Type::u32(),
        (8, true) => Type::i64(),
        (8, false) => Type::u64(),
        _ => return None,
    })
}

#[cfg(all(any(target_arch = "x86_64", target_arch = "x86"), not(target_env = "msvc")))]
fn long_double_type(_ct: &CType, _position: Position) -> Result<Type> {
    Ok(Type::longdouble())
}

#[cfg(not(all(any(target_arch = "x86_64", target_arch = "x86"), not(target_env = "msvc"))))]
fn long_double_type(ct: &CType, position: Position) -> Result<Type> {
    use crate::ctype::{LONG_DOUBLE_FORMAT, LongDoubleFormat};

    match LONG_DOUBLE_FORMAT {
        LongDoubleFormat::Double => Ok(Type::f64()),
        _ => Err(unsupported(
            ct,
            position,
            "long double is not supported in calls on this platform",
        )),
    }
}

fn primitive_type(ct: &CType, kind: PrimitiveKind, position: Position) -> Result<Type> {
    let ty = match kind.class() {
        PrimitiveClass::Float if kind == PrimitiveKind::Float => Some(Type::f32()),
        PrimitiveClass::Float => Some(Type::f64()),
        PrimitiveClass::LongDouble => return long_double_type(ct, position),
        PrimitiveClass::Complex => {
            return Err(unsupported(
                ct,
                position,
                "complex numbers are not supported in calls",
            ));
        }
        _ => integer_type(kind.size(), kind.is_signed()),
    };
    ty.ok_or_else(|| unsupported(ct, position, "unexpected primitive size"))
}

fn record_type(ct: &CType, position: Position) -> Result<Type> {
    let Some(layout) = ct.record_layout() else {
        return Err(incomplete(ct));
    };
    if ct.kind() == TypeKind::Union {
        return Err(unsupported(ct, position, "it is a union"));
    }
    let flags = layout.flags();
    if flags.contains(RecordFlags::CUSTOM_FIELD_POS) {
        return Err(unsupported(
            ct,
            position,
            "it is a struct declared with \"...;\"",
        ));
    }
    if flags.contains(RecordFlags::WITH_PACKED_CHANGE) {
        return Err(unsupported(ct, position, "it is a 'packed' structure"));
    }
    if flags.contains(RecordFlags::WITH_BITFIELDS) {
        return Err(unsupported(ct, position, "it is a struct with bit fields"));
    }
    if flags.contains(RecordFlags::WITH_VAR_ARRAY)
        || layout.fields().iter().any(|f| f.bitshift() == BS_EMPTY_ARRAY)
    {
        return Err(unsupported(
            ct,
            position,
            "it is a struct with a zero-length array",
        ));
    }
    if layout.fields().is_empty() {
        return Err(unsupported(ct, position, "it is an empty struct"));
    }

    let mut elements = Vec::with_capacity(layout.fields().len());
    for field in layout.fields() {
        let fct = field.ctype();
        match fct.repr_kind() {
            CTypeKind::Array {
                item,
                length: Some(n),
            } => {
                let item_type = element_type(item, position)?;
                elements.extend(std::iter::repeat_n(item_type, *n));
            }
            _ => elements.push(element_type(fct, position)?),
        }
    }
    let ty = Type::structure(elements);

    // libffi computes the layout again on its own; both must agree.
    let (size, alignment) = laid_out(&ty)?;
    if size != layout.size() || alignment != layout.alignment() {
        return Err(unsupported(
            ct,
            position,
            &format!(
                "libffi computes size {} and alignment {}, not {} and {}",
                size,
                alignment,
                layout.size(),
                layout.alignment()
            ),
        ));
    }
    Ok(ty)
}

fn element_type(ct: &CType, position: Position) -> Result<Type> {
    match ct.repr_kind() {
        CTypeKind::Array {
            item,
            length: Some(n),
        } => {
            let item_type = element_type(item, position)?;
            Ok(Type::structure(std::iter::repeat_n(item_type, *n)))
        }
        _ => ffi_type(ct, position),
    }
}

/// Size and alignment libffi gives `ty`, computed by preparing a dummy
/// interface returning it.
fn laid_out(ty: &Type) -> Result<(usize, usize)> {
    let mut cif = raw::ffi_cif::default();
    // SAFETY: `ty` is a well-formed descriptor that outlives this call; the
    // interface has no arguments.
    let status = unsafe {
        raw::ffi_prep_cif(
            &mut cif,
            raw::ffi_abi_FFI_DEFAULT_ABI,
            0,
            ty.as_raw_ptr(),
            ptr::null_mut(),
        )
    };
    if status != raw::ffi_status_FFI_OK {
        return Err(Error::not_implemented("libffi rejected a struct type"));
    }
    // SAFETY: preparation filled in the size and alignment of `ty`.
    let raw_ty = unsafe { &*ty.as_raw_ptr() };
    Ok((raw_ty.size, usize::from(raw_ty.alignment)))
}

/// The libffi descriptor of `ct` passed or returned by value.
pub(crate) fn ffi_type(ct: &CType, position: Position) -> Result<Type> {
    match ct.repr_kind() {
        CTypeKind::Void if position == Position::Result => Ok(Type::void()),
        CTypeKind::Void => Err(Error::type_error(format!(
            "ctype 'void' not supported as {}",
            position.as_str()
        ))),
        CTypeKind::Primitive(kind) => primitive_type(ct, *kind, position),
        CTypeKind::Enum(info) => ffi_type(&info.base, position),
        CTypeKind::Pointer(_) | CTypeKind::Function(_) | CTypeKind::Array { .. } => {
            Ok(Type::pointer())
        }
        CTypeKind::Struct(_) | CTypeKind::Union(_) => record_type(ct, position),
    }
}

/// A prepared `ffi_cif` together with the descriptors it points into.
pub(crate) struct CallInterface {
    cif: Box<raw::ffi_cif>,
    atypes: Vec<*mut raw::ffi_type>,
    _args: Vec<Type>,
    _result: Type,
}

// SAFETY: after preparation the interface is only read, by libffi, and the
// descriptors it points to are owned by the same value.
unsafe impl Send for CallInterface {}
unsafe impl Sync for CallInterface {}

impl CallInterface {
    /// Prepare an interface for `args` and `result`. `fixed` is the number
    /// of non-variadic arguments of a variadic function.
    pub(crate) fn new(
        args: &[CType],
        result: &CType,
        abi: i32,
        fixed: Option<usize>,
    ) -> Result<Self> {
        let arg_types = args
            .iter()
            .map(|ct| ffi_type(ct, Position::Argument))
            .collect::<Result<Vec<_>>>()?;
        let result_type = ffi_type(result, Position::Result)?;
        let mut atypes: Vec<*mut raw::ffi_type> =
            arg_types.iter().map(Type::as_raw_ptr).collect();
        let mut cif = Box::new(raw::ffi_cif::default());
        let nargs = c_uint::try_from(args.len())
            .map_err(|_| Error::type_error("too many arguments"))?;
        let abi = abi as raw::ffi_abi;
        // SAFETY: every descriptor is owned by the returned value and the
        // pointer array has `nargs` entries.
        let status = unsafe {
            match fixed {
                Some(nfixed) => raw::ffi_prep_cif_var(
                    &mut *cif,
                    abi,
                    nfixed as c_uint,
                    nargs,
                    result_type.as_raw_ptr(),
                    atypes.as_mut_ptr(),
                ),
                None => raw::ffi_prep_cif(
                    &mut *cif,
                    abi,
                    nargs,
                    result_type.as_raw_ptr(),
                    atypes.as_mut_ptr(),
                ),
            }
        };
        if status != raw::ffi_status_FFI_OK {
            return Err(Error::not_implemented(format!(
                "libffi cannot prepare a call with abi {} (status {})",
                abi, status
            )));
        }
        Ok(Self {
            cif,
            atypes,
            _args: arg_types,
            _result: result_type,
        })
    }

    pub(crate) fn as_raw(&self) -> *mut raw::ffi_cif {
        ptr::from_ref(&*self.cif).cast_mut()
    }

    pub(crate) fn nargs(&self) -> usize {
        self.atypes.len()
    }

    /// Call the function at `code` with argument pointers `args`, writing
    /// the result to `result`.
    ///
    /// # Safety
    ///
    /// `code` must be a function of the prepared signature, every pointer
    /// in `args` must point to a value of the matching type and `result`
    /// must have room for the result widened to `ffi_arg`.
    pub(crate) unsafe fn invoke(&self, code: usize, args: &mut [*mut c_void], result: *mut c_void) {
        // SAFETY: see the function contract.
        unsafe {
            let function = std::mem::transmute::<usize, unsafe extern "C" fn()>(code);
            raw::ffi_call(self.as_raw(), Some(function), result, args.as_mut_ptr());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctype::registry::{
        complete_struct_or_union, new_primitive_type, new_struct_type, new_union_type,
    };
    use crate::layout::{AbiProfile, FieldSpec, StructFlags};

    fn record(union: bool, fields: &[FieldSpec]) -> Result<CType> {
        let ct = if union {
            new_union_type("u")
        } else {
            new_struct_type("s")
        };
        complete_struct_or_union(
            &ct,
            fields,
            None,
            None,
            StructFlags::empty(),
            None,
            &AbiProfile::native(),
        )?;
        Ok(ct)
    }

    #[test]
    fn test_plain_struct_matches_libffi() -> Result<()> {
        let int = new_primitive_type("int")?;
        let chr = new_primitive_type("char")?;
        let dbl = new_primitive_type("double")?;
        let ct = record(
            false,
            &[
                FieldSpec::new("a", &chr),
                FieldSpec::new("b", &int),
                FieldSpec::new("c", &dbl),
            ],
        )?;
        assert!(ffi_type(&ct, Position::Argument).is_ok());
        Ok(())
    }

    #[test]
    fn test_union_by_value_rejected() -> Result<()> {
        let int = new_primitive_type("int")?;
        let ct = record(true, &[FieldSpec::new("a", &int)])?;
        let err = ffi_type(&ct, Position::Argument).err();
        assert!(err.as_ref().is_some_and(Error::is_not_implemented));
        assert!(err.is_some_and(|e| e.message().ends_with("(it is a union)")));
        Ok(())
    }

    #[test]
    fn test_bitfield_struct_rejected() -> Result<()> {
        let int = new_primitive_type("int")?;
        let ct = record(false, &[FieldSpec::new("a", &int).bits(3)])?;
        let err = ffi_type(&ct, Position::Result).err();
        assert_eq!(
            err.as_ref().map(Error::message),
            Some(
                "ctype 'struct s' not supported as return value (it is a struct with bit fields)"
            )
        );
        Ok(())
    }

    #[test]
    fn test_opaque_struct_is_type_error() {
        let ct = new_struct_type("never_completed");
        assert!(ffi_type(&ct, Position::Argument).is_err_and(|e| e.is_type_error()));
    }

    #[test]
    fn test_void_only_as_result() {
        let void = crate::ctype::registry::new_void_type();
        assert!(ffi_type(&void, Position::Result).is_ok());
        assert!(ffi_type(&void, Position::Argument).is_err());
    }
}
