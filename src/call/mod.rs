//! Calls into native code and callbacks out of it, through libffi.
//!
//! Arguments are marshalled into one aligned slot each, the call goes
//! through a prepared `ffi_cif`, and the result is read back as a value of
//! the declared result type. Integral values narrower than `ffi_arg` cross
//! the boundary widened to it, in both directions.

pub mod callback;
mod errno;
pub(crate) mod ffi_types;

use std::ffi::c_void;
use std::mem::{align_of, size_of};

use libffi::raw;

use crate::cdata::access::{pointer_from_value, write_value};
use crate::cdata::memory::{self, MemoryBlock};
use crate::cdata::{CData, newp};
use crate::convert::Scalar;
use crate::convert::buffer::{decode_int, encode_int};
use crate::convert::decode_primitive;
use crate::ctype::registry::{new_array_type, new_pointer_type, primitive};
use crate::ctype::{CType, CTypeKind, PrimitiveClass, PrimitiveKind};
use crate::error::{Error, Result};
use crate::logging::trace;
use crate::value::Value;

pub use callback::{CallbackOptions, DiagnosticSink, HostFunction, OnError, callback};
pub use errno::{get_errno, set_errno};

use ffi_types::CallInterface;

/// The platform's default calling convention, used by function types
/// unless another one is given.
pub const DEFAULT_ABI: i32 = raw::ffi_abi_FFI_DEFAULT_ABI as i32;

const ARG_SLOT: usize = size_of::<raw::ffi_arg>();

/// Result buffers are at least this large and this aligned.
const RESULT_MIN: usize = 16;

/// Size and signedness of an integral type that travels widened.
fn widened(ct: &CType) -> Option<(usize, bool)> {
    let kind = match ct.repr_kind() {
        CTypeKind::Primitive(kind) => *kind,
        CTypeKind::Enum(_) => ct.enum_base()?.primitive()?,
        _ => return None,
    };
    (kind.is_integer_like() && kind.size() < ARG_SLOT).then(|| (kind.size(), kind.is_signed()))
}

fn widen(ct: &CType, bytes: Vec<u8>) -> Result<Vec<u8>> {
    match widened(ct) {
        Some((_, signed)) => {
            let value = decode_int(&bytes, signed)?;
            Ok((value as raw::ffi_arg).to_ne_bytes().to_vec())
        }
        None => Ok(bytes),
    }
}

fn narrow(ct: &CType, raw_bytes: &[u8]) -> Result<Vec<u8>> {
    match widened(ct) {
        Some((size, _)) => {
            let widened = decode_int(&raw_bytes[..ARG_SLOT], false)?;
            let mut out = vec![0u8; size];
            encode_int(widened, &mut out)?;
            Ok(out)
        }
        None => Ok(raw_bytes[..ct.sizeof()?].to_vec()),
    }
}

/// A value of type `ct` out of its raw bytes, as received from native code.
fn value_from_bytes(ct: &CType, bytes: &[u8]) -> Result<Value> {
    match ct.repr_kind() {
        CTypeKind::Void => Ok(Value::None),
        CTypeKind::Primitive(_) | CTypeKind::Enum(_) => decode_primitive(ct, bytes),
        CTypeKind::Pointer(_) | CTypeKind::Function(_) => {
            let address = decode_int(bytes, false)? as usize;
            Ok(Value::CData(CData::foreign(ct.clone(), address, true)))
        }
        CTypeKind::Struct(_) | CTypeKind::Union(_) => {
            let block = MemoryBlock::from_bytes(bytes, ct.alignof()?)?;
            Ok(Value::CData(CData::owned(ct.clone(), block, None)))
        }
        CTypeKind::Array { .. } => Err(Error::type_error(format!(
            "cannot pass ctype '{}' by value",
            ct.cname()
        ))),
    }
}

/// Read a callback argument of type `ct` from the slot at `address`.
pub(crate) fn read_argument(ct: &CType, address: usize) -> Result<Value> {
    // SAFETY: libffi hands the closure one live slot per argument.
    let bytes = unsafe { memory::read(address, ct.sizeof()?) };
    value_from_bytes(ct, &bytes)
}

/// Result bytes for a callback returning `value`, widened as libffi
/// expects.
pub(crate) fn encode_result(ct: &CType, value: &Value) -> Result<Vec<u8>> {
    if ct.is_void() {
        return Ok(Vec::new());
    }
    if ct.is_pointer_like() && value.is_none() {
        return zero_result(ct);
    }
    let size = ct.sizeof()?;
    let block = MemoryBlock::new(size, ct.alignof()?)?;
    write_value(ct, block.address(), value, Some(size))?;
    // SAFETY: `block` holds `size` initialized bytes.
    let bytes = unsafe { memory::read(block.address(), size) };
    widen(ct, bytes)
}

/// The all-zero result of type `ct`.
pub(crate) fn zero_result(ct: &CType) -> Result<Vec<u8>> {
    if ct.is_void() {
        return Ok(Vec::new());
    }
    let size = if widened(ct).is_some() {
        ARG_SLOT
    } else {
        ct.sizeof()?
    };
    Ok(vec![0; size])
}

fn not_callable(ct: &CType) -> Error {
    Error::type_error(format!("cdata '{}' is not callable", ct.cname()))
}

/// Type and value actually passed for a variadic argument: C's default
/// promotions applied to the cdata's own type.
fn variadic_argument(position: usize, value: &Value) -> Result<(CType, Value)> {
    let Value::CData(cd) = value else {
        return Err(Error::type_error(format!(
            "argument {} passed in the variadic part needs to be a cdata object (got {})",
            position,
            value.type_name()
        )));
    };
    let ct = cd.ctype();
    let promoted = match ct.repr_kind() {
        CTypeKind::Array { item, .. } => return Ok((new_pointer_type(item), value.clone())),
        CTypeKind::Enum(_) => ct.enum_base().cloned().unwrap_or_else(|| ct.clone()),
        _ => ct.clone(),
    };
    let promoted = match promoted.primitive() {
        Some(kind) if kind.is_integer_like() && kind.size() < PrimitiveKind::Int.size() => {
            primitive(PrimitiveKind::Int)
        }
        Some(PrimitiveKind::Float) => primitive(PrimitiveKind::Double),
        _ => promoted,
    };
    let value = match cd.scalar()? {
        Some(Scalar::Int(v)) if !ct.is_pointer_like() => Value::Int(v),
        Some(Scalar::Float(f))
            if promoted
                .primitive()
                .is_some_and(|k| k.class() == PrimitiveClass::Float) =>
        {
            Value::Float(f)
        }
        _ => value.clone(),
    };
    Ok((promoted, value))
}

/// Whether `value` may be turned into a temporary array for a pointer
/// argument of type `ct`.
fn temporary_array_for(ct: &CType, value: &Value) -> bool {
    let Some(item) = ct.item().filter(|_| ct.is_pointer()) else {
        return false;
    };
    match value {
        Value::Bytes(_) => item.primitive() == Some(PrimitiveKind::Char),
        Value::Str(_) => item
            .primitive()
            .is_some_and(|k| k.class() == PrimitiveClass::WideChar),
        Value::List(_) => !item.is_void() && item.size_opt().is_some(),
        _ => false,
    }
}

/// Marshal one argument into a fresh slot. Temporaries the slot points
/// into are pushed to `keepalive`.
fn prepare_argument(ct: &CType, value: &Value, keepalive: &mut Vec<CData>) -> Result<MemoryBlock> {
    let size = ct.sizeof()?;
    let slot = MemoryBlock::new(
        size.max(ARG_SLOT),
        ct.alignof()?.max(align_of::<raw::ffi_arg>()),
    )?;
    if ct.is_pointer_like() {
        let address = match value {
            Value::None => 0,
            _ if temporary_array_for(ct, value) => {
                let temp = newp(&new_array_type(ct, None)?, value)?;
                let address = temp.address();
                keepalive.push(temp);
                address
            }
            _ => pointer_from_value(ct, value)?,
        };
        // SAFETY: the slot is at least pointer sized.
        unsafe { memory::write_address(slot.address(), address) };
    } else {
        write_value(ct, slot.address(), value, Some(size))?;
    }
    Ok(slot)
}

/// Call the native function `function` points to with `args`.
///
/// Fixed arguments are converted to the declared parameter types; the
/// variadic part must consist of cdata, passed with C's default argument
/// promotions.
///
/// # Safety
///
/// The address must be a function with the signature of the cdata's
/// type; whatever it does with its arguments is beyond checking.
pub unsafe fn call(function: &CData, args: &[Value]) -> Result<Value> {
    let ct = function.ctype();
    let (Some(fixed), Some(result)) = (ct.args(), ct.result()) else {
        return Err(not_callable(ct));
    };
    if function.address() == 0 {
        return Err(Error::runtime(format!(
            "cannot call null pointer pointer from cdata '{}'",
            ct.cname()
        )));
    }
    function.check_access()?;
    if ct.ellipsis() {
        if args.len() < fixed.len() {
            return Err(Error::type_error(format!(
                "'{}' expects at least {} arguments, got {}",
                ct.cname(),
                fixed.len(),
                args.len()
            )));
        }
    } else if args.len() != fixed.len() {
        return Err(Error::type_error(format!(
            "'{}' expects {} arguments, got {}",
            ct.cname(),
            fixed.len(),
            args.len()
        )));
    }

    let mut types = fixed.to_vec();
    let mut values: Vec<Value> = args[..fixed.len()].to_vec();
    for (i, arg) in args[fixed.len()..].iter().enumerate() {
        let (vt, vv) = variadic_argument(fixed.len() + i + 1, arg)?;
        types.push(vt);
        values.push(vv);
    }
    let abi = ct.abi().unwrap_or(DEFAULT_ABI);
    let per_call;
    let interface = match ct.call_interface() {
        Some(cached) if !ct.ellipsis() => match cached.get() {
            Some(interface) => interface,
            None => {
                let built = CallInterface::new(&types, result, abi, None)?;
                cached.get_or_init(|| built)
            }
        },
        _ => {
            let nfixed = ct.ellipsis().then_some(fixed.len());
            per_call = CallInterface::new(&types, result, abi, nfixed)?;
            &per_call
        }
    };

    let mut keepalive = Vec::new();
    let slots = types
        .iter()
        .zip(&values)
        .map(|(t, v)| prepare_argument(t, v, &mut keepalive))
        .collect::<Result<Vec<_>>>()?;
    let mut pointers: Vec<*mut c_void> = slots
        .iter()
        .map(|slot| slot.address() as *mut c_void)
        .collect();
    debug_assert_eq!(pointers.len(), interface.nargs());

    let result_size = result.size_opt().unwrap_or(0).max(ARG_SLOT).max(RESULT_MIN);
    let result_block = MemoryBlock::new(result_size, RESULT_MIN)?;
    trace!(function = ct.cname(), nargs = pointers.len(), "native call");
    errno::restore();
    // SAFETY: every slot holds a value of the prepared type and the result
    // buffer is large enough; the caller vouches for the function.
    unsafe {
        interface.invoke(
            function.address(),
            &mut pointers,
            result_block.address() as *mut c_void,
        );
    }
    errno::capture();
    drop(keepalive);

    if result.is_void() {
        return Ok(Value::None);
    }
    // SAFETY: libffi wrote the result into the buffer.
    let raw_bytes = unsafe { memory::read(result_block.address(), result_size) };
    value_from_bytes(result, &narrow(result, &raw_bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctype::registry::{new_function_type, new_primitive_type};

    extern "C" fn add_ints(a: i32, b: i32) -> i32 {
        a + b
    }

    extern "C" fn negate_short(a: i16) -> i16 {
        -a
    }

    fn function_cdata(args: &[&str], result: &str, code: usize) -> Result<CData> {
        let args = args
            .iter()
            .map(|name| new_primitive_type(name))
            .collect::<Result<Vec<_>>>()?;
        let ct = new_function_type(&args, &new_primitive_type(result)?, false, DEFAULT_ABI)?;
        Ok(CData::foreign(ct, code, true))
    }

    #[test]
    fn test_call_int_function() -> Result<()> {
        let f = function_cdata(&["int", "int"], "int", add_ints as usize)?;
        let result = unsafe { call(&f, &[Value::Int(40), Value::Int(2)]) }?;
        assert_eq!(result, Value::Int(42));
        Ok(())
    }

    #[test]
    fn test_interface_prepared_once() -> Result<()> {
        let f = function_cdata(&["int", "int"], "int", add_ints as usize)?;
        let cell = f.ctype().call_interface().ok_or_else(|| not_callable(f.ctype()))?;
        assert_eq!(unsafe { call(&f, &[Value::Int(1), Value::Int(2)]) }?, Value::Int(3));
        let first = cell.get().map(std::ptr::from_ref);
        assert!(first.is_some());
        assert_eq!(unsafe { call(&f, &[Value::Int(3), Value::Int(4)]) }?, Value::Int(7));
        assert_eq!(cell.get().map(std::ptr::from_ref), first);
        Ok(())
    }

    #[test]
    fn test_narrow_result_sign() -> Result<()> {
        let f = function_cdata(&["short"], "short", negate_short as usize)?;
        let result = unsafe { call(&f, &[Value::Int(5)]) }?;
        assert_eq!(result, Value::Int(-5));
        Ok(())
    }

    #[test]
    fn test_arity_mismatch() -> Result<()> {
        let f = function_cdata(&["int", "int"], "int", add_ints as usize)?;
        let err = unsafe { call(&f, &[Value::Int(1)]) }.err();
        assert_eq!(
            err.as_ref().map(Error::message),
            Some("'int(*)(int, int)' expects 2 arguments, got 1")
        );
        Ok(())
    }

    #[test]
    fn test_null_function_pointer() -> Result<()> {
        let f = function_cdata(&["int", "int"], "int", 0)?;
        let err = unsafe { call(&f, &[Value::Int(1), Value::Int(2)]) }.err();
        assert!(err.is_some_and(|e| e.is_runtime()));
        Ok(())
    }

    #[test]
    fn test_widen_round_trip() -> Result<()> {
        let short = new_primitive_type("short")?;
        let widened = widen(&short, (-3i16).to_ne_bytes().to_vec())?;
        assert_eq!(widened.len(), ARG_SLOT);
        assert_eq!(narrow(&short, &widened)?, (-3i16).to_ne_bytes().to_vec());
        Ok(())
    }
}
