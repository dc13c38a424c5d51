//! Indexing, slicing, member access, arithmetic and comparisons.

use std::cmp::Ordering;

use crate::convert::{Scalar, decode_primitive};
use crate::ctype::registry::{new_array_type, new_pointer_type};
use crate::ctype::CType;
use crate::error::{Error, Result};
use crate::layout::Field;
use crate::value::{Complex, Value};

use super::access::{read_field, read_value, write_field, write_value};
use super::{CData, Storage, ViewKind, memory};

/// Bounds of `cdata[start:stop]`. A step is never supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slice {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl Slice {
    pub fn new(start: i64, stop: i64) -> Self {
        Self {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
    }

    /// `[:]`
    pub fn full() -> Self {
        Self::default()
    }
}

fn null_deref(ct: &CType) -> Error {
    Error::runtime(format!(
        "cannot dereference null pointer from cdata '{}'",
        ct.cname()
    ))
}

impl CData {
    /// Item count of an array cdata.
    pub fn len(&self) -> Result<usize> {
        let ct = self.ctype();
        if ct.is_array()
            && let Some(n) = ct.length().or(self.explicit_length())
        {
            return Ok(n);
        }
        Err(Error::type_error(format!(
            "cdata of type '{}' has no len()",
            ct.cname()
        )))
    }

    /// The host value of a primitive or enum cdata; any other cdata
    /// stands for itself.
    pub fn value(&self) -> Result<Value> {
        let ct = self.ctype();
        if ct.primitive().is_some() || ct.is_enum() {
            let bytes = self.raw_bytes()?;
            return decode_primitive(ct, &bytes);
        }
        Ok(Value::CData(self.clone()))
    }

    fn item_type(&self) -> Result<&CType> {
        let ct = self.ctype();
        match ct.item() {
            Some(item) if !item.is_void() => Ok(item),
            _ => Err(Error::type_error(format!(
                "cdata of type '{}' cannot be indexed",
                ct.cname()
            ))),
        }
    }

    fn element_address(&self, index: i64) -> Result<usize> {
        let ct = self.ctype();
        let item = self.item_type()?;
        if ct.is_array() {
            if index < 0 {
                return Err(Error::index_error("negative index"));
            }
            let n = self.len()?;
            if index as u64 >= n as u64 {
                return Err(Error::index_error(format!(
                    "index too large for cdata '{}' (expected {} < {})",
                    ct.cname(),
                    index,
                    n
                )));
            }
        } else if self.address() == 0 {
            return Err(null_deref(ct));
        }
        self.check_access()?;
        let offset = (index as isize).wrapping_mul(item.sizeof()? as isize);
        Ok(self.address().wrapping_add_signed(offset))
    }

    /// `cdata[index]`.
    pub fn get(&self, index: i64) -> Result<Value> {
        let address = self.element_address(index)?;
        let item = self.item_type()?;
        if item.is_struct_or_union()
            && index == 0
            && matches!(self.storage(), Storage::Owned(_))
        {
            if item.is_opaque() {
                return Err(super::access::incomplete(item));
            }
            return Ok(Value::CData(CData::view(
                item.clone(),
                address,
                self,
                ViewKind::Member,
                None,
                self.extent(),
            )));
        }
        read_value(item, address, self)
    }

    /// Bytes known to be available from `address` on, which lies inside
    /// or past what this cdata designates.
    fn extent_from(&self, address: usize) -> Option<usize> {
        let extent = self.extent()?;
        Some(
            address
                .checked_sub(self.address())
                .map_or(0, |offset| extent.saturating_sub(offset)),
        )
    }

    /// `cdata[index] = value`.
    pub fn set(&self, index: i64, value: &Value) -> Result<()> {
        let address = self.element_address(index)?;
        write_value(self.item_type()?, address, value, self.extent_from(address))
    }

    fn slice_bounds(&self, range: Slice) -> Result<(usize, usize)> {
        if range.step.is_some() {
            return Err(Error::index_error("slice with step not supported"));
        }
        let known = if self.ctype().is_array() {
            Some(self.len()?)
        } else {
            None
        };
        let (start, stop) = match (range.start, range.stop, known) {
            (None, None, Some(n)) => (0, n as i64),
            (None, Some(b), Some(_)) => (0, b),
            (None, _, _) => return Err(Error::index_error("slice start must be specified")),
            (_, None, _) => return Err(Error::index_error("slice stop must be specified")),
            (Some(a), Some(b), _) => (a, b),
        };
        if start > stop {
            return Err(Error::index_error("slice start > stop"));
        }
        if start < 0 {
            return Err(Error::index_error("negative index"));
        }
        if let Some(n) = known
            && stop as u64 > n as u64
        {
            return Err(Error::index_error(format!(
                "index too large (expected {} <= {})",
                stop, n
            )));
        }
        if known.is_none() && self.address() == 0 {
            return Err(null_deref(self.ctype()));
        }
        Ok((start as usize, stop as usize))
    }

    /// `cdata[start:stop]`: an array view sharing this cdata's memory.
    pub fn slice(&self, range: Slice) -> Result<CData> {
        let item = self.item_type()?.clone();
        let (start, stop) = self.slice_bounds(range)?;
        self.check_access()?;
        let item_size = item.sizeof()?;
        let ct = new_array_type(&new_pointer_type(&item), None)?;
        let length = stop - start;
        Ok(CData::view(
            ct,
            self.address() + start * item_size,
            self,
            ViewKind::Slice,
            Some(length),
            Some(length * item_size),
        ))
    }

    /// `cdata[start:stop] = value`, from a list of exactly the slice
    /// length or from an array cdata of the same item type and length.
    pub fn set_slice(&self, range: Slice, value: &Value) -> Result<()> {
        let target = self.slice(range)?;
        let n = target.len()?;
        let item = self.item_type()?.clone();
        let item_size = item.sizeof()?;
        match value {
            Value::List(items) => {
                if items.len() != n {
                    return Err(Error::value_error(format!(
                        "need {} values to unpack, got {}",
                        n,
                        items.len()
                    )));
                }
                for (i, v) in items.iter().enumerate() {
                    write_value(
                        &item,
                        target.address() + i * item_size,
                        v,
                        Some((n - i) * item_size),
                    )?;
                }
                Ok(())
            }
            Value::CData(src) if src.ctype().is_array() && src.ctype().item() == Some(&item) => {
                let m = src.len()?;
                if m != n {
                    return Err(Error::value_error(format!(
                        "need {} values to unpack, got {}",
                        n, m
                    )));
                }
                src.check_access()?;
                // SAFETY: both ranges hold `n` live items.
                unsafe { memory::copy(target.address(), src.address(), n * item_size) };
                Ok(())
            }
            _ => Err(crate::convert::convert_error(
                target.ctype(),
                "list or tuple",
                value,
            )),
        }
    }

    /// The record a member access refers to, and its base address;
    /// pointers to records dereference once.
    fn record_base(&self, name: &str) -> Result<(&CType, usize)> {
        let ct = self.ctype();
        let record = if ct.is_struct_or_union() {
            ct
        } else {
            match ct.item() {
                Some(item) if ct.is_pointer() && item.is_struct_or_union() => item,
                _ => {
                    return Err(Error::attribute_error(format!(
                        "cdata '{}' has no attribute '{}'",
                        ct.cname(),
                        name
                    )));
                }
            }
        };
        if record.is_opaque() {
            return Err(Error::attribute_error(format!(
                "cdata '{}' points to an opaque type: cannot read fields",
                ct.cname()
            )));
        }
        if ct.is_pointer() && self.address() == 0 {
            return Err(null_deref(ct));
        }
        self.check_access()?;
        Ok((record, self.address()))
    }

    fn lookup_field<'a>(&self, record: &'a CType, name: &str) -> Result<&'a Field> {
        record
            .record_layout()
            .and_then(|l| l.field(name))
            .ok_or_else(|| {
                Error::attribute_error(format!(
                    "cdata '{}' has no field '{}'",
                    self.ctype().cname(),
                    name
                ))
            })
    }

    /// `cdata.name`.
    pub fn field(&self, name: &str) -> Result<Value> {
        let (record, base) = self.record_base(name)?;
        let field = self.lookup_field(record, name)?;
        read_field(field, base, self)
    }

    /// `cdata.name = value`.
    pub fn set_field(&self, name: &str, value: &Value) -> Result<()> {
        let (record, base) = self.record_base(name)?;
        let field = self.lookup_field(record, name)?;
        write_field(field, base, value, self.extent())
    }

    /// Pointer type the address arithmetic of this cdata works in, and
    /// the item stride (1 for `void *`).
    fn pointer_stride(&self, op: &str) -> Result<(CType, usize)> {
        let ct = self.ctype();
        let item = match ct.item() {
            Some(item) => item,
            None => {
                return Err(Error::type_error(format!(
                    "unsupported operand for {}: cdata '{}'",
                    op,
                    ct.cname()
                )));
            }
        };
        let stride = if item.is_void() { 1 } else { item.sizeof()? };
        let pointer = if ct.is_array() {
            new_pointer_type(item)
        } else {
            ct.clone()
        };
        Ok((pointer, stride))
    }

    /// `cdata + offset`, in items.
    pub fn add(&self, offset: i64) -> Result<CData> {
        let (pointer, stride) = self.pointer_stride("+")?;
        let delta = (offset as isize).wrapping_mul(stride as isize);
        Ok(CData::view(
            pointer,
            self.address().wrapping_add_signed(delta),
            self,
            ViewKind::Derived,
            None,
            None,
        ))
    }

    /// `cdata - offset`, in items.
    pub fn sub(&self, offset: i64) -> Result<CData> {
        self.add(offset.wrapping_neg())
    }

    /// `self - other`: the distance in items between two pointers.
    pub fn diff(&self, other: &CData) -> Result<i64> {
        let mismatch = || {
            Error::type_error(format!(
                "cannot subtract cdata '{}' and cdata '{}'",
                self.ctype().cname(),
                other.ctype().cname()
            ))
        };
        let (a, stride) = self.pointer_stride("-").map_err(|_| mismatch())?;
        let (b, _) = other.pointer_stride("-").map_err(|_| mismatch())?;
        if a != b && !a.is_void_pointer() && !b.is_void_pointer() {
            return Err(mismatch());
        }
        let distance = (self.address() as isize).wrapping_sub(other.address() as isize);
        let stride = stride.max(1) as isize;
        if distance % stride != 0 {
            return Err(Error::value_error(
                "pointer subtraction: the distance between the two pointers is not a \
                 multiple of the item size",
            ));
        }
        Ok((distance / stride) as i64)
    }

    fn unsupported(&self, what: &str) -> Error {
        Error::type_error(format!(
            "{}() not supported on cdata '{}'",
            what,
            self.ctype().cname()
        ))
    }

    fn primitive_scalar(&self, what: &str) -> Result<Scalar> {
        match self.scalar()? {
            Some(Scalar::Address(_)) | None => Err(self.unsupported(what)),
            Some(s) => Ok(s),
        }
    }

    /// `int(cdata)`.
    pub fn to_int(&self) -> Result<i128> {
        match self.primitive_scalar("int")? {
            Scalar::Int(v) => Ok(v),
            Scalar::Float(f) => {
                if f.is_nan() {
                    return Err(Error::value_error("cannot convert float NaN to integer"));
                }
                if f.is_infinite() {
                    return Err(Error::overflow("cannot convert float infinity to integer"));
                }
                Ok(f.trunc() as i128)
            }
            _ => Err(self.unsupported("int")),
        }
    }

    /// `float(cdata)`.
    pub fn to_float(&self) -> Result<f64> {
        match self.primitive_scalar("float")? {
            Scalar::Int(v) => Ok(v as f64),
            Scalar::Float(f) => Ok(f),
            _ => Err(self.unsupported("float")),
        }
    }

    /// `complex(cdata)`.
    pub fn to_complex(&self) -> Result<Complex> {
        match self.primitive_scalar("complex")? {
            Scalar::Int(v) => Ok(Complex::new(v as f64, 0.0)),
            Scalar::Float(f) => Ok(Complex::new(f, 0.0)),
            Scalar::Complex(c) => Ok(c),
            Scalar::Address(_) => Err(self.unsupported("complex")),
        }
    }

    /// Truth value: non-NULL pointers, non-zero numbers, any record.
    pub fn is_true(&self) -> Result<bool> {
        Ok(match self.scalar()? {
            Some(Scalar::Int(v)) => v != 0,
            Some(Scalar::Float(f)) => f != 0.0,
            Some(Scalar::Complex(c)) => c.re != 0.0 || c.im != 0.0,
            Some(Scalar::Address(a)) => a != 0,
            None => true,
        })
    }

    fn pointers_comparable(&self, other: &CData) -> bool {
        let decay = |cd: &CData| match cd.ctype().item() {
            Some(item) if cd.ctype().is_array() => new_pointer_type(item),
            _ => cd.ctype().clone(),
        };
        let (a, b) = (decay(self), decay(other));
        a == b || a.is_generic_pointer() || b.is_generic_pointer()
    }

    /// `self == other`. Never fails for non-cdata operands; in strict mode
    /// pointers to unrelated types are never equal.
    pub fn equals(&self, other: &Value, strict: bool) -> Result<bool> {
        let mine = self.scalar()?;
        match other {
            Value::CData(o) => {
                let theirs = o.scalar()?;
                Ok(match (mine, theirs) {
                    (Some(Scalar::Address(a)), Some(Scalar::Address(b))) => {
                        a == b && (!strict || self.pointers_comparable(o))
                    }
                    (Some(Scalar::Address(_)), _) | (_, Some(Scalar::Address(_))) => false,
                    (Some(a), Some(b)) => scalar_cmp(a, b) == Some(Ordering::Equal),
                    (None, None) => self.address() == o.address() && self.ctype() == o.ctype(),
                    _ => false,
                })
            }
            Value::Int(_) | Value::Bool(_) | Value::Float(_) | Value::Complex(_) => {
                let theirs = match other {
                    Value::Float(f) => Scalar::Float(*f),
                    Value::Complex(c) => Scalar::Complex(*c),
                    _ => Scalar::Int(other.as_int().unwrap_or(0)),
                };
                Ok(match mine {
                    Some(Scalar::Address(_)) | None => false,
                    Some(s) => scalar_cmp(s, theirs) == Some(Ordering::Equal),
                })
            }
            _ => Ok(false),
        }
    }

    /// Ordering between two cdata: numbers by value, pointers by address.
    pub fn compare(&self, other: &CData, strict: bool) -> Result<Ordering> {
        let incomparable = || {
            Error::type_error(format!(
                "cannot compare cdata '{}' and cdata '{}'",
                self.ctype().cname(),
                other.ctype().cname()
            ))
        };
        match (self.scalar()?, other.scalar()?) {
            (Some(Scalar::Address(a)), Some(Scalar::Address(b))) => {
                if strict && !self.pointers_comparable(other) {
                    return Err(incomparable());
                }
                Ok(a.cmp(&b))
            }
            (None, None) => Ok(self.address().cmp(&other.address())),
            (Some(Scalar::Address(_)), _) | (_, Some(Scalar::Address(_))) => Err(incomparable()),
            (Some(a), Some(b)) => scalar_cmp(a, b).ok_or_else(incomparable),
            _ => Err(incomparable()),
        }
    }

    /// Hash consistent with [`equals`](Self::equals): pointers hash by
    /// address, numbers by value.
    pub fn hash_key(&self) -> Result<u64> {
        Ok(match self.scalar()? {
            Some(Scalar::Address(a)) => a as u64,
            Some(Scalar::Int(v)) => v as u64,
            Some(Scalar::Float(f)) if f.fract() == 0.0 && f.abs() < 9.2e18 => f as i64 as u64,
            Some(Scalar::Float(f)) => f.to_bits(),
            Some(Scalar::Complex(c)) => c.re.to_bits() ^ c.im.to_bits().rotate_left(17),
            None => self.address() as u64,
        })
    }
}

fn scalar_cmp(a: Scalar, b: Scalar) -> Option<Ordering> {
    match (a, b) {
        (Scalar::Int(x), Scalar::Int(y)) => Some(x.cmp(&y)),
        (Scalar::Int(x), Scalar::Float(y)) => (x as f64).partial_cmp(&y),
        (Scalar::Float(x), Scalar::Int(y)) => x.partial_cmp(&(y as f64)),
        (Scalar::Float(x), Scalar::Float(y)) => x.partial_cmp(&y),
        (Scalar::Complex(x), Scalar::Complex(y)) => (x == y).then_some(Ordering::Equal),
        (Scalar::Complex(x), Scalar::Float(y)) | (Scalar::Float(y), Scalar::Complex(x)) => {
            (x.im == 0.0 && x.re == y).then_some(Ordering::Equal)
        }
        (Scalar::Complex(x), Scalar::Int(y)) | (Scalar::Int(y), Scalar::Complex(x)) => {
            (x.im == 0.0 && x.re == y as f64).then_some(Ordering::Equal)
        }
        _ => None,
    }
}
