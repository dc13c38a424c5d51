//! Property-based tests for integer conversion and pointer arithmetic.

use proptest::prelude::*;
use cffi_backend::prelude::*;

fn int_of(value: Value) -> i128 {
    value.as_int().unwrap()
}

proptest! {
    #[test]
    fn cast_wraps_to_signed_char(v in any::<i64>()) {
        let backend = Backend::native();
        let ct = backend.new_primitive_type("signed char").unwrap();
        let cd = backend.cast(&ct, &Value::Int(i128::from(v))).unwrap();
        prop_assert_eq!(int_of(cd.value().unwrap()), i128::from(v as i8));
    }

    #[test]
    fn cast_wraps_to_unsigned_short(v in any::<i64>()) {
        let backend = Backend::native();
        let ct = backend.new_primitive_type("unsigned short").unwrap();
        let cd = backend.cast(&ct, &Value::Int(i128::from(v))).unwrap();
        prop_assert_eq!(int_of(cd.value().unwrap()), i128::from(v as u16));
    }

    #[test]
    fn cast_wraps_to_int64(v in any::<i128>()) {
        let backend = Backend::native();
        let ct = backend.new_primitive_type("int64_t").unwrap();
        let cd = backend.cast(&ct, &Value::Int(v)).unwrap();
        prop_assert_eq!(int_of(cd.value().unwrap()), i128::from(v as i64));
    }

    #[test]
    fn newp_int_accepts_exactly_its_range(v in -(1i64 << 33)..(1i64 << 33)) {
        let backend = Backend::native();
        let int = backend.new_primitive_type("int").unwrap();
        let result = backend.newp(&backend.new_pointer_type(&int), &Value::Int(i128::from(v)));
        if i32::try_from(v).is_ok() {
            let p = result.unwrap();
            prop_assert_eq!(int_of(p.get(0).unwrap()), i128::from(v));
        } else {
            prop_assert!(result.is_err_and(|e| e.is_overflow()));
        }
    }

    #[test]
    fn newp_unsigned_char_rejects_negative(v in -1000i64..1000) {
        let backend = Backend::native();
        let uchar = backend.new_primitive_type("unsigned char").unwrap();
        let result = backend.newp(&backend.new_pointer_type(&uchar), &Value::Int(i128::from(v)));
        prop_assert_eq!(result.is_ok(), (0..=255).contains(&v));
    }

    #[test]
    fn pointer_difference_inverts_addition(len in 1i64..64, a in 0i64..64, b in 0i64..64) {
        let (a, b) = (a % len, b % len);
        let backend = Backend::native();
        let long = backend.new_primitive_type("long").unwrap();
        let long_p = backend.new_pointer_type(&long);
        let array_t = backend.new_array_type(&long_p, Some(len)).unwrap();
        let array = backend.newp(&array_t, &Value::None).unwrap();
        let base = backend.cast(&long_p, &Value::CData(array.clone())).unwrap();
        let pa = base.add(a).unwrap();
        let pb = base.add(b).unwrap();
        prop_assert_eq!(pa.diff(&pb).unwrap(), a - b);
        prop_assert_eq!(pa.sub(a).unwrap().address(), array.address());
    }
}
