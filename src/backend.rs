//! The backend facade.
//!
//! [`Backend`] gathers the type constructors, instance operations, calls
//! and the library loader behind one value that carries the configured
//! layout rules, pointer comparison mode and callback diagnostic sink.

use std::cmp::Ordering;
use std::path::Path;

use crate::call::{self, CallbackOptions, DiagnosticSink, HostFunction};
use crate::cdata::{self, CBuffer, CData, Destructor, Scoped, SharedBuffer};
use crate::config::RuntimeConfig;
use crate::ctype::{self, CType, registry};
use crate::error::Result;
use crate::layout::{self, AbiProfile, FieldRef, FieldSpec, StructFlags};
use crate::library::Library;
use crate::logging::debug;
use crate::value::Value;

/// Entry point to the C type runtime.
///
/// # Example
///
/// ```ignore
/// use cffi_backend::prelude::*;
///
/// let backend = Backend::native();
/// let int = backend.new_primitive_type("int")?;
/// let p = backend.newp(&backend.new_pointer_type(&int), &Value::Int(42))?;
/// assert_eq!(p.get(0)?, Value::Int(42));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Backend {
    profile: AbiProfile,
    strict_pointers: bool,
    diagnostics: DiagnosticSink,
}

impl Backend {
    /// The host's own layout rules, lenient comparisons, diagnostics to
    /// stderr.
    pub fn native() -> Self {
        Self::default()
    }

    pub fn with_profile(profile: AbiProfile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    pub fn with_config(config: &RuntimeConfig) -> Self {
        let backend = Self {
            profile: config.profile(),
            strict_pointers: config.compare.strict_pointers,
            diagnostics: config.sink(),
        };
        debug!(profile = ?backend.profile, strict = backend.strict_pointers, "backend configured");
        backend
    }

    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_config(&RuntimeConfig::from_file(path)?))
    }

    /// Replace where callback failures are reported.
    pub fn set_diagnostic_sink(&mut self, sink: DiagnosticSink) {
        self.diagnostics = sink;
    }

    pub fn profile(&self) -> &AbiProfile {
        &self.profile
    }

    pub fn strict_pointers(&self) -> bool {
        self.strict_pointers
    }

    // Types

    pub fn new_primitive_type(&self, name: &str) -> Result<CType> {
        registry::new_primitive_type(name)
    }

    pub fn new_void_type(&self) -> CType {
        registry::new_void_type()
    }

    pub fn new_pointer_type(&self, pointee: &CType) -> CType {
        registry::new_pointer_type(pointee)
    }

    pub fn new_array_type(&self, pointer: &CType, length: Option<i64>) -> Result<CType> {
        registry::new_array_type(pointer, length)
    }

    pub fn new_struct_type(&self, tag: &str) -> CType {
        registry::new_struct_type(tag)
    }

    pub fn new_union_type(&self, tag: &str) -> CType {
        registry::new_union_type(tag)
    }

    /// Lay out `ctype` under this backend's profile; explicit `sflags`
    /// bits override the profile.
    pub fn complete_struct_or_union(
        &self,
        ctype: &CType,
        fields: &[FieldSpec],
        total_size: Option<usize>,
        total_alignment: Option<usize>,
        sflags: StructFlags,
        pack: Option<usize>,
    ) -> Result<()> {
        registry::complete_struct_or_union(
            ctype,
            fields,
            total_size,
            total_alignment,
            sflags,
            pack,
            &self.profile,
        )
    }

    pub fn new_enum_type(
        &self,
        tag: &str,
        names: &[&str],
        values: &[i128],
        base: &CType,
    ) -> Result<CType> {
        registry::new_enum_type(tag, names, values, base)
    }

    pub fn new_function_type(
        &self,
        args: &[CType],
        result: &CType,
        ellipsis: bool,
        abi: Option<i32>,
    ) -> Result<CType> {
        registry::new_function_type(args, result, ellipsis, abi.unwrap_or(call::DEFAULT_ABI))
    }

    // Introspection

    pub fn sizeof(&self, ctype: &CType) -> Result<usize> {
        ctype.sizeof()
    }

    pub fn alignof(&self, ctype: &CType) -> Result<usize> {
        ctype.alignof()
    }

    pub fn sizeof_cdata(&self, cdata: &CData) -> Result<usize> {
        cdata::sizeof_cdata(cdata)
    }

    /// `typeof(cdata)`.
    pub fn typeof_cdata(&self, cdata: &CData) -> CType {
        cdata.ctype().clone()
    }

    pub fn typeoffsetof<'a>(
        &self,
        ctype: &CType,
        field: impl Into<FieldRef<'a>>,
    ) -> Result<(CType, i64)> {
        layout::typeoffsetof(ctype, field.into())
    }

    pub fn getcname(&self, ctype: &CType, replace_with: &str) -> String {
        ctype::getcname(ctype, replace_with)
    }

    // Instances

    pub fn newp(&self, ctype: &CType, init: &Value) -> Result<CData> {
        cdata::newp(ctype, init)
    }

    pub fn cast(&self, ctype: &CType, value: &Value) -> Result<CData> {
        cdata::cast(ctype, value)
    }

    pub fn rawaddressof(&self, ctype: &CType, cdata: &CData, offset: usize) -> Result<CData> {
        cdata::rawaddressof(ctype, cdata, offset)
    }

    pub fn string(&self, cdata: &CData, maxlen: Option<usize>) -> Result<Value> {
        cdata::string(cdata, maxlen)
    }

    pub fn unpack(&self, cdata: &CData, length: usize) -> Result<Value> {
        cdata::unpack(cdata, length)
    }

    pub fn buffer(&self, cdata: &CData, size: Option<usize>) -> Result<CBuffer> {
        CBuffer::new(cdata, size)
    }

    pub fn memmove(&self, dest: &CData, src: &Value, n: usize) -> Result<()> {
        cdata::memmove(dest, src, n)
    }

    pub fn from_buffer(
        &self,
        ctype: &CType,
        buffer: &SharedBuffer,
        require_writable: bool,
    ) -> Result<CData> {
        cdata::from_buffer(ctype, buffer, require_writable)
    }

    pub fn release(&self, cdata: &CData) -> Result<()> {
        cdata.release()
    }

    pub fn scoped(&self, cdata: &CData) -> Result<Scoped> {
        cdata.scoped()
    }

    pub fn gcp(&self, cdata: &CData, destructor: Destructor) -> CData {
        cdata::gcp(cdata, destructor)
    }

    pub fn newp_handle(&self, ctype: &CType, value: Value) -> Result<CData> {
        cdata::newp_handle(ctype, value)
    }

    pub fn from_handle(&self, cdata: &CData) -> Result<Value> {
        cdata::from_handle(cdata)
    }

    /// `a == b` under this backend's comparison mode.
    pub fn equals(&self, a: &CData, b: &Value) -> Result<bool> {
        a.equals(b, self.strict_pointers)
    }

    pub fn compare(&self, a: &CData, b: &CData) -> Result<Ordering> {
        a.compare(b, self.strict_pointers)
    }

    // Calls

    /// Call the native function behind `function`.
    ///
    /// # Safety
    ///
    /// The address must be a function with the signature of the cdata's
    /// type, and the arguments must satisfy its contract.
    pub unsafe fn call(&self, function: &CData, args: &[Value]) -> Result<Value> {
        // SAFETY: upheld by the caller.
        unsafe { call::call(function, args) }
    }

    /// Wrap `host` as a native function pointer of type `ctype`; failures
    /// are reported to this backend's diagnostic sink.
    pub fn callback(
        &self,
        ctype: &CType,
        host: HostFunction,
        options: CallbackOptions,
    ) -> Result<CData> {
        call::callback(ctype, host, options, self.diagnostics.clone())
    }

    pub fn get_errno(&self) -> i32 {
        call::get_errno()
    }

    pub fn set_errno(&self, value: i32) {
        call::set_errno(value)
    }

    /// Load a shared library, or the current process for `None`.
    ///
    /// # Safety
    ///
    /// See [`Library::open`].
    pub unsafe fn load_library(&self, path: Option<&str>, flags: i32) -> Result<Library> {
        // SAFETY: upheld by the caller.
        unsafe { Library::open(path, flags) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typeoffsetof_struct_and_pointer() {
        let backend = Backend::native();
        let int = backend.new_primitive_type("int").unwrap();
        let char_t = backend.new_primitive_type("char").unwrap();
        let s = backend.new_struct_type("struct s");
        backend
            .complete_struct_or_union(
                &s,
                &[
                    FieldSpec::new("a", &char_t),
                    FieldSpec::new("b", &int),
                    FieldSpec::new("c", &int).bits(3),
                ],
                None,
                None,
                StructFlags::empty(),
                None,
            )
            .unwrap();

        let (ct, offset) = backend.typeoffsetof(&s, "b").unwrap();
        assert_eq!(ct.cname(), "int");
        assert_eq!(offset, 4);
        assert!(backend.typeoffsetof(&s, "c").unwrap_err().is_type_error());
        assert!(backend.typeoffsetof(&s, "zz").unwrap_err().is_key_error());

        let p = backend.new_pointer_type(&int);
        let (ct, offset) = backend.typeoffsetof(&p, 3i64).unwrap();
        assert_eq!(ct.cname(), "int");
        assert_eq!(offset, 12);
        assert!(backend.typeoffsetof(&int, "x").unwrap_err().is_type_error());
    }

    #[test]
    fn test_config_sets_profile() {
        let config = RuntimeConfig::from_str("[layout]\nbitfields = \"msvc\"\n").unwrap();
        let backend = Backend::with_config(&config);
        assert_eq!(backend.profile().bitfields, crate::layout::BitfieldRule::Msvc);
    }

    #[test]
    fn test_getcname() {
        let backend = Backend::native();
        let int = backend.new_primitive_type("int").unwrap();
        let arr = backend
            .new_array_type(&backend.new_pointer_type(&backend.new_pointer_type(&int)), Some(5))
            .unwrap();
        assert_eq!(backend.getcname(&arr, "x"), "int *x[5]");
    }
}
