//! Shared library loading.
//!
//! A [`Library`] wraps a `libloading` handle and hands out cdata for the
//! symbols it exports. Closing is explicit and idempotent; every later use
//! fails with a ValueError.

use std::ffi::c_void;
use std::fmt;

use parking_lot::Mutex;

use crate::cdata::CData;
use crate::cdata::access::{read_value, write_value};
use crate::ctype::CType;
use crate::ctype::registry::new_pointer_type;
use crate::error::{Error, Result};
use crate::logging::{debug, info};
use crate::value::Value;

/// A loaded shared library, or the symbols of the running process.
pub struct Library {
    path: Option<String>,
    handle: Mutex<Option<libloading::Library>>,
}

#[cfg(unix)]
unsafe fn open_native(
    path: Option<&str>,
    flags: i32,
) -> std::result::Result<libloading::Library, libloading::Error> {
    use libloading::os::unix;
    match path {
        Some(path) => {
            let flags = if flags == 0 { unix::RTLD_NOW } else { flags };
            // SAFETY: forwarded from `Library::open`.
            unsafe { unix::Library::open(Some(path), flags) }.map(Into::into)
        }
        None => Ok(unix::Library::this().into()),
    }
}

#[cfg(windows)]
unsafe fn open_native(
    path: Option<&str>,
    _flags: i32,
) -> std::result::Result<libloading::Library, libloading::Error> {
    match path {
        // SAFETY: forwarded from `Library::open`.
        Some(path) => unsafe { libloading::Library::new(path) },
        None => libloading::os::windows::Library::this().map(Into::into),
    }
}

impl Library {
    /// Load the library at `path`, or the current process for `None`.
    /// `flags` are `dlopen` flags; 0 selects `RTLD_NOW`.
    ///
    /// # Safety
    ///
    /// Loading runs the library's initialisers, which may do anything.
    pub unsafe fn open(path: Option<&str>, flags: i32) -> Result<Self> {
        // SAFETY: upheld by the caller.
        let native = unsafe { open_native(path, flags) }.map_err(|e| {
            Error::Os(format!(
                "cannot load library '{}': {}",
                path.unwrap_or("<current process>"),
                e
            ))
        })?;
        info!(path = path.unwrap_or("<current process>"), "library loaded");
        Ok(Self {
            path: path.map(str::to_string),
            handle: Mutex::new(Some(native)),
        })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn display_path(&self) -> &str {
        self.path.as_deref().unwrap_or("<current process>")
    }

    pub fn is_closed(&self) -> bool {
        self.handle.lock().is_none()
    }

    fn symbol(&self, name: &str, what: &str) -> Result<usize> {
        let guard = self.handle.lock();
        let lib = guard.as_ref().ok_or_else(|| {
            Error::value_error(format!(
                "library '{}' has already been closed",
                self.display_path()
            ))
        })?;
        // SAFETY: the symbol is only read as an address.
        let address = unsafe { lib.get::<*mut c_void>(name.as_bytes()) }
            .map(|sym| *sym as usize)
            .map_err(|e| {
                Error::attribute_error(format!(
                    "{} '{}' not found in library '{}': {}",
                    what,
                    name,
                    self.display_path(),
                    e
                ))
            })?;
        debug!(symbol = name, address = address, "symbol resolved");
        Ok(address)
    }

    /// The function `name` as a cdata of the function or pointer type
    /// `ctype`.
    pub fn load_function(&self, ctype: &CType, name: &str) -> Result<CData> {
        if !(ctype.is_function() || ctype.is_pointer()) {
            return Err(Error::type_error(format!(
                "function or pointer type expected, got cdata '{}'",
                ctype.cname()
            )));
        }
        let address = self.symbol(name, "function")?;
        Ok(CData::foreign(ctype.clone(), address, true))
    }

    /// Current value of the global `name` of type `ctype`.
    pub fn read_variable(&self, ctype: &CType, name: &str) -> Result<Value> {
        let address = self.symbol(name, "variable")?;
        let owner = CData::foreign(new_pointer_type(ctype), address, true);
        read_value(ctype, address, &owner)
    }

    /// Store `value` into the global `name` of type `ctype`.
    pub fn write_variable(&self, ctype: &CType, name: &str, value: &Value) -> Result<()> {
        let address = self.symbol(name, "variable")?;
        write_value(ctype, address, value, ctype.size_opt())
    }

    /// Unload the library. Closing twice is a no-op.
    pub fn close_lib(&self) {
        if self.handle.lock().take().is_some() {
            info!(path = self.display_path(), "library closed");
        }
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<clibrary '{}'>", self.display_path())
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctype::registry::{new_function_type, new_primitive_type};

    fn current_process() -> Library {
        // SAFETY: the test binary is already loaded.
        unsafe { Library::open(None, 0) }.unwrap()
    }

    #[test]
    fn test_display_current_process() {
        let lib = current_process();
        assert_eq!(lib.to_string(), "<clibrary '<current process>'>");
    }

    #[test]
    fn test_missing_library_is_os_error() {
        // SAFETY: the path does not exist.
        let err = unsafe { Library::open(Some("/nonexistent/libnothing.so"), 0) }.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::OSError);
        assert!(err.message().starts_with("cannot load library '/nonexistent/libnothing.so'"));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_missing_symbol_and_close() {
        let lib = current_process();
        let int = new_primitive_type("int").unwrap();
        let fnptr = new_function_type(&[], &int, false, crate::call::DEFAULT_ABI).unwrap();

        let err = lib.load_function(&fnptr, "no_such_symbol_here").unwrap_err();
        assert!(err.is_attribute_error());
        assert!(err.message().starts_with("function 'no_such_symbol_here' not found"));

        lib.close_lib();
        lib.close_lib();
        let err = lib.load_function(&fnptr, "getpid").unwrap_err();
        assert!(err.is_value_error());
        assert_eq!(
            err.message(),
            "library '<current process>' has already been closed"
        );
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_read_and_write_variable() {
        let lib = current_process();
        let char_t = new_primitive_type("char").unwrap();
        let environ_t = new_pointer_type(&new_pointer_type(&char_t));

        let before = lib.read_variable(&environ_t, "environ").unwrap();
        let env = before.as_cdata().unwrap();
        assert_eq!(env.ctype(), &environ_t);
        assert_ne!(env.address(), 0);

        lib.write_variable(&environ_t, "environ", &before).unwrap();
        let after = lib.read_variable(&environ_t, "environ").unwrap();
        assert_eq!(after.as_cdata().map(CData::address), Some(env.address()));
    }

    #[test]
    fn test_load_function_rejects_primitive() {
        let lib = current_process();
        let int = new_primitive_type("int").unwrap();
        assert!(lib.load_function(&int, "getpid").unwrap_err().is_type_error());
    }
}
