//! Host functions callable from native code.
//!
//! [`callback`] wraps a [`HostFunction`] in a libffi closure and returns a
//! function-pointer cdata whose address native code can call. The closure
//! body never lets a failure cross back into native code: errors and
//! panics raised by the host function, or by converting its result, are
//! reported to a [`DiagnosticSink`], offered to the `onerror` handler, and
//! replaced by the callback's error value.

use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use libffi::low::{self, ffi_cif, ffi_closure};

use crate::cdata::{CData, Storage};
use crate::ctype::CType;
use crate::error::{Error, Result};
use crate::logging::{error, trace, warn};
use crate::value::Value;

use super::ffi_types::CallInterface;
use super::{encode_result, errno, read_argument, zero_result};

type HostFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// A named host function.
#[derive(Clone)]
pub struct HostFunction {
    name: String,
    func: Arc<HostFn>,
}

impl HostFunction {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

/// Handler invoked with the failure and its diagnostic text. A non-`None`
/// return is used as the callback result.
pub type OnError = Arc<dyn Fn(&Error, &str) -> Result<Value> + Send + Sync>;

/// Failure policy of a callback.
#[derive(Clone)]
pub struct CallbackOptions {
    /// Returned to native code when the host function fails.
    pub error_value: Value,
    pub onerror: Option<OnError>,
}

impl Default for CallbackOptions {
    fn default() -> Self {
        Self {
            error_value: Value::None,
            onerror: None,
        }
    }
}

impl CallbackOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_value(mut self, value: impl Into<Value>) -> Self {
        self.error_value = value.into();
        self
    }

    pub fn onerror(
        mut self,
        handler: impl Fn(&Error, &str) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.onerror = Some(Arc::new(handler));
        self
    }
}

/// Where callback failure diagnostics are written.
#[derive(Clone, Default)]
pub enum DiagnosticSink {
    #[default]
    Stderr,
    /// As a `warn` event through the logging macros.
    Log,
    Silent,
    Custom(Arc<dyn Fn(&str) + Send + Sync>),
}

impl DiagnosticSink {
    pub fn custom(sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(sink))
    }

    pub(crate) fn emit(&self, text: &str) {
        match self {
            DiagnosticSink::Stderr => eprintln!("{}", text),
            DiagnosticSink::Log => {
                warn!(diagnostic = text, "callback failed");
            }
            DiagnosticSink::Silent => {}
            DiagnosticSink::Custom(sink) => sink(text),
        }
    }
}

impl fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticSink::Stderr => f.write_str("Stderr"),
            DiagnosticSink::Log => f.write_str("Log"),
            DiagnosticSink::Silent => f.write_str("Silent"),
            DiagnosticSink::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Stage of the callback a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Call,
    ConvertResult,
}

/// Everything a live closure needs; owned by the callback cdata.
pub(crate) struct CallbackState {
    host: HostFunction,
    args: Vec<CType>,
    result: CType,
    interface: CallInterface,
    closure: *mut ffi_closure,
    code: usize,
    error_bytes: Vec<u8>,
    onerror: Option<OnError>,
    sink: DiagnosticSink,
}

// SAFETY: the closure pointer is only handed to libffi, which may invoke
// it from any thread; the rest of the state is immutable after creation.
unsafe impl Send for CallbackState {}
unsafe impl Sync for CallbackState {}

impl CallbackState {
    pub(crate) fn function_name(&self) -> &str {
        self.host.name()
    }

    fn diagnostic(&self, stage: Stage, error: &Error) -> String {
        let mut text = format!("From callback {}:\n", self.host.name());
        if stage == Stage::ConvertResult {
            text.push_str("Trying to convert the result back to C:\n");
        }
        text.push_str(&error.describe());
        text
    }

    fn run_host(&self, args: &[Value]) -> Result<Value> {
        panic::catch_unwind(AssertUnwindSafe(|| self.host.call(args))).unwrap_or_else(|payload| {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Error::runtime(format!("callback panicked: {}", detail)))
        })
    }

    /// Result bytes for one native invocation; never fails.
    fn dispatch(&self, args: *const *const c_void) -> Vec<u8> {
        match self.try_dispatch(args) {
            Ok(bytes) => bytes,
            Err((stage, error)) => self.recover(stage, &error),
        }
    }

    fn try_dispatch(
        &self,
        args: *const *const c_void,
    ) -> std::result::Result<Vec<u8>, (Stage, Error)> {
        let values = self
            .args
            .iter()
            .enumerate()
            .map(|(i, ct)| {
                // SAFETY: libffi passes one pointer per declared argument.
                let address = unsafe { *args.add(i) } as usize;
                read_argument(ct, address)
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|e| (Stage::Call, e))?;
        let value = self.run_host(&values).map_err(|e| (Stage::Call, e))?;
        encode_result(&self.result, &value).map_err(|e| (Stage::ConvertResult, e))
    }

    fn recover(&self, stage: Stage, error: &Error) -> Vec<u8> {
        let text = self.diagnostic(stage, error);
        warn!(
            callback = self.host.name(),
            error = %error.describe(),
            "callback raised"
        );
        let Some(onerror) = &self.onerror else {
            self.sink.emit(&text);
            return self.error_bytes.clone();
        };
        let substitute = panic::catch_unwind(AssertUnwindSafe(|| onerror(error, &text)))
            .unwrap_or_else(|_| Err(Error::runtime("onerror handler panicked")))
            .and_then(|value| match value {
                Value::None => Ok(None),
                value => encode_result(&self.result, &value).map(Some),
            });
        match substitute {
            Ok(Some(bytes)) => bytes,
            Ok(None) => self.error_bytes.clone(),
            Err(second) => {
                error!(
                    callback = self.host.name(),
                    error = %second.describe(),
                    "onerror failed"
                );
                self.sink.emit(&format!(
                    "{}\n\nDuring the call to 'onerror', another exception occurred:\n\n{}",
                    text,
                    second.describe()
                ));
                self.error_bytes.clone()
            }
        }
    }
}

impl Drop for CallbackState {
    fn drop(&mut self) {
        trace!(callback = self.host.name(), "closure freed");
        // SAFETY: the closure came from `closure_alloc` and is freed once.
        unsafe { low::closure_free(self.closure) };
    }
}

unsafe extern "C" fn invoke(
    _cif: &ffi_cif,
    result: &mut u8,
    args: *const *const c_void,
    state: &CallbackState,
) {
    errno::capture();
    let bytes = panic::catch_unwind(AssertUnwindSafe(|| state.dispatch(args)))
        .unwrap_or_else(|_| state.error_bytes.clone());
    // SAFETY: libffi provides room for the result widened to `ffi_arg`,
    // which is what `encode_result` produces.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), std::ptr::from_mut(result), bytes.len());
    }
    errno::restore();
}

/// A function-pointer cdata of type `ctype` that runs `host` when called.
pub fn callback(
    ctype: &CType,
    host: HostFunction,
    options: CallbackOptions,
    sink: DiagnosticSink,
) -> Result<CData> {
    let (Some(args), Some(result)) = (ctype.args(), ctype.result()) else {
        return Err(Error::type_error(format!(
            "expected a function ctype, got '{}'",
            ctype.cname()
        )));
    };
    if ctype.ellipsis() {
        return Err(Error::not_implemented(format!(
            "{}: callbacks with '...' are not supported",
            ctype.cname()
        )));
    }
    let error_bytes = if result.is_void() {
        match &options.error_value {
            Value::None | Value::Int(0) => Vec::new(),
            _ => {
                return Err(Error::type_error(
                    "callback with the return type 'void' must have error value None",
                ));
            }
        }
    } else if options.error_value.is_none() {
        zero_result(result)?
    } else {
        encode_result(result, &options.error_value)?
    };

    let abi = ctype.abi().unwrap_or(super::DEFAULT_ABI);
    let interface = CallInterface::new(args, result, abi, None)?;
    let (closure, code) = low::closure_alloc();
    if closure.is_null() {
        return Err(Error::runtime("cannot allocate a libffi closure"));
    }
    let state = Box::new(CallbackState {
        host,
        args: args.to_vec(),
        result: result.clone(),
        interface,
        closure,
        code: code.as_ptr() as usize,
        error_bytes,
        onerror: options.onerror,
        sink,
    });
    // SAFETY: the interface and the state live in the box, which the
    // returned cdata owns for as long as the code pointer is reachable.
    unsafe {
        low::prep_closure(
            closure,
            state.interface.as_raw(),
            invoke,
            std::ptr::from_ref(&*state),
            code,
        )
    }
    .map_err(|e| Error::runtime(format!("cannot prepare a libffi closure: {:?}", e)))?;
    trace!(callback = state.host.name(), ctype = ctype.cname(), "closure ready");
    let address = state.code;
    Ok(CData::with_storage(
        ctype.clone(),
        address,
        None,
        None,
        Storage::Callback(state),
    ))
}
