//! Opaque `void *` handles to host values.
//!
//! A handle stays valid for as long as the cdata returned by
//! [`newp_handle`] (or a clone of it) is alive. The address is that of a
//! private one-byte allocation, so it is unique while the handle lives.

use std::collections::HashMap;
use std::sync::LazyLock;

use parking_lot::Mutex;

use crate::ctype::CType;
use crate::error::{Error, Result};
use crate::logging::trace;
use crate::value::Value;

use super::memory::MemoryBlock;
use super::{CData, Storage};

static HANDLES: LazyLock<Mutex<HashMap<usize, Value>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

pub(crate) struct HandleEntry {
    block: MemoryBlock,
    held: Value,
}

impl HandleEntry {
    pub(crate) fn held(&self) -> &Value {
        &self.held
    }
}

impl Drop for HandleEntry {
    fn drop(&mut self) {
        // The removed value is dropped after the table lock is released.
        let removed = HANDLES.lock().remove(&self.block.address());
        trace!(address = self.block.address(), "handle dropped");
        drop(removed);
    }
}

/// A `void *` cdata standing for `value`.
pub fn newp_handle(ctype: &CType, value: Value) -> Result<CData> {
    if !ctype.is_void_pointer() {
        return Err(Error::type_error(format!(
            "needs 'void *', got '{}'",
            ctype.cname()
        )));
    }
    let block = MemoryBlock::new(1, 1)?;
    let address = block.address();
    HANDLES.lock().insert(address, value.clone());
    trace!(address, "handle created");
    Ok(CData::with_storage(
        ctype.clone(),
        address,
        None,
        None,
        Storage::Handle(HandleEntry { block, held: value }),
    ))
}

/// The value a handle made by [`newp_handle`] stands for.
pub fn from_handle(cdata: &CData) -> Result<Value> {
    let ct = cdata.ctype();
    if !ct.is_pointer() {
        return Err(Error::type_error(format!(
            "expected a 'cdata' object with a 'void *' out of new_handle(), got '{}'",
            ct.cname()
        )));
    }
    if cdata.address() == 0 {
        return Err(Error::runtime("cannot use from_handle() on NULL pointer"));
    }
    HANDLES
        .lock()
        .get(&cdata.address())
        .cloned()
        .ok_or_else(|| Error::runtime("from_handle(): dead or bogus object handle"))
}
