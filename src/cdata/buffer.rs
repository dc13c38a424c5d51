//! Raw byte views over cdata, and cdata over embedder-owned buffers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::ctype::CType;
use crate::error::{Error, Result};

use super::{CData, Storage, memory, sizeof_cdata};

struct SharedInner {
    data: Mutex<Vec<u8>>,
    readonly: bool,
    type_name: String,
    exports: AtomicUsize,
}

/// A resizable byte container owned by the embedder, the counterpart of a
/// host `bytearray`. While any cdata made by [`from_buffer`] is alive and
/// unreleased, the container cannot be resized.
#[derive(Clone)]
pub struct SharedBuffer {
    inner: Arc<SharedInner>,
}

impl SharedBuffer {
    pub fn new(data: Vec<u8>, type_name: impl Into<String>) -> Self {
        Self::build(data, type_name.into(), false)
    }

    /// An immutable buffer, like a host `bytes` object.
    pub fn readonly(data: Vec<u8>, type_name: impl Into<String>) -> Self {
        Self::build(data, type_name.into(), true)
    }

    fn build(data: Vec<u8>, type_name: String, readonly: bool) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                data: Mutex::new(data),
                readonly,
                type_name,
                exports: AtomicUsize::new(0),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.readonly
    }

    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.data.lock().clone()
    }

    /// Number of live exports.
    pub fn exports(&self) -> usize {
        self.inner.exports.load(Ordering::Acquire)
    }

    /// Change the length; fails while exported.
    pub fn resize(&self, new_len: usize) -> Result<()> {
        if self.exports() > 0 {
            return Err(Error::value_error(
                "Existing exports of data: object cannot be re-sized",
            ));
        }
        self.inner.data.lock().resize(new_len, 0);
        Ok(())
    }

    fn export(&self) -> BufferExport {
        self.inner.exports.fetch_add(1, Ordering::AcqRel);
        BufferExport {
            buffer: self.clone(),
            released: AtomicBool::new(false),
        }
    }

    fn address(&self) -> usize {
        self.inner.data.lock().as_mut_ptr() as usize
    }
}

/// One outstanding export of a [`SharedBuffer`].
pub(crate) struct BufferExport {
    buffer: SharedBuffer,
    released: AtomicBool,
}

impl BufferExport {
    pub(crate) fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.buffer.inner.exports.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn source_type(&self) -> &str {
        self.buffer.type_name()
    }
}

impl Drop for BufferExport {
    fn drop(&mut self) {
        self.release();
    }
}

/// A cdata of type `ctype` (an array or pointer type) whose memory is the
/// content of `buffer`.
pub fn from_buffer(ctype: &CType, buffer: &SharedBuffer, require_writable: bool) -> Result<CData> {
    let item = match ctype.item() {
        Some(item) if ctype.is_array() || ctype.is_pointer() => item,
        _ => {
            return Err(Error::type_error(format!(
                "expected a pointer or array ctype, got '{}'",
                ctype.cname()
            )));
        }
    };
    if require_writable && buffer.is_readonly() {
        return Err(Error::type_error(format!(
            "from_buffer() cannot return the address of a read-only '{}' object",
            buffer.type_name()
        )));
    }
    let len = buffer.len();
    let length = if ctype.is_array() {
        match ctype.length() {
            Some(n) => {
                let needed = ctype.sizeof()?;
                if needed > len {
                    return Err(Error::value_error(format!(
                        "buffer is too small ({} bytes) for '{}' ({} bytes)",
                        len,
                        ctype.cname(),
                        needed
                    )));
                }
                Some(n)
            }
            None => {
                let item_size = item.sizeof()?;
                Some(if item_size == 0 { 0 } else { len / item_size })
            }
        }
    } else {
        None
    };
    let export = buffer.export();
    Ok(CData::with_storage(
        ctype.clone(),
        buffer.address(),
        length.filter(|_| ctype.length().is_none()),
        Some(len),
        Storage::Buffer(export),
    ))
}

/// A raw byte view of the memory behind a cdata.
#[derive(Clone)]
pub struct CBuffer {
    owner: CData,
    address: usize,
    len: usize,
}

impl CBuffer {
    /// `buffer(cdata, size)`: `size` defaults to the cdata's array extent
    /// or the size of what a pointer points to.
    pub fn new(cdata: &CData, size: Option<usize>) -> Result<Self> {
        let ct = cdata.ctype();
        let len = match size {
            Some(n) => n,
            None if ct.is_array() => sizeof_cdata(cdata)?,
            None => match ct.item() {
                Some(item) if ct.is_pointer() => item.sizeof()?,
                _ if ct.is_struct_or_union() => sizeof_cdata(cdata)?,
                _ => {
                    return Err(Error::type_error(format!(
                        "expected a pointer or array cdata, got cdata '{}'",
                        ct.cname()
                    )));
                }
            },
        };
        if ct.is_pointer() && cdata.address() == 0 {
            return Err(Error::runtime(format!(
                "cannot make a buffer of null pointer cdata '{}'",
                ct.cname()
            )));
        }
        cdata.check_access()?;
        Ok(Self {
            owner: cdata.clone(),
            address: cdata.address(),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy out `[start, start + len)`.
    pub fn read(&self, start: usize, len: usize) -> Result<Vec<u8>> {
        self.check_range(start, len)?;
        // SAFETY: range checked against the buffer extent; owner is live.
        Ok(unsafe { memory::read(self.address + start, len) })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.read(0, self.len)
    }

    /// Overwrite bytes starting at `start`.
    pub fn write(&self, start: usize, data: &[u8]) -> Result<()> {
        self.check_range(start, data.len())?;
        // SAFETY: range checked against the buffer extent; owner is live.
        unsafe { memory::write(self.address + start, data) };
        Ok(())
    }

    fn check_range(&self, start: usize, len: usize) -> Result<()> {
        self.owner.check_live()?;
        match start.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(Error::index_error(format!(
                "buffer access out of range ({}..{} of {} bytes)",
                start,
                start.saturating_add(len),
                self.len
            ))),
        }
    }
}

impl std::fmt::Debug for CBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<buffer size {} from {}>",
            self.len, self.owner
        )
    }
}
