//! Live C values.
//!
//! A [`CData`] pairs a [`CType`] with an address and records who keeps the
//! memory behind that address alive. For pointer, array and function types
//! the address is the target; for every other type it is where the value
//! itself is stored.
//!
//! Views (elements, members, slices, derived pointers) hold a strong
//! reference to the cdata they were derived from, so memory owned by
//! `newp` stays allocated for as long as any view into it exists.

pub(crate) mod access;
pub mod buffer;
mod create;
mod extract;
pub(crate) mod handle;
pub(crate) mod memory;
mod ops;
pub(crate) mod repr;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::call::callback::CallbackState;
use crate::convert::{Scalar, decode_scalar};
use crate::ctype::CType;
use crate::error::{Error, Result};
use crate::logging::debug;

pub use buffer::{CBuffer, SharedBuffer, from_buffer};
pub use create::{cast, newp, rawaddressof};
pub use extract::{memmove, string, unpack};
pub use handle::{from_handle, newp_handle};
pub use ops::Slice;

use buffer::BufferExport;
use handle::HandleEntry;
use memory::MemoryBlock;

/// A destructor attached by [`gcp`].
pub type Destructor = Box<dyn FnOnce(CData) + Send>;

/// How a view relates to the cdata it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ViewKind {
    /// Element, pointer arithmetic result or cast.
    Derived,
    /// The struct behind an owning struct pointer (`p[0]`).
    Member,
    /// `cdata[a:b]`.
    Slice,
}

pub(crate) struct GcState {
    origin: CData,
    destructor: Mutex<Option<Destructor>>,
    released: AtomicBool,
}

impl GcState {
    fn run(&self) {
        self.released.store(true, Ordering::Release);
        let destructor = self.destructor.lock().take();
        if let Some(destructor) = destructor {
            destructor(self.origin.clone());
        }
    }
}

impl Drop for GcState {
    fn drop(&mut self) {
        self.run();
    }
}

pub(crate) enum Storage {
    /// Allocated by `newp`.
    Owned(MemoryBlock),
    /// A value produced by `cast` or read out of memory.
    Inline(MemoryBlock),
    /// A bare address nobody owns.
    Foreign { acknowledged: AtomicBool },
    View { parent: CData, kind: ViewKind },
    Buffer(BufferExport),
    Handle(HandleEntry),
    Callback(Box<CallbackState>),
    Gc(GcState),
}

pub(crate) struct CDataInner {
    ctype: CType,
    address: usize,
    /// Item count of arrays whose type leaves the length open.
    length: Option<usize>,
    /// Bytes available at `address`, when known.
    extent: Option<usize>,
    storage: Storage,
}

/// A live C value.
///
/// Cloning is cheap and yields the same object.
#[derive(Clone)]
pub struct CData(Arc<CDataInner>);

impl CData {
    fn build(
        ctype: CType,
        address: usize,
        length: Option<usize>,
        extent: Option<usize>,
        storage: Storage,
    ) -> Self {
        Self(Arc::new(CDataInner {
            ctype,
            address,
            length,
            extent,
            storage,
        }))
    }

    pub(crate) fn owned(ctype: CType, block: MemoryBlock, length: Option<usize>) -> Self {
        let (address, size) = (block.address(), block.size());
        Self::build(ctype, address, length, Some(size), Storage::Owned(block))
    }

    /// A standalone copy of a primitive value.
    pub(crate) fn inline(ctype: &CType, bytes: &[u8]) -> Result<Self> {
        let block = MemoryBlock::from_bytes(bytes, ctype.alignof()?)?;
        let (address, size) = (block.address(), block.size());
        Ok(Self::build(
            ctype.clone(),
            address,
            None,
            Some(size),
            Storage::Inline(block),
        ))
    }

    pub(crate) fn long_double(ctype: &CType, bytes: &[u8]) -> Result<Self> {
        Self::inline(ctype, bytes)
    }

    pub(crate) fn foreign(ctype: CType, address: usize, acknowledged: bool) -> Self {
        Self::build(
            ctype,
            address,
            None,
            None,
            Storage::Foreign {
                acknowledged: AtomicBool::new(acknowledged),
            },
        )
    }

    /// A view at `address` that keeps `parent` alive.
    pub(crate) fn view(
        ctype: CType,
        address: usize,
        parent: &CData,
        kind: ViewKind,
        length: Option<usize>,
        extent: Option<usize>,
    ) -> Self {
        let parent = match (&parent.0.storage, kind) {
            (Storage::View { parent: root, kind: ViewKind::Derived }, ViewKind::Derived) => {
                root.clone()
            }
            _ => parent.clone(),
        };
        Self::build(
            ctype,
            address,
            length,
            extent,
            Storage::View { parent, kind },
        )
    }

    pub(crate) fn with_storage(
        ctype: CType,
        address: usize,
        length: Option<usize>,
        extent: Option<usize>,
        storage: Storage,
    ) -> Self {
        Self::build(ctype, address, length, extent, storage)
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.0.storage
    }

    pub fn ctype(&self) -> &CType {
        &self.0.ctype
    }

    /// The raw address: the target of a pointer, array or function,
    /// otherwise where the value lives.
    pub fn address(&self) -> usize {
        self.0.address
    }

    pub(crate) fn explicit_length(&self) -> Option<usize> {
        self.0.length
    }

    /// Bytes known to be available at [`address`](Self::address).
    pub(crate) fn extent(&self) -> Option<usize> {
        match &self.0.storage {
            Storage::View {
                parent,
                kind: ViewKind::Member,
            } => parent.extent(),
            _ => self.0.extent,
        }
    }

    /// Whether both handles refer to the same cdata object.
    pub fn same_object(&self, other: &CData) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn is_released(&self) -> bool {
        match &self.0.storage {
            Storage::Owned(block) | Storage::Inline(block) => block.is_released(),
            Storage::View { parent, .. } => parent.is_released(),
            Storage::Buffer(export) => export.is_released(),
            Storage::Gc(state) => {
                state.released.load(Ordering::Acquire) || state.origin.is_released()
            }
            _ => false,
        }
    }

    /// Fail if the memory behind this cdata has been released.
    pub(crate) fn check_live(&self) -> Result<()> {
        if self.is_released() {
            return Err(Error::runtime(format!(
                "cdata '{}' has been released",
                self.0.ctype.cname()
            )));
        }
        Ok(())
    }

    /// Whether the address may be dereferenced: false only for pointers
    /// cast from an integer and not yet acknowledged.
    pub fn is_acknowledged(&self) -> bool {
        match &self.0.storage {
            Storage::Foreign { acknowledged } => acknowledged.load(Ordering::Acquire),
            Storage::View { parent, .. } => parent.is_acknowledged(),
            Storage::Gc(state) => state.origin.is_acknowledged(),
            _ => true,
        }
    }

    /// Declare that the address of a pointer cast from an integer refers
    /// to valid memory of the pointed-to type.
    ///
    /// # Safety
    /// Every later access through this cdata (and anything derived from
    /// it) reads or writes the memory at its address.
    pub unsafe fn assume_valid(&self) {
        match &self.0.storage {
            Storage::Foreign { acknowledged } => acknowledged.store(true, Ordering::Release),
            Storage::View { parent, .. } => {
                // SAFETY: forwarded from the caller.
                unsafe { parent.assume_valid() }
            }
            Storage::Gc(state) => {
                // SAFETY: forwarded from the caller.
                unsafe { state.origin.assume_valid() }
            }
            _ => {}
        }
    }

    /// Liveness and acknowledgment check before touching memory.
    pub(crate) fn check_access(&self) -> Result<()> {
        self.check_live()?;
        if !self.is_acknowledged() {
            return Err(Error::runtime(format!(
                "cdata '{}' was cast from an integer; call assume_valid() before \
                 dereferencing it",
                self.0.ctype.cname()
            )));
        }
        Ok(())
    }

    /// The bytes of a primitive or struct value (not of a pointer target).
    pub(crate) fn raw_bytes(&self) -> Result<Vec<u8>> {
        self.check_access()?;
        let size = self.0.ctype.sizeof()?;
        // SAFETY: value cdata always point at `size` live bytes.
        Ok(unsafe { memory::read(self.0.address, size) })
    }

    /// Numeric content, for conversions and comparisons.
    pub(crate) fn scalar(&self) -> Result<Option<Scalar>> {
        let ct = &self.0.ctype;
        if ct.is_pointer_like() {
            return Ok(Some(Scalar::Address(self.0.address)));
        }
        if ct.primitive().is_some() || ct.is_enum() {
            let bytes = self.raw_bytes()?;
            return decode_scalar(ct, &bytes).map(Some);
        }
        Ok(None)
    }

    /// Whether `release` applies: memory from `newp`, buffer imports and
    /// `gcp` results.
    fn releasable(&self) -> bool {
        matches!(
            self.0.storage,
            Storage::Owned(_) | Storage::Buffer(_) | Storage::Gc(_)
        )
    }

    /// Free owned memory now, unlock an imported buffer, or run a `gcp`
    /// destructor. Releasing twice is a no-op.
    pub fn release(&self) -> Result<()> {
        match &self.0.storage {
            Storage::Owned(block) => {
                if block.release() {
                    debug!(ctype = self.0.ctype.cname(), size = block.size(), "cdata released");
                }
                Ok(())
            }
            Storage::Buffer(export) => {
                export.release();
                Ok(())
            }
            Storage::Gc(state) => {
                state.run();
                Ok(())
            }
            Storage::View {
                kind: ViewKind::Member,
                ..
            } => Err(Error::value_error(format!(
                "release() not supported on cdata '{} &': only its owner can be released",
                self.0.ctype.cname()
            ))),
            _ => Err(Error::value_error(format!(
                "release() not supported on cdata '{}': it does not own its memory",
                self.0.ctype.cname()
            ))),
        }
    }

    /// A guard that releases this cdata when dropped.
    pub fn scoped(&self) -> Result<Scoped> {
        if !self.releasable() {
            return Err(Error::value_error(format!(
                "cdata '{}' cannot be used as a scoped resource",
                self.0.ctype.cname()
            )));
        }
        Ok(Scoped { cdata: self.clone() })
    }
}

/// Scoped acquisition: the cdata is released when the guard goes out of
/// scope, on every exit path.
pub struct Scoped {
    cdata: CData,
}

impl std::ops::Deref for Scoped {
    type Target = CData;

    fn deref(&self) -> &CData {
        &self.cdata
    }
}

impl Drop for Scoped {
    fn drop(&mut self) {
        let _ = self.cdata.release();
    }
}

/// Attach `destructor`, run once with `cdata` when the returned cdata is
/// released or dropped.
pub fn gcp(cdata: &CData, destructor: Destructor) -> CData {
    let state = GcState {
        origin: cdata.clone(),
        destructor: Mutex::new(Some(destructor)),
        released: AtomicBool::new(false),
    };
    CData::build(
        cdata.ctype().clone(),
        cdata.address(),
        cdata.explicit_length(),
        cdata.extent(),
        Storage::Gc(state),
    )
}

/// `sizeof` of a cdata: the full extent of arrays of open length.
pub fn sizeof_cdata(cdata: &CData) -> Result<usize> {
    let ct = cdata.ctype();
    if let (Some(item), Some(n)) = (ct.item(), cdata.explicit_length())
        && ct.is_array()
    {
        return Ok(item.sizeof()? * n);
    }
    if ct.is_struct_or_union()
        && let Some(extent) = cdata.extent()
        && ct.record_layout().is_some_and(|l| {
            l.flags().contains(crate::layout::RecordFlags::WITH_VAR_ARRAY)
        })
    {
        return Ok(extent);
    }
    ct.sizeof()
}

impl std::fmt::Display for CData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&repr::cdata_repr(self))
    }
}

impl std::fmt::Debug for CData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&repr::cdata_repr(self))
    }
}
