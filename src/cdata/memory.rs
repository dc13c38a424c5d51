//! Raw memory: owned allocations and unchecked access to addresses.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// A zero-filled, aligned heap allocation that can be freed early.
///
/// The allocation is returned to the allocator either by [`release`]
/// or when the block is dropped, whichever comes first.
///
/// [`release`]: MemoryBlock::release
#[derive(Debug)]
pub(crate) struct MemoryBlock {
    ptr: NonNull<u8>,
    layout: Layout,
    size: usize,
    released: AtomicBool,
}

// The block is plain bytes; synchronisation of their content is the
// embedder's responsibility, as with C memory.
unsafe impl Send for MemoryBlock {}
unsafe impl Sync for MemoryBlock {}

impl MemoryBlock {
    /// Allocate `size` zeroed bytes aligned to `align`.
    pub(crate) fn new(size: usize, align: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size.max(1), align.max(1))
            .map_err(|e| Error::overflow(format!("cannot allocate {} bytes: {}", size, e)))?;
        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| Error::runtime(format!("out of memory allocating {} bytes", size)))?;
        Ok(Self {
            ptr,
            layout,
            size,
            released: AtomicBool::new(false),
        })
    }

    /// A block holding a copy of `bytes`.
    pub(crate) fn from_bytes(bytes: &[u8], align: usize) -> Result<Self> {
        let block = Self::new(bytes.len(), align)?;
        // SAFETY: the block was just allocated with room for `bytes`.
        unsafe { write(block.address(), bytes) };
        Ok(block)
    }

    pub(crate) fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Free the allocation now. Returns `false` if it was already freed.
    pub(crate) fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        // SAFETY: allocated with this layout and freed only once.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
        true
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Copy `len` bytes starting at `address`.
///
/// # Safety
/// `address..address + len` must be readable.
pub(crate) unsafe fn read(address: usize, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    if len > 0 {
        // SAFETY: guaranteed by the caller.
        unsafe { std::ptr::copy_nonoverlapping(address as *const u8, out.as_mut_ptr(), len) };
    }
    out
}

/// Copy `bytes` to `address`.
///
/// # Safety
/// `address..address + bytes.len()` must be writable.
pub(crate) unsafe fn write(address: usize, bytes: &[u8]) {
    if !bytes.is_empty() {
        // SAFETY: guaranteed by the caller.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len()) };
    }
}

/// `memmove`.
///
/// # Safety
/// Both ranges must be valid for `len` bytes.
pub(crate) unsafe fn copy(dest: usize, src: usize, len: usize) {
    if len > 0 {
        // SAFETY: guaranteed by the caller.
        unsafe { std::ptr::copy(src as *const u8, dest as *mut u8, len) };
    }
}

/// Read a pointer-sized value.
///
/// # Safety
/// `address` must be readable for a pointer.
pub(crate) unsafe fn read_address(address: usize) -> usize {
    // SAFETY: guaranteed by the caller; unaligned reads are allowed.
    unsafe { std::ptr::read_unaligned(address as *const usize) }
}

/// # Safety
/// `address` must be writable for a pointer.
pub(crate) unsafe fn write_address(address: usize, value: usize) {
    // SAFETY: guaranteed by the caller.
    unsafe { std::ptr::write_unaligned(address as *mut usize, value) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_is_zeroed_and_aligned() -> Result<()> {
        let block = MemoryBlock::new(24, 16)?;
        assert_eq!(block.address() % 16, 0);
        // SAFETY: the block is live and 24 bytes long.
        let bytes = unsafe { read(block.address(), 24) };
        assert!(bytes.iter().all(|b| *b == 0));
        Ok(())
    }

    #[test]
    fn test_release_once() -> Result<()> {
        let block = MemoryBlock::from_bytes(&[1, 2, 3], 1)?;
        assert!(block.release());
        assert!(block.is_released());
        assert!(!block.release());
        Ok(())
    }
}
