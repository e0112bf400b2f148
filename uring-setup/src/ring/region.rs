use std::ptr::NonNull;

use tracing::{trace, warn};

use crate::{Error, Kernel, Region, Result};

/// A contiguous byte range of ring memory: a mapping, an allocation, or a window into one.
///
/// Typed pointers into it are only handed out through [`Mapping::field`] / [`Mapping::array`],
/// which check the kernel-reported offsets against the length.
#[derive(Debug)]
pub(crate) struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    pub(crate) fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Mapping { ptr, len }
    }

    pub(crate) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// A window of `len` bytes starting `offset` bytes into `self`.
    pub(crate) fn window(&self, offset: usize, len: usize) -> Result<Mapping> {
        let ptr = self.array::<u8>(offset, len)?;
        Ok(Mapping { ptr, len })
    }

    pub(crate) fn field<T>(&self, offset: u32) -> Result<NonNull<T>> {
        self.array(offset as usize, 1)
    }

    pub(crate) fn array<T>(&self, offset: usize, count: usize) -> Result<NonNull<T>> {
        let end = std::mem::size_of::<T>()
            .checked_mul(count)
            .and_then(|size| size.checked_add(offset));
        match end {
            Some(end) if end <= self.len => {}
            _ => return Err(Error::InvalidArgument("ring offset outside of its region")),
        }
        let addr = (self.ptr.as_ptr() as usize) + offset;
        if addr % std::mem::align_of::<T>() != 0 {
            return Err(Error::InvalidArgument("misaligned ring offset"));
        }
        // SAFETY: offset..end lies within the region, whose base is non-null
        Ok(unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) }.cast())
    }

    /// Zero the whole range.
    ///
    /// # Safety
    ///
    /// The range must be writable and not referenced by anyone else.
    pub(crate) unsafe fn zero(&self) {
        std::ptr::write_bytes(self.ptr.as_ptr(), 0, self.len);
    }

    /// Unmap the range, logging failures.
    ///
    /// # Safety
    ///
    /// `self` must be a whole mapping obtained from `kernel` that nothing references anymore.
    pub(crate) unsafe fn release<K: Kernel>(self, kernel: &K, region: Region) {
        trace!(%region, len = self.len, "unmapping");
        if let Err(error) = kernel.unmap(self.ptr, self.len) {
            warn!(%region, len = self.len, %error, "munmap failed");
        }
    }
}
