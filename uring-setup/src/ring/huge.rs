//! Ring memory for `IORING_SETUP_NO_MMAP`: the SQE array and the rings laid out
//! in one contiguous buffer instead of being mapped from the ring fd.
//!
//! The buffer is either supplied by the caller or a huge page allocated here.
//! Layout: page-aligned SQE array at the start, rings right behind it. If the rings
//! don't fit into our own huge page, they get a second huge page of their own.

use std::ptr::NonNull;

use scopeguard::ScopeGuard;
use tracing::debug;
use uring_common::linux_raw_sys::io_uring::{io_uring_cqe, io_uring_sqe};

use super::{backing::Backing, region::Mapping};
use crate::{entries, mlock::KRING_SIZE, Error, Kernel, Params, Region, Result};

/// Where the rings of a `IORING_SETUP_NO_MMAP` ring ended up.
pub(crate) struct HugeLayout {
    pub(crate) backing: Backing,
    pub(crate) sqes: Mapping,
    pub(crate) rings: Mapping,
    /// Bytes of the buffer consumed, rounded up to a page.
    pub(crate) used: usize,
}

fn round_up(n: usize, to: usize) -> usize {
    (n + to - 1) & !(to - 1)
}

fn map_huge<K: Kernel>(kernel: &K, len: usize, region: Region) -> Result<Mapping> {
    let ptr = kernel
        .map_huge(len)
        .map_err(|source| Error::Map { region, source })?;
    Ok(Mapping::new(ptr, len))
}

/// Lay out the ring memory for a ring of `entries` and point `params` at it.
///
/// `buf` is caller memory; `None` allocates a huge page of [`Params::huge_page`] bytes.
///
/// # Safety
///
/// `buf`, if given, must be valid for writes of its length and not used by anything else
/// for as long as the returned layout (and the ring built on it) lives.
pub(crate) unsafe fn alloc<K: Kernel>(
    kernel: &K,
    entries: u32,
    params: &mut Params,
    buf: Option<(NonNull<u8>, usize)>,
) -> Result<HugeLayout> {
    let page_size = kernel.page_size();
    let entries::Entries { sq, cq } = entries::negotiate(entries, params)?;

    let sqes_mem = round_up(sq as usize * std::mem::size_of::<io_uring_sqe>(), page_size);
    let ring_mem = KRING_SIZE
        + cq as usize * std::mem::size_of::<io_uring_cqe>()
        + sq as usize * std::mem::size_of::<u32>();
    let required = sqes_mem + ring_mem;

    let (buf, owned) = match buf {
        Some((ptr, len)) => {
            if required > len {
                return Err(Error::OutOfMemory {
                    required,
                    available: len,
                });
            }
            (Mapping::new(ptr, len), false)
        }
        None => {
            let huge_page = params.huge_page();
            if sqes_mem > huge_page || ring_mem > huge_page {
                return Err(Error::OutOfMemory {
                    required: sqes_mem.max(ring_mem),
                    available: huge_page,
                });
            }
            (map_huge(kernel, huge_page, Region::HugeSqes)?, true)
        }
    };
    let buf_size = buf.len();
    let buf = scopeguard::guard(buf, |buf| {
        if owned {
            buf.release(kernel, Region::HugeSqes);
        }
    });

    buf.zero();
    let sqes = buf.window(0, sqes_mem)?;
    let (rings, second) = if required <= buf_size {
        (buf.window(sqes_mem, buf_size - sqes_mem)?, None)
    } else {
        debug!(required, buf_size, "rings don't fit, allocating a second huge page");
        let second = map_huge(kernel, buf_size, Region::HugeRings)?;
        second.zero();
        (second.window(0, buf_size)?, Some(second))
    };

    params.raw.sq_off.user_addr = sqes.ptr().as_ptr() as u64;
    params.raw.cq_off.user_addr = rings.ptr().as_ptr() as u64;

    let used = round_up(required, page_size);
    let buf = ScopeGuard::into_inner(buf);
    let backing = if owned {
        Backing::OwnedHugeAllocation {
            sqes: buf,
            rings: second,
        }
    } else {
        Backing::CallerSuppliedBuffer {
            used: buf.window(0, used.min(buf_size))?,
        }
    };
    Ok(HugeLayout {
        backing,
        sqes,
        rings,
        used,
    })
}
