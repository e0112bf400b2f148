//! How much `RLIMIT_MEMLOCK` budget a ring consumes.
//!
//! Kernels before 5.12 account the CQ ring and the SQE array as locked memory.
//! Newer kernels (recognizable by `IORING_FEAT_NATIVE_WORKERS`) account ring memory
//! to the memory cgroup instead, so no memlock budget is needed.

use tracing::debug;
use uring_common::linux_raw_sys::io_uring::{io_uring_cqe, io_uring_sqe, IORING_FEAT_NATIVE_WORKERS};

use crate::{entries, Error, Kernel, Params, Result, Ring, Syscalls};

/// Size of the kernel's `struct io_rings` header that precedes the CQEs.
pub(crate) const KRING_SIZE: usize = 320;

fn fls(x: usize) -> u32 {
    usize::BITS - x.leading_zeros()
}

/// log2 of the power-of-two number of pages the kernel allocates for `size` bytes.
fn npages(size: usize, page_size: usize) -> u32 {
    fls(size.saturating_sub(1) / page_size)
}

/// Bytes of locked memory the kernel charges for a ring with the given depths.
///
/// # Panics
///
/// If `page_size` is zero. [`capacity`] rejects that with an error instead.
pub fn rings_size(sq_entries: u32, cq_entries: u32, page_size: usize) -> usize {
    let mut cq_size = KRING_SIZE + cq_entries as usize * std::mem::size_of::<io_uring_cqe>();
    cq_size = (cq_size + 63) & !63;
    let mut pages = 1usize << npages(cq_size, page_size);

    let sq_size = std::mem::size_of::<io_uring_sqe>() * sq_entries as usize;
    pages += 1usize << npages(sq_size, page_size);
    pages * page_size
}

/// Locked memory a ring of `entries` set up with `params` needs on a kernel reporting `features`.
///
/// Pure: does not talk to the kernel. Returns 0 if `features` contains
/// `IORING_FEAT_NATIVE_WORKERS`, whatever the requested depth.
pub fn capacity(entries: u32, params: &Params, features: u32, page_size: usize) -> Result<usize> {
    if features & IORING_FEAT_NATIVE_WORKERS != 0 {
        return Ok(0);
    }
    if page_size == 0 {
        return Err(Error::InvalidArgument("page size must not be zero"));
    }
    let entries = entries::negotiate(entries, params)?;
    Ok(rings_size(entries.sq, entries.cq, page_size))
}

/// Locked memory needed to set up a ring of `entries` with `params` on the running kernel.
///
/// Sets up (and immediately tears down) a throwaway ring to learn the kernel's feature
/// bits. If that fails, most likely because an old kernel ran out of memlock budget,
/// the kernel is treated as one that charges memlock.
pub fn mlock_size_params(entries: u32, params: &Params) -> Result<usize> {
    mlock_size_with_kernel(Syscalls, entries, params)
}

/// [`mlock_size_params`] with default parameters plus `flags`.
pub fn mlock_size(entries: u32, flags: u32) -> Result<usize> {
    mlock_size_params(entries, &Params::new().setup_flags(flags))
}

pub fn mlock_size_with_kernel<K: Kernel>(
    kernel: K,
    entries: u32,
    params: &Params,
) -> Result<usize> {
    let features = match Ring::with_kernel(&kernel, entries, Params::new()) {
        Ok(ring) => {
            let features = ring.features();
            ring.exit();
            features
        }
        Err(e) => {
            debug!(error = %e, "throwaway ring setup failed, assuming memlock accounting");
            0
        }
    };
    capacity(entries, params, features, kernel.page_size())
}
