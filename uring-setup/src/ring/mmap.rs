//! Mapping the rings of a ring fd into our address space.

use std::os::fd::RawFd;

use scopeguard::ScopeGuard;
use tracing::trace;
use uring_common::linux_raw_sys::io_uring::{
    io_uring_cqe, io_uring_sqe, IORING_FEAT_SINGLE_MMAP, IORING_OFF_CQ_RING, IORING_OFF_SQES,
    IORING_OFF_SQ_RING,
};

use super::{
    backing::Backing,
    region::Mapping,
    views::{CompletionQueue, SubmissionQueue},
};
use crate::{Error, Kernel, Params, Region, Result};

fn map<K: Kernel>(
    kernel: &K,
    fd: RawFd,
    len: usize,
    offset: u64,
    region: Region,
) -> Result<Mapping> {
    let ptr = kernel
        .map_ring(fd, len, offset)
        .map_err(|source| Error::Map { region, source })?;
    trace!(%region, len, "mapped");
    Ok(Mapping::new(ptr, len))
}

/// Map SQ ring, CQ ring and SQE array of `fd` using the offsets negotiated into `params`.
///
/// Either everything is mapped and resolved, or nothing stays mapped.
pub(crate) fn map_rings<K: Kernel>(
    kernel: &K,
    fd: RawFd,
    params: &Params,
) -> Result<(Backing, SubmissionQueue, CompletionQueue)> {
    let p = &params.raw;
    let sq_entries = p.sq_entries as usize;
    let mut sq_ring_size = p.sq_off.array as usize + sq_entries * std::mem::size_of::<u32>();
    let mut cq_ring_size =
        p.cq_off.cqes as usize + p.cq_entries as usize * std::mem::size_of::<io_uring_cqe>();
    let single_mmap = p.features & IORING_FEAT_SINGLE_MMAP != 0;
    if single_mmap {
        sq_ring_size = sq_ring_size.max(cq_ring_size);
        cq_ring_size = sq_ring_size;
    }

    // SAFETY (all guards): on the error path no view into the mappings has escaped
    let sq_ring = scopeguard::guard(
        map(kernel, fd, sq_ring_size, IORING_OFF_SQ_RING as u64, Region::SqRing)?,
        |m| unsafe { m.release(kernel, Region::SqRing) },
    );
    let cq_ring = if single_mmap {
        None
    } else {
        Some(scopeguard::guard(
            map(kernel, fd, cq_ring_size, IORING_OFF_CQ_RING as u64, Region::CqRing)?,
            |m| unsafe { m.release(kernel, Region::CqRing) },
        ))
    };
    let sqes = scopeguard::guard(
        map(
            kernel,
            fd,
            sq_entries * std::mem::size_of::<io_uring_sqe>(),
            IORING_OFF_SQES as u64,
            Region::Sqes,
        )?,
        |m| unsafe { m.release(kernel, Region::Sqes) },
    );

    // SAFETY: the mappings come from the kernel for exactly these offsets
    let sq = unsafe { SubmissionQueue::resolve(&sq_ring, &sqes, &p.sq_off, p.sq_entries)? };
    let cq = unsafe {
        CompletionQueue::resolve(
            cq_ring.as_deref().unwrap_or(&*sq_ring),
            &p.cq_off,
            p.cq_entries,
        )?
    };

    let sqes = ScopeGuard::into_inner(sqes);
    let sq_ring = ScopeGuard::into_inner(sq_ring);
    let backing = match cq_ring {
        None => Backing::KernelSingleMapping {
            rings: sq_ring,
            sqes,
        },
        Some(cq_ring) => Backing::KernelDualMapping {
            sq_ring,
            cq_ring: ScopeGuard::into_inner(cq_ring),
            sqes,
        },
    };
    Ok((backing, sq, cq))
}
