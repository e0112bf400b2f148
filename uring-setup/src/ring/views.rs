//! Typed views of the SQ and CQ rings.
//!
//! The pointers are resolved once, at construction, from the offsets the kernel
//! reported in `io_uring_params`. Nothing else in this crate computes ring addresses.

use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;

use uring_common::linux_raw_sys::io_uring::{
    io_cqring_offsets, io_sqring_offsets, io_uring_cqe, io_uring_sqe,
};

use super::region::Mapping;
use crate::{Error, Result};

/// The submission queue: the SQ ring plus the SQE array.
///
/// Borrowed from a [`crate::Ring`]; valid until the ring is torn down.
#[derive(Debug)]
pub struct SubmissionQueue {
    khead: NonNull<AtomicU32>,
    ktail: NonNull<AtomicU32>,
    kring_mask: NonNull<u32>,
    kring_entries: NonNull<u32>,
    kflags: NonNull<AtomicU32>,
    kdropped: NonNull<AtomicU32>,
    array: NonNull<u32>,
    sqes: NonNull<io_uring_sqe>,
    ring_size: usize,
}

/// The completion queue. May live in the same mapping as the SQ ring.
///
/// Borrowed from a [`crate::Ring`]; valid until the ring is torn down.
#[derive(Debug)]
pub struct CompletionQueue {
    khead: NonNull<AtomicU32>,
    ktail: NonNull<AtomicU32>,
    kring_mask: NonNull<u32>,
    kring_entries: NonNull<u32>,
    koverflow: NonNull<AtomicU32>,
    kflags: Option<NonNull<AtomicU32>>,
    cqes: NonNull<io_uring_cqe>,
    ring_size: usize,
}

fn check_geometry(mask: u32, entries: u32, negotiated: u32) -> Result<()> {
    if entries != negotiated || !entries.is_power_of_two() || mask != entries - 1 {
        return Err(Error::InvalidArgument(
            "ring geometry does not match the negotiated entries",
        ));
    }
    Ok(())
}

impl SubmissionQueue {
    /// # Safety
    ///
    /// `ring` must hold the SQ ring and `sqes` the SQE array of the same io_uring
    /// instance, as set up by the kernel with `off` and `entries`.
    pub(crate) unsafe fn resolve(
        ring: &Mapping,
        sqes: &Mapping,
        off: &io_sqring_offsets,
        entries: u32,
    ) -> Result<Self> {
        let sq = SubmissionQueue {
            khead: ring.field(off.head)?,
            ktail: ring.field(off.tail)?,
            kring_mask: ring.field(off.ring_mask)?,
            kring_entries: ring.field(off.ring_entries)?,
            kflags: ring.field(off.flags)?,
            kdropped: ring.field(off.dropped)?,
            array: ring.array(off.array as usize, entries as usize)?,
            sqes: sqes.array(0, entries as usize)?,
            ring_size: ring.len(),
        };
        check_geometry(sq.ring_mask(), sq.ring_entries(), entries)?;
        Ok(sq)
    }

    pub fn head(&self) -> &AtomicU32 {
        // SAFETY: resolved within the live SQ ring, which outlives `&self`
        unsafe { self.khead.as_ref() }
    }

    pub fn tail(&self) -> &AtomicU32 {
        // SAFETY: see `head`
        unsafe { self.ktail.as_ref() }
    }

    pub fn flags(&self) -> &AtomicU32 {
        // SAFETY: see `head`
        unsafe { self.kflags.as_ref() }
    }

    pub fn dropped(&self) -> &AtomicU32 {
        // SAFETY: see `head`
        unsafe { self.kdropped.as_ref() }
    }

    pub fn ring_mask(&self) -> u32 {
        // SAFETY: see `head`; the kernel writes it once during setup
        unsafe { self.kring_mask.as_ptr().read_volatile() }
    }

    pub fn ring_entries(&self) -> u32 {
        // SAFETY: see `ring_mask`
        unsafe { self.kring_entries.as_ptr().read_volatile() }
    }

    /// The SQ index array, [`Self::ring_entries`] long.
    pub fn array(&self) -> NonNull<u32> {
        self.array
    }

    /// The SQE array, [`Self::ring_entries`] long.
    pub fn sqes(&self) -> NonNull<io_uring_sqe> {
        self.sqes
    }

    /// Size of the region that holds the SQ ring.
    pub fn ring_size(&self) -> usize {
        self.ring_size
    }
}

impl CompletionQueue {
    /// # Safety
    ///
    /// `ring` must hold the CQ ring of an io_uring instance set up by the kernel
    /// with `off` and `entries`.
    pub(crate) unsafe fn resolve(
        ring: &Mapping,
        off: &io_cqring_offsets,
        entries: u32,
    ) -> Result<Self> {
        let cq = CompletionQueue {
            khead: ring.field(off.head)?,
            ktail: ring.field(off.tail)?,
            kring_mask: ring.field(off.ring_mask)?,
            kring_entries: ring.field(off.ring_entries)?,
            koverflow: ring.field(off.overflow)?,
            // kernels before 5.8 don't report a flags offset
            kflags: match off.flags {
                0 => None,
                offset => Some(ring.field(offset)?),
            },
            cqes: ring.array(off.cqes as usize, entries as usize)?,
            ring_size: ring.len(),
        };
        check_geometry(cq.ring_mask(), cq.ring_entries(), entries)?;
        Ok(cq)
    }

    pub fn head(&self) -> &AtomicU32 {
        // SAFETY: resolved within the live CQ ring, which outlives `&self`
        unsafe { self.khead.as_ref() }
    }

    pub fn tail(&self) -> &AtomicU32 {
        // SAFETY: see `head`
        unsafe { self.ktail.as_ref() }
    }

    pub fn overflow(&self) -> &AtomicU32 {
        // SAFETY: see `head`
        unsafe { self.koverflow.as_ref() }
    }

    pub fn flags(&self) -> Option<&AtomicU32> {
        // SAFETY: see `head`
        self.kflags.map(|p| unsafe { &*p.as_ptr() })
    }

    pub fn ring_mask(&self) -> u32 {
        // SAFETY: see `head`; the kernel writes it once during setup
        unsafe { self.kring_mask.as_ptr().read_volatile() }
    }

    pub fn ring_entries(&self) -> u32 {
        // SAFETY: see `ring_mask`
        unsafe { self.kring_entries.as_ptr().read_volatile() }
    }

    /// The CQE array, [`Self::ring_entries`] long.
    pub fn cqes(&self) -> NonNull<io_uring_cqe> {
        self.cqes
    }

    /// Size of the region that holds the CQ ring.
    pub fn ring_size(&self) -> usize {
        self.ring_size
    }
}
