//! SQ/CQ depth negotiation, mirroring the rules the kernel applies in `io_uring_setup(2)`.

use uring_common::linux_raw_sys::io_uring::{IORING_SETUP_CLAMP, IORING_SETUP_CQSIZE};

use crate::{Error, Params, Result};

/// Largest SQ depth the kernel accepts.
pub const KERN_MAX_ENTRIES: u32 = 32768;
/// Largest CQ depth the kernel accepts.
pub const KERN_MAX_CQ_ENTRIES: u32 = 2 * KERN_MAX_ENTRIES;

/// Negotiated queue depths. Both are powers of two and `cq >= sq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entries {
    pub sq: u32,
    pub cq: u32,
}

/// Compute the queue depths the kernel will grant for a request of `entries`.
///
/// Honors `IORING_SETUP_CLAMP` and `IORING_SETUP_CQSIZE` (with [`Params::cq_entries`]) in `params`.
pub fn negotiate(entries: u32, params: &Params) -> Result<Entries> {
    let clamp = params.has_flag(IORING_SETUP_CLAMP);

    if entries == 0 {
        return Err(Error::InvalidArgument("entries must not be zero"));
    }
    let sq = if entries > KERN_MAX_ENTRIES {
        if !clamp {
            return Err(Error::InvalidArgument("entries exceed the kernel maximum"));
        }
        KERN_MAX_ENTRIES
    } else {
        entries
    }
    .next_power_of_two();

    let cq = if params.has_flag(IORING_SETUP_CQSIZE) {
        let requested = params.cq_entries();
        if requested == 0 {
            return Err(Error::InvalidArgument("cq entries must not be zero"));
        }
        let cq = if requested > KERN_MAX_CQ_ENTRIES {
            if !clamp {
                return Err(Error::InvalidArgument("cq entries exceed the kernel maximum"));
            }
            KERN_MAX_CQ_ENTRIES
        } else {
            requested
        }
        .next_power_of_two();
        if cq < sq {
            return Err(Error::InvalidArgument("cq entries smaller than sq entries"));
        }
        cq
    } else {
        2 * sq
    };

    Ok(Entries { sq, cq })
}
