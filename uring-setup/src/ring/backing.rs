use super::region::Mapping;
use crate::{Kernel, Region};

/// How a [`crate::Ring`]'s memory was obtained, decided once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// SQ ring, CQ ring and SQEs mapped from the ring fd as three regions.
    KernelDualMapping,
    /// `IORING_FEAT_SINGLE_MMAP`: one mapping holds both rings; the SQEs are a second one.
    KernelSingleMapping,
    /// `IORING_SETUP_NO_MMAP` in memory owned by the caller, see [`crate::Ring::with_mem`].
    CallerSuppliedBuffer,
    /// `IORING_SETUP_NO_MMAP` in huge pages allocated (and released) by the ring.
    OwnedHugeAllocation,
}

/// The releasable memory behind a ring, one variant per [`Strategy`].
#[derive(Debug)]
pub(crate) enum Backing {
    KernelDualMapping {
        sq_ring: Mapping,
        cq_ring: Mapping,
        sqes: Mapping,
    },
    KernelSingleMapping {
        rings: Mapping,
        sqes: Mapping,
    },
    /// Never released; `used` is the part of the caller's memory the ring occupies.
    CallerSuppliedBuffer { used: Mapping },
    OwnedHugeAllocation {
        sqes: Mapping,
        rings: Option<Mapping>,
    },
}

impl Backing {
    pub(crate) fn strategy(&self) -> Strategy {
        match self {
            Backing::KernelDualMapping { .. } => Strategy::KernelDualMapping,
            Backing::KernelSingleMapping { .. } => Strategy::KernelSingleMapping,
            Backing::CallerSuppliedBuffer { .. } => Strategy::CallerSuppliedBuffer,
            Backing::OwnedHugeAllocation { .. } => Strategy::OwnedHugeAllocation,
        }
    }

    /// Every region the ring's memory consists of, SQEs first.
    pub(crate) fn regions(&self) -> Vec<(Region, &Mapping)> {
        match self {
            Backing::KernelDualMapping {
                sq_ring,
                cq_ring,
                sqes,
            } => vec![
                (Region::Sqes, sqes),
                (Region::SqRing, sq_ring),
                (Region::CqRing, cq_ring),
            ],
            Backing::KernelSingleMapping { rings, sqes } => {
                vec![(Region::Sqes, sqes), (Region::SqRing, rings)]
            }
            Backing::CallerSuppliedBuffer { used } => vec![(Region::HugeSqes, used)],
            Backing::OwnedHugeAllocation { sqes, rings } => {
                let mut regions = vec![(Region::HugeSqes, sqes)];
                regions.extend(rings.iter().map(|r| (Region::HugeRings, r)));
                regions
            }
        }
    }

    /// Release the memory this crate owns: SQEs first, then the ring region(s).
    ///
    /// # Safety
    ///
    /// No view into the memory may be used afterwards.
    pub(crate) unsafe fn release<K: Kernel>(self, kernel: &K) {
        match self {
            Backing::KernelDualMapping {
                sq_ring,
                cq_ring,
                sqes,
            } => {
                sqes.release(kernel, Region::Sqes);
                sq_ring.release(kernel, Region::SqRing);
                cq_ring.release(kernel, Region::CqRing);
            }
            Backing::KernelSingleMapping { rings, sqes } => {
                sqes.release(kernel, Region::Sqes);
                rings.release(kernel, Region::SqRing);
            }
            Backing::CallerSuppliedBuffer { .. } => {}
            Backing::OwnedHugeAllocation { sqes, rings } => {
                sqes.release(kernel, Region::HugeSqes);
                if let Some(rings) = rings {
                    rings.release(kernel, Region::HugeRings);
                }
            }
        }
    }
}
