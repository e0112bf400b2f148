use uring_common::linux_raw_sys::io_uring::{
    io_cqring_offsets, io_sqring_offsets, io_uring_params, IORING_SETUP_CLAMP,
    IORING_SETUP_CQSIZE, IORING_SETUP_NO_MMAP, IORING_SETUP_SQPOLL, IORING_SETUP_SQ_AFF,
};

/// Configuration record for setting up a [`crate::Ring`].
///
/// Before setup it carries the requested flags and optional sizes. The copy held by a
/// [`crate::Ring`] additionally carries what the kernel negotiated: entry counts,
/// feature bits and the ring field offsets. Constructors take the record by value,
/// so a record handed in is never the one the kernel writes into.
#[derive(Debug, Clone, Copy)]
pub struct Params {
    pub(crate) raw: io_uring_params,
    pub(crate) huge_page_size: usize,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            // SAFETY: io_uring_params is plain integers; all-zero is the documented initial state.
            raw: unsafe { std::mem::zeroed() },
            huge_page_size: *crate::env_tunables::HUGE_PAGE_SIZE,
        }
    }
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `IORING_SETUP_*` bits to the requested flags.
    pub fn setup_flags(mut self, flags: u32) -> Self {
        self.raw.flags |= flags;
        self
    }

    /// `IORING_SETUP_CLAMP`: reduce oversized depths to the kernel maximum instead of failing.
    pub fn clamp(self) -> Self {
        self.setup_flags(IORING_SETUP_CLAMP)
    }

    /// `IORING_SETUP_CQSIZE`: request an explicit CQ depth.
    pub fn cq_size(mut self, entries: u32) -> Self {
        self.raw.cq_entries = entries;
        self.setup_flags(IORING_SETUP_CQSIZE)
    }

    /// `IORING_SETUP_NO_MMAP`: place the rings in a huge page allocated by this crate.
    pub fn no_mmap(self) -> Self {
        self.setup_flags(IORING_SETUP_NO_MMAP)
    }

    /// `IORING_SETUP_SQPOLL` with the given idle time of the kernel polling thread.
    pub fn sq_poll(mut self, idle_ms: u32) -> Self {
        self.raw.sq_thread_idle = idle_ms;
        self.setup_flags(IORING_SETUP_SQPOLL)
    }

    /// `IORING_SETUP_SQ_AFF`: pin the kernel polling thread to `cpu`.
    pub fn sq_thread_cpu(mut self, cpu: u32) -> Self {
        self.raw.sq_thread_cpu = cpu;
        self.setup_flags(IORING_SETUP_SQ_AFF)
    }

    /// Size of the huge page allocated for `IORING_SETUP_NO_MMAP` rings.
    ///
    /// Defaults to [`crate::env_tunables`]' value, i.e., the platform huge page size.
    pub fn huge_page_size(mut self, bytes: usize) -> Self {
        self.huge_page_size = bytes;
        self
    }

    pub fn flags(&self) -> u32 {
        self.raw.flags
    }

    pub fn huge_page(&self) -> usize {
        self.huge_page_size
    }

    /// Negotiated SQ depth; zero before negotiation.
    pub fn sq_entries(&self) -> u32 {
        self.raw.sq_entries
    }

    /// Negotiated CQ depth; the requested explicit CQ depth before negotiation.
    pub fn cq_entries(&self) -> u32 {
        self.raw.cq_entries
    }

    /// `IORING_FEAT_*` bits reported by the kernel.
    pub fn features(&self) -> u32 {
        self.raw.features
    }

    pub fn sq_off(&self) -> &io_sqring_offsets {
        &self.raw.sq_off
    }

    pub fn cq_off(&self) -> &io_cqring_offsets {
        &self.raw.cq_off
    }

    pub(crate) fn has_flag(&self, flag: u32) -> bool {
        self.raw.flags & flag != 0
    }

    pub fn as_raw(&self) -> &io_uring_params {
        &self.raw
    }

    /// # Safety
    ///
    /// The `user_addr` fields of the offsets are handed to the kernel as addresses
    /// when `IORING_SETUP_NO_MMAP` is set.
    pub unsafe fn as_raw_mut(&mut self) -> &mut io_uring_params {
        &mut self.raw
    }
}
