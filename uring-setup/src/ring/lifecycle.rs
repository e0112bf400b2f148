use std::{
    mem::ManuallyDrop,
    os::fd::{AsRawFd, RawFd},
    ptr::NonNull,
    sync::atomic::Ordering,
};

use scopeguard::ScopeGuard;
use tracing::{debug, warn};
use uring_common::linux_raw_sys::io_uring::IORING_SETUP_NO_MMAP;

use super::{
    backing::{Backing, Strategy},
    huge::{self, HugeLayout},
    mmap,
    views::{CompletionQueue, SubmissionQueue},
};
use crate::{
    metrics::{MetricsStorage, GLOBAL_STORAGE},
    entries, Error, Kernel, Params, Result, Syscalls,
};

/// An io_uring instance with its rings mapped. Use one of the constructors to set up,
/// [`Self::sq`] / [`Self::cq`] to get at the rings, and drop (or [`Self::exit`]) to tear down.
///
/// Construction either succeeds completely or releases everything it acquired before
/// returning the error. Teardown undoes exactly what construction did, see [`Strategy`].
pub struct Ring<K: Kernel = Syscalls> {
    kernel: K,
    fd: RawFd,
    sq: SubmissionQueue,
    cq: CompletionQueue,
    params: Params,
    /// Taken exactly once, in `drop`.
    backing: ManuallyDrop<Backing>,
    metrics: &'static MetricsStorage,
}

// SAFETY: the raw pointers in the views point into memory owned by the ring, not by the thread.
unsafe impl<K: Kernel + Send> Send for Ring<K> {}

impl Ring<Syscalls> {
    /// Set up a ring with `entries` SQEs and default [`Params`].
    pub fn new(entries: u32) -> Result<Self> {
        Self::with_params(entries, Params::new())
    }

    /// Set up a ring with `entries` SQEs and the given `IORING_SETUP_*` flags.
    pub fn with_flags(entries: u32, flags: u32) -> Result<Self> {
        Self::with_params(entries, Params::new().setup_flags(flags))
    }

    pub fn with_params(entries: u32, params: Params) -> Result<Self> {
        Self::with_kernel(Syscalls, entries, params)
    }

    /// Set up a `IORING_SETUP_NO_MMAP` ring in the `len` bytes of memory at `buf`.
    ///
    /// Returns the ring and the number of bytes of `buf` it occupies, rounded up to a page.
    /// The remainder of the buffer can host further rings. Fails with
    /// [`Error::OutOfMemory`] if the rings don't fit; the ring never frees `buf`.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for reads and writes of `len` bytes, suitably aligned (the
    /// kernel wants page alignment), and must not be used for anything else until the
    /// returned ring is dropped.
    pub unsafe fn with_mem(
        entries: u32,
        params: Params,
        buf: NonNull<u8>,
        len: usize,
    ) -> Result<(Self, usize)> {
        Self::with_kernel_mem(Syscalls, entries, params, buf, len)
    }

    /// Map the rings of a ring fd the caller set up with `io_uring_setup(2)` itself.
    ///
    /// On success the ring owns `fd`. On failure `fd` is left open.
    ///
    /// # Safety
    ///
    /// `fd` must be an io_uring fd and `params` the record the kernel filled in when creating it.
    pub unsafe fn from_raw_fd(fd: RawFd, params: Params) -> Result<Self> {
        Self::from_raw_fd_with_kernel(Syscalls, fd, params)
    }
}

impl<K: Kernel> Ring<K> {
    pub fn with_kernel(kernel: K, entries: u32, params: Params) -> Result<Self> {
        // SAFETY: no caller memory involved
        unsafe { Self::setup(kernel, entries, params, None, &GLOBAL_STORAGE) }
            .map(|(ring, _)| ring)
    }

    /// [`Ring::with_mem`] on the given kernel.
    ///
    /// # Safety
    ///
    /// See [`Ring::with_mem`].
    pub unsafe fn with_kernel_mem(
        kernel: K,
        entries: u32,
        params: Params,
        buf: NonNull<u8>,
        len: usize,
    ) -> Result<(Self, usize)> {
        Self::setup(kernel, entries, params, Some((buf, len)), &GLOBAL_STORAGE)
    }

    /// [`Ring::from_raw_fd`] on the given kernel.
    ///
    /// # Safety
    ///
    /// See [`Ring::from_raw_fd`].
    pub unsafe fn from_raw_fd_with_kernel(kernel: K, fd: RawFd, params: Params) -> Result<Self> {
        let (backing, sq, cq) = mmap::map_rings(&kernel, fd, &params)?;
        GLOBAL_STORAGE.rings_created.fetch_add(1, Ordering::Relaxed);
        Ok(Ring {
            kernel,
            fd,
            sq,
            cq,
            params,
            backing: ManuallyDrop::new(backing),
            metrics: &GLOBAL_STORAGE,
        })
    }

    pub(crate) unsafe fn setup(
        kernel: K,
        entries: u32,
        mut params: Params,
        mem: Option<(NonNull<u8>, usize)>,
        metrics: &'static MetricsStorage,
    ) -> Result<(Self, usize)> {
        if mem.is_some() {
            params.raw.flags |= IORING_SETUP_NO_MMAP;
        }
        entries::negotiate(entries, &params)?;
        debug!(entries, flags = params.flags(), "ring setup start");
        scopeguard::defer_on_unwind! {tracing::error!("ring setup panic")};

        let (fd, backing, sq, cq, used) = if params.has_flag(IORING_SETUP_NO_MMAP) {
            let HugeLayout {
                backing,
                sqes,
                rings,
                used,
            } = huge::alloc(&kernel, entries, &mut params, mem)?;
            let backing = scopeguard::guard(backing, |b| b.release(&kernel));
            let fd = scopeguard::guard(setup_fd(&kernel, entries, &mut params)?, |fd| {
                close_fd(&kernel, fd)
            });
            // with NO_MMAP, the kernel reports both rings' offsets relative to the rings region
            let p = &params.raw;
            let sq = SubmissionQueue::resolve(&rings, &sqes, &p.sq_off, p.sq_entries)?;
            let cq = CompletionQueue::resolve(&rings, &p.cq_off, p.cq_entries)?;
            let fd = ScopeGuard::into_inner(fd);
            (fd, ScopeGuard::into_inner(backing), sq, cq, used)
        } else {
            let fd = scopeguard::guard(setup_fd(&kernel, entries, &mut params)?, |fd| {
                close_fd(&kernel, fd)
            });
            let (backing, sq, cq) = mmap::map_rings(&kernel, *fd, &params)?;
            (ScopeGuard::into_inner(fd), backing, sq, cq, 0)
        };

        debug!(
            fd,
            sq_entries = params.sq_entries(),
            cq_entries = params.cq_entries(),
            features = params.features(),
            strategy = ?backing.strategy(),
            "ring setup end"
        );
        metrics.rings_created.fetch_add(1, Ordering::Relaxed);
        Ok((
            Ring {
                kernel,
                fd,
                sq,
                cq,
                params,
                backing: ManuallyDrop::new(backing),
                metrics,
            },
            used,
        ))
    }

    pub fn sq(&self) -> &SubmissionQueue {
        &self.sq
    }

    pub fn cq(&self) -> &CompletionQueue {
        &self.cq
    }

    /// The configuration record as negotiated with the kernel.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// `IORING_FEAT_*` bits reported by the kernel.
    pub fn features(&self) -> u32 {
        self.params.features()
    }

    /// `IORING_SETUP_*` flags the ring was set up with.
    pub fn flags(&self) -> u32 {
        self.params.flags()
    }

    pub fn strategy(&self) -> Strategy {
        self.backing.strategy()
    }

    pub(crate) fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Keep the ring memory out of child processes: `madvise(MADV_DONTFORK)` on every region.
    ///
    /// Stops at the first region that fails.
    pub fn dontfork(&self) -> Result<()> {
        for (region, mapping) in self.backing.regions() {
            if mapping.len() == 0 {
                return Err(Error::InvalidArgument("ring region is not mapped"));
            }
            // SAFETY: the region stays mapped until the ring is dropped
            unsafe { self.kernel.dontfork(mapping.ptr(), mapping.len()) }
                .map_err(|source| Error::Advise { region, source })?;
        }
        Ok(())
    }

    /// Tear the ring down. Same as dropping it.
    pub fn exit(self) {
        drop(self)
    }
}

impl<K: Kernel> AsRawFd for Ring<K> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl<K: Kernel> Drop for Ring<K> {
    fn drop(&mut self) {
        // SAFETY: `drop` runs once and `self.backing` is not touched afterwards
        let backing = unsafe { ManuallyDrop::take(&mut self.backing) };
        let strategy = backing.strategy();
        debug!(fd = self.fd, ?strategy, "ring teardown start");
        scopeguard::defer_on_success! {debug!("ring teardown end")};
        // SAFETY: the views die with `self`, nothing can use the memory afterwards
        match strategy {
            Strategy::KernelDualMapping | Strategy::KernelSingleMapping => {
                close_fd(&self.kernel, self.fd);
                unsafe { backing.release(&self.kernel) };
            }
            Strategy::OwnedHugeAllocation | Strategy::CallerSuppliedBuffer => {
                unsafe { backing.release(&self.kernel) };
                close_fd(&self.kernel, self.fd);
            }
        }
        self.metrics.rings_destroyed.fetch_add(1, Ordering::Relaxed);
    }
}

/// # Safety
///
/// See [`Kernel::setup`].
unsafe fn setup_fd<K: Kernel>(kernel: &K, entries: u32, params: &mut Params) -> Result<RawFd> {
    kernel.setup(entries, &mut params.raw).map_err(Error::Setup)
}

fn close_fd<K: Kernel>(kernel: &K, fd: RawFd) {
    if let Err(error) = kernel.close(fd) {
        warn!(fd, %error, "closing ring fd failed");
    }
}
