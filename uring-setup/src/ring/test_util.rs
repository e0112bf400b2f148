//! An in-process [`Kernel`] that hands out heap memory instead of mappings and
//! fails on demand, so every partial-failure path of ring setup can be driven.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::ptr::NonNull;

use uring_common::libc;
use uring_common::linux_raw_sys::io_uring::{
    io_uring_params, io_uring_probe, io_uring_probe_op, IORING_OFF_CQ_RING, IORING_OFF_SQES,
    IORING_OFF_SQ_RING, IORING_SETUP_NO_MMAP,
};

use crate::{entries, Kernel, Params};

pub(crate) const PAGE_SIZE: usize = 4096;

// ring header layout, shaped like the kernel's `struct io_rings`
const SQ_HEAD: u32 = 0;
const SQ_TAIL: u32 = 64;
const CQ_HEAD: u32 = 128;
const CQ_TAIL: u32 = 192;
const SQ_RING_MASK: u32 = 256;
const CQ_RING_MASK: u32 = 260;
const SQ_RING_ENTRIES: u32 = 264;
const CQ_RING_ENTRIES: u32 = 268;
const SQ_DROPPED: u32 = 272;
const SQ_FLAGS: u32 = 276;
const CQ_FLAGS: u32 = 280;
const CQ_OVERFLOW: u32 = 284;
const CQES: u32 = 320;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Setup { entries: u32 },
    MapRing { offset: u64, len: usize },
    MapHuge { len: usize },
    /// `offset` is the ring offset the mapping was made at, `None` for huge pages.
    Unmap { offset: Option<u64>, len: usize },
    Dontfork { len: usize },
    Close { fd: RawFd },
    RegisterProbe,
}

struct Allocation {
    offset: Option<u64>,
    len: usize,
    _storage: Box<[u64]>,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    features: u32,
    no_cq_flags: bool,
    fail_setup: Option<i32>,
    /// (index among all map calls, errno)
    fail_map_at: Option<(usize, i32)>,
    maps: usize,
    fail_dontfork_at: Option<(usize, i32)>,
    dontforks: usize,
    fail_probe: Option<i32>,
    last_op: u8,
    unsupported: Vec<u8>,
    next_fd: RawFd,
    open_fds: Vec<RawFd>,
    allocations: HashMap<usize, Allocation>,
    negotiated: Option<io_uring_params>,
}

pub(crate) struct MockKernel {
    state: RefCell<State>,
}

impl MockKernel {
    pub(crate) fn new() -> Self {
        MockKernel {
            state: RefCell::new(State {
                next_fd: 100,
                last_op: 15,
                ..Default::default()
            }),
        }
    }

    /// `IORING_FEAT_*` bits reported from setup.
    pub(crate) fn features(self, features: u32) -> Self {
        self.state.borrow_mut().features = features;
        self
    }

    pub(crate) fn fail_setup(self, errno: i32) -> Self {
        self.state.borrow_mut().fail_setup = Some(errno);
        self
    }

    /// Fail the `n`th (0-based) mapping, counting both ring and huge page mappings.
    pub(crate) fn fail_map_at(self, n: usize, errno: i32) -> Self {
        self.state.borrow_mut().fail_map_at = Some((n, errno));
        self
    }

    pub(crate) fn fail_dontfork_at(self, n: usize, errno: i32) -> Self {
        self.state.borrow_mut().fail_dontfork_at = Some((n, errno));
        self
    }

    pub(crate) fn fail_probe(self, errno: i32) -> Self {
        self.state.borrow_mut().fail_probe = Some(errno);
        self
    }

    pub(crate) fn probe_ops(self, last_op: u8, unsupported: &[u8]) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.last_op = last_op;
            state.unsupported = unsupported.to_vec();
        }
        self
    }

    /// Report a zero CQ flags offset, like kernels before 5.8.
    pub(crate) fn no_cq_flags(self) -> Self {
        self.state.borrow_mut().no_cq_flags = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|c| pred(c)).count()
    }

    pub(crate) fn live_mappings(&self) -> usize {
        self.state.borrow().allocations.len()
    }

    pub(crate) fn open_fds(&self) -> Vec<RawFd> {
        self.state.borrow().open_fds.clone()
    }

    #[track_caller]
    pub(crate) fn assert_released(&self) {
        assert_eq!(self.live_mappings(), 0, "leaked mappings: {:?}", self.calls());
        assert!(self.open_fds().is_empty(), "leaked fds: {:?}", self.calls());
    }

    fn allocate(&self, len: usize, offset: Option<u64>) -> io::Result<NonNull<u8>> {
        let mut state = self.state.borrow_mut();
        let n = state.maps;
        state.maps += 1;
        if let Some((at, errno)) = state.fail_map_at {
            if at == n {
                return Err(io::Error::from_raw_os_error(errno));
            }
        }
        let mut storage = vec![0u64; len.div_ceil(8)].into_boxed_slice();
        let ptr = NonNull::from(&mut storage[..]).cast::<u8>();
        let is_ring = |o: u64| o == IORING_OFF_SQ_RING as u64 || o == IORING_OFF_CQ_RING as u64;
        if offset.is_some_and(is_ring) {
            let p = state.negotiated.expect("ring mapped before setup");
            // SAFETY: freshly allocated, `len` covers the kernel-reported ring size
            unsafe { write_header(ptr, len, &p) };
        }
        state.allocations.insert(
            ptr.as_ptr() as usize,
            Allocation {
                offset,
                len,
                _storage: storage,
            },
        );
        Ok(ptr)
    }
}

/// # Safety
///
/// `base` must be valid for writes of `len` bytes.
unsafe fn write_header(base: NonNull<u8>, len: usize, p: &io_uring_params) {
    if len < CQES as usize {
        return;
    }
    let put = |offset: u32, value: u32| {
        base.as_ptr()
            .add(offset as usize)
            .cast::<u32>()
            .write(value)
    };
    put(SQ_RING_MASK, p.sq_entries - 1);
    put(CQ_RING_MASK, p.cq_entries - 1);
    put(SQ_RING_ENTRIES, p.sq_entries);
    put(CQ_RING_ENTRIES, p.cq_entries);
}

impl Kernel for MockKernel {
    unsafe fn setup(&self, entries: u32, params: &mut io_uring_params) -> io::Result<RawFd> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Setup { entries });
        if let Some(errno) = state.fail_setup {
            return Err(io::Error::from_raw_os_error(errno));
        }
        let requested = Params {
            raw: *params,
            huge_page_size: 0,
        };
        let negotiated = entries::negotiate(entries, &requested)
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;

        params.sq_entries = negotiated.sq;
        params.cq_entries = negotiated.cq;
        params.features = state.features;

        params.sq_off.head = SQ_HEAD;
        params.sq_off.tail = SQ_TAIL;
        params.sq_off.ring_mask = SQ_RING_MASK;
        params.sq_off.ring_entries = SQ_RING_ENTRIES;
        params.sq_off.flags = SQ_FLAGS;
        params.sq_off.dropped = SQ_DROPPED;
        params.sq_off.array = CQES + negotiated.cq * 16;

        params.cq_off.head = CQ_HEAD;
        params.cq_off.tail = CQ_TAIL;
        params.cq_off.ring_mask = CQ_RING_MASK;
        params.cq_off.ring_entries = CQ_RING_ENTRIES;
        params.cq_off.overflow = CQ_OVERFLOW;
        params.cq_off.cqes = CQES;
        params.cq_off.flags = if state.no_cq_flags { 0 } else { CQ_FLAGS };

        if params.flags & IORING_SETUP_NO_MMAP != 0 {
            if params.sq_off.user_addr == 0 || params.cq_off.user_addr == 0 {
                return Err(io::Error::from_raw_os_error(libc::EFAULT));
            }
            let rings = NonNull::new(params.cq_off.user_addr as *mut u8)
                .ok_or_else(|| io::Error::from_raw_os_error(libc::EFAULT))?;
            write_header(rings, usize::MAX, params);
        }

        state.negotiated = Some(*params);
        let fd = state.next_fd;
        state.next_fd += 1;
        state.open_fds.push(fd);
        Ok(fd)
    }

    fn map_ring(&self, fd: RawFd, len: usize, offset: u64) -> io::Result<NonNull<u8>> {
        {
            let mut state = self.state.borrow_mut();
            state.calls.push(Call::MapRing { offset, len });
            if !state.open_fds.contains(&fd) {
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
        }
        assert!(
            [IORING_OFF_SQ_RING, IORING_OFF_CQ_RING, IORING_OFF_SQES]
                .iter()
                .any(|o| *o as u64 == offset),
            "bogus ring offset {offset:#x}"
        );
        self.allocate(len, Some(offset))
    }

    fn map_huge(&self, len: usize) -> io::Result<NonNull<u8>> {
        self.state.borrow_mut().calls.push(Call::MapHuge { len });
        self.allocate(len, None)
    }

    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        let alloc = state
            .allocations
            .remove(&(addr.as_ptr() as usize))
            .unwrap_or_else(|| panic!("unmap of unknown region {addr:p}"));
        assert_eq!(alloc.len, len, "partial unmap");
        state.calls.push(Call::Unmap {
            offset: alloc.offset,
            len,
        });
        Ok(())
    }

    unsafe fn dontfork(&self, _addr: NonNull<u8>, len: usize) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Dontfork { len });
        let n = state.dontforks;
        state.dontforks += 1;
        match state.fail_dontfork_at {
            Some((at, errno)) if at == n => Err(io::Error::from_raw_os_error(errno)),
            _ => Ok(()),
        }
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Close { fd });
        let idx = state
            .open_fds
            .iter()
            .position(|open| *open == fd)
            .unwrap_or_else(|| panic!("close of fd {fd} that is not open"));
        state.open_fds.remove(idx);
        Ok(())
    }

    unsafe fn register_probe(
        &self,
        _fd: RawFd,
        probe: NonNull<io_uring_probe>,
        nr_ops: u32,
    ) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::RegisterProbe);
        if let Some(errno) = state.fail_probe {
            return Err(io::Error::from_raw_os_error(errno));
        }
        let ops_len = (state.last_op as u32 + 1).min(nr_ops).min(u8::MAX as u32);
        let hdr = probe.as_ptr();
        (*hdr).last_op = state.last_op;
        (*hdr).ops_len = ops_len as u8;
        let first = probe
            .as_ptr()
            .cast::<u8>()
            .add(std::mem::size_of::<io_uring_probe>())
            .cast::<io_uring_probe_op>();
        for i in 0..ops_len {
            let op = &mut *first.add(i as usize);
            op.op = i as u8;
            op.flags = if state.unsupported.contains(&(i as u8)) {
                0
            } else {
                1
            };
        }
        Ok(())
    }

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }
}
