//! The system calls ring setup is made of, behind the [`Kernel`] trait.

use std::io;
use std::os::fd::RawFd;
use std::ptr::{self, NonNull};

use nix::errno::Errno;
use nix::unistd::SysconfVar;
use uring_common::libc;
use uring_common::linux_raw_sys::io_uring::{io_uring_params, io_uring_probe};
use uring_common::syscall;

/// Everything ring setup and teardown asks of the operating system.
///
/// [`Syscalls`] is the real thing. The seam exists so that every partial-failure
/// path of [`crate::Ring`] construction can be driven by a kernel that fails on demand.
pub trait Kernel {
    /// `io_uring_setup(2)`.
    ///
    /// # Safety
    ///
    /// With `IORING_SETUP_NO_MMAP`, the `user_addr` fields in `params` must reference
    /// memory that outlives the returned fd.
    unsafe fn setup(&self, entries: u32, params: &mut io_uring_params) -> io::Result<RawFd>;

    /// Shared, populated, read-write mapping of `len` bytes of `fd` at the magic `offset`.
    fn map_ring(&self, fd: RawFd, len: usize, offset: u64) -> io::Result<NonNull<u8>>;

    /// Anonymous shared huge-page mapping of `len` bytes.
    fn map_huge(&self, len: usize) -> io::Result<NonNull<u8>>;

    /// # Safety
    ///
    /// `addr..addr+len` must be a mapping obtained from this kernel that nothing
    /// references anymore.
    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> io::Result<()>;

    /// `madvise(MADV_DONTFORK)`.
    ///
    /// # Safety
    ///
    /// `addr..addr+len` must be mapped.
    unsafe fn dontfork(&self, addr: NonNull<u8>, len: usize) -> io::Result<()>;

    fn close(&self, fd: RawFd) -> io::Result<()>;

    /// `io_uring_register(IORING_REGISTER_PROBE)` for up to `nr_ops` ops.
    ///
    /// # Safety
    ///
    /// `probe` must be followed by room for `nr_ops` `io_uring_probe_op`s.
    unsafe fn register_probe(
        &self,
        fd: RawFd,
        probe: NonNull<io_uring_probe>,
        nr_ops: u32,
    ) -> io::Result<()>;

    fn page_size(&self) -> usize;
}

impl<K: Kernel + ?Sized> Kernel for &K {
    unsafe fn setup(&self, entries: u32, params: &mut io_uring_params) -> io::Result<RawFd> {
        (**self).setup(entries, params)
    }
    fn map_ring(&self, fd: RawFd, len: usize, offset: u64) -> io::Result<NonNull<u8>> {
        (**self).map_ring(fd, len, offset)
    }
    fn map_huge(&self, len: usize) -> io::Result<NonNull<u8>> {
        (**self).map_huge(len)
    }
    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        (**self).unmap(addr, len)
    }
    unsafe fn dontfork(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        (**self).dontfork(addr, len)
    }
    fn close(&self, fd: RawFd) -> io::Result<()> {
        (**self).close(fd)
    }
    unsafe fn register_probe(
        &self,
        fd: RawFd,
        probe: NonNull<io_uring_probe>,
        nr_ops: u32,
    ) -> io::Result<()> {
        (**self).register_probe(fd, probe, nr_ops)
    }
    fn page_size(&self) -> usize {
        (**self).page_size()
    }
}

/// The running Linux kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct Syscalls;

fn mapped(ptr: *mut libc::c_void) -> io::Result<NonNull<u8>> {
    if ptr == libc::MAP_FAILED {
        return Err(Errno::last().into());
    }
    NonNull::new(ptr.cast()).ok_or_else(|| io::Error::from(Errno::EFAULT))
}

impl Kernel for Syscalls {
    unsafe fn setup(&self, entries: u32, params: &mut io_uring_params) -> io::Result<RawFd> {
        syscall::io_uring_setup(entries, params)
    }

    fn map_ring(&self, fd: RawFd, len: usize, offset: u64) -> io::Result<NonNull<u8>> {
        // SAFETY: fresh mapping chosen by the kernel, nothing aliases it yet
        mapped(unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd,
                offset as libc::off_t,
            )
        })
    }

    fn map_huge(&self, len: usize) -> io::Result<NonNull<u8>> {
        // SAFETY: fresh anonymous mapping chosen by the kernel
        mapped(unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB,
                -1,
                0,
            )
        })
    }

    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        Errno::result(libc::munmap(addr.as_ptr().cast(), len))?;
        Ok(())
    }

    unsafe fn dontfork(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        Errno::result(libc::madvise(addr.as_ptr().cast(), len, libc::MADV_DONTFORK))?;
        Ok(())
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        nix::unistd::close(fd)?;
        Ok(())
    }

    unsafe fn register_probe(
        &self,
        fd: RawFd,
        probe: NonNull<io_uring_probe>,
        nr_ops: u32,
    ) -> io::Result<()> {
        syscall::io_uring_register(
            fd,
            syscall::IORING_REGISTER_PROBE,
            probe.as_ptr().cast(),
            nr_ops,
        )?;
        Ok(())
    }

    fn page_size(&self) -> usize {
        match nix::unistd::sysconf(SysconfVar::PAGE_SIZE) {
            Ok(Some(sz)) if sz > 0 => sz as usize,
            _ => 4096,
        }
    }
}
