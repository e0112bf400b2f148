//! Raw `io_uring_setup(2)` and `io_uring_register(2)` entry points.
//!
//! Neither `libc` nor the `io-uring` crate exposes these two calls with the
//! caller in control of the `io_uring_params` memory, so we issue them through
//! [`libc::syscall`] and turn the `-1`/`errno` convention into [`io::Result`].

use std::io;
use std::os::fd::RawFd;

use linux_raw_sys::io_uring::io_uring_params;

/// `IORING_REGISTER_PROBE` opcode of `io_uring_register(2)`.
pub const IORING_REGISTER_PROBE: libc::c_uint = 8;

/// Create an io_uring instance.
///
/// On success the kernel has written the negotiated entry counts, feature bits and
/// ring offsets into `*params`.
///
/// # Safety
///
/// `params` must point to a valid, writable `io_uring_params`. If the caller sets
/// `IORING_SETUP_NO_MMAP`, the `user_addr` fields must reference memory that stays
/// valid for as long as the returned fd (or any ring derived from it) is alive.
pub unsafe fn io_uring_setup(entries: u32, params: *mut io_uring_params) -> io::Result<RawFd> {
    let ret = libc::syscall(
        libc::SYS_io_uring_setup,
        entries as libc::c_long,
        params as libc::c_long,
    );
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret as RawFd)
}

/// Perform `opcode` on the io_uring instance `fd`.
///
/// # Safety
///
/// `arg` must satisfy the layout and lifetime requirements the kernel imposes
/// for `opcode` with `nr_args` elements.
pub unsafe fn io_uring_register(
    fd: RawFd,
    opcode: libc::c_uint,
    arg: *const libc::c_void,
    nr_args: libc::c_uint,
) -> io::Result<libc::c_long> {
    let ret = libc::syscall(
        libc::SYS_io_uring_register,
        fd as libc::c_long,
        opcode as libc::c_long,
        arg as libc::c_long,
        nr_args as libc::c_long,
    );
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret)
}
