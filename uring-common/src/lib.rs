#[cfg(target_os = "linux")]
pub mod syscall;

#[cfg(target_os = "linux")]
pub use io_uring;
pub use libc;
#[cfg(target_os = "linux")]
pub use linux_raw_sys;
