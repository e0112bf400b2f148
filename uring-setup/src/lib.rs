//! This crate sets up and tears down Linux `io_uring` instances.
//!
//! It negotiates queue depths with the kernel, maps the memory shared between
//! userspace and the kernel (the SQ ring, the CQ ring and the SQE array) and
//! releases all of it again. Walking the rings at runtime is left to the consumer
//! of the [`SubmissionQueue`] and [`CompletionQueue`] views.
//!
//! # Usage
//!
//! 1. Build a [`Params`] record, or use the defaults.
//! 2. Construct a [`Ring`] with one of the constructors. Construction either fully
//!    succeeds or fails without holding any kernel resources.
//! 3. Hand [`Ring::sq`] / [`Ring::cq`] to the code that submits and reaps.
//! 4. Drop the [`Ring`] (or call [`Ring::exit`]) to release everything.
//!
//! ```no_run
//! let ring = uring_setup::Ring::new(128).unwrap();
//! assert_eq!(ring.sq().ring_entries(), 128);
//! assert_eq!(ring.cq().ring_entries(), 256);
//! ring.dontfork().unwrap();
//! ring.exit();
//! ```
//!
//! ## Memory strategies
//!
//! By default the rings are mapped from the ring fd, in one or two regions
//! depending on `IORING_FEAT_SINGLE_MMAP`. With `IORING_SETUP_NO_MMAP` the rings
//! live in a huge page allocated by this crate, or in memory the caller hands to
//! [`Ring::with_mem`]. See [`Strategy`].
//!
//! ## Capability and memlock helpers
//!
//! [`probe()`] reports the opcodes the running kernel supports.
//! [`mlock::mlock_size`] reports how much `RLIMIT_MEMLOCK` budget a ring needs.

pub mod entries;
mod error;
pub mod metrics;
pub mod mlock;
mod params;
mod ring;
mod sys;

pub use error::{Error, Region, Result};
pub use params::Params;
pub use ring::backing::Strategy;
pub use ring::lifecycle::Ring;
pub use ring::probe::{probe, probe_with_kernel, Probe, ProbeOp};
pub use ring::views::{CompletionQueue, SubmissionQueue};
pub use sys::{Kernel, Syscalls};

pub use uring_common::linux_raw_sys::io_uring as abi;

#[doc(hidden)]
pub mod env_tunables {
    /// Default huge page size used by [`crate::Params`] for `IORING_SETUP_NO_MMAP` rings.
    ///
    /// `URING_SETUP_HUGE_PAGE_SIZE` (bytes) takes precedence over the platform value.
    pub(crate) static HUGE_PAGE_SIZE: once_cell::sync::Lazy<usize> =
        once_cell::sync::Lazy::new(|| {
            match std::env::var("URING_SETUP_HUGE_PAGE_SIZE") {
                Ok(v) => v
                    .parse()
                    .expect("URING_SETUP_HUGE_PAGE_SIZE must be a byte count"),
                Err(std::env::VarError::NotPresent) => platform_huge_page_size(),
                Err(std::env::VarError::NotUnicode(_)) => {
                    panic!("URING_SETUP_HUGE_PAGE_SIZE must be a unicode string")
                }
            }
        });

    const FALLBACK_HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

    fn platform_huge_page_size() -> usize {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|s| parse_hugepagesize(&s))
            .unwrap_or(FALLBACK_HUGE_PAGE_SIZE)
    }

    pub(crate) fn parse_hugepagesize(meminfo: &str) -> Option<usize> {
        meminfo.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key != "Hugepagesize" {
                return None;
            }
            let mut comps = value.split_whitespace();
            let num: usize = comps.next()?.parse().ok()?;
            match comps.next()? {
                "kB" => Some(num * 1024),
                _ => None,
            }
        })
    }

    pub fn assert_no_unknown_env_vars() {
        std::env::vars()
            .filter_map(|(v, _)| {
                if v.starts_with("URING_SETUP_") {
                    Some(v)
                } else {
                    None
                }
            })
            .for_each(|v| match v.as_str() {
                "URING_SETUP_HUGE_PAGE_SIZE" => {}
                x => panic!("env var starts with URING_SETUP but is not an env_tunable: {x:?}"),
            });
    }

    #[cfg(test)]
    mod tests {
        #[test]
        fn hugepagesize_from_meminfo() {
            let meminfo = "MemTotal:       16303420 kB\nHugePages_Total:       0\nHugepagesize:       2048 kB\nHugetlb:               0 kB\n";
            assert_eq!(super::parse_hugepagesize(meminfo), Some(2 * 1024 * 1024));
            assert_eq!(super::parse_hugepagesize("MemTotal: 1 kB\n"), None);
            assert_eq!(super::parse_hugepagesize("Hugepagesize: many kB\n"), None);
        }
    }
}
