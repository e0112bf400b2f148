use std::fmt;

use uring_common::libc;

/// One of the memory regions a [`crate::Ring`] maps or allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// The SQ ring mapped at `IORING_OFF_SQ_RING`; also the CQ ring with `IORING_FEAT_SINGLE_MMAP`.
    SqRing,
    /// The CQ ring mapped at `IORING_OFF_CQ_RING`.
    CqRing,
    /// The SQE array mapped at `IORING_OFF_SQES`.
    Sqes,
    /// The huge page holding the SQE array (and usually the rings) of a
    /// `IORING_SETUP_NO_MMAP` ring.
    HugeSqes,
    /// The second huge page holding the rings when they did not fit into the first.
    HugeRings,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Region::SqRing => "sq ring",
            Region::CqRing => "cq ring",
            Region::Sqes => "sqe array",
            Region::HugeSqes => "sqe huge page",
            Region::HugeRings => "ring huge page",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad depth, bad flag combination, or an operation on memory that was never set up.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The caller-supplied buffer cannot host the rings.
    #[error("ring memory needs {required} bytes but only {available} are available")]
    OutOfMemory { required: usize, available: usize },
    /// `io_uring_setup(2)` failed.
    #[error("io_uring_setup: {0}")]
    Setup(#[source] std::io::Error),
    /// Mapping or allocating a region failed.
    #[error("mapping {region}: {source}")]
    Map {
        region: Region,
        #[source]
        source: std::io::Error,
    },
    /// `madvise(MADV_DONTFORK)` failed.
    #[error("madvise(MADV_DONTFORK) on {region}: {source}")]
    Advise {
        region: Region,
        #[source]
        source: std::io::Error,
    },
    /// `IORING_REGISTER_PROBE` failed.
    #[error("io_uring_register(IORING_REGISTER_PROBE): {0}")]
    Probe(#[source] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// The errno equivalent of this error.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::InvalidArgument(_) => Some(libc::EINVAL),
            Error::OutOfMemory { .. } => Some(libc::ENOMEM),
            Error::Setup(e) | Error::Probe(e) => e.raw_os_error(),
            Error::Map { source, .. } | Error::Advise { source, .. } => source.raw_os_error(),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Setup(e) | Error::Probe(e) => e,
            Error::Map { source, .. } | Error::Advise { source, .. } => source,
            e => match e.raw_os_error() {
                Some(errno) => std::io::Error::from_raw_os_error(errno),
                None => std::io::Error::new(std::io::ErrorKind::Other, e),
            },
        }
    }
}
