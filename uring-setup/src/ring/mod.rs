//! The [`Ring`](lifecycle::Ring) handle and the memory behind it.

pub(crate) mod backing;
mod huge;
pub(crate) mod lifecycle;
mod mmap;
pub(crate) mod probe;
pub(crate) mod region;
pub(crate) mod views;

#[cfg(test)]
pub(crate) mod test_util;
