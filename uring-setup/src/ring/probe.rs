//! Which opcodes the running kernel supports (`IORING_REGISTER_PROBE`).

use std::os::fd::AsRawFd;
use std::ptr::NonNull;

use tracing::debug;
use uring_common::linux_raw_sys::io_uring::{io_uring_probe, io_uring_probe_op};

use super::lifecycle::Ring;
use crate::{Kernel, Params, Syscalls};

/// `IO_URING_OP_SUPPORTED`
const OP_SUPPORTED: u16 = 1;

/// Room for every opcode a `u8` can name.
const MAX_OPS: usize = 256;

/// One opcode's entry in a [`Probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOp {
    pub op: u8,
    pub supported: bool,
}

/// Opcode support table reported by the kernel.
#[derive(Debug, Clone)]
pub struct Probe {
    last_op: u8,
    ops: Vec<ProbeOp>,
}

impl Probe {
    /// The highest opcode the kernel knows about.
    pub fn last_op(&self) -> u8 {
        self.last_op
    }

    pub fn ops(&self) -> &[ProbeOp] {
        &self.ops
    }

    pub fn is_supported(&self, op: u8) -> bool {
        if op > self.last_op {
            return false;
        }
        self.ops
            .get(op as usize)
            .map(|o| o.supported)
            .unwrap_or(false)
    }
}

impl<K: Kernel> Ring<K> {
    /// Ask the kernel which opcodes it supports. `None` if it refuses to say.
    pub fn probe(&self) -> Option<Probe> {
        // u64 words so the buffer is aligned for both the header and the op entries
        let header = std::mem::size_of::<io_uring_probe>();
        let len = header + MAX_OPS * std::mem::size_of::<io_uring_probe_op>();
        let mut buf = vec![0u64; len.div_ceil(8)];
        let base = NonNull::from(buf.as_mut_slice()).cast::<u8>();

        // SAFETY: `buf` holds the header plus MAX_OPS op entries
        let res = unsafe {
            self.kernel()
                .register_probe(self.as_raw_fd(), base.cast(), MAX_OPS as u32)
        };
        if let Err(error) = res {
            debug!(%error, "probe rejected");
            return None;
        }

        // SAFETY: the kernel filled in the header; the op entries follow it within `buf`
        unsafe {
            let hdr = base.cast::<io_uring_probe>().as_ptr().read();
            let ops_len = (hdr.ops_len as usize).min(MAX_OPS);
            let first = base.as_ptr().add(header).cast::<io_uring_probe_op>();
            let ops = (0..ops_len)
                .map(|i| {
                    let op = first.add(i).read();
                    ProbeOp {
                        op: op.op,
                        supported: op.flags & OP_SUPPORTED != 0,
                    }
                })
                .collect();
            Some(Probe {
                last_op: hdr.last_op,
                ops,
            })
        }
    }
}

/// Set up a small throwaway ring, probe it, and tear it down again.
pub fn probe() -> Option<Probe> {
    probe_with_kernel(Syscalls)
}

pub fn probe_with_kernel<K: Kernel>(kernel: K) -> Option<Probe> {
    let ring = match Ring::with_kernel(kernel, 2, Params::new()) {
        Ok(ring) => ring,
        Err(error) => {
            debug!(%error, "throwaway ring for probing failed");
            return None;
        }
    };
    let probe = ring.probe();
    ring.exit();
    probe
}
