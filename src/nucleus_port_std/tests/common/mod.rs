//! Process setup shared by the integration tests.
#![allow(dead_code)]
use nucleus_kernel::{
    message::MESSAGE_SIZE, Endpoint, MemMap, ProcAttr, ProcKind, ProcNr, RtsFlags, Segment,
    SendMask, VirAddr,
};
use nucleus_port_std::StdKernel;

pub const DATA_BASE: VirAddr = 0x1000;
pub const STACK_BASE: VirAddr = 0x3000;
pub const SEGMENT_LEN: usize = 0x1000;

/// The memory map every test process gets.
pub fn memmap() -> MemMap {
    MemMap {
        data: Segment {
            base: DATA_BASE,
            len: SEGMENT_LEN,
        },
        stack: Segment {
            base: STACK_BASE,
            len: SEGMENT_LEN,
        },
    }
}

/// Get the address of the `i`-th message buffer in the data segment.
pub fn buf(i: usize) -> VirAddr {
    DATA_BASE + i * MESSAGE_SIZE
}

/// Attributes of a process that may send to everyone.
pub fn attr(name: &'static str, kind: ProcKind) -> ProcAttr {
    ProcAttr::new(name, kind)
        .with_send_mask(SendMask::all())
        .with_memmap(memmap())
}

/// Spawn a process and make it runnable.
pub fn spawn_ready(kernel: &StdKernel, proc_nr: ProcNr, attr: ProcAttr) -> Endpoint {
    let ep = kernel.spawn(proc_nr, &attr).unwrap();
    kernel.lock_ready(ep, RtsFlags::NO_MAP).unwrap();
    ep
}

/// Spawn a runnable user process.
pub fn spawn_user(kernel: &StdKernel, proc_nr: ProcNr) -> Endpoint {
    spawn_ready(kernel, proc_nr, attr("user", ProcKind::User))
}
