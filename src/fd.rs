//! File description table
//!
//! A description is a refcounted open-file object shared across processes
//! that inherited or dup'd the same FD (§4.6, §3). An FD (per-process
//! integer) is just an index into a process's own table that points at one
//! of these.

use alloc::string::String;

use crate::config::MAX_FILEDESCS;
use crate::linux_abi::Errno;

#[derive(Clone)]
pub enum DescKind {
    Unused,
    Uart,
    Initramfs { path: String, offset: u64 },
    Pipe { pipe_id: usize, write_end: bool },
    Ramfile { file_id: usize, offset: u64 },
    /// `/proc` (node 1, a directory) or `/proc/ps` (node 2, regenerated on
    /// every read from the live process table).
    Proc { node: u8, offset: u64 },
    Udp6,
    Tcp6,
}

#[derive(Clone)]
pub struct Description {
    pub kind: DescKind,
    pub refcount: u32,
}

impl Description {
    const fn unused() -> Self {
        Description {
            kind: DescKind::Unused,
            refcount: 0,
        }
    }
}

struct Table {
    descs: [Description; MAX_FILEDESCS],
}

impl Table {
    const fn new() -> Self {
        const U: Description = Description::unused();
        Table {
            descs: [U; MAX_FILEDESCS],
        }
    }
}

static TABLE: spinning_top::Spinlock<Table> = spinning_top::Spinlock::new(Table::new());

/// Allocate a fresh description slot with refcount 1.
pub fn alloc_desc(kind: DescKind) -> Option<usize> {
    let mut t = TABLE.lock();
    for i in 0..MAX_FILEDESCS {
        if t.descs[i].refcount == 0 {
            t.descs[i] = Description { kind, refcount: 1 };
            return Some(i);
        }
    }
    None
}

pub fn incref(idx: usize) {
    let mut t = TABLE.lock();
    t.descs[idx].refcount += 1;
}

/// Decrement a description's refcount; releases kind-specific resources
/// (e.g. pipe end accounting) and clears the slot once it reaches zero.
pub fn decref(idx: usize) {
    let mut t = TABLE.lock();
    if t.descs[idx].refcount == 0 {
        return;
    }
    t.descs[idx].refcount -= 1;
    if t.descs[idx].refcount == 0 {
        let kind = core::mem::replace(&mut t.descs[idx].kind, DescKind::Unused);
        drop(t);
        if let DescKind::Pipe { pipe_id, write_end } = kind {
            crate::pipe::on_desc_decref(pipe_id, write_end);
        }
    }
}

pub fn with_desc<R>(idx: usize, f: impl FnOnce(&mut Description) -> R) -> Option<R> {
    let mut t = TABLE.lock();
    if t.descs[idx].refcount == 0 {
        return None;
    }
    Some(f(&mut t.descs[idx]))
}

pub fn init() {
    let mut t = TABLE.lock();
    for i in 0..MAX_FILEDESCS {
        t.descs[i] = Description::unused();
    }
}

/// Allocate the shared UART description used by every process's FDs 0/1/2.
pub fn alloc_uart_desc() -> Option<usize> {
    alloc_desc(DescKind::Uart)
}

pub fn errno_for_unused() -> Errno {
    Errno::BadF
}
