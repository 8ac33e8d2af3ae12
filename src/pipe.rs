//! Anonymous pipes
//!
//! Fixed-capacity ring buffers with separate read-end and write-end
//! reference counts (§4.7). `pipe_read`/`pipe_write` follow Linux's
//! nonblocking-from-the-kernel's-own-perspective semantics; the syscall
//! layer is responsible for turning `EAGAIN` into an actual block when the
//! caller didn't ask for `O_NONBLOCK`.

use spinning_top::Spinlock;

use crate::config::{MAX_PIPES, PIPE_BUF};
use crate::linux_abi::Errno;

struct Pipe {
    used: bool,
    buf: [u8; PIPE_BUF],
    rpos: usize,
    wpos: usize,
    count: usize,
    read_refs: u32,
    write_refs: u32,
}

impl Pipe {
    const fn new() -> Self {
        Pipe {
            used: false,
            buf: [0; PIPE_BUF],
            rpos: 0,
            wpos: 0,
            count: 0,
            read_refs: 0,
            write_refs: 0,
        }
    }
}

struct Pipes {
    slots: [Pipe; MAX_PIPES],
}

static PIPES: Spinlock<Pipes> = Spinlock::new(Pipes {
    slots: [const { Pipe::new() }; MAX_PIPES],
});

pub fn init() {
    let mut p = PIPES.lock();
    for slot in p.slots.iter_mut() {
        *slot = Pipe::new();
    }
}

/// Create a pipe with one read-end and one write-end reference already
/// accounted for (the caller installs both FDs immediately after).
pub fn create() -> Option<usize> {
    let mut p = PIPES.lock();
    for i in 0..MAX_PIPES {
        if !p.slots[i].used {
            p.slots[i] = Pipe::new();
            p.slots[i].used = true;
            p.slots[i].read_refs = 1;
            p.slots[i].write_refs = 1;
            return Some(i);
        }
    }
    None
}

fn maybe_free(p: &mut Pipes, id: usize) {
    if p.slots[id].used && p.slots[id].read_refs == 0 && p.slots[id].write_refs == 0 {
        p.slots[id] = Pipe::new();
    }
}

/// Called when a description referencing this pipe's read or write end is
/// released (refcount reached zero).
pub fn on_desc_decref(id: usize, write_end: bool) {
    let mut p = PIPES.lock();
    if !p.slots[id].used {
        return;
    }
    if write_end {
        p.slots[id].write_refs = p.slots[id].write_refs.saturating_sub(1);
    } else {
        p.slots[id].read_refs = p.slots[id].read_refs.saturating_sub(1);
    }
    maybe_free(&mut p, id);
}

pub fn on_desc_incref(id: usize, write_end: bool) {
    let mut p = PIPES.lock();
    if write_end {
        p.slots[id].write_refs += 1;
    } else {
        p.slots[id].read_refs += 1;
    }
}

/// Read up to `out.len()` bytes. Returns `Ok(0)` on EOF (empty, no
/// writers), `Err(EAGAIN)` if empty with writers still open.
pub fn read(id: usize, out: &mut [u8]) -> Result<usize, Errno> {
    let mut p = PIPES.lock();
    let pipe = &mut p.slots[id];
    if pipe.count == 0 {
        return if pipe.write_refs == 0 { Ok(0) } else { Err(Errno::Again) };
    }
    let n = out.len().min(pipe.count);
    for b in out.iter_mut().take(n) {
        *b = pipe.buf[pipe.rpos];
        pipe.rpos = (pipe.rpos + 1) % PIPE_BUF;
    }
    pipe.count -= n;
    Ok(n)
}

/// Write up to `data.len()` bytes. Returns `Err(EPIPE)` if no reader
/// remains, `Err(EAGAIN)` if the ring is full.
pub fn write(id: usize, data: &[u8]) -> Result<usize, Errno> {
    let mut p = PIPES.lock();
    let pipe = &mut p.slots[id];
    if pipe.read_refs == 0 {
        return Err(Errno::Pipe);
    }
    let space = PIPE_BUF - pipe.count;
    if space == 0 {
        return Err(Errno::Again);
    }
    let n = data.len().min(space);
    for &b in data.iter().take(n) {
        pipe.buf[pipe.wpos] = b;
        pipe.wpos = (pipe.wpos + 1) % PIPE_BUF;
    }
    pipe.count += n;
    Ok(n)
}
