//! Process table (§3, §4.11-§4.14)
//!
//! A fixed `N_PROC`-entry table of process records. Exactly one entry is
//! "current" at a time; the cooperative scheduler (`sched`) only ever hands
//! control to another entry at well-defined points (syscall return, sleep,
//! wait, exit).

use alloc::string::String;

use crate::config::{MAX_FDS, MAX_VMAS, N_PROC, USER_REGION_BASE};
use crate::exceptions::UserTrapFrame;

#[derive(Clone, Copy, Default)]
pub struct Vma {
    pub used: bool,
    pub base: u64,
    pub len: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
    Unused,
    Runnable,
    Waiting,
    Sleeping,
    Zombie,
}

pub struct Proc {
    pub pid: u64,
    pub ppid: u64,
    pub state: State,
    pub ttbr0_pa: usize,
    pub user_pa_base: usize,
    pub heap_base: u64,
    pub heap_end: u64,
    pub stack_low: u64,
    pub cwd: String,
    pub mmap_next: u64,
    pub vmas: [Vma; MAX_VMAS],
    /// Saved register file, including `elr`/`spsr`/`sp_el0`, for when this
    /// process is not current. While current, the live copy lives on the
    /// kernel stack and this field is stale until the next switch-out.
    pub tf: UserTrapFrame,
    pub exit_code: u64,
    pub clear_child_tid_user: u64,
    pub wait_target_pid: i64,
    pub wait_status_user: u64,
    pub sleep_deadline_ns: u64,
    /// Per-process FD table: index into the global description table, or
    /// `None` for an unused slot.
    pub fd_to_desc: [Option<usize>; MAX_FDS],
}

impl Proc {
    const fn empty() -> Self {
        Proc {
            pid: 0,
            ppid: 0,
            state: State::Unused,
            ttbr0_pa: 0,
            user_pa_base: 0,
            heap_base: 0,
            heap_end: 0,
            stack_low: 0,
            cwd: String::new(),
            mmap_next: 0,
            vmas: [Vma {
                used: false,
                base: 0,
                len: 0,
            }; MAX_VMAS],
            tf: zero_trap_frame(),
            exit_code: 0,
            clear_child_tid_user: 0,
            wait_target_pid: 0,
            wait_status_user: 0,
            sleep_deadline_ns: 0,
            fd_to_desc: [None; MAX_FDS],
        }
    }
}

const fn zero_trap_frame() -> UserTrapFrame {
    UserTrapFrame {
        spsr: 0,
        elr: 0,
        sp_el0: 0,
        x30: 0,
        x28: 0,
        x29: 0,
        x26: 0,
        x27: 0,
        x24: 0,
        x25: 0,
        x22: 0,
        x23: 0,
        x20: 0,
        x21: 0,
        x18: 0,
        x19: 0,
        x16: 0,
        x17: 0,
        x14: 0,
        x15: 0,
        x12: 0,
        x13: 0,
        x10: 0,
        x11: 0,
        x8: 0,
        x9: 0,
        x6: 0,
        x7: 0,
        x4: 0,
        x5: 0,
        x2: 0,
        x3: 0,
        x0: 0,
        x1: 0,
    }
}

pub fn tf_copy(dst: &mut UserTrapFrame, src: &UserTrapFrame) {
    dst.x0 = src.x0;
    dst.x1 = src.x1;
    dst.x2 = src.x2;
    dst.x3 = src.x3;
    dst.x4 = src.x4;
    dst.x5 = src.x5;
    dst.x6 = src.x6;
    dst.x7 = src.x7;
    dst.x8 = src.x8;
    dst.x9 = src.x9;
    dst.x10 = src.x10;
    dst.x11 = src.x11;
    dst.x12 = src.x12;
    dst.x13 = src.x13;
    dst.x14 = src.x14;
    dst.x15 = src.x15;
    dst.x16 = src.x16;
    dst.x17 = src.x17;
    dst.x18 = src.x18;
    dst.x19 = src.x19;
    dst.x20 = src.x20;
    dst.x21 = src.x21;
    dst.x22 = src.x22;
    dst.x23 = src.x23;
    dst.x24 = src.x24;
    dst.x25 = src.x25;
    dst.x26 = src.x26;
    dst.x27 = src.x27;
    dst.x28 = src.x28;
    dst.x29 = src.x29;
    dst.x30 = src.x30;
    dst.sp_el0 = src.sp_el0;
}

pub fn tf_zero(dst: &mut UserTrapFrame) {
    *dst = zero_trap_frame();
}

pub struct Table {
    pub procs: [Proc; N_PROC],
    pub cur: usize,
    pub last_sched: usize,
    pub next_pid: u64,
}

pub static PROCS: spinning_top::Spinlock<Table> = spinning_top::Spinlock::new(Table {
    procs: [const { Proc::empty() }; N_PROC],
    cur: 0,
    last_sched: 0,
    next_pid: 1,
});

pub fn clear(p: &mut Proc) {
    *p = Proc::empty();
    p.cwd = String::from("/");
}

pub fn close_all_fds(p: &mut Proc) {
    for i in 0..MAX_FDS {
        if let Some(didx) = p.fd_to_desc[i].take() {
            crate::fd::decref(didx);
        }
    }
}

pub fn find_free_slot(t: &Table) -> Option<usize> {
    (0..N_PROC).find(|&i| t.procs[i].state == State::Unused)
}

pub fn find_idx_by_pid(t: &Table, pid: u64) -> Option<usize> {
    (0..N_PROC).find(|&i| t.procs[i].state != State::Unused && t.procs[i].pid == pid)
}

static INITED: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);

/// Build the first process (pid 1) from the kernel's initial EL0 entry
/// point. Called once from the boot sequence after the VFS/FD/pipe
/// subsystems are up.
pub fn init_first_process(elr: u64, initial_sp: u64) {
    use core::sync::atomic::Ordering;
    if INITED.swap(true, Ordering::AcqRel) {
        return;
    }

    let mut t = PROCS.lock();
    for p in t.procs.iter_mut() {
        clear(p);
    }
    t.cur = 0;
    t.last_sched = 0;

    let pid = t.next_pid;
    t.next_pid += 1;

    let p = &mut t.procs[0];
    clear(p);
    p.pid = pid;
    p.ppid = 0;
    p.state = State::Runnable;
    p.ttbr0_pa = crate::mmu::ttbr0_read();
    p.user_pa_base = USER_REGION_BASE as usize;
    p.heap_base = USER_REGION_BASE;
    p.heap_end = USER_REGION_BASE;
    p.stack_low = initial_sp;
    p.mmap_next = USER_REGION_BASE + crate::config::USER_REGION_SIZE;
    tf_zero(&mut p.tf);
    p.tf.elr = elr;
    p.tf.sp_el0 = initial_sp;

    if let Some(uart_desc) = crate::fd::alloc_uart_desc() {
        for slot in p.fd_to_desc.iter_mut().take(3) {
            *slot = Some(uart_desc);
            crate::fd::incref(uart_desc);
        }
        // alloc_uart_desc() already accounted for one reference; the loop
        // above added three more. Drop the surplus so the refcount matches
        // exactly the three FD slots that now point at it.
        crate::fd::decref(uart_desc);
    }
}

pub fn current_pid() -> u64 {
    let t = PROCS.lock();
    t.procs[t.cur].pid
}

pub fn resolve_path(cwd: &str, path: &str) -> String {
    crate::vfs::path::resolve(cwd, path)
}

/// Whether a process's user window is a private, freeable allocation (the
/// very first process reuses the identity-mapped boot window and must
/// never have it returned to the allocator).
pub fn owns_private_user_pages(p: &Proc) -> bool {
    p.user_pa_base != 0 && p.pid != 1
}
