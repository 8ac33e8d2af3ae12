//! Cooperative round-robin scheduler (§4.13)
//!
//! There is no timer-driven preemption: a process keeps the CPU until it
//! makes a syscall that blocks or exits. `maybe_switch` is the only place
//! that ever changes which process is current, and it is always called
//! from the SVC path after a syscall handler returns.

use crate::process::{Proc, State, PROCS};

/// Wake every `Sleeping` process whose deadline has passed.
fn wake_expired_sleepers(procs: &mut [Proc], now_ns: u64) {
    for p in procs.iter_mut() {
        if p.state == State::Sleeping && now_ns >= p.sleep_deadline_ns {
            p.state = State::Runnable;
        }
    }
}

/// Find the next `Runnable` slot starting the round-robin scan just past
/// `last`. Returns `None` if nothing is runnable right now.
fn scan_runnable(procs: &[Proc], last: usize) -> Option<usize> {
    let n = procs.len();
    for step in 1..=n {
        let idx = (last + step) % n;
        if procs[idx].state == State::Runnable {
            return Some(idx);
        }
    }
    None
}

/// Earliest deadline among `Sleeping` processes, if any are sleeping.
fn earliest_sleep_deadline(procs: &[Proc]) -> Option<u64> {
    procs
        .iter()
        .filter(|p| p.state == State::Sleeping)
        .map(|p| p.sleep_deadline_ns)
        .min()
}

/// Pick the next process to run. Wakes expired sleepers first; if nothing
/// is runnable but something is sleeping, busy-spins until the earliest
/// sleeper's deadline, then re-scans. Returns `None` only when every slot
/// is `Unused`/`Zombie`/`Waiting` with nothing left to ever wake (a true
/// deadlock, which the caller treats as "halt").
pub fn pick_next_runnable(last: usize) -> Option<usize> {
    loop {
        let now = crate::timer::now_ns();
        {
            let mut t = PROCS.lock();
            wake_expired_sleepers(&mut t.procs, now);
            if let Some(idx) = scan_runnable(&t.procs, last) {
                return Some(idx);
            }
        }

        let deadline = {
            let t = PROCS.lock();
            earliest_sleep_deadline(&t.procs)
        };
        match deadline {
            Some(d) => {
                while crate::timer::now_ns() < d {
                    core::hint::spin_loop();
                }
                // Loop back around: wake, rescan.
            }
            None => return None,
        }
    }
}

/// Install `idx` as the current process and switch address spaces. Does
/// the full cache clean+invalidate this kernel needs on every switch since
/// it runs without ASIDs.
fn switch_to(idx: usize) {
    let mut t = PROCS.lock();
    if idx == t.cur {
        return;
    }
    crate::cache::cache_clean_invalidate_all();
    t.cur = idx;
    t.last_sched = idx;
    crate::mmu::ttbr0_write(t.procs[idx].ttbr0_pa);
}

/// Called after a syscall handler runs for the current process. If the
/// current process is no longer runnable (blocked, slept, exited), pick
/// and install the next one (address space + bookkeeping only — the
/// caller is responsible for swapping the live trap frame, since only it
/// holds the pointer onto the kernel stack). Returns the new index when a
/// switch happened.
pub fn maybe_switch() -> Option<usize> {
    let (cur, cur_runnable) = {
        let t = PROCS.lock();
        (t.cur, t.procs[t.cur].state == State::Runnable)
    };

    if cur_runnable {
        return None;
    }

    match pick_next_runnable(cur) {
        Some(idx) => {
            switch_to(idx);
            Some(idx)
        }
        None => {
            crate::console::print("no runnable process left, halting\n");
            crate::power::halt();
        }
    }
}
