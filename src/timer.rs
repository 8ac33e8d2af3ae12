//! Monotonic timekeeping (§4.13, §6)
//!
//! Built directly on the ARM generic timer counter (`cntpct_el0`/
//! `cntfrq_el0`). There is no RTC or UTC-offset machinery: `now_ns` is a
//! free-running counter since boot, used both to compute scheduler sleep
//! deadlines and to answer `clock_gettime` — this kernel has no notion of
//! wall-clock time, so every clock id maps to the same monotonic counter.

use core::arch::asm;

pub fn init() {}

/// Read the free-running physical counter.
pub fn read_counter() -> u64 {
    let counter: u64;
    unsafe { asm!("mrs {}, cntpct_el0", out(reg) counter) };
    counter
}

/// Read the counter frequency in Hz.
pub fn read_frequency() -> u64 {
    let freq: u64;
    unsafe { asm!("mrs {}, cntfrq_el0", out(reg) freq) };
    freq
}

/// Nanoseconds elapsed since boot. The scheduler's only notion of time:
/// sleep deadlines and timeouts are all expressed against this clock.
pub fn now_ns() -> u64 {
    let counter = read_counter() as u128;
    let freq = read_frequency() as u128;
    if freq == 0 {
        return 0;
    }
    ((counter * 1_000_000_000) / freq) as u64
}

pub fn now_us() -> u64 {
    now_ns() / 1000
}

pub fn delay_us(us: u64) {
    let start = now_us();
    while now_us().wrapping_sub(start) < us {
        core::hint::spin_loop();
    }
}

pub fn delay_ms(ms: u64) {
    delay_us(ms * 1000);
}
