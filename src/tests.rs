//! Boot-time self-tests for the memory subsystem.
//!
//! Run once from `rust_start` right after `mmu::init_identity`, before any
//! process or filesystem state exists. A failure here means the kernel
//! cannot trust its own address space, so the caller halts rather than
//! limping forward.

use crate::console;
use crate::mmu;
use crate::pmm;

/// Write through the low identity mapping, read back through the
/// `KERNEL_VA_BASE` higher-half alias, and confirm they see the same byte:
/// proof the two mappings the boot sequence just built point at the same
/// physical memory.
fn higher_half_alias_test() -> bool {
    static mut PROBE: u64 = 0;
    unsafe {
        let low = &raw mut PROBE;
        core::ptr::write_volatile(low, 0xC0FF_EE00_DEAD_BEEFu64);
        let high = mmu::phys_to_virt(low as usize) as *mut u64;
        core::ptr::read_volatile(high) == 0xC0FF_EE00_DEAD_BEEFu64
    }
}

/// Allocate and free a handful of pages and a 2 MiB block, checking that
/// the free count returns to where it started and that allocations don't
/// alias each other.
fn pmm_alloc_free_test() -> bool {
    let before = pmm::info().free_pages;

    let a = pmm::alloc_page();
    let b = pmm::alloc_page();
    let c = pmm::alloc_page();
    if a == 0 || b == 0 || c == 0 || a == b || b == c || a == c {
        return false;
    }
    pmm::free_page(a);
    pmm::free_page(b);
    pmm::free_page(c);

    let block = pmm::alloc_2mib_aligned();
    if block == 0 || block % crate::config::BLOCK_2MIB != 0 {
        return false;
    }
    pmm::free_2mib_aligned(block);

    pmm::info().free_pages == before
}

/// Run every boot self-test, printing a one-line verdict per test. Returns
/// `false` if any test failed.
pub fn run_boot_self_tests() -> bool {
    console::print("talon: running boot self-tests\n");

    let mut all_pass = true;
    macro_rules! check {
        ($test:expr, $name:expr) => {
            if $test {
                console::print(concat!("  [ok]   ", $name, "\n"));
            } else {
                console::print(concat!("  [FAIL] ", $name, "\n"));
                all_pass = false;
            }
        };
    }

    check!(higher_half_alias_test(), "higher-half alias");
    check!(pmm_alloc_free_test(), "pmm alloc/free");

    all_pass
}
