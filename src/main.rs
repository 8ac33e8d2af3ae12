#![no_std]
#![no_main]

extern crate alloc;

mod allocator;
mod boot;
mod cache;
mod config;
mod console;
mod cpio;
mod elf_loader;
mod exceptions;
mod fb;
mod fd;
mod gic;
mod irq;
mod klog;
mod linux_abi;
mod mmu;
mod net;
mod pipe;
mod pmm;
mod power;
mod process;
mod sched;
mod syscall;
mod tests;
mod timer;
mod usb;
mod user;
mod vfs;

use core::panic::PanicInfo;

use alloc::format;

use crate::config::{USER_REGION_BASE, USER_REGION_SIZE};

/// 8 MiB kernel heap, carved out of the kernel image's own `.bss` and
/// handed to `allocator::init`. Separate from the PMM-managed physical
/// pages (user windows, page tables) and from the per-process user
/// region: this memory backs `alloc::{Vec,String,Box}` inside the kernel
/// itself.
const KERNEL_HEAP_SIZE: usize = 8 * 1024 * 1024;

#[repr(align(16))]
struct HeapArea([u8; KERNEL_HEAP_SIZE]);

static mut KERNEL_HEAP: HeapArea = HeapArea([0; KERNEL_HEAP_SIZE]);

unsafe extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
    static __initramfs_start: u8;
    static __initramfs_end: u8;
}

core::arch::global_asm!(
    r#"
.section .text.enter_el0
.global enter_el0
// enter_el0(entry: x0, user_sp: x1) -> !
enter_el0:
    msr     spsr_el1, xzr      // EL0t, all exception masks clear
    msr     elr_el1, x0
    msr     sp_el0, x1
    eret
"#
);

unsafe extern "C" {
    fn enter_el0(entry: u64, user_sp: u64) -> !;
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    console::print("\n[panic] ");
    console::print(&format!("{info}"));
    console::print("\n");
    power::halt()
}

fn current_el() -> u64 {
    let v: u64;
    unsafe { core::arch::asm!("mrs {}, CurrentEL", out(reg) v) };
    (v >> 2) & 0b11
}

/// Read `/memory`'s `reg` property out of the device tree to learn how
/// much RAM QEMU handed us. Falls back to a conservative default if the
/// blob can't be parsed, mirroring how little boot glue trusts the DTB
/// before the PMM is up.
fn ram_bounds_from_dtb(dtb_ptr: usize) -> (usize, usize) {
    const DEFAULT_MEM_BASE: usize = 0x4000_0000;
    const DEFAULT_MEM_SIZE: usize = 128 * 1024 * 1024;

    if dtb_ptr == 0 {
        return (DEFAULT_MEM_BASE, DEFAULT_MEM_SIZE);
    }

    let fdt = match unsafe { fdt::Fdt::from_ptr(dtb_ptr as *const u8) } {
        Ok(f) => f,
        Err(_) => return (DEFAULT_MEM_BASE, DEFAULT_MEM_SIZE),
    };

    match fdt.memory().regions().next() {
        Some(region) => {
            let base = region.starting_address as usize;
            let size = region.size.unwrap_or(DEFAULT_MEM_SIZE);
            (base, size)
        }
        None => (DEFAULT_MEM_BASE, DEFAULT_MEM_SIZE),
    }
}

/// Load `/sbin/init` out of the embedded initramfs into the fixed pid-1
/// user window and return its entry point. Pid 1 runs in the kernel's own
/// identity-mapped root table (§4.10), so `USER_REGION_BASE` is both its
/// virtual and physical address here.
fn load_init_process() -> Option<u64> {
    let found = vfs::initramfs::lookup("sbin/init")?;
    let loaded = elf_loader::load_etexec(
        found.data,
        USER_REGION_BASE,
        USER_REGION_SIZE,
        USER_REGION_BASE as usize,
    )
    .ok()?;
    cache::cache_sync_icache_for_range(USER_REGION_BASE as usize, USER_REGION_SIZE as usize);
    cache::cache_clean_invalidate_all();
    Some(loaded.entry)
}

/// The real kernel entry point, reached from `boot.rs`'s `_boot` once the
/// boot-time page tables are live and the MMU is on. `dtb_ptr` is whatever
/// the previous stage (QEMU's firmware, here) left in x0.
#[unsafe(no_mangle)]
pub extern "C" fn rust_start(dtb_ptr: usize) -> ! {
    timer::init();

    console::print("\ntalon: booting\n");
    console::print(&format!("talon: current EL = {}\n", current_el()));
    console::print(&format!("talon: dtb @ {dtb_ptr:#x}\n"));

    let heap_start = &raw mut KERNEL_HEAP as *mut HeapArea as usize;
    if allocator::init(heap_start, KERNEL_HEAP_SIZE).is_err() {
        console::print("talon: heap init failed, halting\n");
        power::halt();
    }

    let (mem_base, mem_size) = ram_bounds_from_dtb(dtb_ptr);
    console::print(&format!(
        "talon: ram base={mem_base:#x} size={mem_size:#x}\n"
    ));

    let kernel_start = &raw const __kernel_start as usize;
    let kernel_end = &raw const __kernel_end as usize;
    pmm::init(mem_base, mem_size, kernel_start, kernel_end, dtb_ptr);

    mmu::init_identity(mem_base, mem_size);

    if !tests::run_boot_self_tests() {
        console::print("talon: boot self-test failure, halting\n");
        power::halt();
    }

    gic::init();
    exceptions::init();

    fd::init();
    pipe::init();
    vfs::init();

    let initramfs_start = &raw const __initramfs_start as usize;
    let initramfs_end = &raw const __initramfs_end as usize;
    let initramfs_len = initramfs_end.saturating_sub(initramfs_start);
    let initramfs_blob: &'static [u8] =
        unsafe { core::slice::from_raw_parts(initramfs_start as *const u8, initramfs_len) };
    vfs::initramfs::init(initramfs_blob);
    console::print(&format!(
        "talon: initramfs {initramfs_len} bytes @ {initramfs_start:#x}\n"
    ));

    let entry = match load_init_process() {
        Some(e) => e,
        None => {
            console::print("talon: no /sbin/init in initramfs, halting\n");
            power::halt();
        }
    };

    let initial_sp = USER_REGION_BASE + USER_REGION_SIZE - 0x10;
    process::init_first_process(entry, initial_sp);

    console::print(&format!(
        "talon: entering EL0 at {entry:#x} sp={initial_sp:#x}\n"
    ));

    unsafe { enter_el0(entry, initial_sp) }
}
