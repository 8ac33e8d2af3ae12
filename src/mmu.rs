//! MMU bring-up: two-level (L1 -> L2, 2 MiB block) identity mapping of the
//! low 2 GiB of physical address space, a kernel higher-half alias, and a
//! per-process user window (§4.2).
//!
//! Two L1 tables (covering 0..2 GiB, entries 0 and 1 populated) and two L2
//! tables (one per GiB, 512 entries of 2 MiB blocks each) are built once at
//! boot and kept around as templates: `ttbr0_create_with_user_pa` clones
//! them for every new process, swapping in only the L2 slot that covers the
//! user window.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::{
    BLOCK_2MIB, KERNEL_VA_BASE, LOCAL_PERIPH_BASE, LOCAL_PERIPH_SIZE, PERIPH_BASE, PERIPH_END,
    USER_REGION_BASE,
};

pub const PAGE_SIZE: usize = 4096;

// Descriptor bit layout (4 KiB granule, 2 MiB block descriptors at level 2).
const DESC_VALID: u64 = 1 << 0;
const PTE_TYPE_TABLE: u64 = 0b11;
const PTE_TYPE_BLOCK: u64 = 0b01;
const PTE_AF: u64 = 1 << 10;
const PTE_SH_INNER: u64 = 3 << 8;
const PTE_AP_RW_EL1: u64 = 0 << 6;
const PTE_AP_RW_ALL: u64 = 1 << 6;
const PTE_PXN: u64 = 1 << 53;
const PTE_UXN: u64 = 1 << 54;

const MAIR_DEVICE_NGNRE: u64 = 0;
const MAIR_NORMAL_WBWA: u64 = 1;

#[inline]
const fn attr_idx(i: u64) -> u64 {
    i << 2
}

fn make_table_desc(pa: usize) -> u64 {
    (pa as u64 & !0xFFFu64) | PTE_TYPE_TABLE | DESC_VALID
}

fn make_block_desc(pa: usize, device: bool, el0: bool) -> u64 {
    let mut d = (pa as u64 & !((BLOCK_2MIB as u64) - 1))
        | PTE_TYPE_BLOCK
        | DESC_VALID
        | PTE_AF
        | PTE_SH_INNER;
    d |= if device {
        attr_idx(MAIR_DEVICE_NGNRE) | PTE_PXN | PTE_UXN
    } else {
        attr_idx(MAIR_NORMAL_WBWA)
    };
    d |= if el0 { PTE_AP_RW_ALL } else { PTE_AP_RW_EL1 };
    if device {
        // EL1-only device window: never user-accessible.
    }
    d
}

#[repr(C, align(4096))]
struct Table([u64; 512]);

impl Table {
    const fn zero() -> Self {
        Table([0; 512])
    }
}

/// Cached L2 templates built once at init and reused when cloning a fresh
/// address space for a new process.
static mut L2_TEMPLATE: [Table; 2] = [Table::zero(), Table::zero()];
static mut L1_LOW: Table = Table::zero();
static mut L1_HIGH: Table = Table::zero();

static MMU_INITIALIZED: AtomicBool = AtomicBool::new(false);

pub fn is_initialized() -> bool {
    MMU_INITIALIZED.load(Ordering::Acquire)
}

fn periph_overlaps_block(block_pa: usize) -> bool {
    let block_end = block_pa + BLOCK_2MIB;
    let overlaps = |a: usize, b: usize| block_pa < b && a < block_end;
    overlaps(PERIPH_BASE, PERIPH_END) || overlaps(LOCAL_PERIPH_BASE, LOCAL_PERIPH_BASE + LOCAL_PERIPH_SIZE)
}

/// Build the identity map (0..2 GiB) and the higher-half alias, then enable
/// the MMU: translation on with caches off, cache-invalidate, then caches on.
pub fn init_identity(mem_base: usize, mem_size: usize) {
    unsafe {
        let l1_low = &raw mut L1_LOW;
        let l1_high = &raw mut L1_HIGH;
        let l2 = &raw mut L2_TEMPLATE;

        for gib in 0..2usize {
            let l2_table = &mut (*l2)[gib];
            for slot in 0..512usize {
                let block_pa = gib * (1usize << 30) + slot * BLOCK_2MIB;
                let device = periph_overlaps_block(block_pa);
                l2_table.0[slot] = make_block_desc(block_pa, device, false);
            }
            let l2_pa = core::ptr::addr_of!((*l2)[gib]) as usize;
            (*l1_low).0[gib] = make_table_desc(l2_pa);
            (*l1_high).0[gib] = make_table_desc(l2_pa);
        }

        let _ = (mem_base, mem_size);

        let ttbr0 = core::ptr::addr_of!(*l1_low) as u64;
        let ttbr1 = core::ptr::addr_of!(*l1_high) as u64;

        // MAIR_EL1: index 0 = Device-nGnRE, index 1 = Normal write-back/write-allocate.
        let mair: u64 = 0x00 | (0xFFu64 << 8);
        core::arch::asm!("msr mair_el1, {}", in(reg) mair);

        // TCR_EL1: T0SZ=T1SZ=25 (39-bit VA), 4 KiB granules, 40-bit IPS, inner shareable WBWA.
        let tcr: u64 = (25u64)
            | (25u64 << 16)
            | (0b01u64 << 8)
            | (0b01u64 << 10)
            | (0b11u64 << 12)
            | (0b10u64 << 30) // TG1 = 4KB for TTBR1
            | (0b01u64 << 24)
            | (0b01u64 << 26)
            | (0b11u64 << 28)
            | (0b010u64 << 32); // IPS = 40-bit
        core::arch::asm!("msr tcr_el1, {}", in(reg) tcr);

        core::arch::asm!("msr ttbr0_el1, {}", in(reg) ttbr0);
        core::arch::asm!("msr ttbr1_el1, {}", in(reg) ttbr1);
        core::arch::asm!("isb");

        // Enable translation with caches off first.
        let mut sctlr: u64;
        core::arch::asm!("mrs {}, sctlr_el1", out(reg) sctlr);
        sctlr |= 1; // M
        core::arch::asm!("msr sctlr_el1, {}", "isb", in(reg) sctlr);

        crate::cache::cache_invalidate_all();

        core::arch::asm!("mrs {}, sctlr_el1", out(reg) sctlr);
        sctlr |= (1 << 2) | (1 << 12); // C, I
        core::arch::asm!("msr sctlr_el1, {}", "isb", in(reg) sctlr);
    }

    MMU_INITIALIZED.store(true, Ordering::Release);
}

/// Translate a low physical address to its higher-half kernel virtual alias.
pub fn phys_to_virt(pa: usize) -> *mut u8 {
    (KERNEL_VA_BASE + pa as u64) as *mut u8
}

pub fn virt_to_phys(va: usize) -> usize {
    va.wrapping_sub(KERNEL_VA_BASE as usize)
}

/// Build a fresh root table set for a process: clone the cached L2
/// templates, override the slot covering `USER_REGION_BASE` with a
/// user-RW block pointing at `user_pa_base`, and install L1.
///
/// Requires `user_pa_base` to be 2 MiB aligned. Returns the L1 physical
/// address, or 0 on allocation failure.
pub fn ttbr0_create_with_user_pa(user_pa_base: usize) -> usize {
    if user_pa_base % BLOCK_2MIB != 0 {
        return 0;
    }

    let l1_pa = crate::pmm::alloc_page_zeroed();
    let l2_0_pa = crate::pmm::alloc_page_zeroed();
    let l2_1_pa = crate::pmm::alloc_page_zeroed();
    if l1_pa == 0 || l2_0_pa == 0 || l2_1_pa == 0 {
        if l1_pa != 0 {
            crate::pmm::free_page(l1_pa);
        }
        if l2_0_pa != 0 {
            crate::pmm::free_page(l2_0_pa);
        }
        if l2_1_pa != 0 {
            crate::pmm::free_page(l2_1_pa);
        }
        return 0;
    }

    unsafe {
        let templ = &raw const L2_TEMPLATE;
        let l2_0 = l2_0_pa as *mut Table;
        let l2_1 = l2_1_pa as *mut Table;
        core::ptr::copy_nonoverlapping(&(*templ)[0], l2_0, 1);
        core::ptr::copy_nonoverlapping(&(*templ)[1], l2_1, 1);

        let user_gib = USER_REGION_BASE as usize / (1usize << 30);
        let user_slot = (USER_REGION_BASE as usize % (1usize << 30)) / BLOCK_2MIB;
        let target = if user_gib == 0 { l2_0 } else { l2_1 };
        (*target).0[user_slot] = make_block_desc(user_pa_base, false, true);

        let l1 = l1_pa as *mut Table;
        (*l1).0[0] = make_table_desc(l2_0_pa);
        (*l1).0[1] = make_table_desc(l2_1_pa);
    }

    l1_pa
}

/// Install `ttbr0_pa` as the current TTBR0 and flush all TLB entries (no
/// ASIDs means every switch is a full flush).
pub fn ttbr0_write(ttbr0_pa: usize) {
    unsafe {
        core::arch::asm!("msr ttbr0_el1, {}", "isb", in(reg) ttbr0_pa as u64);
    }
    crate::cache::tlb_flush_all();
}

pub fn ttbr0_read() -> usize {
    let v: u64;
    unsafe { core::arch::asm!("mrs {}, ttbr0_el1", out(reg) v) };
    (v & !0xFFFu64) as usize
}
