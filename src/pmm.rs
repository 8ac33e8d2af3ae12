//! Physical Memory Manager
//!
//! Bitmap allocator over a single contiguous RAM range, plus a 2 MiB-aligned
//! contiguous-block allocator used for per-process user windows and page
//! tables (§4.1).

use alloc::vec::Vec;
use spinning_top::Spinlock;

use crate::config::{PAGES_PER_BLOCK, PAGE_SIZE};

struct Bitmap {
    /// One bit per page: 0 = free, 1 = used.
    words: Vec<u64>,
    base: usize,
    total_pages: usize,
}

impl Bitmap {
    const fn new() -> Self {
        Self {
            words: Vec::new(),
            base: 0,
            total_pages: 0,
        }
    }

    fn init(&mut self, base: usize, size: usize) {
        self.base = base;
        self.total_pages = size / PAGE_SIZE;
        let nwords = self.total_pages.div_ceil(64);
        self.words = alloc::vec![0u64; nwords];
    }

    fn set(&mut self, idx: usize) {
        self.words[idx / 64] |= 1u64 << (idx % 64);
    }

    fn clear(&mut self, idx: usize) {
        self.words[idx / 64] &= !(1u64 << (idx % 64));
    }

    fn test(&self, idx: usize) -> bool {
        (self.words[idx / 64] >> (idx % 64)) & 1 != 0
    }

    fn reserve_range(&mut self, start: usize, end: usize) {
        let start = start.max(self.base);
        let end = end.min(self.base + self.total_pages * PAGE_SIZE);
        if start >= end {
            return;
        }
        let first = (start - self.base) / PAGE_SIZE;
        let last = (end - self.base).div_ceil(PAGE_SIZE);
        for i in first..last.min(self.total_pages) {
            self.set(i);
        }
    }

    fn alloc_page(&mut self) -> Option<usize> {
        for i in 0..self.total_pages {
            if !self.test(i) {
                self.set(i);
                return Some(self.base + i * PAGE_SIZE);
            }
        }
        None
    }

    fn free_page(&mut self, pa: usize) {
        if pa < self.base {
            return;
        }
        let idx = (pa - self.base) / PAGE_SIZE;
        if idx < self.total_pages {
            self.clear(idx);
        }
    }

    /// Exact algorithm: align the candidate start up to the next
    /// `pages`-sized boundary; if any page in the candidate block is used,
    /// jump a full block forward and retry.
    fn alloc_aligned_block(&mut self, pages: usize) -> Option<usize> {
        let mut start = 0usize;
        loop {
            if start + pages > self.total_pages {
                return None;
            }
            let aligned = (start + pages - 1) & !(pages - 1);
            if aligned + pages > self.total_pages {
                return None;
            }
            let mut any_used = false;
            for i in aligned..aligned + pages {
                if self.test(i) {
                    any_used = true;
                    break;
                }
            }
            if !any_used {
                for i in aligned..aligned + pages {
                    self.set(i);
                }
                return Some(self.base + aligned * PAGE_SIZE);
            }
            start = aligned + pages;
        }
    }

    fn free_aligned_block(&mut self, pa: usize, pages: usize) {
        for i in 0..pages {
            self.free_page(pa + i * PAGE_SIZE);
        }
    }
}

static PMM: Spinlock<Bitmap> = Spinlock::new(Bitmap::new());

/// Initialize the PMM over `[mem_base, mem_base+mem_size)`, reserving the
/// low 2 MiB, the kernel image, the DTB +/- 64 KiB window, and the initial
/// user region.
pub fn init(mem_base: usize, mem_size: usize, kernel_start: usize, kernel_end: usize, dtb_ptr: usize) {
    let mut bm = PMM.lock();
    bm.init(mem_base, mem_size);

    bm.reserve_range(mem_base, mem_base + 2 * 1024 * 1024);
    bm.reserve_range(kernel_start, kernel_end);
    if dtb_ptr != 0 {
        bm.reserve_range(dtb_ptr.saturating_sub(64 * 1024), dtb_ptr + 64 * 1024);
    }
    let user_base = crate::config::USER_REGION_BASE as usize;
    let user_size = crate::config::USER_REGION_SIZE as usize;
    bm.reserve_range(user_base, user_base + user_size);
}

/// Allocate a single 4 KiB physical page. Returns 0 on exhaustion.
pub fn alloc_page() -> usize {
    PMM.lock().alloc_page().unwrap_or(0)
}

pub fn free_page(pa: usize) {
    if pa != 0 {
        PMM.lock().free_page(pa);
    }
}

/// Allocate a 2 MiB-aligned, 512-page contiguous block. Returns 0 on
/// exhaustion.
pub fn alloc_2mib_aligned() -> usize {
    PMM.lock().alloc_aligned_block(PAGES_PER_BLOCK).unwrap_or(0)
}

/// Free a block previously returned by `alloc_2mib_aligned`. Requires
/// 2 MiB alignment.
pub fn free_2mib_aligned(pa: usize) {
    if pa == 0 || pa % crate::config::BLOCK_2MIB != 0 {
        return;
    }
    PMM.lock().free_aligned_block(pa, PAGES_PER_BLOCK);
}

pub struct PmmInfo {
    pub total_pages: usize,
    pub free_pages: usize,
}

pub fn info() -> PmmInfo {
    let bm = PMM.lock();
    let mut used = 0;
    for i in 0..bm.total_pages {
        if bm.test(i) {
            used += 1;
        }
    }
    PmmInfo {
        total_pages: bm.total_pages,
        free_pages: bm.total_pages - used,
    }
}

/// Allocate a page and zero it through the kernel identity mapping.
pub fn alloc_page_zeroed() -> usize {
    let pa = alloc_page();
    if pa != 0 {
        unsafe { core::ptr::write_bytes(pa as *mut u8, 0, PAGE_SIZE) };
    }
    pa
}
