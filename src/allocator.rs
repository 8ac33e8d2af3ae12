//! Kernel heap allocator
//!
//! A single `talc`-backed global allocator over a fixed heap region carved
//! out at boot. IRQs are disabled for the duration of every allocator call
//! since the lock is a plain spinlock and this kernel has no preemption to
//! protect against anyway, only interrupt handlers.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};
use spinning_top::Spinlock;
use talc::ErrOnOom;
use talc::{Span, Talc};

use crate::irq::with_irqs_disabled;

#[global_allocator]
static ALLOCATOR: TalcAllocator = TalcAllocator;

static TALC: Spinlock<Talc<ErrOnOom>> = Spinlock::new(Talc::new(ErrOnOom));

static HEAP_SIZE: AtomicUsize = AtomicUsize::new(0);
static ALLOCATED_BYTES: AtomicUsize = AtomicUsize::new(0);
static ALLOCATION_COUNT: AtomicUsize = AtomicUsize::new(0);
static PEAK_ALLOCATED: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy)]
pub struct MemoryStats {
    pub heap_size: usize,
    pub allocated: usize,
    pub free: usize,
    pub allocation_count: usize,
    pub peak_allocated: usize,
}

pub fn stats() -> MemoryStats {
    let heap_size = HEAP_SIZE.load(Ordering::Relaxed);
    let allocated = ALLOCATED_BYTES.load(Ordering::Relaxed);
    MemoryStats {
        heap_size,
        allocated,
        free: heap_size.saturating_sub(allocated),
        allocation_count: ALLOCATION_COUNT.load(Ordering::Relaxed),
        peak_allocated: PEAK_ALLOCATED.load(Ordering::Relaxed),
    }
}

pub fn init(heap_start: usize, heap_size: usize) -> Result<(), &'static str> {
    if heap_size == 0 {
        return Err("Heap size cannot be zero");
    }
    if heap_start == 0 {
        return Err("Invalid heap start address");
    }

    HEAP_SIZE.store(heap_size, Ordering::Relaxed);

    unsafe {
        let heap_ptr = heap_start as *mut u8;
        let span = Span::from_base_size(heap_ptr, heap_size);
        TALC.lock()
            .claim(span)
            .map_err(|_| "Failed to claim heap memory")?;
    }

    Ok(())
}

struct TalcAllocator;

unsafe impl GlobalAlloc for TalcAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        unsafe { talc_alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        unsafe {
            let p = talc_alloc(layout);
            if !p.is_null() {
                ptr::write_bytes(p, 0, layout.size());
            }
            p
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { talc_dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        unsafe { talc_realloc(ptr, layout, new_size) }
    }
}

unsafe fn talc_alloc(layout: Layout) -> *mut u8 {
    with_irqs_disabled(|| {
        let result = TALC
            .lock()
            .malloc(layout)
            .map(|p| p.as_ptr())
            .unwrap_or(ptr::null_mut());

        if result.is_null() {
            crate::console::print("[ALLOC FAIL]");
        } else {
            let new_allocated =
                ALLOCATED_BYTES.fetch_add(layout.size(), Ordering::Relaxed) + layout.size();
            ALLOCATION_COUNT.fetch_add(1, Ordering::Relaxed);
            let mut peak = PEAK_ALLOCATED.load(Ordering::Relaxed);
            while new_allocated > peak {
                match PEAK_ALLOCATED.compare_exchange_weak(
                    peak,
                    new_allocated,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(p) => peak = p,
                }
            }
        }

        result
    })
}

unsafe fn talc_dealloc(ptr: *mut u8, layout: Layout) {
    with_irqs_disabled(|| {
        TALC.lock()
            .free(core::ptr::NonNull::new_unchecked(ptr), layout);
        ALLOCATED_BYTES.fetch_sub(layout.size(), Ordering::Relaxed);
    })
}

unsafe fn talc_realloc(ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
    unsafe {
        if new_size == 0 {
            talc_dealloc(ptr, layout);
            return ptr::null_mut();
        }

        let new_layout = match Layout::from_size_align(new_size, layout.align()) {
            Ok(l) => l,
            Err(_) => return ptr::null_mut(),
        };

        let new_ptr = talc_alloc(new_layout);
        if new_ptr.is_null() {
            return ptr::null_mut();
        }

        if !ptr.is_null() && layout.size() > 0 {
            let copy_size = core::cmp::min(layout.size(), new_size);
            if copy_size > 0 {
                ptr::copy_nonoverlapping(ptr, new_ptr, copy_size);
            }
            talc_dealloc(ptr, layout);
        }

        new_ptr
    }
}
