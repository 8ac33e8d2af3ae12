//! Kernel configuration constants
//!
//! Tunable capacities and thresholds used throughout the kernel. Keeping
//! them in one module means a single place to read when asking "how many
//! of X can the kernel hold at once".

#![allow(dead_code)]

/// Boot/kernel stack size.
pub const KERNEL_STACK_SIZE: usize = 1024 * 1024;

/// Maximum number of live processes.
pub const N_PROC: usize = 16;

/// Maximum anonymous mappings (VMAs) tracked per process.
pub const MAX_VMAS: usize = 32;

/// Maximum open file descriptors per process.
pub const MAX_FDS: usize = 64;

/// Maximum live file descriptions (shared across all processes).
pub const MAX_FILEDESCS: usize = 64;

/// Maximum live pipes.
pub const MAX_PIPES: usize = 16;

/// Pipe ring buffer capacity in bytes.
pub const PIPE_BUF: usize = 1024;

/// Maximum overlay ram-directories.
pub const MAX_RAMDIRS: usize = 64;

/// Maximum argv entries accepted by execve.
pub const MAX_ARGS: usize = 32;

/// Maximum envp entries accepted by execve.
pub const MAX_ENVP: usize = 32;

/// Maximum length (bytes, including NUL) of one argv/envp string.
pub const MAX_STR: usize = 256;

/// Maximum length of a path string.
pub const MAX_PATH: usize = 256;

/// Base virtual address of the per-process user window.
pub const USER_REGION_BASE: u64 = 0x0040_0000;

/// Size of the per-process user window (fixed, non-growable).
pub const USER_REGION_SIZE: u64 = 0x0020_0000;

/// Guard distance kept between the heap break and the user stack watermark.
pub const STACK_GUARD: u64 = 256 * 1024;

/// Guard distance kept between the heap break and the mmap ceiling.
pub const MMAP_HEAP_GUARD: u64 = 64 * 1024;

/// Physical page size.
pub const PAGE_SIZE: usize = 4096;

/// Pages per 2 MiB block (the block size of every MMU mapping in this kernel).
pub const PAGES_PER_BLOCK: usize = 512;

/// 2 MiB block size in bytes.
pub const BLOCK_2MIB: usize = PAGES_PER_BLOCK * PAGE_SIZE;

/// Device peripheral window reserved from the RAM identity map (§4.2).
pub const PERIPH_BASE: usize = 0x3F00_0000;
pub const PERIPH_END: usize = 0x4000_1000;

/// Local peripherals window (GIC-adjacent), reserved from the identity map.
pub const LOCAL_PERIPH_BASE: usize = 0x4000_0000;
pub const LOCAL_PERIPH_SIZE: usize = 0x1000;

/// Kernel higher-half alias base for the RAM identity map.
pub const KERNEL_VA_BASE: u64 = 0xFFFF_FFC0_0000_0000;

/// Capacity of the kernel log ring (bytes).
pub const KLOG_CAPACITY: usize = 16 * 1024;
