//! User-space memory access helpers (§4.10)
//!
//! The kernel runs identity-mapped in the same TTBR0 table as the current
//! process's user window, so user pointers are plain pointers once bounds
//! have been checked against the fixed user region.

use crate::config::{MAX_PATH, USER_REGION_BASE, USER_REGION_SIZE};
use crate::linux_abi::Errno;

/// Whether `[ptr, ptr+len)` lies entirely inside the current process's user
/// window, rejecting overflow.
pub fn user_range_ok(ptr: u64, len: u64) -> bool {
    if len == 0 {
        return ptr != 0;
    }
    let end = match ptr.checked_add(len) {
        Some(e) => e,
        None => return false,
    };
    ptr >= USER_REGION_BASE && end <= USER_REGION_BASE + USER_REGION_SIZE
}

pub fn copy_cstr_from_user(user_ptr: u64, max_len: usize) -> Result<alloc::string::String, Errno> {
    if user_ptr == 0 {
        return Err(Errno::Fault);
    }
    let cap = max_len.min(MAX_PATH);
    let mut out = alloc::vec::Vec::with_capacity(cap);
    for i in 0..cap as u64 {
        if !user_range_ok(user_ptr + i, 1) {
            return Err(Errno::Fault);
        }
        let b = unsafe { core::ptr::read_volatile((user_ptr + i) as *const u8) };
        if b == 0 {
            return Ok(alloc::string::String::from_utf8_lossy(&out).into_owned());
        }
        out.push(b);
    }
    Err(Errno::NameTooLong)
}

pub fn read_u64_from_user(user_ptr: u64) -> Result<u64, Errno> {
    if !user_range_ok(user_ptr, 8) {
        return Err(Errno::Fault);
    }
    Ok(unsafe { core::ptr::read_volatile(user_ptr as *const u64) })
}

pub fn write_bytes_to_user(user_dst: u64, src: &[u8]) -> Result<(), Errno> {
    if !user_range_ok(user_dst, src.len() as u64) {
        return Err(Errno::Fault);
    }
    unsafe {
        core::ptr::copy_nonoverlapping(src.as_ptr(), user_dst as *mut u8, src.len());
    }
    Ok(())
}

pub fn read_bytes_from_user(user_src: u64, out: &mut [u8]) -> Result<(), Errno> {
    if !user_range_ok(user_src, out.len() as u64) {
        return Err(Errno::Fault);
    }
    unsafe {
        core::ptr::copy_nonoverlapping(user_src as *const u8, out.as_mut_ptr(), out.len());
    }
    Ok(())
}

pub fn write_u64_to_user(user_dst: u64, v: u64) -> Result<(), Errno> {
    write_bytes_to_user(user_dst, &v.to_ne_bytes())
}

pub const fn align_down_u64(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

pub const fn align_up_u64(x: u64, a: u64) -> u64 {
    align_down_u64(x + a - 1, a)
}
