//! Syscall dispatch (§4.15-§4.20)
//!
//! Linux-compatible AArch64 ABI: the syscall number arrives in `x8`,
//! arguments in `x0..x5`, and the return value goes back out through `x0`.
//! Most handlers are plain `SysResult` functions operating on the current
//! process; the handful that can block, exit, or hand the CPU to a
//! different process (`execve`, `clone`, `wait4`, `exit`/`exit_group`,
//! `kill`) take the live trap frame and mutate it in place, following the
//! same pattern `exceptions::kill_current_and_switch` uses for faults.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::config::{
    MAX_ARGS, MAX_ENVP, MAX_FDS, MAX_PATH, MAX_STR, MMAP_HEAP_GUARD, N_PROC, PAGE_SIZE,
    STACK_GUARD, USER_REGION_BASE, USER_REGION_SIZE,
};
use crate::exceptions::UserTrapFrame;
use crate::fd::DescKind;
use crate::linux_abi::{
    dtype_from_mode, encode, is_dir, is_reg, Errno, Stat64, SysResult, Utsname, S_IFDIR, S_IFREG,
    TCGETS, TIOCGPGRP, TIOCGWINSZ,
};
use crate::process::{tf_copy, Proc, State, Vma, PROCS};
use crate::user::{
    align_down_u64, align_up_u64, copy_cstr_from_user, read_u64_from_user, user_range_ok,
    write_bytes_to_user,
};
use crate::vfs;

/// Linux generic AArch64 syscall numbers, plus one numbered extension of
/// our own (`KLOG_READ`) that has no Linux counterpart.
pub mod nr {
    pub const GETCWD: u64 = 17;
    pub const DUP3: u64 = 24;
    pub const IOCTL: u64 = 29;
    pub const MKDIRAT: u64 = 34;
    pub const UNLINKAT: u64 = 35;
    pub const SYMLINKAT: u64 = 36;
    pub const LINKAT: u64 = 37;
    pub const FCHMODAT: u64 = 53;
    pub const FCHOWNAT: u64 = 54;
    pub const OPENAT: u64 = 56;
    pub const CLOSE: u64 = 57;
    pub const PIPE2: u64 = 59;
    pub const GETDENTS64: u64 = 61;
    pub const LSEEK: u64 = 62;
    pub const READ: u64 = 63;
    pub const WRITE: u64 = 64;
    pub const READLINKAT: u64 = 78;
    pub const NEWFSTATAT: u64 = 79;
    pub const EXIT: u64 = 93;
    pub const EXIT_GROUP: u64 = 94;
    pub const SET_TID_ADDRESS: u64 = 96;
    pub const SET_ROBUST_LIST: u64 = 99;
    pub const NANOSLEEP: u64 = 101;
    pub const CLOCK_GETTIME: u64 = 113;
    pub const KILL: u64 = 129;
    pub const RT_SIGACTION: u64 = 134;
    pub const RT_SIGPROCMASK: u64 = 135;
    pub const REBOOT: u64 = 142;
    pub const CHDIR: u64 = 49;
    pub const UNAME: u64 = 160;
    pub const GETPID: u64 = 172;
    pub const GETPPID: u64 = 173;
    pub const GETUID: u64 = 174;
    pub const GETEUID: u64 = 175;
    pub const GETGID: u64 = 176;
    pub const GETEGID: u64 = 177;
    pub const GETTID: u64 = 178;
    pub const BRK: u64 = 214;
    pub const MUNMAP: u64 = 215;
    pub const CLONE: u64 = 220;
    pub const EXECVE: u64 = 221;
    pub const MMAP: u64 = 222;
    pub const WAIT4: u64 = 260;
    pub const GETRANDOM: u64 = 278;

    /// Not a Linux syscall: read a slice of the kernel log ring, dmesg-style.
    pub const KLOG_READ: u64 = 500;
}

const AT_FDCWD: i64 = -100;
const O_CREAT: u64 = 0o100;
const O_EXCL: u64 = 0o200;
const O_TRUNC: u64 = 0o1000;
const O_DIRECTORY: u64 = 0o200000;
const AT_REMOVEDIR: u64 = 0x200;
const WNOHANG: u64 = 1;

/// Sole entry point, called from `exceptions::rust_sync_el0_handler`. Reads
/// the syscall number and arguments out of the live trap frame and returns
/// whatever belongs in `x0` on `eret`.
pub fn dispatch(frame: *mut UserTrapFrame) -> u64 {
    let (num, a0, a1, a2, a3, a4, a5) = unsafe {
        (
            (*frame).x8,
            (*frame).x0,
            (*frame).x1,
            (*frame).x2,
            (*frame).x3,
            (*frame).x4,
            (*frame).x5,
        )
    };

    match num {
        nr::EXECVE => sys_execve(frame, a0, a1, a2),
        nr::CLONE => sys_clone(frame, a0),
        nr::WAIT4 => sys_wait4(frame, a0 as i64, a1, a2 as u64),
        nr::EXIT | nr::EXIT_GROUP => sys_exit(frame, a0 as i32),
        nr::KILL => sys_kill(frame, a0 as i64, a1 as u32),

        nr::READ => encode(sys_read(a0, a1, a2 as usize)),
        nr::WRITE => encode(sys_write(a0, a1, a2 as usize)),
        nr::OPENAT => encode(sys_openat(a0 as i64, a1, a2, a3 as u32)),
        nr::CLOSE => encode(sys_close(a0)),
        nr::LSEEK => encode(sys_lseek(a0, a1 as i64, a2 as u32)),
        nr::NEWFSTATAT => encode(sys_newfstatat(a0 as i64, a1, a2, a3 as u32)),
        nr::GETDENTS64 => encode(sys_getdents64(a0, a1, a2 as usize)),
        nr::MKDIRAT => encode(sys_mkdirat(a0 as i64, a1, a2 as u32)),
        nr::UNLINKAT => encode(sys_unlinkat(a0 as i64, a1, a2 as u32)),
        nr::LINKAT => encode(sys_linkat(a0 as i64, a1, a2 as i64, a3, a4 as u32)),
        nr::SYMLINKAT => encode(Err(Errno::NoSys)),
        nr::READLINKAT => encode(Err(Errno::NoSys)),
        nr::FCHMODAT => encode(sys_fchmodat(a0 as i64, a1)),
        nr::FCHOWNAT => encode(Ok(0)),
        nr::CHDIR => encode(sys_chdir(a0)),
        nr::GETCWD => encode(sys_getcwd(a0, a1 as usize)),
        nr::DUP3 => encode(sys_dup3(a0, a1, a2 as u32)),
        nr::PIPE2 => encode(sys_pipe2(a0, a1 as u32)),
        nr::IOCTL => encode(sys_ioctl(a0, a1, a2)),
        nr::UNAME => encode(sys_uname(a0)),
        nr::CLOCK_GETTIME => encode(sys_clock_gettime(a0, a1)),
        nr::GETRANDOM => encode(sys_getrandom(a0, a1 as usize, a2 as u32)),
        nr::RT_SIGACTION => encode(sys_rt_sigaction(a2, a3)),
        nr::RT_SIGPROCMASK => encode(sys_rt_sigprocmask(a2, a3)),
        nr::SET_TID_ADDRESS => encode(sys_set_tid_address(a0)),
        nr::SET_ROBUST_LIST => encode(Ok(0)),
        nr::BRK => sys_brk(a0),
        nr::MMAP => encode(sys_mmap(a0, a1, a2 as u32, a3 as u32, a4 as i64)),
        nr::MUNMAP => encode(sys_munmap(a0, a1)),
        nr::GETPID => encode(Ok(crate::process::current_pid())),
        nr::GETPPID => encode(sys_getppid()),
        nr::GETUID | nr::GETEUID | nr::GETGID | nr::GETEGID => encode(Ok(0)),
        nr::GETTID => encode(Ok(crate::process::current_pid())),
        nr::REBOOT => sys_reboot(a2 as u32),
        nr::KLOG_READ => encode(sys_klog_read(a0, a1, a2 as usize)),

        nr::NANOSLEEP => sys_nanosleep(frame, a0, a1),

        _ => {
            crate::console::print(&format!("[syscall] unimplemented nr={num}\n"));
            encode(Err(Errno::NoSys))
        }
    }
}

/// Run `f` against the current process under the table lock.
fn with_current<R>(f: impl FnOnce(&mut Proc) -> R) -> R {
    let mut t = PROCS.lock();
    let cur = t.cur;
    f(&mut t.procs[cur])
}

fn current_cwd_and_fd_table() -> (String, usize) {
    let t = PROCS.lock();
    (t.procs[t.cur].cwd.clone(), t.cur)
}

fn lookup_fd_desc(fd: u64) -> Option<usize> {
    let fd = fd as usize;
    if fd >= MAX_FDS {
        return None;
    }
    let t = PROCS.lock();
    t.procs[t.cur].fd_to_desc[fd]
}

fn alloc_fd_for_desc(desc: usize) -> Option<u64> {
    let mut t = PROCS.lock();
    let cur = t.cur;
    let slot = (0..MAX_FDS).find(|&i| t.procs[cur].fd_to_desc[i].is_none())?;
    t.procs[cur].fd_to_desc[slot] = Some(desc);
    Some(slot as u64)
}

/// Resolve `dirfd`/`path` to an absolute path. Only `AT_FDCWD` is supported
/// as a base (this kernel never hands out directory FDs).
fn resolve_at(dirfd: i64, path_user: u64) -> Result<String, Errno> {
    if dirfd != AT_FDCWD {
        return Err(Errno::BadF);
    }
    let path = copy_cstr_from_user(path_user, MAX_STR)?;
    let (cwd, _) = current_cwd_and_fd_table();
    Ok(crate::process::resolve_path(&cwd, &path))
}

// ---------------------------------------------------------------------
// File descriptor / VFS syscalls
// ---------------------------------------------------------------------

fn sys_read(fd: u64, buf: u64, count: usize) -> SysResult {
    if count == 0 {
        return Ok(0);
    }
    let didx = lookup_fd_desc(fd).ok_or(Errno::BadF)?;
    let mut tmp = alloc::vec![0u8; count];

    let n = crate::fd::with_desc(didx, |d| -> Result<usize, Errno> {
        match &mut d.kind {
            DescKind::Uart => {
                let first = crate::console::getchar();
                tmp[0] = if first == b'\r' { b'\n' } else { first };
                let mut n = 1;
                while n < tmp.len() && crate::console::has_char() {
                    let c = crate::console::getchar();
                    tmp[n] = if c == b'\r' { b'\n' } else { c };
                    n += 1;
                }
                Ok(n)
            }
            DescKind::Pipe { pipe_id, write_end } => {
                if *write_end {
                    return Err(Errno::BadF);
                }
                crate::pipe::read(*pipe_id, &mut tmp)
            }
            DescKind::Ramfile { file_id, offset } => {
                let n = vfs::ramfile_read(*file_id, *offset, &mut tmp);
                *offset += n as u64;
                Ok(n)
            }
            DescKind::Initramfs { path, offset } => {
                let looked = vfs::lookup_abs(path).map_err(|_| Errno::NoEnt)?;
                if looked.kind != vfs::EntryKind::Reg {
                    return Err(Errno::IsDir);
                }
                let norm = crate::vfs::path::strip_leading_slash(path);
                let data = crate::vfs::initramfs::lookup(norm).map(|f| f.data).unwrap_or(&[]);
                let off = (*offset as usize).min(data.len());
                let n = tmp.len().min(data.len() - off);
                tmp[..n].copy_from_slice(&data[off..off + n]);
                *offset += n as u64;
                Ok(n)
            }
            DescKind::Proc { node, offset } => {
                let text = render_proc_node(*node);
                let off = (*offset as usize).min(text.len());
                let n = tmp.len().min(text.len() - off);
                tmp[..n].copy_from_slice(&text.as_bytes()[off..off + n]);
                *offset += n as u64;
                Ok(n)
            }
            DescKind::Unused => Err(crate::fd::errno_for_unused()),
            DescKind::Udp6 | DescKind::Tcp6 => Err(Errno::AfNoSupport),
        }
    })
    .ok_or(Errno::BadF)??;

    write_bytes_to_user(buf, &tmp[..n])?;
    Ok(n as u64)
}

fn sys_write(fd: u64, buf: u64, count: usize) -> SysResult {
    if count == 0 {
        return Ok(0);
    }
    if !user_range_ok(buf, count as u64) {
        return Err(Errno::Fault);
    }
    let mut tmp = alloc::vec![0u8; count];
    crate::user::read_bytes_from_user(buf, &mut tmp)?;

    let didx = lookup_fd_desc(fd).ok_or(Errno::BadF)?;
    crate::fd::with_desc(didx, |d| -> SysResult {
        match &mut d.kind {
            DescKind::Uart => {
                for &b in &tmp {
                    unsafe { crate::console::print(core::str::from_utf8_unchecked(&[b])) };
                }
                Ok(tmp.len() as u64)
            }
            DescKind::Pipe { pipe_id, write_end } => {
                if !*write_end {
                    return Err(Errno::BadF);
                }
                Ok(crate::pipe::write(*pipe_id, &tmp)? as u64)
            }
            DescKind::Ramfile { file_id, offset } => {
                let n = vfs::ramfile_write(*file_id, *offset, &tmp);
                *offset += n as u64;
                Ok(n as u64)
            }
            DescKind::Initramfs { .. } => Err(Errno::Rofs),
            DescKind::Proc { .. } => Err(Errno::BadF),
            DescKind::Unused => Err(crate::fd::errno_for_unused()),
            DescKind::Udp6 | DescKind::Tcp6 => Err(Errno::AfNoSupport),
        }
    })
    .ok_or(Errno::BadF)?
}

fn render_proc_node(node: u8) -> String {
    if node != 2 {
        return String::new();
    }
    let mut out = String::from("PID  PPID STATE CWD\n");
    let t = PROCS.lock();
    for p in t.procs.iter() {
        if p.state == State::Unused {
            continue;
        }
        let st = match p.state {
            State::Unused => '-',
            State::Runnable => 'R',
            State::Waiting => 'W',
            State::Sleeping => 'S',
            State::Zombie => 'Z',
        };
        out.push_str(&format!("{:<4} {:<5} {:<5} {}\n", p.pid, p.ppid, st, p.cwd));
    }
    out
}

fn sys_openat(dirfd: i64, path_user: u64, flags: u64, _mode: u32) -> SysResult {
    if dirfd != AT_FDCWD {
        return Err(Errno::BadF);
    }
    let path = copy_cstr_from_user(path_user, MAX_STR)?;
    let (cwd, _) = current_cwd_and_fd_table();
    let abs = crate::process::resolve_path(&cwd, &path);
    let writing = flags & 0b11 != 0; // O_WRONLY | O_RDWR

    if abs == "/proc" {
        let desc = crate::fd::alloc_desc(DescKind::Proc { node: 1, offset: 0 }).ok_or(Errno::MFile)?;
        return fd_for_new_desc(desc);
    }
    if abs == "/proc/ps" {
        let desc = crate::fd::alloc_desc(DescKind::Proc { node: 2, offset: 0 }).ok_or(Errno::MFile)?;
        return fd_for_new_desc(desc);
    }

    if let Some(file_id) = vfs::ramfile_find_abs(&abs) {
        if flags & O_EXCL != 0 && flags & O_CREAT != 0 {
            return Err(Errno::Exist);
        }
        if flags & O_TRUNC != 0 {
            vfs::ramfile_set_size(file_id, 0)?;
        }
        let desc = crate::fd::alloc_desc(DescKind::Ramfile { file_id, offset: 0 }).ok_or(Errno::MFile)?;
        return fd_for_new_desc(desc);
    }

    match vfs::lookup_abs(&abs) {
        Ok(found) => {
            if found.kind == vfs::EntryKind::Dir {
                if writing {
                    return Err(Errno::IsDir);
                }
                let desc =
                    crate::fd::alloc_desc(DescKind::Initramfs { path: abs, offset: 0 }).ok_or(Errno::MFile)?;
                return fd_for_new_desc(desc);
            }
            if writing {
                return Err(Errno::Rofs);
            }
            let desc =
                crate::fd::alloc_desc(DescKind::Initramfs { path: abs, offset: 0 }).ok_or(Errno::MFile)?;
            fd_for_new_desc(desc)
        }
        Err(Errno::NoEnt) if flags & O_CREAT != 0 => {
            if flags & O_DIRECTORY != 0 {
                return Err(Errno::Inval);
            }
            let file_id = vfs::ramfile_create(&abs)?;
            let desc =
                crate::fd::alloc_desc(DescKind::Ramfile { file_id, offset: 0 }).ok_or(Errno::MFile)?;
            fd_for_new_desc(desc)
        }
        Err(e) => Err(e),
    }
}

/// Installs a freshly allocated `desc` into the current process's FD table,
/// dropping its reference again if the table is full instead of leaking it.
fn fd_for_new_desc(desc: usize) -> SysResult {
    match alloc_fd_for_desc(desc) {
        Some(fd) => Ok(fd),
        None => {
            crate::fd::decref(desc);
            Err(Errno::MFile)
        }
    }
}

fn sys_close(fd: u64) -> SysResult {
    let fd = fd as usize;
    if fd >= MAX_FDS {
        return Err(Errno::BadF);
    }
    let didx = {
        let mut t = PROCS.lock();
        let cur = t.cur;
        t.procs[cur].fd_to_desc[fd].take()
    };
    match didx {
        Some(d) => {
            crate::fd::decref(d);
            Ok(0)
        }
        None => Err(Errno::BadF),
    }
}

fn sys_lseek(fd: u64, offset: i64, whence: u32) -> SysResult {
    const SEEK_SET: u32 = 0;
    const SEEK_CUR: u32 = 1;
    const SEEK_END: u32 = 2;

    let didx = lookup_fd_desc(fd).ok_or(Errno::BadF)?;
    crate::fd::with_desc(didx, |d| -> SysResult {
        match &mut d.kind {
            DescKind::Ramfile { file_id, offset: off } => {
                let (size, _) = vfs::ramfile_get(*file_id).ok_or(Errno::BadF)?;
                let new = seek_to(*off, size, offset, whence)?;
                *off = new;
                Ok(new)
            }
            DescKind::Initramfs { path, offset: off } => {
                let size = vfs::lookup_abs(path).map(|l| l.size).unwrap_or(0);
                let new = seek_to(*off, size, offset, whence)?;
                *off = new;
                Ok(new)
            }
            DescKind::Proc { offset: off, .. } if whence == SEEK_SET || whence == SEEK_CUR => {
                let new = seek_to(*off, u64::MAX / 2, offset, whence)?;
                *off = new;
                Ok(new)
            }
            _ => Err(Errno::Inval),
        }
    })
    .ok_or(Errno::BadF)?
}

fn seek_to(cur: u64, size: u64, offset: i64, whence: u32) -> Result<u64, Errno> {
    let base = match whence {
        0 => 0i64,                // SEEK_SET
        1 => cur as i64,          // SEEK_CUR
        2 => size as i64,         // SEEK_END
        _ => return Err(Errno::Inval),
    };
    let new = base.checked_add(offset).ok_or(Errno::Inval)?;
    if new < 0 {
        return Err(Errno::Inval);
    }
    let new = new as u64;
    // The PROC offset space is unbounded (re-rendered per read), unlike a
    // real file's size; only reject past-EOF for an actual size.
    if size != u64::MAX / 2 && new > size {
        return Err(Errno::Inval);
    }
    Ok(new)
}

fn sys_newfstatat(dirfd: i64, path_user: u64, statbuf: u64, _flags: u32) -> SysResult {
    let abs = resolve_at(dirfd, path_user)?;

    let (mode, size) = if abs == "/proc" {
        (S_IFDIR | 0o555, 0u64)
    } else if abs == "/proc/ps" {
        (S_IFREG | 0o444, 0u64)
    } else {
        let found = vfs::lookup_abs(&abs)?;
        (found.mode, found.size)
    };

    let mut st = Stat64::default();
    st.st_ino = 1;
    st.st_nlink = 1;
    st.st_mode = mode;
    st.st_size = size as i64;
    st.st_blksize = 4096;
    st.st_blocks = ((size + 511) / 512) as i64;

    let bytes = unsafe {
        core::slice::from_raw_parts((&st as *const Stat64) as *const u8, core::mem::size_of::<Stat64>())
    };
    write_bytes_to_user(statbuf, bytes)?;
    Ok(0)
}

fn sys_getdents64(fd: u64, dirp: u64, count: usize) -> SysResult {
    let didx = lookup_fd_desc(fd).ok_or(Errno::BadF)?;
    let (path, emitted_already) = crate::fd::with_desc(didx, |d| match &d.kind {
        DescKind::Initramfs { path, offset } => Some((path.clone(), *offset as usize)),
        DescKind::Proc { node: 1, offset } => Some((String::from("/proc"), *offset as usize)),
        _ => None,
    })
    .flatten()
    .ok_or(Errno::NotDir)?;

    let mut entries: alloc::vec::Vec<(String, u32)> = alloc::vec![
        (String::from("."), S_IFDIR),
        (String::from(".."), S_IFDIR),
    ];
    if path == "/proc" {
        entries.push((String::from("ps"), S_IFREG));
    } else {
        let found = vfs::lookup_abs(&path)?;
        if found.kind != vfs::EntryKind::Dir {
            return Err(Errno::NotDir);
        }
        entries.extend(vfs::list_dir(&path));
    }

    let mut pos = 0usize;
    let mut n_emitted = 0usize;
    for (i, (name, mode)) in entries.iter().enumerate().skip(emitted_already) {
        let reclen = align_up_u64((19 + name.len() + 1) as u64, 8) as usize;
        if pos + reclen > count {
            break;
        }
        let mut rec = alloc::vec![0u8; reclen];
        rec[0..8].copy_from_slice(&1u64.to_ne_bytes()); // d_ino
        rec[8..16].copy_from_slice(&((i + 1) as i64).to_ne_bytes()); // d_off
        rec[16..18].copy_from_slice(&(reclen as u16).to_ne_bytes());
        rec[18] = dtype_from_mode(*mode);
        rec[19..19 + name.len()].copy_from_slice(name.as_bytes());
        write_bytes_to_user(dirp + pos as u64, &rec)?;
        pos += reclen;
        n_emitted += 1;
    }

    crate::fd::with_desc(didx, |d| match &mut d.kind {
        DescKind::Initramfs { offset, .. } | DescKind::Proc { offset, .. } => {
            *offset = (emitted_already + n_emitted) as u64;
        }
        _ => {}
    });

    Ok(pos as u64)
}

fn sys_mkdirat(dirfd: i64, path_user: u64, _mode: u32) -> SysResult {
    let abs = resolve_at(dirfd, path_user)?;
    if abs == "/" {
        return Err(Errno::Exist);
    }
    vfs::ramdir_create(&abs)?;
    Ok(0)
}

fn sys_unlinkat(dirfd: i64, path_user: u64, flags: u32) -> SysResult {
    let abs = resolve_at(dirfd, path_user as u64)?;
    if abs == "/" {
        return Err(Errno::IsDir);
    }
    if flags as u64 & AT_REMOVEDIR != 0 {
        vfs::ramdir_remove(&abs)
    } else {
        vfs::ramfile_unlink(&abs)
    }
    .map(|_| 0)
}

fn sys_linkat(olddirfd: i64, oldpath_user: u64, newdirfd: i64, newpath_user: u64, flags: u32) -> SysResult {
    if flags != 0 {
        return Err(Errno::Inval);
    }
    let old_abs = resolve_at(olddirfd, oldpath_user)?;
    let new_abs = resolve_at(newdirfd, newpath_user)?;
    if old_abs == "/" {
        return Err(Errno::Perm);
    }
    vfs::ramfile_link(&old_abs, &new_abs)?;
    Ok(0)
}

fn sys_fchmodat(dirfd: i64, path_user: u64) -> SysResult {
    let abs = resolve_at(dirfd, path_user)?;
    vfs::lookup_abs(&abs)?;
    Ok(0)
}

fn sys_chdir(path_user: u64) -> SysResult {
    let path = copy_cstr_from_user(path_user, MAX_STR)?;
    let (cwd, _) = current_cwd_and_fd_table();
    let abs = crate::process::resolve_path(&cwd, &path);
    let found = vfs::lookup_abs(&abs)?;
    if found.kind != vfs::EntryKind::Dir {
        return Err(Errno::NotDir);
    }
    with_current(|p| p.cwd = abs);
    Ok(0)
}

fn sys_getcwd(buf: u64, size: usize) -> SysResult {
    if size == 0 {
        return Err(Errno::Inval);
    }
    let (cwd, _) = current_cwd_and_fd_table();
    if cwd.len() + 1 > size {
        return Err(Errno::Range);
    }
    let mut bytes = cwd.into_bytes();
    bytes.push(0);
    write_bytes_to_user(buf, &bytes)?;
    Ok(buf)
}

fn sys_dup3(oldfd: u64, newfd: u64, flags: u32) -> SysResult {
    if flags != 0 {
        return Err(Errno::Inval);
    }
    if oldfd == newfd {
        return Ok(newfd);
    }
    let (old, newf) = (oldfd as usize, newfd as usize);
    if old >= MAX_FDS || newf >= MAX_FDS {
        return Err(Errno::BadF);
    }
    let mut t = PROCS.lock();
    let cur = t.cur;
    let old_desc = t.procs[cur].fd_to_desc[old].ok_or(Errno::BadF)?;
    if let Some(existing) = t.procs[cur].fd_to_desc[newf].take() {
        drop(t);
        crate::fd::decref(existing);
        t = PROCS.lock();
    }
    crate::fd::incref(old_desc);
    t.procs[cur].fd_to_desc[newf] = Some(old_desc);
    Ok(newfd)
}

fn sys_pipe2(pipefd_user: u64, flags: u32) -> SysResult {
    if flags != 0 {
        return Err(Errno::Inval);
    }
    let pipe_id = crate::pipe::create().ok_or(Errno::NoMem)?;
    let rdesc = crate::fd::alloc_desc(DescKind::Pipe { pipe_id, write_end: false });
    let wdesc = crate::fd::alloc_desc(DescKind::Pipe { pipe_id, write_end: true });
    let (rdesc, wdesc) = match (rdesc, wdesc) {
        (Some(r), Some(w)) => (r, w),
        _ => {
            if let Some(r) = rdesc {
                crate::fd::decref(r);
            }
            if let Some(w) = wdesc {
                crate::fd::decref(w);
            }
            return Err(Errno::MFile);
        }
    };
    let rfd = match alloc_fd_for_desc(rdesc) {
        Some(f) => f,
        None => {
            crate::fd::decref(rdesc);
            crate::fd::decref(wdesc);
            return Err(Errno::MFile);
        }
    };
    let wfd = match alloc_fd_for_desc(wdesc) {
        Some(f) => f,
        None => {
            let _ = sys_close(rfd);
            crate::fd::decref(wdesc);
            return Err(Errno::MFile);
        }
    };
    write_bytes_to_user(pipefd_user, &(rfd as u32).to_ne_bytes())?;
    write_bytes_to_user(pipefd_user + 4, &(wfd as u32).to_ne_bytes())?;
    Ok(0)
}

fn sys_ioctl(fd: u64, req: u64, argp: u64) -> SysResult {
    let didx = lookup_fd_desc(fd).ok_or(Errno::BadF)?;
    let is_uart = crate::fd::with_desc(didx, |d| matches!(d.kind, DescKind::Uart)).unwrap_or(false);
    if !is_uart {
        return Err(Errno::NotTy);
    }
    match req {
        TCGETS => {
            write_bytes_to_user(argp, &[0u8; 60])?;
            Ok(0)
        }
        TIOCGWINSZ => {
            let ws = crate::linux_abi::Winsize { ws_row: 24, ws_col: 80, ws_xpixel: 0, ws_ypixel: 0 };
            let bytes = unsafe {
                core::slice::from_raw_parts((&ws as *const _) as *const u8, core::mem::size_of_val(&ws))
            };
            write_bytes_to_user(argp, bytes)?;
            Ok(0)
        }
        TIOCGPGRP => {
            let pid = crate::process::current_pid();
            write_bytes_to_user(argp, &(pid as u32).to_ne_bytes())?;
            Ok(0)
        }
        _ => Err(Errno::NotTy),
    }
}

// ---------------------------------------------------------------------
// Identity / misc syscalls (§4.18-§4.20, original sys_misc.c algorithms)
// ---------------------------------------------------------------------

fn sys_uname(buf: u64) -> SysResult {
    let u = Utsname::current();
    let bytes =
        unsafe { core::slice::from_raw_parts((&u as *const Utsname) as *const u8, core::mem::size_of::<Utsname>()) };
    write_bytes_to_user(buf, bytes)?;
    Ok(0)
}

fn sys_clock_gettime(clockid: u64, tp: u64) -> SysResult {
    if clockid > 1 {
        return Err(Errno::Inval);
    }
    let ns = crate::timer::now_ns();
    let ts = crate::linux_abi::LinuxTimespec {
        tv_sec: (ns / 1_000_000_000) as i64,
        tv_nsec: (ns % 1_000_000_000) as i64,
    };
    let bytes = unsafe {
        core::slice::from_raw_parts(
            (&ts as *const crate::linux_abi::LinuxTimespec) as *const u8,
            core::mem::size_of_val(&ts),
        )
    };
    write_bytes_to_user(tp, bytes)?;
    Ok(0)
}

static RAND_STATE: spinning_top::Spinlock<u64> = spinning_top::Spinlock::new(0x2545F4914F6CDD1D);

fn sys_getrandom(buf: u64, len: usize, _flags: u32) -> SysResult {
    if !user_range_ok(buf, len as u64) {
        return Err(Errno::Fault);
    }
    let mut state = RAND_STATE.lock();
    if *state == 0x2545F4914F6CDD1D {
        *state ^= crate::process::current_pid() << 1;
    }
    let mut out = alloc::vec![0u8; len];
    for chunk in out.chunks_mut(8) {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        let word = state.wrapping_mul(0x2545F4914F6CDD1D);
        let bytes = word.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    drop(state);
    write_bytes_to_user(buf, &out)?;
    Ok(len as u64)
}

fn sys_rt_sigaction(_old_act: u64, sigsetsize_or_old: u64) -> SysResult {
    if sigsetsize_or_old != 0 {
        write_bytes_to_user(sigsetsize_or_old, &[0u8; 8])?;
    }
    Ok(0)
}

fn sys_rt_sigprocmask(sigsetsize: u64, old_set: u64) -> SysResult {
    if sigsetsize == 0 || sigsetsize > 128 {
        return Err(Errno::Inval);
    }
    if old_set != 0 {
        let zeros = alloc::vec![0u8; sigsetsize as usize];
        write_bytes_to_user(old_set, &zeros)?;
    }
    Ok(0)
}

fn sys_set_tid_address(tidptr: u64) -> SysResult {
    with_current(|p| p.clear_child_tid_user = tidptr);
    Ok(crate::process::current_pid())
}

fn sys_getppid() -> SysResult {
    Ok(with_current(|p| p.ppid))
}

fn sys_reboot(cmd: u32) -> u64 {
    const LINUX_REBOOT_CMD_POWER_OFF: u32 = 0x4321_FFF2;
    const LINUX_REBOOT_CMD_RESTART: u32 = 0x0123_4567;
    match cmd {
        LINUX_REBOOT_CMD_POWER_OFF => crate::power::power_off(),
        LINUX_REBOOT_CMD_RESTART => crate::power::halt(),
        _ => encode(Err(Errno::Inval)),
    }
}

fn sys_klog_read(offset: u64, buf: u64, len: usize) -> SysResult {
    if !user_range_ok(buf, len as u64) {
        return Err(Errno::Fault);
    }
    let mut tmp = alloc::vec![0u8; len];
    let n = crate::klog::read_at(offset as usize, &mut tmp);
    write_bytes_to_user(buf, &tmp[..n])?;
    Ok(n as u64)
}

// ---------------------------------------------------------------------
// Memory management
// ---------------------------------------------------------------------

/// `brk` always returns the resulting break, old or new, never an errno —
/// that is the real Linux ABI, unlike almost every other syscall here.
fn sys_brk(new_brk: u64) -> u64 {
    with_current(|p| {
        if new_brk == 0 {
            return p.heap_end;
        }
        let ceiling = p.mmap_next.saturating_sub(MMAP_HEAP_GUARD);
        if new_brk < p.heap_base || new_brk > ceiling {
            return p.heap_end;
        }
        p.heap_end = new_brk;
        p.heap_end
    })
}

/// Only anonymous private mappings are supported (§4.17): `addr` must be
/// 0 (the kernel picks the address), `fd` must be -1, and `flags` must be
/// exactly `MAP_PRIVATE | MAP_ANONYMOUS`.
const MAP_PRIVATE: u32 = 0x02;
const MAP_ANONYMOUS: u32 = 0x20;

fn sys_mmap(addr: u64, len: u64, _prot: u32, flags: u32, fd: i64) -> SysResult {
    if len == 0 {
        return Err(Errno::Inval);
    }
    if addr != 0 {
        return Err(Errno::NoSys);
    }
    if fd != -1 {
        return Err(Errno::NoSys);
    }
    if flags & (MAP_PRIVATE | MAP_ANONYMOUS) != MAP_PRIVATE | MAP_ANONYMOUS {
        return Err(Errno::Inval);
    }
    if flags & !(MAP_PRIVATE | MAP_ANONYMOUS) != 0 {
        return Err(Errno::Inval);
    }
    let len = align_up_u64(len, PAGE_SIZE as u64);
    with_current(|p| {
        let candidate = p.mmap_next.checked_sub(len).ok_or(Errno::NoMem)?;
        if candidate < p.heap_end + MMAP_HEAP_GUARD || candidate < USER_REGION_BASE {
            return Err(Errno::NoMem);
        }
        let slot = p.vmas.iter().position(|v| !v.used).ok_or(Errno::NoMem)?;
        p.vmas[slot] = Vma { used: true, base: candidate, len };
        p.mmap_next = candidate;
        Ok(candidate)
    })
}

fn recompute_mmap_next(p: &mut Proc) {
    let mut next = USER_REGION_BASE + USER_REGION_SIZE;
    for v in p.vmas.iter().filter(|v| v.used) {
        next = next.min(v.base);
    }
    p.mmap_next = next;
}

fn sys_munmap(addr: u64, len: u64) -> SysResult {
    if addr == 0 || len == 0 || addr % PAGE_SIZE as u64 != 0 {
        return Err(Errno::Inval);
    }
    let len = align_up_u64(len, PAGE_SIZE as u64);
    with_current(|p| {
        let slot = p
            .vmas
            .iter()
            .position(|v| v.used && v.base == addr && v.len == len)
            .ok_or(Errno::Inval)?;
        p.vmas[slot].used = false;
        recompute_mmap_next(p);
        Ok(0)
    })
}

// ---------------------------------------------------------------------
// Process lifecycle: execve, clone, wait4, exit, kill
// ---------------------------------------------------------------------

struct StackWriter {
    va: u64,
    pa: usize,
}

impl StackWriter {
    fn push_bytes(&mut self, data: &[u8]) -> u64 {
        self.va -= data.len() as u64;
        self.pa -= data.len();
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), self.pa as *mut u8, data.len()) };
        self.va
    }

    fn push_cstr(&mut self, s: &str) -> u64 {
        self.push_bytes(&[0u8]);
        self.push_bytes(s.as_bytes())
    }

    fn push_u64(&mut self, v: u64) {
        self.push_bytes(&v.to_ne_bytes());
    }

    fn align_down(&mut self, align: u64, user_pa_base: usize) {
        self.va = align_down_u64(self.va, align);
        self.pa = user_pa_base + (self.va - USER_REGION_BASE) as usize;
    }
}

const AT_NULL: u64 = 0;
const AT_PHDR: u64 = 3;
const AT_PHENT: u64 = 4;
const AT_PHNUM: u64 = 5;
const AT_PAGESZ: u64 = 6;
const AT_ENTRY: u64 = 9;
const AT_UID: u64 = 11;
const AT_EUID: u64 = 12;
const AT_GID: u64 = 13;
const AT_EGID: u64 = 14;
const AT_PLATFORM: u64 = 15;
const AT_SECURE: u64 = 23;
const AT_RANDOM: u64 = 25;
const AT_EXECFN: u64 = 31;

fn read_user_str_array(arr_ptr: u64, max: usize) -> Result<alloc::vec::Vec<String>, Errno> {
    let mut out = alloc::vec::Vec::new();
    if arr_ptr == 0 {
        return Ok(out);
    }
    for i in 0..max as u64 {
        let p = read_u64_from_user(arr_ptr + i * 8)?;
        if p == 0 {
            break;
        }
        out.push(copy_cstr_from_user(p, MAX_STR)?);
    }
    Ok(out)
}

/// Build the initial user stack (argv/envp/auxv) at the top of the user
/// window and return `(sp, argc, argv_va, envp_va)`.
fn build_initial_stack(
    user_pa_base: usize,
    entry: u64,
    phdr_hint: Option<(u64, u16, u16)>,
    argv: &[String],
    envp: &[String],
    exec_path: &str,
) -> (u64, u64, u64, u64) {
    let stack_top_va = USER_REGION_BASE + USER_REGION_SIZE;
    let stack_top_pa = user_pa_base + USER_REGION_SIZE as usize;
    let mut sw = StackWriter { va: stack_top_va, pa: stack_top_pa };

    let argv_ptrs: alloc::vec::Vec<u64> = argv.iter().map(|a| sw.push_cstr(a)).collect();
    let envp_ptrs: alloc::vec::Vec<u64> = envp.iter().map(|e| sw.push_cstr(e)).collect();
    let execfn_va = sw.push_cstr(exec_path);
    let platform_va = sw.push_cstr("aarch64");

    let random: [u8; 16] = core::array::from_fn(|i| 0xA5 ^ i as u8);
    let random_va = sw.push_bytes(&random);

    sw.align_down(16, user_pa_base);

    let mut words: alloc::vec::Vec<u64> = alloc::vec::Vec::new();
    words.push(argv.len() as u64);
    words.extend(argv_ptrs.iter().copied());
    words.push(0);
    words.extend(envp_ptrs.iter().copied());
    words.push(0);

    let mut auxv: alloc::vec::Vec<(u64, u64)> = alloc::vec![
        (AT_SECURE, 0),
        (AT_RANDOM, random_va),
        (AT_PLATFORM, platform_va),
        (AT_EXECFN, execfn_va),
        (AT_PAGESZ, PAGE_SIZE as u64),
        (AT_ENTRY, entry),
        (AT_UID, 0),
        (AT_EUID, 0),
        (AT_GID, 0),
        (AT_EGID, 0),
    ];
    if let Some((at_phdr, phentsize, phnum)) = phdr_hint {
        auxv.push((AT_PHDR, at_phdr));
        auxv.push((AT_PHENT, phentsize as u64));
        auxv.push((AT_PHNUM, phnum as u64));
    }
    for (t, v) in auxv {
        words.push(t);
        words.push(v);
    }
    words.push(AT_NULL);
    words.push(0);

    for &w in words.iter().rev() {
        sw.push_u64(w);
    }
    sw.align_down(16, user_pa_base);

    let argc = argv.len() as u64;
    let argv_va = sw.va + 8;
    let envp_va = argv_va + (argc + 1) * 8;
    (sw.va, argc, argv_va, envp_va)
}

fn load_image_bytes(abs_path: &str) -> Result<alloc::vec::Vec<u8>, Errno> {
    if let Some(file_id) = vfs::ramfile_find_abs(abs_path) {
        let (size, _) = vfs::ramfile_get(file_id).ok_or(Errno::NoEnt)?;
        let mut buf = alloc::vec![0u8; size as usize];
        vfs::ramfile_read(file_id, 0, &mut buf);
        return Ok(buf);
    }
    let norm = crate::vfs::path::strip_leading_slash(abs_path);
    let found = crate::vfs::initramfs::lookup(norm).ok_or(Errno::NoEnt)?;
    if is_dir(found.mode) {
        return Err(Errno::IsDir);
    }
    Ok(alloc::vec::Vec::from(found.data))
}

fn sys_execve(frame: *mut UserTrapFrame, path_user: u64, argv_user: u64, envp_user: u64) -> u64 {
    match execve_inner(frame, path_user, argv_user, envp_user) {
        Ok(()) => unsafe { (*frame).x0 },
        Err(e) => e.as_neg(),
    }
}

fn execve_inner(frame: *mut UserTrapFrame, path_user: u64, argv_user: u64, envp_user: u64) -> Result<(), Errno> {
    let path = copy_cstr_from_user(path_user, MAX_STR)?;
    let argv = read_user_str_array(argv_user, MAX_ARGS)?;
    let envp = read_user_str_array(envp_user, MAX_ENVP)?;

    let (cwd, user_pa_base) = {
        let t = PROCS.lock();
        (t.procs[t.cur].cwd.clone(), t.procs[t.cur].user_pa_base)
    };
    let abs = crate::process::resolve_path(&cwd, &path);
    let image = load_image_bytes(&abs)?;

    let loaded = crate::elf_loader::load_etexec(&image, USER_REGION_BASE, USER_REGION_SIZE, user_pa_base)
        .map_err(|_| Errno::NoExec)?;

    crate::cache::cache_sync_icache_for_range(user_pa_base, USER_REGION_SIZE as usize);
    crate::cache::cache_clean_invalidate_all();

    let (sp, argc, argv_va, envp_va) =
        build_initial_stack(user_pa_base, loaded.entry, loaded.phdr_hint, &argv, &envp, &abs);

    with_current(|p| {
        p.heap_base = align_up_u64(loaded.max_va, PAGE_SIZE as u64);
        p.heap_end = p.heap_base;
        p.mmap_next = USER_REGION_BASE + USER_REGION_SIZE;
        p.vmas = [Vma { used: false, base: 0, len: 0 }; { crate::config::MAX_VMAS }];
    });

    unsafe {
        (*frame).elr = loaded.entry;
        (*frame).sp_el0 = sp;
        (*frame).x0 = argc;
        (*frame).x1 = argv_va;
        (*frame).x2 = envp_va;
    }
    Ok(())
}

fn sys_clone(frame: *mut UserTrapFrame, flags: u64) -> u64 {
    if flags & !0xffu64 != 0 {
        return Errno::NoSys.as_neg();
    }
    match clone_inner(frame) {
        Ok(child_pid) => child_pid,
        Err(e) => e.as_neg(),
    }
}

fn clone_inner(frame: *mut UserTrapFrame) -> Result<u64, Errno> {
    let new_pa = crate::pmm::alloc_2mib_aligned();
    if new_pa == 0 {
        return Err(Errno::NoMem);
    }
    let new_ttbr0 = crate::mmu::ttbr0_create_with_user_pa(new_pa);
    if new_ttbr0 == 0 {
        crate::pmm::free_2mib_aligned(new_pa);
        return Err(Errno::NoMem);
    }

    let mut t = PROCS.lock();
    let cur = t.cur;
    let parent_pa = t.procs[cur].user_pa_base;
    let slot = match crate::process::find_free_slot(&t) {
        Some(s) => s,
        None => {
            drop(t);
            crate::pmm::free_2mib_aligned(new_pa);
            return Err(Errno::NoMem);
        }
    };

    unsafe {
        core::ptr::copy_nonoverlapping(parent_pa as *const u8, new_pa as *mut u8, USER_REGION_SIZE as usize);
    }

    let pid = t.next_pid;
    t.next_pid += 1;
    let parent_pid = t.procs[cur].pid;

    crate::process::clear(&mut t.procs[slot]);
    t.procs[slot].pid = pid;
    t.procs[slot].ppid = parent_pid;
    t.procs[slot].state = State::Runnable;
    t.procs[slot].ttbr0_pa = new_ttbr0;
    t.procs[slot].user_pa_base = new_pa;
    t.procs[slot].heap_base = t.procs[cur].heap_base;
    t.procs[slot].heap_end = t.procs[cur].heap_end;
    t.procs[slot].stack_low = t.procs[cur].stack_low;
    t.procs[slot].cwd = t.procs[cur].cwd.clone();
    t.procs[slot].mmap_next = t.procs[cur].mmap_next;
    t.procs[slot].vmas = t.procs[cur].vmas;

    unsafe { tf_copy(&mut t.procs[slot].tf, &*frame) };
    t.procs[slot].tf.x0 = 0;

    for i in 0..MAX_FDS {
        if let Some(d) = t.procs[cur].fd_to_desc[i] {
            crate::fd::incref(d);
            t.procs[slot].fd_to_desc[i] = Some(d);
        }
    }

    Ok(pid)
}

fn sys_wait4(frame: *mut UserTrapFrame, pid: i64, status_user: u64, options: u64) -> u64 {
    let (cur_pid, has_children) = {
        let t = PROCS.lock();
        let cur_pid = t.procs[t.cur].pid;
        let has = (0..N_PROC).any(|i| t.procs[i].state != State::Unused && t.procs[i].ppid == cur_pid);
        (cur_pid, has)
    };
    if !has_children {
        return Errno::Child.as_neg();
    }

    let found = {
        let t = PROCS.lock();
        (0..N_PROC).find(|&i| {
            t.procs[i].state == State::Zombie
                && t.procs[i].ppid == cur_pid
                && (pid <= 0 || t.procs[i].pid as i64 == pid)
        })
    };

    if let Some(idx) = found {
        let (child_pid, wstatus) = {
            let t = PROCS.lock();
            (t.procs[idx].pid, t.procs[idx].exit_code)
        };
        if status_user != 0 {
            let _ = write_bytes_to_user(status_user, &(wstatus as u32).to_ne_bytes());
        }
        let mut t = PROCS.lock();
        if crate::process::owns_private_user_pages(&t.procs[idx]) {
            crate::pmm::free_2mib_aligned(t.procs[idx].user_pa_base);
        }
        crate::process::clear(&mut t.procs[idx]);
        return child_pid;
    }

    if options & WNOHANG != 0 {
        return 0;
    }

    {
        let mut t = PROCS.lock();
        let cur = t.cur;
        t.procs[cur].state = State::Waiting;
        t.procs[cur].wait_target_pid = pid;
        t.procs[cur].wait_status_user = status_user;
        unsafe { tf_copy(&mut t.procs[cur].tf, &*frame) };
    }

    match crate::sched::maybe_switch() {
        Some(new_idx) => {
            let t = PROCS.lock();
            unsafe { tf_copy(&mut *frame, &t.procs[new_idx].tf) };
            unsafe { (*frame).x0 }
        }
        None => crate::power::halt(),
    }
}

/// If `dead`'s parent is blocked in `wait4` on it, write the wait status
/// into the parent's own memory, wake it, and reap `dead` right there. The
/// write requires briefly switching to the parent's address space, since
/// `wait_status_user` is a pointer only valid under the parent's TTBR0.
fn wake_waiting_parent_and_reap(dead_idx: usize) {
    let (dead_pid, dead_ppid, wstatus) = {
        let t = PROCS.lock();
        (t.procs[dead_idx].pid, t.procs[dead_idx].ppid, t.procs[dead_idx].exit_code)
    };
    let parent_idx = {
        let t = PROCS.lock();
        (0..N_PROC).find(|&i| {
            t.procs[i].pid == dead_ppid
                && t.procs[i].state == State::Waiting
                && (t.procs[i].wait_target_pid <= 0 || t.procs[i].wait_target_pid as u64 == dead_pid)
        })
    };
    let Some(pidx) = parent_idx else { return };

    let (parent_ttbr0, status_user) = {
        let t = PROCS.lock();
        (t.procs[pidx].ttbr0_pa, t.procs[pidx].wait_status_user)
    };
    crate::mmu::ttbr0_write(parent_ttbr0);
    if status_user != 0 {
        let _ = write_bytes_to_user(status_user, &(wstatus as u32).to_ne_bytes());
    }

    let mut t = PROCS.lock();
    t.procs[pidx].state = State::Runnable;
    if crate::process::owns_private_user_pages(&t.procs[dead_idx]) {
        crate::pmm::free_2mib_aligned(t.procs[dead_idx].user_pa_base);
    }
    crate::process::clear(&mut t.procs[dead_idx]);
}

fn exit_with_code(frame: *mut UserTrapFrame, wstatus: u64) -> u64 {
    let is_init = with_current(|p| p.pid == 1);
    if is_init {
        crate::power::power_off();
    }

    let dead_idx = {
        let mut t = PROCS.lock();
        let cur = t.cur;
        t.procs[cur].exit_code = wstatus;
        t.procs[cur].state = State::Zombie;
        crate::process::close_all_fds(&mut t.procs[cur]);
        let clear_tid = t.procs[cur].clear_child_tid_user;
        drop(t);
        if clear_tid != 0 {
            let _ = crate::user::write_u64_to_user(clear_tid, 0);
        }
        cur
    };

    wake_waiting_parent_and_reap(dead_idx);

    match crate::sched::maybe_switch() {
        Some(new_idx) => {
            let t = PROCS.lock();
            unsafe { tf_copy(&mut *frame, &t.procs[new_idx].tf) };
            unsafe { (*frame).x0 }
        }
        None => crate::power::halt(),
    }
}

fn sys_exit(frame: *mut UserTrapFrame, code: i32) -> u64 {
    exit_with_code(frame, ((code as u64) & 0xff) << 8)
}

fn sys_kill(frame: *mut UserTrapFrame, pid: i64, sig: u32) -> u64 {
    if pid <= 0 {
        return Errno::Inval.as_neg();
    }
    if sig != 0 && sig != 9 && sig != 15 {
        return Errno::NoSys.as_neg();
    }

    let (target_idx, is_zombie, is_self) = {
        let t = PROCS.lock();
        match crate::process::find_idx_by_pid(&t, pid as u64) {
            Some(idx) => (Some(idx), t.procs[idx].state == State::Zombie, idx == t.cur),
            None => (None, false, false),
        }
    };
    let Some(target_idx) = target_idx else {
        return Errno::Srch.as_neg();
    };
    if is_zombie {
        return 0;
    }
    if sig == 0 {
        return 0;
    }

    if is_self {
        return exit_with_code(frame, (sig as u64) << 8 | 0x7f);
    }

    let my_ttbr0 = with_current(|p| p.ttbr0_pa);
    {
        let mut t = PROCS.lock();
        t.procs[target_idx].exit_code = (sig as u64) << 8 | 0x7f;
        t.procs[target_idx].state = State::Zombie;
        crate::process::close_all_fds(&mut t.procs[target_idx]);
    }
    wake_waiting_parent_and_reap(target_idx);
    crate::mmu::ttbr0_write(my_ttbr0);
    0
}

fn sys_nanosleep(frame: *mut UserTrapFrame, req_user: u64, rem_user: u64) -> u64 {
    let tv_sec = match read_u64_from_user(req_user) {
        Ok(v) => v,
        Err(e) => return e.as_neg(),
    };
    let tv_nsec = match read_u64_from_user(req_user + 8) {
        Ok(v) => v,
        Err(e) => return e.as_neg(),
    };
    if tv_nsec >= 1_000_000_000 {
        return Errno::Inval.as_neg();
    }
    if rem_user != 0 {
        let _ = write_bytes_to_user(rem_user, &[0u8; 16]);
    }

    let deadline = crate::timer::now_ns() + tv_sec * 1_000_000_000 + tv_nsec;
    {
        let mut t = PROCS.lock();
        let cur = t.cur;
        t.procs[cur].state = State::Sleeping;
        t.procs[cur].sleep_deadline_ns = deadline;
        unsafe { tf_copy(&mut t.procs[cur].tf, &*frame) };
    }

    match crate::sched::maybe_switch() {
        Some(new_idx) => {
            let t = PROCS.lock();
            unsafe { tf_copy(&mut *frame, &t.procs[new_idx].tf) };
            unsafe { (*frame).x0 }
        }
        None => crate::power::halt(),
    }
}
