//! Overlay VFS (§4.8)
//!
//! Composes a fixed-size writable "ramdir"/"ramfile" layer on top of the
//! read-only initramfs. Lookup order for any absolute, normalized path is:
//! root special-case, then the overlay tables, then the initramfs. Listing
//! a directory unions both layers, de-duplicating by name with the overlay
//! taking priority.

pub mod initramfs;
pub mod path;

use alloc::string::String;
use alloc::vec::Vec;
use spinning_top::Spinlock;

use crate::config::MAX_RAMDIRS;
use crate::linux_abi::{is_dir, Errno, S_IFDIR, S_IFREG};

#[derive(Clone)]
struct RamDir {
    used: bool,
    path: String, // absolute, normalized, no trailing slash (except never root)
}

#[derive(Clone)]
pub struct RamFile {
    used: bool,
    pub path: String,
    pub data: Vec<u8>,
}

impl RamDir {
    const fn empty() -> Self {
        RamDir {
            used: false,
            path: String::new(),
        }
    }
}

impl RamFile {
    const fn empty() -> Self {
        RamFile {
            used: false,
            path: String::new(),
            data: Vec::new(),
        }
    }
}

struct Overlay {
    dirs: Vec<RamDir>,
    files: Vec<RamFile>,
}

static OVERLAY: Spinlock<Option<Overlay>> = Spinlock::new(None);

pub fn init() {
    let mut o = OVERLAY.lock();
    *o = Some(Overlay {
        dirs: alloc::vec![RamDir::empty(); MAX_RAMDIRS],
        files: Vec::new(),
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    Reg,
}

pub struct LookupResult {
    pub kind: EntryKind,
    pub mode: u32,
    /// Ramfile table index, when the entry is a writable regular file.
    pub ramfile_id: Option<usize>,
    pub size: u64,
}

fn overlay_dir_exists(o: &Overlay, p: &str) -> bool {
    p == "/" || o.dirs.iter().any(|d| d.used && d.path == p)
}

fn overlay_file_index(o: &Overlay, p: &str) -> Option<usize> {
    o.files.iter().position(|f| f.used && f.path == p)
}

/// Look up an absolute, normalized path. Root always resolves as a
/// directory even with an empty overlay and initramfs.
pub fn lookup_abs(abs_path: &str) -> Result<LookupResult, Errno> {
    if abs_path == "/" {
        return Ok(LookupResult {
            kind: EntryKind::Dir,
            mode: S_IFDIR | 0o755,
            ramfile_id: None,
            size: 0,
        });
    }

    let guard = OVERLAY.lock();
    let o = guard.as_ref().expect("vfs not initialized");

    if overlay_dir_exists(o, abs_path) {
        return Ok(LookupResult {
            kind: EntryKind::Dir,
            mode: S_IFDIR | 0o755,
            ramfile_id: None,
            size: 0,
        });
    }
    if let Some(idx) = overlay_file_index(o, abs_path) {
        return Ok(LookupResult {
            kind: EntryKind::Reg,
            mode: S_IFREG | 0o644,
            ramfile_id: Some(idx),
            size: o.files[idx].data.len() as u64,
        });
    }
    drop(guard);

    let norm = path::strip_leading_slash(abs_path);
    if let Some(found) = initramfs::lookup(norm) {
        let kind = if is_dir(found.mode) {
            EntryKind::Dir
        } else {
            EntryKind::Reg
        };
        return Ok(LookupResult {
            kind,
            mode: found.mode,
            ramfile_id: None,
            size: found.data.len() as u64,
        });
    }

    // An implicit directory: some initramfs entry has this path as a
    // prefix, even though no explicit directory record exists for it.
    if !initramfs::list_dir(norm).is_empty() {
        return Ok(LookupResult {
            kind: EntryKind::Dir,
            mode: S_IFDIR | 0o755,
            ramfile_id: None,
            size: 0,
        });
    }

    Err(Errno::NoEnt)
}

/// List the direct children of a directory (already verified to exist),
/// unioned across the overlay and initramfs, de-duplicated by name.
pub fn list_dir(abs_path: &str) -> Vec<(String, u32)> {
    let prefix_for_match = if abs_path == "/" {
        String::new()
    } else {
        String::from(abs_path)
    };

    let mut out: Vec<(String, u32)> = Vec::new();

    {
        let guard = OVERLAY.lock();
        let o = guard.as_ref().expect("vfs not initialized");
        for d in o.dirs.iter().filter(|d| d.used) {
            if let Some(name) = child_name(&d.path, &prefix_for_match) {
                upsert(&mut out, name, S_IFDIR | 0o755);
            }
        }
        for f in o.files.iter().filter(|f| f.used) {
            if let Some(name) = child_name(&f.path, &prefix_for_match) {
                upsert(&mut out, name, S_IFREG | 0o644);
            }
        }
    }

    let norm = path::strip_leading_slash(abs_path);
    for (name, mode) in initramfs::list_dir(norm) {
        upsert(&mut out, name, mode);
    }

    out
}

fn upsert(out: &mut Vec<(String, u32)>, name: String, mode: u32) {
    if !out.iter().any(|(n, _)| *n == name) {
        out.push((name, mode));
    }
}

fn child_name(entry_path: &str, dir_prefix: &str) -> Option<String> {
    let want = if dir_prefix.is_empty() {
        "/"
    } else {
        dir_prefix
    };
    let rest = if want == "/" {
        entry_path.strip_prefix('/')?
    } else {
        let stripped = entry_path.strip_prefix(want)?;
        stripped.strip_prefix('/')?
    };
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(String::from(rest))
}

/// Create a new overlay directory. The parent must already exist and the
/// entry must not already exist anywhere in the namespace.
pub fn ramdir_create(abs_path: &str) -> Result<(), Errno> {
    if abs_path.len() > crate::config::MAX_PATH {
        return Err(Errno::NameTooLong);
    }
    let parent = path::parent_dir(abs_path);
    if lookup_abs(&parent).is_err() {
        return Err(Errno::NoEnt);
    }
    if lookup_abs(abs_path).is_ok() {
        return Err(Errno::Exist);
    }

    let mut guard = OVERLAY.lock();
    let o = guard.as_mut().expect("vfs not initialized");
    let slot = o
        .dirs
        .iter()
        .position(|d| !d.used)
        .ok_or(Errno::NoMem)?;
    o.dirs[slot] = RamDir {
        used: true,
        path: String::from(abs_path),
    };
    Ok(())
}

/// Remove an overlay directory. It must be empty (no overlay children and
/// no initramfs entries beneath it).
pub fn ramdir_remove(abs_path: &str) -> Result<(), Errno> {
    if !list_dir(abs_path).is_empty() {
        return Err(Errno::NotEmpty);
    }
    let mut guard = OVERLAY.lock();
    let o = guard.as_mut().expect("vfs not initialized");
    match o.dirs.iter().position(|d| d.used && d.path == abs_path) {
        Some(idx) => {
            o.dirs[idx] = RamDir::empty();
            Ok(())
        }
        None => Err(Errno::NoEnt),
    }
}

/// Create a new, empty overlay regular file. Returns its ramfile index.
pub fn ramfile_create(abs_path: &str) -> Result<usize, Errno> {
    if abs_path.len() > crate::config::MAX_PATH {
        return Err(Errno::NameTooLong);
    }
    let parent = path::parent_dir(abs_path);
    if lookup_abs(&parent).is_err() {
        return Err(Errno::NoEnt);
    }

    let mut guard = OVERLAY.lock();
    let o = guard.as_mut().expect("vfs not initialized");
    if let Some(idx) = o.files.iter().position(|f| f.used && f.path == abs_path) {
        return Ok(idx);
    }
    if let Some(idx) = o.files.iter().position(|f| !f.used) {
        o.files[idx] = RamFile {
            used: true,
            path: String::from(abs_path),
            data: Vec::new(),
        };
        return Ok(idx);
    }
    o.files.push(RamFile {
        used: true,
        path: String::from(abs_path),
        data: Vec::new(),
    });
    Ok(o.files.len() - 1)
}

/// Find an existing overlay ramfile by absolute path (does not fall back
/// to the initramfs).
pub fn ramfile_find_abs(abs_path: &str) -> Option<usize> {
    let guard = OVERLAY.lock();
    let o = guard.as_ref().expect("vfs not initialized");
    overlay_file_index(o, abs_path)
}

/// Current size and write capacity (always equal; ramfiles grow on demand).
pub fn ramfile_get(file_id: usize) -> Option<(u64, u64)> {
    let guard = OVERLAY.lock();
    let o = guard.as_ref().expect("vfs not initialized");
    let f = o.files.get(file_id)?;
    if !f.used {
        return None;
    }
    Some((f.data.len() as u64, f.data.len() as u64))
}

/// Remove an overlay regular file.
pub fn ramfile_unlink(abs_path: &str) -> Result<(), Errno> {
    let mut guard = OVERLAY.lock();
    let o = guard.as_mut().expect("vfs not initialized");
    match o.files.iter().position(|f| f.used && f.path == abs_path) {
        Some(idx) => {
            o.files[idx] = RamFile::empty();
            Ok(())
        }
        None => Err(Errno::NoEnt),
    }
}

pub fn ramfile_set_size(file_id: usize, size: u64) -> Result<(), Errno> {
    let mut guard = OVERLAY.lock();
    let o = guard.as_mut().expect("vfs not initialized");
    let f = o.files.get_mut(file_id).ok_or(Errno::BadF)?;
    if !f.used {
        return Err(Errno::BadF);
    }
    f.data.resize(size as usize, 0);
    Ok(())
}

pub fn ramfile_read(file_id: usize, offset: u64, out: &mut [u8]) -> usize {
    let guard = OVERLAY.lock();
    let o = guard.as_ref().expect("vfs not initialized");
    let f = &o.files[file_id];
    let off = offset as usize;
    if off >= f.data.len() {
        return 0;
    }
    let n = out.len().min(f.data.len() - off);
    out[..n].copy_from_slice(&f.data[off..off + n]);
    n
}

pub fn ramfile_write(file_id: usize, offset: u64, data: &[u8]) -> usize {
    let mut guard = OVERLAY.lock();
    let o = guard.as_mut().expect("vfs not initialized");
    let f = &mut o.files[file_id];
    let end = offset as usize + data.len();
    if f.data.len() < end {
        f.data.resize(end, 0);
    }
    f.data[offset as usize..end].copy_from_slice(data);
    end - offset as usize
}

/// Create a hard-linked overlay file entry pointing at the same backing
/// data as `target` by copying its bytes into a fresh ramfile.
pub fn ramfile_link(target_abs: &str, link_abs: &str) -> Result<(), Errno> {
    let found = lookup_abs(target_abs)?;
    if found.kind != EntryKind::Reg {
        return Err(Errno::Inval);
    }
    if lookup_abs(link_abs).is_ok() {
        return Err(Errno::Exist);
    }
    let mut buf = alloc::vec![0u8; found.size as usize];
    match found.ramfile_id {
        Some(id) => {
            ramfile_read(id, 0, &mut buf);
        }
        None => {
            let norm = path::strip_leading_slash(target_abs);
            if let Some(f) = initramfs::lookup(norm) {
                buf.copy_from_slice(f.data);
            }
        }
    }
    let new_id = ramfile_create(link_abs)?;
    ramfile_set_size(new_id, buf.len() as u64)?;
    ramfile_write(new_id, 0, &buf);
    Ok(())
}
