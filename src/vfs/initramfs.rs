//! Read-only initramfs backed by an embedded CPIO "newc" blob (§4.4, §4.8).

use alloc::string::String;
use alloc::vec::Vec;
use spinning_top::Spinlock;

use crate::cpio;
use crate::linux_abi::S_IFREG;

struct State {
    blob: &'static [u8],
}

static STATE: Spinlock<State> = Spinlock::new(State { blob: &[] });

pub fn init(blob: &'static [u8]) {
    STATE.lock().blob = blob;
}

pub struct Found {
    pub mode: u32,
    pub data: &'static [u8],
}

/// Look up `norm_path` (no leading slash) in the archive.
pub fn lookup(norm_path: &str) -> Option<Found> {
    let blob = STATE.lock().blob;
    cpio::find(blob, norm_path).map(|e| Found {
        mode: if e.mode & crate::linux_abi::S_IFMT == 0 {
            e.mode | S_IFREG
        } else {
            e.mode
        },
        data: e.data,
    })
}

/// Direct children of `prefix` (no leading slash, no trailing slash;
/// empty string means root) that exist in the archive.
pub fn list_dir(prefix: &str) -> Vec<(String, u32)> {
    let blob = STATE.lock().blob;
    let mut out = Vec::new();
    let want_prefix = if prefix.is_empty() {
        String::new()
    } else {
        alloc::format!("{prefix}/")
    };
    cpio::foreach(blob, |entry| {
        let name = entry.name;
        let rest = if want_prefix.is_empty() {
            name
        } else if let Some(r) = name.strip_prefix(want_prefix.as_str()) {
            r
        } else {
            return;
        };
        if rest.is_empty() {
            return;
        }
        let child = match rest.find('/') {
            Some(i) => &rest[..i],
            None => rest,
        };
        if !out.iter().any(|(n, _): &(String, u32)| n == child) {
            let is_dir = rest.len() > child.len();
            let mode = if is_dir {
                crate::linux_abi::S_IFDIR | 0o755
            } else {
                entry.mode
            };
            out.push((String::from(child), mode));
        }
    });
    out
}
