//! CPIO "newc" archive reader
//!
//! Parses the newc ASCII-hex header format used by the embedded initramfs
//! blob (§4.4). Every header is 110 bytes starting with the magic
//! `"070701"`; names are NUL-terminated and entries are padded to 4-byte
//! alignment. The archive ends at the `TRAILER!!!` sentinel entry.

const MAGIC: &[u8; 6] = b"070701";
const HEADER_LEN: usize = 110;

#[derive(Debug)]
pub enum CpioError {
    Truncated,
    BadMagic,
    BadName,
}

pub struct CpioEntry<'a> {
    pub name: &'a str,
    pub mode: u32,
    pub filesize: u32,
    pub data: &'a [u8],
}

fn hex8_to_u32(bytes: &[u8]) -> Result<u32, CpioError> {
    if bytes.len() != 8 {
        return Err(CpioError::Truncated);
    }
    let s = core::str::from_utf8(bytes).map_err(|_| CpioError::BadMagic)?;
    u32::from_str_radix(s, 16).map_err(|_| CpioError::BadMagic)
}

const fn pad4(n: usize) -> usize {
    (4 - (n & 3)) & 3
}

/// Parse one entry starting at `off` in `blob`. Returns the entry plus the
/// offset of the next header.
fn read_one(blob: &[u8], off: usize) -> Result<(CpioEntry<'_>, usize), CpioError> {
    if off + HEADER_LEN > blob.len() {
        return Err(CpioError::Truncated);
    }
    let hdr = &blob[off..off + HEADER_LEN];
    if &hdr[0..6] != MAGIC {
        return Err(CpioError::BadMagic);
    }

    let mode = hex8_to_u32(&hdr[14..22])?;
    let filesize = hex8_to_u32(&hdr[54..62])?;
    let namesize = hex8_to_u32(&hdr[94..102])? as usize;

    if namesize == 0 {
        return Err(CpioError::BadName);
    }

    let name_start = off + HEADER_LEN;
    let name_end = name_start + namesize;
    if name_end > blob.len() {
        return Err(CpioError::Truncated);
    }
    let name_bytes = &blob[name_start..name_end];
    if name_bytes[namesize - 1] != 0 {
        return Err(CpioError::BadName);
    }
    let name = core::str::from_utf8(&name_bytes[..namesize - 1]).map_err(|_| CpioError::BadName)?;

    let data_start = name_end + pad4(name_end);
    let data_end = data_start + filesize as usize;
    if data_end > blob.len() {
        return Err(CpioError::Truncated);
    }
    let data = &blob[data_start..data_end];

    let next = data_end + pad4(data_end);
    Ok((
        CpioEntry {
            name,
            mode,
            filesize,
            data,
        },
        next,
    ))
}

/// Call `cb` for every entry in the archive until `TRAILER!!!` or an
/// unparseable header is reached.
pub fn foreach<'a>(blob: &'a [u8], mut cb: impl FnMut(&CpioEntry<'a>)) {
    let mut off = 0usize;
    while off < blob.len() {
        let (entry, next) = match read_one(blob, off) {
            Ok(v) => v,
            Err(_) => break,
        };
        if entry.name == "TRAILER!!!" {
            break;
        }
        cb(&entry);
        off = next;
    }
}

/// Find a single entry by exact name (leading slashes are the caller's
/// concern; names inside the archive have none).
pub fn find<'a>(blob: &'a [u8], name: &str) -> Option<CpioEntry<'a>> {
    let mut found: Option<(u32, u32, (usize, usize))> = None;
    let mut off = 0usize;
    while off < blob.len() {
        let (entry, next) = match read_one(blob, off) {
            Ok(v) => v,
            Err(_) => break,
        };
        if entry.name == "TRAILER!!!" {
            break;
        }
        if entry.name == name {
            let data_off = entry.data.as_ptr() as usize - blob.as_ptr() as usize;
            found = Some((entry.mode, entry.filesize, (data_off, data_off + entry.data.len())));
            break;
        }
        off = next;
    }
    found.map(|(mode, filesize, (ds, de))| CpioEntry {
        name,
        mode,
        filesize,
        data: &blob[ds..de],
    })
}
