//! ELF64 loader
//!
//! Loads a single `ET_EXEC` AArch64 image into a process's fixed 2 MiB user
//! window. Uses the `elf` crate for header/program-header parsing; the
//! placement and validation logic (range checks against the user window,
//! BSS zero-fill, entry/min/max VA tracking) follows §4.5.

use elf::abi::{EM_AARCH64, ELFCLASS64, ELFDATA2LSB, ET_EXEC, PT_LOAD};
use elf::endian::LittleEndian;
use elf::ElfBytes;

#[derive(Debug)]
pub enum ElfError {
    BadMagic,
    WrongClass,
    WrongEndian,
    NotExecutable,
    WrongMachine,
    BadPhdrTable,
    SegmentOutOfFile,
    SegmentOutOfUserRange,
    MemszLessThanFilesz,
}

pub struct Loaded {
    pub entry: u64,
    pub min_va: u64,
    pub max_va: u64,
    /// Physical address backing the `PT_PHDR` program header table, if one
    /// was found (used to derive `AT_PHDR` in execve).
    pub phdr_hint: Option<(u64, u16, u16)>, // (AT_PHDR, e_phentsize, e_phnum)
}

fn range_ok(va: u64, len: u64, user_va_base: u64, user_size: u64) -> bool {
    if len == 0 {
        return true;
    }
    let end = match va.checked_add(len) {
        Some(e) => e,
        None => return false,
    };
    va >= user_va_base && end <= user_va_base + user_size
}

/// Load `image` (an ET_EXEC AArch64 ELF) into the 2 MiB window
/// `[user_va_base, user_va_base+user_size)`, backed physically at
/// `user_pa_base`. Copies file bytes and zero-fills BSS tails. Returns the
/// entry point and the `[min_va, max_va)` spanned by loaded segments.
pub fn load_etexec(
    image: &[u8],
    user_va_base: u64,
    user_size: u64,
    user_pa_base: usize,
) -> Result<Loaded, ElfError> {
    if image.len() < 64 || &image[0..4] != b"\x7fELF" {
        return Err(ElfError::BadMagic);
    }
    if image[4] != ELFCLASS64 {
        return Err(ElfError::WrongClass);
    }
    if image[5] != ELFDATA2LSB {
        return Err(ElfError::WrongEndian);
    }

    let elf = ElfBytes::<LittleEndian>::minimal_parse(image).map_err(|_| ElfError::BadMagic)?;
    if elf.ehdr.e_type != ET_EXEC {
        return Err(ElfError::NotExecutable);
    }
    if elf.ehdr.e_machine != EM_AARCH64 {
        return Err(ElfError::WrongMachine);
    }

    let segments = elf.segments().ok_or(ElfError::BadPhdrTable)?;

    let mut min_va = u64::MAX;
    let mut max_va = 0u64;
    let mut phdr_hint = None;

    for phdr in segments.iter() {
        if phdr.p_type == elf::abi::PT_PHDR {
            let at_phdr = phdr.p_vaddr;
            if range_ok(at_phdr, 0, user_va_base, user_size) {
                phdr_hint = Some((at_phdr, elf.ehdr.e_phentsize as u16, elf.ehdr.e_phnum as u16));
            }
        }
    }

    for phdr in segments.iter() {
        if phdr.p_type != PT_LOAD || phdr.p_memsz == 0 {
            continue;
        }
        if phdr.p_memsz < phdr.p_filesz {
            return Err(ElfError::MemszLessThanFilesz);
        }
        let file_end = phdr.p_offset.checked_add(phdr.p_filesz).ok_or(ElfError::SegmentOutOfFile)?;
        if file_end > image.len() as u64 {
            return Err(ElfError::SegmentOutOfFile);
        }
        if !range_ok(phdr.p_vaddr, phdr.p_memsz, user_va_base, user_size) {
            return Err(ElfError::SegmentOutOfUserRange);
        }

        let dst_off = (phdr.p_vaddr - user_va_base) as usize;
        let dst = user_pa_base + dst_off;
        unsafe {
            let src = image.as_ptr().add(phdr.p_offset as usize);
            core::ptr::copy_nonoverlapping(src, dst as *mut u8, phdr.p_filesz as usize);
            let bss_len = (phdr.p_memsz - phdr.p_filesz) as usize;
            if bss_len > 0 {
                core::ptr::write_bytes((dst + phdr.p_filesz as usize) as *mut u8, 0, bss_len);
            }
        }

        min_va = min_va.min(phdr.p_vaddr);
        max_va = max_va.max(phdr.p_vaddr + phdr.p_memsz);

        if phdr_hint.is_none() && phdr.p_offset == 0 {
            let phoff = elf.ehdr.e_phoff;
            if phoff < phdr.p_filesz {
                let at_phdr = phdr.p_vaddr + phoff;
                if range_ok(at_phdr, 0, user_va_base, user_size) {
                    phdr_hint =
                        Some((at_phdr, elf.ehdr.e_phentsize as u16, elf.ehdr.e_phnum as u16));
                }
            }
        }
    }

    if min_va == u64::MAX {
        min_va = user_va_base;
        max_va = user_va_base;
    }

    Ok(Loaded {
        entry: elf.ehdr.e_entry,
        min_va,
        max_va,
        phdr_hint,
    })
}
