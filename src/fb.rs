//! Framebuffer text console contract (§6 External Interfaces — consumed
//! contracts)
//!
//! A real backend would negotiate a framebuffer with the VideoCore mailbox
//! on real hardware, or nothing at all under QEMU `virt`, then render text
//! as a second console mirrored alongside the UART. No such backend exists
//! here; `init` always fails so callers fall back to UART-only console
//! output, which is the only console this kernel actually has.

pub struct FbInfo {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub bpp: u32,
}

/// Negotiate a framebuffer of at least `(req_w, req_h)`. Always fails: no
/// mailbox/VideoCore backend is implemented.
pub fn init(_req_w: u32, _req_h: u32, _req_bpp: u32) -> Option<FbInfo> {
    None
}

/// Write text to the framebuffer console, if one was negotiated. No-op
/// since `init` never succeeds.
pub fn write(_s: &str) {}
