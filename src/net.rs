//! Network stack contract (§6 External Interfaces — consumed contracts)
//!
//! This kernel's syscall surface exposes `Udp6`/`Tcp6` file-description
//! kinds but does not drive a real network device; every socket syscall
//! that reaches this module returns `ENOSYS` until a netif is registered.
//! The interface below is the shape a future virtio-net/smoltcp backend
//! would plug into, kept narrow on purpose.

use crate::linux_abi::Errno;

pub struct NetifId(pub u32);

/// Register a network interface backend. No backend ever calls this today.
pub fn netif_register(_name: &str) -> Option<NetifId> {
    None
}

pub fn netif_rx_frame(_id: &NetifId, _frame: &[u8]) {}

pub fn netif_tx_frame(_id: &NetifId, _frame: &[u8]) -> Result<(), Errno> {
    Err(Errno::NetUnreach)
}

pub fn udp6_socket() -> Result<(), Errno> {
    Err(Errno::AfNoSupport)
}

pub fn tcp6_socket() -> Result<(), Errno> {
    Err(Errno::AfNoSupport)
}
