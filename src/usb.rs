//! USB host contract (§6 External Interfaces — consumed contracts)
//!
//! This kernel never drives real USB hardware: there is no DWC2 host
//! controller driver here. The shape below is what a polled host stack
//! (enumeration, HID keyboard, USB-Ethernet) would plug into — keyboard
//! bytes feeding `console`, Ethernet frames feeding `net` — kept narrow on
//! purpose since no backend registers against it today.

pub struct UsbDeviceId(pub u8);

/// Bring up the USB host controller and enumerate attached devices. No
/// controller backend exists, so this is permanently a no-op.
pub fn init() {}

/// Poll attached devices for new input/traffic. Called opportunistically
/// from the idle loop; always a no-op today.
pub fn poll() {}

/// A HID keyboard backend would push scancodes translated to bytes here.
pub fn hid_keyboard_byte(_dev: &UsbDeviceId, _byte: u8) {}

/// A USB-Ethernet backend would hand received frames to the netif layer
/// through this, mirroring `net::netif_rx_frame`.
pub fn net_rx_frame(_dev: &UsbDeviceId, _frame: &[u8]) {}
