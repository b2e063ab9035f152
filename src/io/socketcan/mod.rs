// src/io/socketcan/mod.rs
//
// SocketCAN driver for Linux native CAN interfaces.
// Used with CANable Pro (Candlelight firmware) or native CAN hardware.
//
// Requires the interface to be configured first:
//   sudo ip link set can0 up type can bitrate 500000
// or a `bitrate` in the settings, which reconfigures it via pkexec.
//
// This module is only fully functional on Linux.

#[cfg(target_os = "linux")]
pub mod codec;
mod reader;

pub use reader::{configure_interface, SocketCanBus};
