// src/io/socketcan/reader.rs
//
// SocketCAN bus for Linux native CAN interfaces.
//
// Two raw sockets are opened on the interface: one is owned by the notifier
// thread for reading, the other is used for sends. Kernel loopback means
// frames we send also show up on the read socket.
//
// This module is only compiled on Linux.

#[cfg(target_os = "linux")]
mod linux_impl {
    use socketcan::{CanSocket, Socket};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    use super::super::codec;
    use crate::io::notifier::{Fanout, FrameReader, FrameResult, Notifier, Subscribe};
    use crate::io::{BusConfig, BusSender, Frame, FrameFormat, IoError, RawFrame};

    // ============================================================================
    // Interface Configuration
    // ============================================================================

    /// Configure a SocketCAN interface using pkexec for privilege escalation.
    /// This brings down the interface, sets the bitrate, and brings it back up.
    ///
    /// Returns Ok(()) on success, or an error message on failure.
    pub fn configure_interface(interface: &str, bitrate: u32) -> Result<(), String> {
        use std::process::Command;

        tlog!(
            "[socketcan] Configuring interface {} with bitrate {} using pkexec",
            interface,
            bitrate
        );

        // Single pkexec call so the user authenticates once
        let script = format!(
            "ip link set {iface} down && ip link set {iface} type can bitrate {bitrate} && ip link set {iface} up",
            iface = interface,
            bitrate = bitrate
        );

        let output = Command::new("pkexec")
            .args(["sh", "-c", &script])
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    "pkexec not found. Install polkit or configure the interface manually.".to_string()
                } else {
                    format!("Failed to run pkexec: {}", e)
                }
            })?;

        if output.status.success() {
            tlog!("[socketcan] Interface {} configured successfully", interface);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stderr.contains("dismissed") || stderr.contains("cancelled") {
            Err("Authentication cancelled by user".to_string())
        } else if stderr.contains("Not authorized") {
            Err("Not authorised to configure network interfaces".to_string())
        } else {
            let detail = if !stderr.is_empty() {
                stderr.trim().to_string()
            } else if !stdout.is_empty() {
                stdout.trim().to_string()
            } else {
                format!("Exit code: {:?}", output.status.code())
            };
            Err(format!("Failed to configure interface: {}", detail))
        }
    }

    // ============================================================================
    // Read Side
    // ============================================================================

    /// Read timeout; bounds how long the notifier takes to notice a stop request.
    const READ_TIMEOUT: Duration = Duration::from_millis(100);

    struct SocketFrameReader {
        socket: CanSocket,
        device: String,
    }

    impl SocketFrameReader {
        fn open(interface: &str, device: &str) -> Result<Self, IoError> {
            let socket =
                CanSocket::open(interface).map_err(|e| IoError::connection(device, e.to_string()))?;
            socket
                .set_read_timeout(READ_TIMEOUT)
                .map_err(|e| IoError::protocol(device, format!("set read timeout: {}", e)))?;
            Ok(Self {
                socket,
                device: device.to_string(),
            })
        }
    }

    impl FrameReader for SocketFrameReader {
        fn read_frame(&mut self) -> Result<Option<RawFrame>, IoError> {
            match self.socket.read_frame() {
                Ok(frame) => Ok(codec::decode(frame)),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
                Err(e) => Err(IoError::connection(&self.device, format!("Read error: {}", e))),
            }
        }
    }

    // ============================================================================
    // Bus
    // ============================================================================

    pub struct SocketCanBus {
        interface: String,
        device: String,
        format: FrameFormat,
        tx_socket: Mutex<CanSocket>,
        notifier: Mutex<Option<Notifier>>,
        fanout: Arc<Fanout>,
    }

    impl SocketCanBus {
        /// Open the interface, configuring its bitrate first when one is given.
        pub fn open(config: &BusConfig) -> Result<Arc<Self>, IoError> {
            let device = format!("socketcan({})", config.interface);

            if let Some(bitrate) = config.bitrate {
                configure_interface(&config.interface, bitrate)
                    .map_err(|e| IoError::connection(&device, e))?;
            }

            let tx_socket = CanSocket::open(&config.interface)
                .map_err(|e| IoError::connection(&device, e.to_string()))?;

            let bus = Arc::new(Self {
                interface: config.interface.clone(),
                fanout: Arc::new(Fanout::new(&device, config.capacity)),
                device,
                format: config.format,
                tx_socket: Mutex::new(tx_socket),
                notifier: Mutex::new(None),
            });
            bus.start_notifier()?;

            tlog!("[socketcan] Connected to {} ({:?} ids)", bus.interface, bus.format);
            Ok(bus)
        }

        pub fn device(&self) -> &str {
            &self.device
        }

        /// (Re)start the reader thread unless a healthy one is running.
        fn start_notifier(&self) -> Result<(), IoError> {
            let mut slot = self
                .notifier
                .lock()
                .map_err(|_| IoError::protocol(&self.device, "notifier lock poisoned"))?;
            Notifier::ensure_running(&mut slot, &self.fanout, || {
                SocketFrameReader::open(&self.interface, &self.device)
            })?;
            Ok(())
        }
    }

    impl Subscribe for SocketCanBus {
        fn subscribe(&self) -> Result<mpsc::Receiver<FrameResult>, IoError> {
            if self.fanout.is_closed() {
                tlog!("[socketcan] Reconnecting {}", self.interface);
            }
            self.start_notifier()?;
            Ok(self.fanout.register())
        }

        fn dropped(&self) -> u64 {
            self.fanout.dropped()
        }
    }

    impl BusSender for SocketCanBus {
        fn send(&self, frame: &Frame) -> Result<(), IoError> {
            let encoded = codec::encode(frame, self.format, &self.device)?;
            let socket = self
                .tx_socket
                .lock()
                .map_err(|_| IoError::transmit(&self.device, "socket lock poisoned"))?;
            socket
                .write_frame(&encoded)
                .map_err(|e| IoError::transmit(&self.device, format!("Write error: {}", e)))
        }

        fn device(&self) -> &str {
            &self.device
        }
    }
}

// Re-export for Linux
#[cfg(target_os = "linux")]
pub use linux_impl::{configure_interface, SocketCanBus};

// ============================================================================
// Non-Linux Stub
// ============================================================================

#[cfg(not(target_os = "linux"))]
mod stub {
    use std::sync::Arc;
    use tokio::sync::mpsc;

    use crate::io::notifier::{FrameResult, Subscribe};
    use crate::io::{BusConfig, BusSender, Frame, IoError};

    const UNSUPPORTED: &str = "SocketCAN is only available on Linux";

    /// Stub configure_interface for non-Linux
    pub fn configure_interface(_interface: &str, _bitrate: u32) -> Result<(), String> {
        Err(UNSUPPORTED.to_string())
    }

    /// SocketCAN bus (stub for non-Linux, cannot be opened)
    pub struct SocketCanBus {
        device: String,
    }

    impl SocketCanBus {
        pub fn open(config: &BusConfig) -> Result<Arc<Self>, IoError> {
            Err(IoError::connection(
                &format!("socketcan({})", config.interface),
                UNSUPPORTED,
            ))
        }

        pub fn device(&self) -> &str {
            &self.device
        }
    }

    impl Subscribe for SocketCanBus {
        fn subscribe(&self) -> Result<mpsc::Receiver<FrameResult>, IoError> {
            Err(IoError::connection(&self.device, UNSUPPORTED))
        }

        fn dropped(&self) -> u64 {
            0
        }
    }

    impl BusSender for SocketCanBus {
        fn send(&self, _frame: &Frame) -> Result<(), IoError> {
            Err(IoError::transmit(&self.device, UNSUPPORTED))
        }

        fn device(&self) -> &str {
            &self.device
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use stub::{configure_interface, SocketCanBus};
