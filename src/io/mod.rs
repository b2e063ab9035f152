// src/io/mod.rs
//
// Bus abstraction for the monitor.
// A driver exposes an async "next frame" primitive (`BusSource`) and a
// synchronous "send frame" primitive (`BusSender`). Real-time drivers pump
// frames through the notifier fan-out so the ingestion worker only ever sees a
// cancel-safe buffered reader.

mod error;
pub mod notifier;
mod socketcan;
pub mod virtual_bus;

pub use error::IoError;
pub use notifier::{BufferedReader, Fanout, FrameReader, FrameResult, Notifier, Subscribe};
pub use socketcan::{configure_interface, SocketCanBus};
pub use virtual_bus::VirtualBus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// Constants
// ============================================================================

/// Maximum payload of a classic CAN frame.
pub const MAX_DATA_LEN: usize = 8;

/// Largest 11-bit identifier.
pub const STANDARD_ID_MAX: u32 = 0x7FF;

/// Largest 29-bit identifier.
pub const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

/// Interface name that selects the in-process virtual bus.
pub const VIRTUAL_INTERFACE: &str = "virtual";

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Frame Types
// ============================================================================

/// Frame as delivered by a driver, before the monitor takes ownership of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pub frame_id: u32,
    /// Data length code reported by the driver.
    pub dlc: u8,
    pub bytes: Vec<u8>,
}

impl RawFrame {
    pub fn new(frame_id: u32, bytes: Vec<u8>) -> Self {
        Self {
            frame_id,
            dlc: bytes.len().min(u8::MAX as usize) as u8,
            bytes,
        }
    }

    /// Payload bytes, bounded by the DLC and the classic CAN maximum.
    pub fn payload(&self) -> &[u8] {
        let len = (self.dlc as usize).min(self.bytes.len()).min(MAX_DATA_LEN);
        &self.bytes[..len]
    }
}

/// An immutable CAN frame: identifier plus 0-8 data bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Frame {
    identifier: u32,
    bytes: Vec<u8>,
}

impl Frame {
    /// Returns `None` when more than 8 data bytes are supplied.
    pub fn new(identifier: u32, bytes: Vec<u8>) -> Option<Self> {
        if bytes.len() > MAX_DATA_LEN {
            return None;
        }
        Some(Self { identifier, bytes })
    }

    pub fn from_raw(raw: &RawFrame) -> Self {
        Self {
            identifier: raw.frame_id,
            bytes: raw.payload().to_vec(),
        }
    }

    pub fn identifier(&self) -> u32 {
        self.identifier
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A frame plus its arrival time. Only the ingestion worker creates these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub frame: Frame,
    /// Host UNIX timestamp in microseconds.
    pub timestamp_us: u64,
}

impl ReceivedFrame {
    pub(crate) fn stamp(frame: Frame) -> Self {
        Self::at(frame, now_us())
    }

    pub(crate) fn at(frame: Frame, timestamp_us: u64) -> Self {
        Self { frame, timestamp_us }
    }

    pub fn identifier(&self) -> u32 {
        self.frame.identifier()
    }
}

/// Identifier width the bus sender accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// 11-bit identifiers
    #[default]
    Standard,
    /// 29-bit identifiers
    Extended,
}

impl FrameFormat {
    pub fn max_id(self) -> u32 {
        match self {
            FrameFormat::Standard => STANDARD_ID_MAX,
            FrameFormat::Extended => EXTENDED_ID_MAX,
        }
    }

    /// Reject a frame whose identifier does not fit this format.
    pub fn check(self, device: &str, frame: &Frame) -> Result<(), IoError> {
        if frame.identifier() > self.max_id() {
            let bits = match self {
                FrameFormat::Standard => 11,
                FrameFormat::Extended => 29,
            };
            return Err(IoError::protocol(
                device,
                format!(
                    "identifier 0x{:X} exceeds {}-bit range (max 0x{:X})",
                    frame.identifier(),
                    bits,
                    self.max_id()
                ),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Driver Traits
// ============================================================================

/// Asynchronous frame source consumed by the ingestion worker.
#[async_trait]
pub trait BusSource: Send {
    /// Wait for the next frame.
    ///
    /// Must be cancel-safe: if the returned future is dropped before it
    /// completes, no frame is lost and the next call returns it.
    async fn next_frame(&mut self) -> Result<RawFrame, IoError>;

    /// Re-establish the link after `next_frame` failed.
    /// Default implementation does nothing.
    async fn reconnect(&mut self) -> Result<(), IoError> {
        Ok(())
    }

    /// Device label used in logs and errors (e.g. "socketcan(can0)")
    fn device(&self) -> &str;

    /// Frames lost before reaching this source because its queue was full.
    fn dropped(&self) -> u64 {
        0
    }
}

/// Synchronous frame sender used by the transmit path.
pub trait BusSender: Send + Sync {
    /// Write one frame. Identifiers outside the configured format are rejected.
    fn send(&self, frame: &Frame) -> Result<(), IoError>;

    fn device(&self) -> &str;
}

// ============================================================================
// Bus Setup
// ============================================================================

/// Connection settings for one bus.
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// SocketCAN interface name, or "virtual"
    pub interface: String,
    /// If set, the interface is reconfigured with this bitrate before opening.
    pub bitrate: Option<u32>,
    pub format: FrameFormat,
    /// Per-subscriber queue depth
    pub capacity: usize,
}

/// Both halves of an opened bus.
pub struct BusLink {
    pub source: Box<dyn BusSource>,
    pub sender: Arc<dyn BusSender>,
}

/// Open the bus named by `config`.
///
/// The virtual bus starts generating demo traffic and therefore must be
/// opened from within a tokio runtime.
pub fn open_bus(config: &BusConfig) -> Result<BusLink, IoError> {
    if config.interface == VIRTUAL_INTERFACE {
        let bus = VirtualBus::new("demo", config.capacity, config.format);
        bus.spawn_demo_traffic(Duration::from_millis(250));
        let source = bus.reader()?;
        return Ok(BusLink {
            source: Box::new(source),
            sender: bus,
        });
    }

    let bus = SocketCanBus::open(config)?;
    let link: Arc<dyn Subscribe> = bus.clone();
    let source = BufferedReader::new(link, bus.device())?;
    Ok(BusLink {
        source: Box::new(source),
        sender: bus,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_payload_bounded_by_dlc() {
        let raw = RawFrame {
            frame_id: 0x100,
            dlc: 2,
            bytes: vec![1, 2, 3, 4],
        };
        assert_eq!(raw.payload(), &[1, 2]);

        let long = RawFrame {
            frame_id: 0x100,
            dlc: 12,
            bytes: (0..12).collect(),
        };
        assert_eq!(Frame::from_raw(&long).len(), MAX_DATA_LEN);
    }

    #[test]
    fn test_frame_rejects_more_than_eight_bytes() {
        assert!(Frame::new(0x1, vec![0; 8]).is_some());
        assert!(Frame::new(0x1, vec![0; 9]).is_none());
        assert!(Frame::new(0x1, Vec::new()).is_some_and(|f| f.is_empty()));
    }

    #[test]
    fn test_frame_format_width() {
        let f = Frame::new(0x800, vec![1]).unwrap();
        assert!(FrameFormat::Standard.check("test", &f).is_err());
        assert!(FrameFormat::Extended.check("test", &f).is_ok());

        let edge = Frame::new(STANDARD_ID_MAX, vec![]).unwrap();
        assert!(FrameFormat::Standard.check("test", &edge).is_ok());

        let too_wide = Frame::new(EXTENDED_ID_MAX + 1, vec![]).unwrap();
        assert!(FrameFormat::Extended.check("test", &too_wide).is_err());
    }

    #[test]
    fn test_frame_format_serde() {
        #[derive(Deserialize)]
        struct Wrap {
            format: FrameFormat,
        }
        let w: Wrap = toml::from_str("format = \"extended\"").unwrap();
        assert_eq!(w.format, FrameFormat::Extended);
    }
}
