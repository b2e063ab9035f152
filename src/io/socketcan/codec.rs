// src/io/socketcan/codec.rs
//
// Conversion between socketcan frames and the monitor's frame types.
// Classic CAN only; remote and error frames are not shown.

use socketcan::{CanDataFrame, CanFrame, EmbeddedFrame, ExtendedId, Frame as _, Id, StandardId};

use crate::io::{Frame, FrameFormat, IoError, RawFrame};

/// SocketCAN protocol constants
pub mod consts {
    /// Mask for 29-bit extended ID
    pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
}

/// Convert a received frame. Returns `None` for remote and error frames.
pub fn decode(frame: CanFrame) -> Option<RawFrame> {
    match frame {
        CanFrame::Data(f) => Some(RawFrame::new(
            f.raw_id() & consts::CAN_EFF_MASK,
            f.data().to_vec(),
        )),
        CanFrame::Remote(_) => None, // Skip remote frames
        CanFrame::Error(_) => None,  // Skip error frames
    }
}

/// Build a data frame with the identifier width selected by `format`.
pub fn encode(frame: &Frame, format: FrameFormat, device: &str) -> Result<CanDataFrame, IoError> {
    format.check(device, frame)?;

    let raw_id = frame.identifier();
    let id = match format {
        FrameFormat::Standard => {
            let id = StandardId::new(raw_id as u16).ok_or_else(|| {
                IoError::protocol(device, format!("Invalid standard ID: 0x{:03X}", raw_id))
            })?;
            Id::Standard(id)
        }
        FrameFormat::Extended => {
            let id = ExtendedId::new(raw_id).ok_or_else(|| {
                IoError::protocol(device, format!("Invalid extended ID: 0x{:08X}", raw_id))
            })?;
            Id::Extended(id)
        }
    };

    CanDataFrame::new(id, frame.bytes())
        .ok_or_else(|| IoError::protocol(device, "Failed to create data frame"))
}
