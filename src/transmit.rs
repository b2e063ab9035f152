// src/transmit.rs
//
// Operator transmit path: identifier and byte-list text are validated and
// turned into a frame, which is handed to the bus sender. Send failures are
// reported, never fatal.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::io::{now_us, BusSender, Frame, IoError};
use crate::session::SessionEvent;
use crate::validate::{parse_data_field, parse_id_field, InputError, ParseError};

// ============================================================================
// Types
// ============================================================================

/// Rejected transmit input, tagged with the field that failed.
pub type SubmitError = InputError;

/// Outcome of one send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransmitResult {
    pub frame: Frame,
    pub timestamp_us: u64,
    pub error: Option<IoError>,
}

impl TransmitResult {
    fn success(frame: Frame) -> Self {
        Self {
            frame,
            timestamp_us: now_us(),
            error: None,
        }
    }

    fn error(frame: Frame, error: IoError) -> Self {
        Self {
            frame,
            timestamp_us: now_us(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Build a frame from operator text.
///
/// The data field is checked before the identifier, so when both are bad the
/// data diagnostic wins.
pub fn build_frame(id_text: &str, data_text: &str) -> Result<Frame, SubmitError> {
    let bytes = parse_data_field(data_text)?;
    let identifier = parse_id_field(id_text)?;
    // parse_data_field caps the list at 8 bytes
    Frame::new(identifier, bytes).ok_or(InputError::Data(ParseError::LengthOutOfRange))
}

// ============================================================================
// Transmit Path
// ============================================================================

#[derive(Clone)]
pub struct TransmitPath {
    sender: Arc<dyn BusSender>,
    events: broadcast::Sender<SessionEvent>,
}

impl TransmitPath {
    pub fn new(sender: Arc<dyn BusSender>, events: broadcast::Sender<SessionEvent>) -> Self {
        Self { sender, events }
    }

    pub fn device(&self) -> &str {
        self.sender.device()
    }

    /// Validate operator text. Nothing is sent.
    pub fn submit(&self, id_text: &str, data_text: &str) -> Result<Frame, SubmitError> {
        build_frame(id_text, data_text).inspect_err(|e| {
            tlog!(
                "[transmit] Rejected id={:?} data={:?}: {} ({})",
                id_text,
                data_text,
                e,
                e.reason()
            );
        })
    }

    /// Hand a frame to the bus sender. Failures are logged and published as
    /// an event, and never propagate.
    pub fn send(&self, frame: &Frame) -> TransmitResult {
        let result = match self.sender.send(frame) {
            Ok(()) => TransmitResult::success(frame.clone()),
            Err(e) => {
                tlog!(
                    "[transmit] Message Failed to Send (id=0x{:X}): {}",
                    frame.identifier(),
                    e
                );
                TransmitResult::error(frame.clone(), e)
            }
        };
        let _ = self.events.send(SessionEvent::Transmitted(result.clone()));
        result
    }

    /// `submit` followed by `send`.
    pub fn submit_and_send(
        &self,
        id_text: &str,
        data_text: &str,
    ) -> Result<TransmitResult, SubmitError> {
        let frame = self.submit(id_text, data_text)?;
        Ok(self.send(&frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FrameFormat, VirtualBus};
    use std::sync::Mutex;

    /// Records frames instead of sending them.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<Frame>>,
    }

    impl BusSender for RecordingSender {
        fn send(&self, frame: &Frame) -> Result<(), IoError> {
            self.sent.lock().unwrap().push(frame.clone());
            Ok(())
        }

        fn device(&self) -> &str {
            "recording"
        }
    }

    fn path_with(sender: Arc<dyn BusSender>) -> (TransmitPath, broadcast::Receiver<SessionEvent>) {
        let (events, rx) = broadcast::channel(8);
        (TransmitPath::new(sender, events), rx)
    }

    #[test]
    fn test_submit_builds_frame() {
        let (path, _rx) = path_with(Arc::new(RecordingSender::default()));
        let frame = path.submit("0x1A", "1 2 0xFF").unwrap();
        assert_eq!(frame.identifier(), 26);
        assert_eq!(frame.bytes(), &[1, 2, 255]);
    }

    #[test]
    fn test_submit_rejects_and_sends_nothing() {
        let sender = Arc::new(RecordingSender::default());
        let (path, _rx) = path_with(sender.clone());

        let err = path.submit_and_send("1A", "1 2 256").unwrap_err();
        assert_eq!(err, InputError::Data(ParseError::ByteOutOfRange));
        assert_eq!(err.to_string(), "Data Invalid");

        let err = path.submit_and_send("1A", "1 2 3").unwrap_err();
        assert_eq!(err, InputError::Id(ParseError::InvalidFormat));
        assert_eq!(err.to_string(), "ID Invalid");

        assert_eq!(
            path.submit("1", "").unwrap_err(),
            InputError::Data(ParseError::LengthOutOfRange)
        );
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_success() {
        let sender = Arc::new(RecordingSender::default());
        let (path, mut rx) = path_with(sender.clone());
        let result = path.submit_and_send("0x100", "0xDE 0xAD").unwrap();
        assert!(result.is_success());
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Transmitted(r)) if r.is_success()));
    }

    #[test]
    fn test_send_failure_is_reported() {
        let bus = VirtualBus::new("tx", 8, FrameFormat::Standard);
        let (path, mut rx) = path_with(bus.clone());
        bus.disconnect();

        let frame = path.submit("0x10", "1").unwrap();
        let result = path.send(&frame);
        assert!(!result.is_success());
        assert!(matches!(result.error, Some(IoError::Transmit { .. })));
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Transmitted(r)) if !r.is_success()));
    }

    #[test]
    fn test_identifier_width_checked_by_sender() {
        let bus = VirtualBus::new("tx", 8, FrameFormat::Standard);
        let (path, _rx) = path_with(bus);
        let frame = path.submit("0x800", "1").unwrap();
        let result = path.send(&frame);
        assert!(matches!(result.error, Some(IoError::Protocol { .. })));
    }
}
