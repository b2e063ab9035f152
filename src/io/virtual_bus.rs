// src/io/virtual_bus.rs
//
// In-process CAN bus. Frames are injected directly (or sent, which loops them
// back) and delivered through the same fan-out the hardware drivers use.
// Backs the `--interface virtual` demo mode and the test suite.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::notifier::{BufferedReader, Fanout, FrameResult, Subscribe};
use super::{BusSender, Frame, FrameFormat, IoError, RawFrame};

pub struct VirtualBus {
    device: String,
    format: FrameFormat,
    fanout: Fanout,
}

impl VirtualBus {
    pub fn new(channel: &str, capacity: usize, format: FrameFormat) -> Arc<Self> {
        let device = format!("virtual({})", channel);
        Arc::new(Self {
            fanout: Fanout::new(&device, capacity),
            device,
            format,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Deliver a frame as if it had arrived from the wire.
    /// Returns false when the bus is disconnected.
    pub fn inject(&self, frame: RawFrame) -> bool {
        if self.fanout.is_closed() {
            return false;
        }
        self.fanout.dispatch(frame);
        true
    }

    /// Simulate the link going down: every reader gets a disconnect error and
    /// sends fail until someone resubscribes.
    pub fn disconnect(&self) {
        tlog!("[virtual] {} disconnected", self.device);
        self.fanout.fail(IoError::disconnected(&self.device));
    }

    pub fn is_connected(&self) -> bool {
        !self.fanout.is_closed()
    }

    /// New buffered reader subscribed to this bus.
    pub fn reader(self: &Arc<Self>) -> Result<BufferedReader, IoError> {
        let link: Arc<dyn Subscribe> = self.clone();
        BufferedReader::new(link, &self.device)
    }

    /// Generate a rolling set of frames every `period` until the bus is dropped.
    pub fn spawn_demo_traffic(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let ids: [u32; 4] = [0x100, 0x1A0, 0x200, 0x7DF];
            let mut tick = tokio::time::interval(period);
            let mut counter: u32 = 0;
            loop {
                tick.tick().await;
                let Some(bus) = weak.upgrade() else {
                    break;
                };
                let id = ids[counter as usize % ids.len()];
                let len = (counter % 9) as usize;
                let bytes: Vec<u8> = (0..len)
                    .map(|i| (counter as u8).wrapping_add(i as u8))
                    .collect();
                bus.inject(RawFrame::new(id, bytes));
                counter = counter.wrapping_add(1);
            }
        })
    }
}

impl Subscribe for VirtualBus {
    fn subscribe(&self) -> Result<mpsc::Receiver<FrameResult>, IoError> {
        if self.fanout.is_closed() {
            self.fanout.reopen();
            tlog!("[virtual] {} reconnected", self.device);
        }
        Ok(self.fanout.register())
    }

    fn dropped(&self) -> u64 {
        self.fanout.dropped()
    }
}

impl BusSender for VirtualBus {
    fn send(&self, frame: &Frame) -> Result<(), IoError> {
        if self.fanout.is_closed() {
            return Err(IoError::transmit(&self.device, "bus closed"));
        }
        self.format.check(&self.device, frame)?;
        self.fanout
            .dispatch(RawFrame::new(frame.identifier(), frame.bytes().to_vec()));
        Ok(())
    }

    fn device(&self) -> &str {
        &self.device
    }
}
