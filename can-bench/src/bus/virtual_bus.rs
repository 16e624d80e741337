//! In-memory bus
//!
//! Two connected channel ends backed by a pair of `mpsc` queues. Whatever one
//! end sends, the other receives. Used for deterministic tests and for
//! simulating an ECU peer without hardware.

use super::BusChannel;
use crate::types::{Frame, HarnessError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

pub struct VirtualBus;

impl VirtualBus {
    /// Open two connected ends
    pub fn pair() -> (VirtualChannel, VirtualChannel) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (VirtualChannel::new(a_tx, a_rx), VirtualChannel::new(b_tx, b_rx))
    }
}

/// One end of a [`VirtualBus`]
pub struct VirtualChannel {
    tx: Option<Sender<Frame>>,
    rx: Receiver<Frame>,
    closed: Arc<AtomicBool>,
}

impl VirtualChannel {
    fn new(tx: Sender<Frame>, rx: Receiver<Frame>) -> Self {
        Self {
            tx: Some(tx),
            rx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag set once `close()` has run; lets tests observe release
    /// after the channel has been moved into a run.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    /// Drain every frame already queued for this end
    pub fn drain(&mut self) -> Vec<Frame> {
        self.rx.try_iter().collect()
    }
}

impl BusChannel for VirtualChannel {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        frame
            .validate()
            .map_err(|e| HarnessError::Transmit(e.to_string()))?;
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| HarnessError::Transmit("channel is closed".to_string()))?;
        // A dropped peer behaves like an empty bus
        if tx.send(frame.clone()).is_err() {
            log::debug!("Virtual peer gone, frame 0x{:X} dropped", frame.id);
        }
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        if self.tx.is_none() {
            return Err(HarnessError::Receive("channel is closed".to_string()));
        }
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                // Behave like a silent bus: honour the timeout
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.tx = None;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
