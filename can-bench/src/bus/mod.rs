//! Bus channel abstraction
//!
//! The transport is an external collaborator: anything that can send a frame,
//! wait a bounded time for one, and be closed. Production code binds to
//! SocketCAN (feature `socketcan`); tests use the in-memory [`VirtualBus`].

mod virtual_bus;
#[cfg(feature = "socketcan")]
mod socket_can;

pub use virtual_bus::{VirtualBus, VirtualChannel};
#[cfg(feature = "socketcan")]
pub use socket_can::SocketCanChannel;

use crate::types::{Frame, Result};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

/// Capabilities the harness needs from a CAN transport
pub trait BusChannel {
    /// Transmit one frame. Transport faults surface as `HarnessError::Transmit`.
    fn send(&mut self, frame: &Frame) -> Result<()>;

    /// Wait at most `timeout` for a frame. `Ok(None)` on timeout.
    fn recv(&mut self, timeout: Duration) -> Result<Option<Frame>>;

    /// Release the transport. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}

impl<C: BusChannel + ?Sized> BusChannel for Box<C> {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        (**self).send(frame)
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        (**self).recv(timeout)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Owns a channel for the length of a run and closes it when dropped,
/// whichever way the run ends.
pub struct ChannelGuard<C: BusChannel> {
    channel: C,
}

impl<C: BusChannel> ChannelGuard<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }
}

impl<C: BusChannel> Deref for ChannelGuard<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.channel
    }
}

impl<C: BusChannel> DerefMut for ChannelGuard<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}

impl<C: BusChannel> Drop for ChannelGuard<C> {
    fn drop(&mut self) {
        match self.channel.close() {
            Ok(()) => log::debug!("Bus channel closed"),
            Err(e) => log::warn!("Failed to close bus channel: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_closes_on_drop() {
        let (local, _peer) = VirtualBus::pair();
        let closed = local.closed_flag();
        {
            let mut guard = ChannelGuard::new(local);
            guard.send(&Frame::standard(0x123, vec![1, 2, 3])).unwrap();
            assert!(!closed.load(std::sync::atomic::Ordering::SeqCst));
        }
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_boxed_channel_forwards() {
        let (local, mut peer) = VirtualBus::pair();
        let mut boxed: Box<dyn BusChannel> = Box::new(local);
        boxed.send(&Frame::standard(0x10, vec![0xAA])).unwrap();

        let received = peer.recv(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(received.data, vec![0xAA]);
        boxed.close().unwrap();
        boxed.close().unwrap();
    }
}
