//! SocketCAN binding (Linux)

use super::BusChannel;
use crate::types::{Frame, HarnessError, Result};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, StandardId};
use std::io::ErrorKind;
use std::time::Duration;

/// A raw CAN socket bound to one interface (`can0`, `vcan0`, ...)
pub struct SocketCanChannel {
    interface: String,
    socket: Option<CanSocket>,
}

impl SocketCanChannel {
    /// Open the interface. It must already be up (`ip link set can0 up ...`).
    pub fn open(interface: &str) -> Result<Self> {
        let socket = CanSocket::open(interface).map_err(|e| {
            HarnessError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open CAN interface {}: {}", interface, e),
            ))
        })?;
        log::info!("Opened CAN interface {}", interface);
        Ok(Self {
            interface: interface.to_string(),
            socket: Some(socket),
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn to_can_frame(frame: &Frame) -> Result<CanFrame> {
        frame.validate()?;
        let id = if frame.is_extended {
            ExtendedId::new(frame.id).map(Id::Extended)
        } else {
            StandardId::new(frame.id as u16).map(Id::Standard)
        }
        .ok_or_else(|| HarnessError::InvalidFrame(format!("bad identifier 0x{:X}", frame.id)))?;

        CanFrame::new(id, &frame.data)
            .ok_or_else(|| HarnessError::InvalidFrame(format!("bad payload for 0x{:X}", frame.id)))
    }

    fn from_can_frame(can_frame: &CanFrame) -> Option<Frame> {
        // Remote and error frames carry no signal data
        if !matches!(can_frame, CanFrame::Data(_)) {
            return None;
        }
        let (id, is_extended) = match EmbeddedFrame::id(can_frame) {
            Id::Standard(id) => (id.as_raw() as u32, false),
            Id::Extended(id) => (id.as_raw(), true),
        };
        Some(Frame {
            id,
            is_extended,
            data: EmbeddedFrame::data(can_frame).to_vec(),
        })
    }
}

impl BusChannel for SocketCanChannel {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| HarnessError::Transmit(format!("{} is closed", self.interface)))?;
        let can_frame = Self::to_can_frame(frame).map_err(|e| HarnessError::Transmit(e.to_string()))?;
        socket
            .write_frame(&can_frame)
            .map_err(|e| HarnessError::Transmit(format!("{}: {}", self.interface, e)))
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| HarnessError::Receive(format!("{} is closed", self.interface)))?;
        match socket.read_frame_timeout(timeout) {
            Ok(can_frame) => Ok(Self::from_can_frame(&can_frame)),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(HarnessError::Receive(format!("{}: {}", self.interface, e))),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            log::info!("Closed CAN interface {}", self.interface);
        }
        Ok(())
    }
}
