//! Core types for the CAN bench harness
//!
//! This module defines the frame, decoded-value and error types shared by the
//! signal database, the frame codec, the bus channels and the transceiver loop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Largest payload of a classic CAN frame
pub const MAX_CLASSIC_PAYLOAD: usize = 8;

/// Highest 11-bit standard identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Highest 29-bit extended identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// A single CAN frame as handed to or received from a bus channel.
///
/// Frames are consumed immediately by the transceiver; nothing retains them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Arbitration identifier (11-bit or 29-bit)
    pub id: u32,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
    /// Payload bytes (0-8 for classic CAN)
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a frame with a standard 11-bit identifier
    pub fn standard(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            is_extended: false,
            data: data.into(),
        }
    }

    /// Create a frame with an extended 29-bit identifier
    pub fn extended(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            is_extended: true,
            data: data.into(),
        }
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }

    /// Check the identifier range and the classic payload limit
    pub fn validate(&self) -> Result<()> {
        let max_id = if self.is_extended {
            MAX_EXTENDED_ID
        } else {
            MAX_STANDARD_ID
        };
        if self.id > max_id {
            return Err(HarnessError::InvalidFrame(format!(
                "identifier 0x{:X} out of range (max 0x{:X})",
                self.id, max_id
            )));
        }
        if self.data.len() > MAX_CLASSIC_PAYLOAD {
            return Err(HarnessError::InvalidFrame(format!(
                "payload of {} bytes exceeds {} bytes",
                self.data.len(),
                MAX_CLASSIC_PAYLOAD
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Frame {
    /// Renders `0x510 8 01 02 03 01 01 01 01 01`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X} {}", self.id, self.data.len())?;
        for byte in &self.data {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Errors raised by the harness
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Failed to load signal database: {0}")]
    DatabaseLoad(String),

    #[error("Message not found: {0}")]
    UnknownMessage(String),

    #[error("Message not found: CAN ID 0x{0:X}")]
    UnknownMessageId(u32),

    #[error("Signal '{signal}' is not part of message '{message}'")]
    UnknownSignal { message: String, signal: String },

    #[error("Value {value} for signal '{signal}' gives raw {raw}, which does not fit in {bits} bits")]
    EncodeRange {
        signal: String,
        value: f64,
        raw: f64,
        bits: u16,
    },

    #[error("Frame length mismatch for '{message}': expected {expected} bytes, got {actual}")]
    FrameLength {
        message: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Transmit failed: {0}")]
    Transmit(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// True for faults confined to a single inbound frame.
    ///
    /// The receive path reports these and keeps the transmit schedule running.
    pub fn is_per_frame(&self) -> bool {
        matches!(
            self,
            HarnessError::FrameLength { .. } | HarnessError::UnknownMessageId(_)
        )
    }
}

/// Physical value of a decoded signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Unscaled integer value (factor 1, offset 0)
    Integer(i64),
    /// Floating-point value (after scaling/offset)
    Float(f64),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{}", v),
            SignalValue::Float(v) => write!(f, "{:.3}", v),
        }
    }
}

impl SignalValue {
    /// Convert signal value to f64
    pub fn as_f64(&self) -> f64 {
        match self {
            SignalValue::Integer(v) => *v as f64,
            SignalValue::Float(v) => *v,
        }
    }

    /// Convert signal value to i64 if possible
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SignalValue::Integer(v) => Some(*v),
            SignalValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            SignalValue::Float(_) => None,
        }
    }

    /// Compare against an expected physical value.
    ///
    /// Integers compare exactly; floats within `tolerance`.
    pub fn approx_eq(&self, expected: f64, tolerance: f64) -> bool {
        match self {
            SignalValue::Integer(v) => (*v as f64) == expected,
            SignalValue::Float(v) => (v - expected).abs() <= tolerance,
        }
    }
}

/// A decoded signal with its current value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedSignal {
    /// Signal name from the database
    pub name: String,
    /// Physical value
    pub value: SignalValue,
    /// Engineering unit (e.g., "km/h", "°C", "V")
    pub unit: Option<String>,
    /// Raw value before scaling (useful for debugging)
    pub raw_value: i64,
}

/// All signals decoded from one frame, in definition order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedSignals {
    /// Message name from the database
    pub message: String,
    /// Arbitration identifier of the message
    pub can_id: u32,
    signals: Vec<DecodedSignal>,
}

impl DecodedSignals {
    pub(crate) fn new(message: String, can_id: u32, signals: Vec<DecodedSignal>) -> Self {
        Self {
            message,
            can_id,
            signals,
        }
    }

    /// Look up a signal value by name
    pub fn get(&self, name: &str) -> Option<&SignalValue> {
        self.signal(name).map(|s| &s.value)
    }

    /// Look up the full decoded signal by name
    pub fn signal(&self, name: &str) -> Option<&DecodedSignal> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecodedSignal> {
        self.signals.iter()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Report line for one signal: `[0x512] VCU_Torque = 12.500`
    pub fn report_line(&self, name: &str) -> Option<String> {
        self.signal(name).map(|s| format!("[0x{:X}] {} = {}", self.can_id, s.name, s.value))
    }
}
