//! Signal database
//!
//! Read-only model of messages and signals, validated once at construction.
//! There are no mutation methods: the transmit path and the receive path both
//! read it through shared references without locking.

use crate::signals::layout::BitLayout;
use crate::types::{Frame, HarnessError, Result, MAX_CLASSIC_PAYLOAD, MAX_EXTENDED_ID, MAX_STANDARD_ID};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A complete CAN message definition
#[derive(Debug, Clone)]
pub struct MessageDefinition {
    /// CAN message ID (without the DBC extended flag bit)
    pub id: u32,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
    /// Message name
    pub name: String,
    /// Payload size in bytes
    pub size: usize,
    /// Sender ECU name (optional)
    pub sender: Option<String>,
    /// All signals in this message
    pub signals: Vec<SignalDefinition>,
    /// Multiplexer signal name (if multiplexed)
    pub multiplexer_signal: Option<String>,
    /// Source file (DBC filename) or "<memory>"
    pub source: String,
}

impl MessageDefinition {
    /// Look up a signal by name
    pub fn signal(&self, name: &str) -> Option<&SignalDefinition> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// True if this message has multiplexed signals
    pub fn is_multiplexed(&self) -> bool {
        self.multiplexer_signal.is_some()
    }
}

/// A CAN signal definition
#[derive(Debug, Clone)]
pub struct SignalDefinition {
    /// Signal name
    pub name: String,
    /// Start bit (LSB for little-endian, MSB for big-endian, DBC numbering)
    pub start_bit: u16,
    /// Length in bits
    pub length: u16,
    pub byte_order: ByteOrder,
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Minimum physical value (informational, not enforced when encoding)
    pub min: f64,
    /// Maximum physical value (informational, not enforced when encoding)
    pub max: f64,
    /// Engineering unit (e.g., "km/h", "V")
    pub unit: Option<String>,
    /// Multiplexer info (None if not multiplexed)
    pub multiplexer_info: Option<MultiplexerInfo>,
}

impl SignalDefinition {
    /// Plain unsigned little-endian signal with factor 1 and offset 0
    pub fn new(name: impl Into<String>, start_bit: u16, length: u16) -> Self {
        Self {
            name: name.into(),
            start_bit,
            length,
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            unit: None,
            multiplexer_info: None,
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.byte_order = ByteOrder::BigEndian;
        self
    }

    pub fn signed(mut self) -> Self {
        self.value_type = ValueType::Signed;
        self
    }

    pub fn scaled(mut self, factor: f64, offset: f64) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// True when physical == raw (factor 1, offset 0)
    pub fn is_integer(&self) -> bool {
        self.factor == 1.0 && self.offset == 0.0
    }

    /// Inclusive raw range representable in `length` bits. A zero-width
    /// signal has the empty range `(0, -1)`; widths above 64 are capped.
    pub fn raw_range(&self) -> (i128, i128) {
        if self.length == 0 {
            return (0, -1);
        }
        let bits = u32::from(self.length.min(64));
        match self.value_type {
            ValueType::Signed => (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1),
            ValueType::Unsigned => (0, (1i128 << bits) - 1),
        }
    }
}

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Signed,
    Unsigned,
}

/// Multiplexer information for multiplexed signals
#[derive(Debug, Clone)]
pub struct MultiplexerInfo {
    /// Name of the multiplexer signal that controls this signal
    pub multiplexer_signal: String,
    /// Multiplexer value(s) for which this signal is active
    pub multiplexer_values: Vec<u64>,
}

/// Options applied while building a database
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Reject overlapping signals (true) or only warn about them (false)
    #[serde(default = "default_strict")]
    pub strict: bool,
}

fn default_strict() -> bool {
    true
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { strict: true }
    }
}

impl LoadOptions {
    pub fn lenient() -> Self {
        Self { strict: false }
    }
}

/// The signal database
#[derive(Debug)]
pub struct SignalDatabase {
    messages: Vec<MessageDefinition>,
    /// Key: message name, Value: index into `messages`
    by_name: HashMap<String, usize>,
    /// Key: (CAN ID, extended flag), Value: index into `messages`
    by_id: HashMap<(u32, bool), usize>,
}

impl SignalDatabase {
    /// Build a database from decoded message definitions.
    ///
    /// Fails with `DatabaseLoad` on duplicate names/ids, payloads over 8 bytes,
    /// signals outside the payload and (in strict mode) overlapping signals.
    pub fn load(messages: Vec<MessageDefinition>, options: LoadOptions) -> Result<Self> {
        let mut by_name = HashMap::new();
        let mut by_id = HashMap::new();

        for (idx, message) in messages.iter().enumerate() {
            validate_message(message, options)?;

            if by_name.insert(message.name.clone(), idx).is_some() {
                return Err(HarnessError::DatabaseLoad(format!(
                    "duplicate message name '{}'",
                    message.name
                )));
            }
            if let Some(prev) = by_id.insert((message.id, message.is_extended), idx) {
                return Err(HarnessError::DatabaseLoad(format!(
                    "messages '{}' and '{}' share {} CAN ID 0x{:X}",
                    messages[prev].name,
                    message.name,
                    if message.is_extended { "extended" } else { "standard" },
                    message.id
                )));
            }
        }

        log::info!(
            "Signal database ready: {} messages, {} signals",
            messages.len(),
            messages.iter().map(|m| m.signals.len()).sum::<usize>()
        );

        Ok(Self {
            messages,
            by_name,
            by_id,
        })
    }

    /// Get a message definition by name
    pub fn message_by_name(&self, name: &str) -> Result<&MessageDefinition> {
        self.by_name
            .get(name)
            .map(|idx| &self.messages[*idx])
            .ok_or_else(|| HarnessError::UnknownMessage(name.to_string()))
    }

    /// Get a message definition by arbitration id. Standard and extended
    /// ids are separate namespaces.
    pub fn message_by_id(&self, id: u32, is_extended: bool) -> Result<&MessageDefinition> {
        self.by_id
            .get(&(id, is_extended))
            .map(|idx| &self.messages[*idx])
            .ok_or(HarnessError::UnknownMessageId(id))
    }

    /// Get the message an inbound frame belongs to
    pub fn message_for_frame(&self, frame: &Frame) -> Result<&MessageDefinition> {
        self.message_by_id(frame.id, frame.is_extended)
    }

    /// All messages in load order
    pub fn messages(&self) -> impl Iterator<Item = &MessageDefinition> {
        self.messages.iter()
    }

    /// Get database statistics
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.iter().map(|m| m.signals.len()).sum(),
        }
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of message definitions
    pub num_messages: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
}

fn validate_message(message: &MessageDefinition, options: LoadOptions) -> Result<()> {
    let fail = |detail: String| {
        Err(HarnessError::DatabaseLoad(format!(
            "message '{}' (0x{:X}): {}",
            message.name, message.id, detail
        )))
    };

    let max_id = if message.is_extended {
        MAX_EXTENDED_ID
    } else {
        MAX_STANDARD_ID
    };
    if message.id > max_id {
        return fail(format!("identifier exceeds 0x{:X}", max_id));
    }
    if message.size > MAX_CLASSIC_PAYLOAD {
        return fail(format!(
            "payload of {} bytes exceeds {} bytes",
            message.size, MAX_CLASSIC_PAYLOAD
        ));
    }

    let mut layouts: Vec<(&SignalDefinition, BitLayout)> = Vec::with_capacity(message.signals.len());
    for signal in &message.signals {
        if layouts.iter().any(|(s, _)| s.name == signal.name) {
            return fail(format!("duplicate signal '{}'", signal.name));
        }
        if signal.length == 0 || signal.length > 64 {
            return fail(format!(
                "signal '{}' has invalid length {}",
                signal.name, signal.length
            ));
        }
        if signal.factor == 0.0 || !signal.factor.is_finite() || !signal.offset.is_finite() {
            return fail(format!(
                "signal '{}' has invalid scaling ({}, {})",
                signal.name, signal.factor, signal.offset
            ));
        }

        let layout = BitLayout::new(signal);
        if layout.required_bytes() > message.size {
            return fail(format!(
                "signal '{}' ({}|{}) does not fit in {} bytes",
                signal.name, signal.start_bit, signal.length, message.size
            ));
        }

        for (other, other_layout) in &layouts {
            if exclusive_by_multiplexer(signal, other) || !layout.overlaps(other_layout) {
                continue;
            }
            if options.strict {
                return fail(format!(
                    "signals '{}' and '{}' overlap",
                    other.name, signal.name
                ));
            }
            log::warn!(
                "Message '{}': signals '{}' and '{}' overlap",
                message.name,
                other.name,
                signal.name
            );
        }
        layouts.push((signal, layout));
    }

    if let Some(mux) = &message.multiplexer_signal {
        if message.signal(mux).is_none() {
            return fail(format!("multiplexer signal '{}' missing", mux));
        }
    }

    Ok(())
}

/// Two multiplexed signals never share a frame when their selector sets are disjoint
fn exclusive_by_multiplexer(a: &SignalDefinition, b: &SignalDefinition) -> bool {
    match (&a.multiplexer_info, &b.multiplexer_info) {
        (Some(ma), Some(mb)) => {
            ma.multiplexer_signal == mb.multiplexer_signal
                && !ma
                    .multiplexer_values
                    .iter()
                    .any(|v| mb.multiplexer_values.contains(v))
        }
        _ => false,
    }
}
