//! Frame codec
//!
//! Turns physical signal values into frame payloads and back, using message
//! definitions from the signal database. Handles bit placement, endianness,
//! two's complement, multiplexing and the scale/offset transform.

use crate::signals::database::{MessageDefinition, SignalDatabase, SignalDefinition, ValueType};
use crate::signals::layout::BitLayout;
use crate::types::{DecodedSignal, DecodedSignals, Frame, HarnessError, Result, SignalValue};
use std::collections::BTreeMap;

/// Stateless encoder/decoder for frames described by a [`MessageDefinition`]
pub struct FrameCodec;

impl FrameCodec {
    /// Encode signal values into a frame for `message`.
    ///
    /// Signals not listed stay at raw 0. Unknown names fail with
    /// `UnknownSignal`; values that do not fit the signal width fail with
    /// `EncodeRange` (they are never clamped). A multiplexed signal is only
    /// accepted when the multiplexer value in the same frame (raw 0 if not
    /// given) selects it, otherwise `InvalidConfig`.
    pub fn encode(message: &MessageDefinition, values: &[(&str, f64)]) -> Result<Frame> {
        Self::encode_iter(message, values.iter().map(|(name, value)| (*name, *value)))
    }

    /// Encode from a name → value map (the shape scenario files provide)
    pub fn encode_values(message: &MessageDefinition, values: &BTreeMap<String, f64>) -> Result<Frame> {
        Self::encode_iter(message, values.iter().map(|(name, value)| (name.as_str(), *value)))
    }

    fn encode_iter<'a>(
        message: &MessageDefinition,
        values: impl Iterator<Item = (&'a str, f64)>,
    ) -> Result<Frame> {
        let raws = values
            .map(|(name, physical)| {
                let signal = message.signal(name).ok_or_else(|| HarnessError::UnknownSignal {
                    message: message.name.clone(),
                    signal: name.to_string(),
                })?;
                Ok::<_, HarnessError>((signal, Self::compute_raw_value(physical, signal)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut data = vec![0u8; message.size];
        for (signal, raw) in &raws {
            if let Some(ref mux_info) = signal.multiplexer_info {
                let selector = raws
                    .iter()
                    .rev()
                    .find(|(s, _)| s.name == mux_info.multiplexer_signal)
                    .map_or(0, |(s, raw)| truncate(*raw, s.length));
                if !mux_info.multiplexer_values.contains(&selector) {
                    return Err(HarnessError::InvalidConfig(format!(
                        "signal '{}' of '{}' is not active when {} = {}",
                        signal.name, message.name, mux_info.multiplexer_signal, selector
                    )));
                }
            }
            BitLayout::new(signal).pack(&mut data, *raw);
        }

        Ok(Frame {
            id: message.id,
            is_extended: message.is_extended,
            data,
        })
    }

    /// Convert a physical value to the raw bit pattern of `signal`.
    ///
    /// `raw = round((physical - offset) / factor)`, checked against the
    /// signed or unsigned range of the signal width. Negative values come
    /// back as two's complement truncated by the packer.
    pub fn compute_raw_value(physical: f64, signal: &SignalDefinition) -> Result<u64> {
        let raw = ((physical - signal.offset) / signal.factor).round();
        let (min, max) = signal.raw_range();

        let out_of_range = || HarnessError::EncodeRange {
            signal: signal.name.clone(),
            value: physical,
            raw,
            bits: signal.length,
        };

        if !raw.is_finite() {
            return Err(out_of_range());
        }
        let raw_int = raw as i128;
        if raw_int < min || raw_int > max {
            return Err(out_of_range());
        }
        Ok(raw_int as u64)
    }

    /// Decode every active signal of `message` from `data`.
    ///
    /// Fails with `FrameLength` unless `data` is exactly the declared size.
    pub fn decode(message: &MessageDefinition, data: &[u8]) -> Result<DecodedSignals> {
        if data.len() != message.size {
            return Err(HarnessError::FrameLength {
                message: message.name.clone(),
                expected: message.size,
                actual: data.len(),
            });
        }

        // For multiplexed messages, first extract the multiplexer signal value
        let multiplexer_value = message
            .multiplexer_signal
            .as_deref()
            .and_then(|name| message.signal(name))
            .map(|mux| BitLayout::new(mux).extract(data));

        let mut decoded_signals = Vec::with_capacity(message.signals.len());
        for signal in &message.signals {
            if let Some(ref mux_info) = signal.multiplexer_info {
                match multiplexer_value {
                    Some(current) if mux_info.multiplexer_values.contains(&current) => {}
                    _ => continue,
                }
            }
            decoded_signals.push(Self::decode_signal(data, signal));
        }

        Ok(DecodedSignals::new(
            message.name.clone(),
            message.id,
            decoded_signals,
        ))
    }

    /// Dispatch an inbound frame by arbitration id and extended flag, then decode it
    pub fn decode_frame(db: &SignalDatabase, frame: &Frame) -> Result<DecodedSignals> {
        let message = db.message_for_frame(frame)?;
        Self::decode(message, &frame.data)
    }

    fn decode_signal(data: &[u8], signal: &SignalDefinition) -> DecodedSignal {
        let layout = BitLayout::new(signal);

        let (raw_value, raw_f64) = match signal.value_type {
            ValueType::Signed => {
                let raw = layout.extract_signed(data);
                (raw, raw as f64)
            }
            ValueType::Unsigned => {
                let raw = layout.extract(data);
                (raw as i64, raw as f64)
            }
        };

        let value = if signal.is_integer() && (signal.value_type == ValueType::Signed || raw_value >= 0) {
            SignalValue::Integer(raw_value)
        } else {
            SignalValue::Float(raw_f64 * signal.factor + signal.offset)
        };

        DecodedSignal {
            name: signal.name.clone(),
            value,
            unit: signal.unit.clone(),
            raw_value,
        }
    }
}

/// Keep the low `bits` bits, the way the value lands in the payload
fn truncate(raw: u64, bits: u16) -> u64 {
    if bits >= 64 {
        raw
    } else {
        raw & ((1u64 << bits) - 1)
    }
}
