//! Bit layout of a signal inside a frame payload
//!
//! Maps DBC `start_bit` + byte order onto byte/bit positions. The same layout
//! drives extraction (decode), packing (encode) and the overlap check done at
//! database load, so the three always agree.

use crate::signals::database::{ByteOrder, SignalDefinition};

/// One contiguous run of bits within a single payload byte.
///
/// "Take `num_bits` bits starting at `bit_offset` in `data[byte_index]` and
/// place them at `value_shift` in the raw value."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSpan {
    pub byte_index: usize,
    /// Lowest bit position within the byte (0..=7)
    pub bit_offset: u8,
    /// Consecutive bits in this span (1..=8)
    pub num_bits: u8,
    /// LSB-relative position of these bits in the raw value
    pub value_shift: u8,
}

impl BitSpan {
    fn mask(&self) -> u8 {
        (((1u16 << self.num_bits) - 1) as u8) << self.bit_offset
    }
}

/// Precomputed byte spans for one signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitLayout {
    spans: Vec<BitSpan>,
    length: u16,
}

impl BitLayout {
    /// Build the layout for a signal definition.
    ///
    /// Little-endian (Intel): `start_bit` is the LSB, bits walk upward and
    /// continue at bit 0 of the next byte.
    /// Big-endian (Motorola): `start_bit` is the MSB, bits walk downward and
    /// continue at bit 7 of the next byte.
    pub fn new(signal: &SignalDefinition) -> Self {
        Self::from_parts(signal.start_bit, signal.length, signal.byte_order)
    }

    pub fn from_parts(start_bit: u16, length: u16, byte_order: ByteOrder) -> Self {
        let mut spans = Vec::new();
        let mut byte_index = (start_bit / 8) as usize;
        let mut bit_index = (start_bit % 8) as u8;
        let mut remaining = length;

        match byte_order {
            ByteOrder::BigEndian => {
                while remaining > 0 {
                    let num_bits = std::cmp::min(bit_index as u16 + 1, remaining) as u8;
                    remaining -= num_bits as u16;
                    spans.push(BitSpan {
                        byte_index,
                        bit_offset: bit_index + 1 - num_bits,
                        num_bits,
                        value_shift: remaining as u8,
                    });
                    byte_index += 1;
                    bit_index = 7;
                }
            }
            ByteOrder::LittleEndian => {
                let mut value_shift: u16 = 0;
                while remaining > 0 {
                    let num_bits = std::cmp::min(8 - bit_index as u16, remaining) as u8;
                    spans.push(BitSpan {
                        byte_index,
                        bit_offset: bit_index,
                        num_bits,
                        value_shift: value_shift as u8,
                    });
                    value_shift += num_bits as u16;
                    remaining -= num_bits as u16;
                    byte_index += 1;
                    bit_index = 0;
                }
            }
        }

        Self { spans, length }
    }

    pub fn spans(&self) -> &[BitSpan] {
        &self.spans
    }

    /// Number of payload bytes needed to hold every bit of the signal
    pub fn required_bytes(&self) -> usize {
        self.spans
            .iter()
            .map(|s| s.byte_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Per-byte occupancy masks, indexed by byte; used for overlap detection
    pub fn occupancy(&self) -> Vec<u8> {
        let mut masks = vec![0u8; self.required_bytes()];
        for span in &self.spans {
            masks[span.byte_index] |= span.mask();
        }
        masks
    }

    /// True if any bit is claimed by both layouts
    pub fn overlaps(&self, other: &BitLayout) -> bool {
        let mine = self.occupancy();
        let theirs = other.occupancy();
        mine.iter().zip(theirs.iter()).any(|(a, b)| a & b != 0)
    }

    /// Extract the raw unsigned value. `data` must hold `required_bytes()`.
    pub fn extract(&self, data: &[u8]) -> u64 {
        let mut result: u64 = 0;
        for span in &self.spans {
            let bits = (data[span.byte_index] & span.mask()) >> span.bit_offset;
            result |= (bits as u64) << span.value_shift;
        }
        result
    }

    /// Extract and sign-extend from the signal width
    pub fn extract_signed(&self, data: &[u8]) -> i64 {
        let raw = self.extract(data);
        if self.length >= 64 {
            return raw as i64;
        }
        let shift = 64 - self.length as u32;
        ((raw as i64) << shift) >> shift
    }

    /// Pack a raw value, clearing the target bits first so several signals
    /// can share one buffer. Bits above the signal width are ignored.
    pub fn pack(&self, data: &mut [u8], raw: u64) {
        for span in &self.spans {
            let bits = ((raw >> span.value_shift) as u8) & (((1u16 << span.num_bits) - 1) as u8);
            data[span.byte_index] &= !span.mask();
            data[span.byte_index] |= bits << span.bit_offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_cross_byte() {
        let layout = BitLayout::from_parts(0, 16, ByteOrder::LittleEndian);
        let data = [0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(layout.extract(&data), 0xCDAB);
        assert_eq!(layout.required_bytes(), 2);
    }

    #[test]
    fn test_big_endian_word_in_first_two_bytes() {
        // Motorola 16-bit signal with MSB at bit 7 occupies bytes 0..2
        let layout = BitLayout::from_parts(7, 16, ByteOrder::BigEndian);
        let data = [0x01, 0x23, 0x00, 0x00];
        assert_eq!(layout.extract(&data), 0x0123);
        assert_eq!(layout.required_bytes(), 2);
    }

    #[test]
    fn test_big_endian_partial_byte() {
        // 12-bit Motorola signal starting at bit 0: 1 bit in byte 0,
        // 8 bits in byte 1, 3 bits at the top of byte 2
        let layout = BitLayout::from_parts(0, 12, ByteOrder::BigEndian);
        let mut data = [0u8; 8];
        layout.pack(&mut data, 0xDB6);
        assert_eq!(&data[..3], &[0x01, 0xB6, 0xC0]);
        assert_eq!(layout.extract(&data), 0xDB6);
        assert_eq!(layout.extract_signed(&data), -586);
    }

    #[test]
    fn test_pack_clears_existing_bits() {
        let layout = BitLayout::from_parts(7, 1, ByteOrder::BigEndian);
        let mut data = [0xFFu8; 8];
        layout.pack(&mut data, 0);
        assert_eq!(data[0], 0x7F);
        assert_eq!(data[1], 0xFF);
    }

    #[test]
    fn test_sign_extend() {
        let layout = BitLayout::from_parts(0, 8, ByteOrder::LittleEndian);
        assert_eq!(layout.extract_signed(&[0xFF]), -1);
        assert_eq!(layout.extract_signed(&[0x7F]), 127);

        let wide = BitLayout::from_parts(0, 16, ByteOrder::LittleEndian);
        assert_eq!(wide.extract_signed(&[0x00, 0x80]), -32768);
    }

    #[test]
    fn test_full_width_little_endian() {
        let layout = BitLayout::from_parts(0, 64, ByteOrder::LittleEndian);
        let data = [0x11, 0x22, 0x33, 0x44, 0xFF, 0x66, 0x77, 0x88];
        let raw = layout.extract(&data);
        assert_eq!(raw, 0x887766FF44332211);

        let mut packed = [0u8; 8];
        layout.pack(&mut packed, raw);
        assert_eq!(packed, data);
    }

    #[test]
    fn test_overlap_detection() {
        let a = BitLayout::from_parts(0, 8, ByteOrder::LittleEndian);
        let b = BitLayout::from_parts(4, 8, ByteOrder::LittleEndian);
        let c = BitLayout::from_parts(8, 8, ByteOrder::LittleEndian);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));

        // Motorola word in bytes 0..2 vs Intel byte 1
        let word = BitLayout::from_parts(7, 16, ByteOrder::BigEndian);
        assert!(word.overlaps(&c));
    }
}
