//! Bit-level packing for AIS messages.
//!
//! AIS messages are defined as sequences of fixed-width bit fields. A
//! [`BitBuffer`] accumulates those fields most-significant bit first, and
//! renders as a string of `0`/`1` characters so recorded fixtures can be
//! compared directly.

use std::fmt;
use std::str::FromStr;

use crate::codec::EncodingError;

/// The AIS 6-bit character alphabet, indexed by code.
///
/// `-` appears twice; encoding uses its first position.
pub const SIX_BIT_ALPHABET: &str =
    "@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^- !\"#$%&'()*+,-./0123456789:;<=>?";

/// An ordered sequence of bits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BitBuffer {
    bits: Vec<bool>,
}

impl BitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bits: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter().copied()
    }

    pub fn push_bit(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    pub fn push_bool(&mut self, flag: bool) {
        self.push_bit(flag);
    }

    /// Append an unsigned value as `width` bits, most significant first.
    ///
    /// The caller guarantees the value fits; range checks belong to the
    /// message encoders, which know the field names.
    pub fn push_uint(&mut self, value: u64, width: usize) {
        debug_assert!(width <= 64, "field wider than 64 bits");
        debug_assert!(
            width == 64 || value >> width == 0,
            "value {} does not fit in {} bits",
            value,
            width
        );
        for shift in (0..width).rev() {
            self.bits.push((value >> shift) & 1 == 1);
        }
    }

    /// Append a signed value as a `width`-bit two's-complement field.
    pub fn push_int(&mut self, value: i64, width: usize) {
        debug_assert!(width > 0 && width <= 64, "invalid field width");
        let mask = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
        self.push_uint(value as u64 & mask, width);
    }

    /// Append text, six or eight bits per character, then zero-pad to `width`.
    ///
    /// A `width` of zero (or narrower than the text) applies no padding.
    pub fn push_text(
        &mut self,
        field: &'static str,
        text: &str,
        width: usize,
        six_bit: bool,
    ) -> Result<(), EncodingError> {
        let start = self.len();
        for ch in text.chars() {
            if six_bit {
                let code = six_bit_code(ch)
                    .ok_or(EncodingError::InvalidCharacter { field, character: ch })?;
                self.push_uint(code as u64, 6);
            } else {
                if !ch.is_ascii() {
                    return Err(EncodingError::InvalidCharacter { field, character: ch });
                }
                self.push_uint(ch as u64, 8);
            }
        }
        let written = self.len() - start;
        self.push_zeros(width.saturating_sub(written));
        Ok(())
    }

    pub fn push_zeros(&mut self, count: usize) {
        self.bits.extend(std::iter::repeat(false).take(count));
    }

    pub fn extend_from(&mut self, other: &BitBuffer) {
        self.bits.extend_from_slice(&other.bits);
    }

    /// Right-pad with zero bits to a multiple of `multiple`.
    ///
    /// Returns the number of bits added.
    pub fn pad_to_multiple(&mut self, multiple: usize) -> usize {
        let fill = (multiple - self.len() % multiple) % multiple;
        self.push_zeros(fill);
        fill
    }

    /// Read an unsigned field starting at `offset`.
    pub fn read_uint(&self, offset: usize, width: usize) -> Option<u64> {
        if width > 64 || offset + width > self.len() {
            return None;
        }
        Some(
            self.bits[offset..offset + width]
                .iter()
                .fold(0u64, |acc, &bit| (acc << 1) | bit as u64),
        )
    }

    /// Read a two's-complement field starting at `offset`.
    pub fn read_int(&self, offset: usize, width: usize) -> Option<i64> {
        let raw = self.read_uint(offset, width)?;
        if width == 0 || width == 64 {
            return Some(raw as i64);
        }
        let sign = 1u64 << (width - 1);
        Some(if raw & sign != 0 {
            (raw | !((1u64 << width) - 1)) as i64
        } else {
            raw as i64
        })
    }

    /// Copy out a sub-range of bits.
    pub fn slice(&self, start: usize, end: usize) -> BitBuffer {
        let end = end.min(self.len());
        let start = start.min(end);
        BitBuffer {
            bits: self.bits[start..end].to_vec(),
        }
    }

    /// Group into bytes, zero-padding the trailing partial byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits
            .chunks(8)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |acc, (i, &bit)| acc | ((bit as u8) << (7 - i)))
            })
            .collect()
    }

    /// Build a buffer from bytes, eight bits each.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = BitBuffer::with_capacity(bytes.len() * 8);
        for &byte in bytes {
            buffer.push_uint(byte as u64, 8);
        }
        buffer
    }
}

impl fmt::Display for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &bit in &self.bits {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl FromStr for BitBuffer {
    type Err = EncodingError;

    /// Parse a string of `0`/`1` characters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                other => Err(EncodingError::InvalidCharacter {
                    field: "bits",
                    character: other,
                }),
            })
            .collect::<Result<Vec<bool>, _>>()
            .map(|bits| BitBuffer { bits })
    }
}

/// The 6-bit code of a character, after upper-casing.
pub fn six_bit_code(ch: char) -> Option<u8> {
    let upper = ch.to_ascii_uppercase();
    SIX_BIT_ALPHABET
        .chars()
        .position(|c| c == upper)
        .map(|pos| pos as u8)
}

/// The character for a 6-bit code.
pub fn six_bit_char(code: u8) -> Option<char> {
    SIX_BIT_ALPHABET.chars().nth(code as usize)
}

/// Pack an unsigned value into `width` bits.
pub fn int_to_bits(value: u64, width: usize) -> BitBuffer {
    let mut buffer = BitBuffer::with_capacity(width);
    buffer.push_uint(value, width);
    buffer
}

/// Pack text into bits, zero-padded to `width`.
pub fn text_to_bits(text: &str, width: usize, six_bit: bool) -> Result<BitBuffer, EncodingError> {
    let mut buffer = BitBuffer::with_capacity(width);
    buffer.push_text("text", text, width, six_bit)?;
    Ok(buffer)
}

/// Group bits into bytes, left to right.
pub fn bits_to_bytes(bits: &BitBuffer) -> Vec<u8> {
    bits.to_bytes()
}
