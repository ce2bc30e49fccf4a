//! Payload armoring and sentence checksums.
//!
//! AIS payloads travel inside NMEA sentences as 6-bit "armored" ASCII:
//! each 6-bit group `v` becomes the character `v + 48`, skipping the eight
//! characters between `W` and `` ` `` (so `v >= 40` becomes `v + 56`).

use thiserror::Error;

use crate::bits::BitBuffer;

/// Errors raised while encoding a message.
///
/// An encoding error is fatal to the single message being encoded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodingError {
    /// Numeric value does not fit its protocol field.
    #[error("Field {field}: value {value} does not fit in {width} bits")]
    OutOfRange {
        field: &'static str,
        value: i64,
        width: u8,
    },

    /// Character cannot be represented.
    #[error("Field {field}: character {character:?} cannot be encoded")]
    InvalidCharacter { field: &'static str, character: char },

    /// Coordinate outside the valid range (or not a number).
    #[error("Field {field}: coordinate {value} is out of range")]
    InvalidCoordinate { field: &'static str, value: f64 },

    /// Addressed binary messages can only carry id 6 or 8.
    #[error("Unsupported addressed message id {0}")]
    UnsupportedMessageId(u8),
}

/// Errors raised while parsing a received sentence.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SentenceError {
    #[error("Sentence must start with '!' or '$'")]
    MissingStart,

    #[error("Sentence has no checksum")]
    MissingChecksum,

    #[error("Checksum mismatch: sentence says {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("Expected {expected} sentence, received {received}")]
    UnexpectedFormatter {
        expected: &'static str,
        received: String,
    },

    #[error("Malformed field: {0}")]
    MalformedField(&'static str),

    #[error("Invalid payload character {0:?}")]
    InvalidPayloadCharacter(char),
}

/// Armor a bit string into payload characters.
///
/// A trailing partial group is right-padded with zero bits.
pub fn armor(bits: &BitBuffer) -> String {
    let mut payload = String::with_capacity((bits.len() + 5) / 6);
    let mut offset = 0;
    while offset < bits.len() {
        let width = (bits.len() - offset).min(6);
        let value = bits.read_uint(offset, width).unwrap_or(0) << (6 - width);
        payload.push(armor_char(value as u8));
        offset += 6;
    }
    payload
}

fn armor_char(value: u8) -> char {
    let code = if value < 40 { value + 48 } else { value + 56 };
    code as char
}

/// Recover the bit string from armored payload characters.
pub fn dearmor(payload: &str) -> Result<BitBuffer, SentenceError> {
    let mut bits = BitBuffer::with_capacity(payload.len() * 6);
    for ch in payload.chars() {
        let code = ch as u32;
        let value = match code {
            48..=87 => code - 48,
            96..=119 => code - 56,
            _ => return Err(SentenceError::InvalidPayloadCharacter(ch)),
        };
        bits.push_uint(value as u64, 6);
    }
    Ok(bits)
}

/// NMEA/IEC 61162-1 checksum as two uppercase hex digits.
///
/// The XOR covers everything after a leading `!` or `$`.
pub fn checksum(sentence: &str) -> String {
    let body = sentence
        .strip_prefix('!')
        .or_else(|| sentence.strip_prefix('$'))
        .unwrap_or(sentence);
    let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("{:02X}", sum)
}

/// Append `*hh` to a sentence.
pub fn with_checksum(sentence: &str) -> String {
    format!("{}*{}", sentence, checksum(sentence))
}

/// Verify a received sentence and return it without the checksum suffix.
pub fn verify_checksum(line: &str) -> Result<&str, SentenceError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if !line.starts_with('!') && !line.starts_with('$') {
        return Err(SentenceError::MissingStart);
    }
    let (body, expected) = line.rsplit_once('*').ok_or(SentenceError::MissingChecksum)?;
    let computed = checksum(body);
    if !expected.eq_ignore_ascii_case(&computed) {
        return Err(SentenceError::ChecksumMismatch {
            expected: expected.to_string(),
            computed,
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_armor_known_payload() {
        let bits: BitBuffer =
            "001000000001110101101111001101000101010000000000010000010101100001011000010110000000"
                .parse()
                .unwrap();
        assert_eq!(armor(&bits), "81mg=5@0@EQHF0");
    }

    #[test]
    fn test_armor_pads_partial_group() {
        let bits: BitBuffer = "1".parse().unwrap();
        assert_eq!(armor(&bits), "P");
        assert_eq!(armor(&BitBuffer::new()), "");
    }

    #[test]
    fn test_armor_character_boundaries() {
        assert_eq!(armor(&"000000".parse().unwrap()), "0");
        assert_eq!(armor(&"100111".parse().unwrap()), "W");
        assert_eq!(armor(&"101000".parse().unwrap()), "`");
        assert_eq!(armor(&"111111".parse().unwrap()), "w");
    }

    #[test]
    fn test_dearmor_round_trip() {
        // Lengths not divisible by six come back with the zero pad appended
        for text in ["1", "101", "0101011", "111111000000101010", "1100110011001100110011"] {
            let bits: BitBuffer = text.parse().unwrap();
            let back = dearmor(&armor(&bits)).unwrap();
            assert_eq!(back.slice(0, bits.len()), bits);
            assert!(back.iter().skip(bits.len()).all(|b| !b));
            assert_eq!(back.len() % 6, 0);
        }
    }

    #[test]
    fn test_dearmor_rejects_gap_characters() {
        assert_eq!(
            dearmor("X"),
            Err(SentenceError::InvalidPayloadCharacter('X'))
        );
        assert!(dearmor("x").is_err());
    }

    #[test]
    fn test_checksum_known_values() {
        assert_eq!(checksum("!AIVDM,10,1,,A,abcde,2"), "75");
        assert_eq!(checksum("AIVDM,10,1,,A,abcde,2"), "75");
        assert_eq!(checksum("g:1-2-3,s:source"), "15");
        assert_eq!(checksum("!AIVDM,1,1,,A,,0"), "26");
    }

    #[test]
    fn test_checksum_changes_with_any_byte() {
        let body = "AIVDM,1,1,,A,E1mg=5O:2ab@0b7W@77hHh@@@@@03aOh?E`>000000N010,4";
        let reference = checksum(body);
        assert_eq!(checksum(body), reference);

        let bytes = body.as_bytes();
        for i in 0..bytes.len() {
            let mut changed = bytes.to_vec();
            changed[i] ^= 0x01;
            let changed = String::from_utf8(changed).unwrap();
            assert_ne!(checksum(&changed), reference, "byte {} flipped", i);
        }
    }

    #[test]
    fn test_verify_checksum() {
        assert_eq!(
            verify_checksum("!AIVDM,10,1,,A,abcde,2*75\r\n"),
            Ok("!AIVDM,10,1,,A,abcde,2")
        );
        assert!(matches!(
            verify_checksum("!AIVDM,10,1,,A,abcde,2*76"),
            Err(SentenceError::ChecksumMismatch { .. })
        ));
        assert_eq!(
            verify_checksum("!AIVDM,10,1,,A,abcde,2"),
            Err(SentenceError::MissingChecksum)
        );
        assert_eq!(verify_checksum("AIVDM*00"), Err(SentenceError::MissingStart));
    }
}
