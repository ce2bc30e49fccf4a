//! AIS message encoders.
//!
//! Each encoder assembles the message fields in protocol order and returns
//! an [`EncodedMessage`]: the bit string right-padded to a multiple of six,
//! plus the number of fill bits that padding added. Framing the result into
//! sentences is left to [`crate::sentences`].
//!
//! Field widths are bit-exact contracts with deployed receivers.

use aton_core::{NavAidMessage, MAX_ATON_TYPE, MAX_MMSI};

use crate::bits::{six_bit_char, BitBuffer};
use crate::codec::{armor, EncodingError};

/// Designated area code written into binary messages.
pub const BINARY_DAC: u64 = 1;

/// Functional id written into binary messages.
pub const BINARY_FI: u64 = 1;

/// Characters carried in the fixed Message 21 name field.
pub const NAME_FIELD_CHARS: usize = 20;

/// Most characters the Message 21 name extension can carry (88 bits).
pub const NAME_EXTENSION_MAX_CHARS: usize = 14;

/// Length of Message 21 before the name extension.
pub const MESSAGE_21_FIXED_BITS: usize = 272;

/// UTC second value meaning "time stamp not available".
pub const UTC_SECOND_NOT_AVAILABLE: u64 = 60;

/// Scale from degrees to 1/10000 minute.
const COORDINATE_SCALE: f64 = 600_000.0;

const MAX_HALF_LENGTH: f64 = 511.0;
const MAX_HALF_WIDTH: f64 = 63.0;

/// A message ready for framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    message_id: u8,
    bits: BitBuffer,
    fill_bits: u8,
}

impl EncodedMessage {
    /// Pad an assembled bit string to a multiple of six.
    pub fn new(message_id: u8, mut bits: BitBuffer) -> Self {
        let fill_bits = bits.pad_to_multiple(6) as u8;
        Self {
            message_id,
            bits,
            fill_bits,
        }
    }

    /// The AIS message id written in the first field.
    pub fn message_id(&self) -> u8 {
        self.message_id
    }

    /// The padded bit string.
    pub fn bits(&self) -> &BitBuffer {
        &self.bits
    }

    /// Number of zero bits appended to reach a multiple of six.
    pub fn fill_bits(&self) -> u8 {
        self.fill_bits
    }

    /// Length of the message before padding.
    pub fn unpadded_len(&self) -> usize {
        self.bits.len() - self.fill_bits as usize
    }

    /// The padded bit string packed into bytes.
    ///
    /// This is the form that is stamped and signed.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.to_bytes()
    }

    /// The armored payload characters.
    pub fn armored(&self) -> String {
        armor(&self.bits)
    }
}

fn check_mmsi(field: &'static str, mmsi: u32) -> Result<(), EncodingError> {
    if mmsi > MAX_MMSI {
        return Err(EncodingError::OutOfRange {
            field,
            value: mmsi as i64,
            width: 30,
        });
    }
    Ok(())
}

/// Encode an addressed binary message (Message 6).
///
/// `message_id` is written into the id field and must be 6 or 8; see
/// [`aton_core::config::ADDRESSED_MESSAGE_LEGACY_ID`].
pub fn encode_message6(
    mmsi: u32,
    dest_mmsi: u32,
    payload: &[u8],
    message_id: u8,
) -> Result<EncodedMessage, EncodingError> {
    if !matches!(message_id, 6 | 8) {
        return Err(EncodingError::UnsupportedMessageId(message_id));
    }
    check_mmsi("mmsi", mmsi)?;
    check_mmsi("dest_mmsi", dest_mmsi)?;

    let mut bits = BitBuffer::with_capacity(88 + payload.len() * 8);
    bits.push_uint(message_id as u64, 6);
    bits.push_uint(0, 2); // repeat indicator
    bits.push_uint(mmsi as u64, 30);
    bits.push_uint(0, 2); // sequence number
    bits.push_uint(dest_mmsi as u64, 30);
    bits.push_uint(0, 1); // retransmit
    bits.push_uint(0, 1); // spare
    bits.push_uint(BINARY_DAC, 10);
    bits.push_uint(BINARY_FI, 6);
    bits.extend_from(&BitBuffer::from_bytes(payload));

    Ok(EncodedMessage::new(message_id, bits))
}

/// Encode a broadcast binary message (Message 8).
pub fn encode_message8(mmsi: u32, payload: &[u8]) -> Result<EncodedMessage, EncodingError> {
    check_mmsi("mmsi", mmsi)?;

    let mut bits = BitBuffer::with_capacity(56 + payload.len() * 8);
    bits.push_uint(8, 6);
    bits.push_uint(0, 2); // repeat indicator
    bits.push_uint(mmsi as u64, 30);
    bits.push_uint(0, 2); // spare
    bits.push_uint(BINARY_DAC, 10);
    bits.push_uint(BINARY_FI, 6);
    bits.extend_from(&BitBuffer::from_bytes(payload));

    Ok(EncodedMessage::new(8, bits))
}

fn scaled_coordinate(
    field: &'static str,
    value: f64,
    limit: f64,
    width: u8,
) -> Result<i64, EncodingError> {
    // limit + 1 is the protocol's "not available" value
    let valid = value.is_finite() && (value.abs() <= limit || value == limit + 1.0);
    if !valid {
        return Err(EncodingError::InvalidCoordinate { field, value });
    }
    let scaled = (value * COORDINATE_SCALE).round() as i64;
    let bound = 1i64 << (width - 1);
    if scaled < -bound || scaled >= bound {
        return Err(EncodingError::OutOfRange {
            field,
            value: scaled,
            width,
        });
    }
    Ok(scaled)
}

fn dimension(field: &'static str, value: f64, max: f64, width: u8) -> Result<u64, EncodingError> {
    if !value.is_finite() || value < 0.0 || value > max {
        return Err(EncodingError::OutOfRange {
            field,
            value: if value.is_finite() { value as i64 } else { -1 },
            width,
        });
    }
    Ok(value as u64)
}

/// Encode an Aid-to-Navigation report (Message 21).
///
/// Names longer than 20 characters continue in the name extension, up to
/// [`NAME_EXTENSION_MAX_CHARS`] further characters.
pub fn encode_message21(message: &NavAidMessage) -> Result<EncodedMessage, EncodingError> {
    check_mmsi("mmsi", message.mmsi)?;
    if message.aton_type > MAX_ATON_TYPE {
        return Err(EncodingError::OutOfRange {
            field: "aton_type",
            value: message.aton_type as i64,
            width: 5,
        });
    }

    let longitude = scaled_coordinate("longitude", message.position.lon, 180.0, 28)?;
    let latitude = scaled_coordinate("latitude", message.position.lat, 90.0, 27)?;
    let half_length = dimension("half_length", message.encoded_half_length(), MAX_HALF_LENGTH, 9)?;
    let half_width = dimension("half_width", message.encoded_half_width(), MAX_HALF_WIDTH, 6)?;

    let name: Vec<char> = message.name.chars().collect();
    let head: String = name.iter().take(NAME_FIELD_CHARS).collect();
    let head = format!("{:<width$}", head, width = NAME_FIELD_CHARS);
    let extension: String = name
        .iter()
        .skip(NAME_FIELD_CHARS)
        .take(NAME_EXTENSION_MAX_CHARS)
        .collect();

    let mut bits = BitBuffer::with_capacity(MESSAGE_21_FIXED_BITS + extension.len() * 6 + 6);
    bits.push_uint(21, 6);
    bits.push_uint(0, 2); // repeat indicator
    bits.push_uint(message.mmsi as u64, 30);
    bits.push_uint(message.aton_type as u64, 5);
    bits.push_text("name", &head, 120, true)?;
    bits.push_uint(0, 1); // position accuracy
    bits.push_int(longitude, 28);
    bits.push_int(latitude, 27);
    // Both ends carry the same half dimension
    bits.push_uint(half_length, 9); // to bow
    bits.push_uint(half_length, 9); // to stern
    bits.push_uint(half_width, 6); // to port
    bits.push_uint(half_width, 6); // to starboard
    bits.push_uint(0, 4); // fix type
    bits.push_uint(UTC_SECOND_NOT_AVAILABLE, 6);
    bits.push_uint(0, 1); // off position
    bits.push_uint(0, 8); // AtoN status
    bits.push_bool(message.raim);
    bits.push_bool(message.virtual_aton);
    bits.push_uint(0, 2); // spare
    bits.push_text("name", &extension, 0, true)?;

    Ok(EncodedMessage::new(21, bits))
}

/// The fields of an encoded Message 21, read back for monitoring.
#[derive(Debug, Clone, PartialEq)]
pub struct Message21Fields {
    pub mmsi: u32,
    pub aton_type: u8,
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub half_length: u16,
    pub half_width: u8,
    pub utc_second: u8,
    pub raim: bool,
    pub virtual_aton: bool,
}

impl Message21Fields {
    /// Read the fields back from a bit string.
    pub fn decode(bits: &BitBuffer) -> Option<Self> {
        if bits.read_uint(0, 6)? != 21 || bits.len() < MESSAGE_21_FIXED_BITS {
            return None;
        }
        let text = |offset: usize, chars: usize| -> Option<String> {
            (0..chars)
                .map(|i| {
                    bits.read_uint(offset + i * 6, 6)
                        .and_then(|code| six_bit_char(code as u8))
                })
                .collect()
        };

        let mut name = text(43, NAME_FIELD_CHARS)?;
        let extension_chars = (bits.len() - MESSAGE_21_FIXED_BITS) / 6;
        if extension_chars > 0 {
            name.push_str(&text(MESSAGE_21_FIXED_BITS, extension_chars)?);
        }

        Some(Self {
            mmsi: bits.read_uint(8, 30)? as u32,
            aton_type: bits.read_uint(38, 5)? as u8,
            name: name.trim_end_matches(['@', ' ']).to_string(),
            longitude: bits.read_int(164, 28)? as f64 / COORDINATE_SCALE,
            latitude: bits.read_int(192, 27)? as f64 / COORDINATE_SCALE,
            half_length: bits.read_uint(219, 9)? as u16,
            half_width: bits.read_uint(237, 6)? as u8,
            utc_second: bits.read_uint(253, 6)? as u8,
            raim: bits.get(268)?,
            virtual_aton: bits.get(269)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aton_core::Coordinate;
    use pretty_assertions::assert_eq;

    const AIS_MSG_6_ENCODED: &str = "000110000001110101101111001101000101010011101011011110011010001011000100000000000100000101011000010110000101100000";
    const AIS_MSG_8_ENCODED: &str = "001000000001110101101111001101000101010000000000010000010101100001011000010110000000";
    const S125_NO_1_ENCODED: &str = "010101000001110101101111001101000101011111001010000010101001101010010000000000101010000111100111010000000111000111110000011000110000010000010000010000010000010000000000000011101001011111110000001111010101101000001110000000000000000000000000000000000000011110000000000001000000";
    const S125_NO_2_ENCODED: &str = "010101000001110101101111001101000101011100001010000010101001101010010000000000101010000111100111010000000111000111110000011001010000010000010000010000010000010000000001111010101101000001110000000000011101001011111110000000000000000000000000000000000000011110000000000001000000";
    const S125_NO_3_ENCODED: &str = "010101000001110101101111001101000101011111001010000010101001101010010000000000101010000111100111010000000111000111110000011001110000010000010000010000010000010000000000000011101001011111110000001111010101101000001110000000000010000000010000010000010000011110000000000000000000";

    fn aton(name: &str, lat: f64, lon: f64, aton_type: u8) -> NavAidMessage {
        NavAidMessage {
            uid: format!("urn:mrn:grad:aton:{}", name.to_lowercase().replace(' ', "-")),
            mmsi: 123456789,
            name: name.to_string(),
            position: Coordinate::new(lat, lon),
            half_length: 0.0,
            half_width: 0.0,
            raim: false,
            virtual_aton: true,
            aton_type,
        }
    }

    #[test]
    fn test_message6_matches_fixture() {
        let msg = encode_message6(123456789, 987654321, b"XXX", 6).unwrap();
        assert_eq!(msg.bits().to_string(), AIS_MSG_6_ENCODED);
        assert_eq!(msg.unpadded_len(), 112);
        assert_eq!(msg.fill_bits(), 2);
        assert_eq!(msg.armored(), "61mg=5CcNJ;4045HF5P");
    }

    #[test]
    fn test_message6_legacy_id() {
        let msg = encode_message6(123456789, 987654321, b"XXX", 8).unwrap();
        assert_eq!(msg.message_id(), 8);
        assert_eq!(&msg.bits().to_string()[..6], "001000");
        // Everything after the id is unchanged
        assert_eq!(&msg.bits().to_string()[6..], &AIS_MSG_6_ENCODED[6..]);
    }

    #[test]
    fn test_message6_rejects_other_ids() {
        assert_eq!(
            encode_message6(1, 2, b"", 7),
            Err(EncodingError::UnsupportedMessageId(7))
        );
    }

    #[test]
    fn test_message6_rejects_wide_destination() {
        let err = encode_message6(123456789, 1 << 30, b"XXX", 6).unwrap_err();
        assert!(matches!(err, EncodingError::OutOfRange { field: "dest_mmsi", .. }));
    }

    #[test]
    fn test_message8_matches_fixture() {
        let msg = encode_message8(123456789, b"XXX").unwrap();
        assert_eq!(msg.bits().to_string(), AIS_MSG_8_ENCODED);
        assert_eq!(msg.unpadded_len(), 80);
        assert_eq!(msg.fill_bits(), 4);
        assert_eq!(msg.armored(), "81mg=5@0@EQHF0");
    }

    #[test]
    fn test_message21_matches_fixtures() {
        let no1 = encode_message21(&aton("Test AtoN No 1", 53.61, 1.594, 30)).unwrap();
        assert_eq!(no1.bits().to_string(), S125_NO_1_ENCODED);

        let no2 = encode_message21(&aton("Test AtoN No 2", 1.594, 53.61, 24)).unwrap();
        assert_eq!(no2.bits().to_string(), S125_NO_2_ENCODED);

        let mut physical = aton("Test AtoN No 3", 53.61, 1.594, 30);
        physical.virtual_aton = false;
        physical.half_length = 2.0;
        physical.half_width = 2.0;
        let no3 = encode_message21(&physical).unwrap();
        assert_eq!(no3.bits().to_string(), S125_NO_3_ENCODED);
    }

    #[test]
    fn test_message21_field_widths() {
        let msg = encode_message21(&aton("Test AtoN No 1", 53.61, 1.594, 30)).unwrap();
        let bits = msg.bits();

        // (offset, width, expected value)
        let fields: [(usize, usize, u64); 17] = [
            (0, 6, 21),          // message id
            (6, 2, 0),           // repeat
            (8, 30, 123456789),  // mmsi
            (38, 5, 30),         // aton type
            (163, 1, 0),         // accuracy
            (164, 28, 956400),   // longitude
            (192, 27, 32166000), // latitude
            (219, 9, 0),         // bow
            (228, 9, 0),         // stern
            (237, 6, 0),         // port
            (243, 6, 0),         // starboard
            (249, 4, 0),         // fix type
            (253, 6, 60),        // utc second
            (259, 1, 0),         // off position
            (260, 8, 0),         // aton status
            (268, 1, 0),         // raim
            (269, 1, 1),         // virtual
        ];
        for (offset, width, expected) in fields {
            assert_eq!(bits.read_uint(offset, width), Some(expected), "field at {}", offset);
        }
        assert_eq!(bits.read_uint(270, 2), Some(0)); // spare
        assert_eq!(msg.unpadded_len(), MESSAGE_21_FIXED_BITS);
        assert_eq!(msg.fill_bits(), 4);
    }

    #[test]
    fn test_message21_name_extension() {
        let name = "Test AtoN Name Longer Than Twenty";
        let msg = encode_message21(&aton(name, 53.61, 1.594, 30)).unwrap();

        // 13 overflow characters at 6 bits each
        assert_eq!(msg.unpadded_len(), MESSAGE_21_FIXED_BITS + 13 * 6);
        assert_eq!(msg.bits().len() % 6, 0);

        let fields = Message21Fields::decode(msg.bits()).unwrap();
        assert_eq!(fields.name, name.to_uppercase());
    }

    #[test]
    fn test_message21_extension_is_capped() {
        let name = "A".repeat(NAME_FIELD_CHARS + NAME_EXTENSION_MAX_CHARS + 10);
        let msg = encode_message21(&aton(&name, 0.0, 0.0, 0)).unwrap();
        assert_eq!(
            msg.unpadded_len(),
            MESSAGE_21_FIXED_BITS + NAME_EXTENSION_MAX_CHARS * 6
        );
    }

    #[test]
    fn test_message21_length_is_always_sextet_aligned() {
        for len in 0..40 {
            let name = "X".repeat(len);
            for aton_type in [0u8, 4, 20, 31] {
                let msg = encode_message21(&aton(&name, -33.5, 151.2, aton_type)).unwrap();
                let extension = len.saturating_sub(NAME_FIELD_CHARS).min(NAME_EXTENSION_MAX_CHARS);
                assert_eq!(msg.bits().len() % 6, 0);
                assert_eq!(msg.unpadded_len(), MESSAGE_21_FIXED_BITS + extension * 6);
            }
        }
    }

    #[test]
    fn test_virtual_aids_never_carry_dimensions() {
        for (length, width) in [(0.0, 0.0), (10.0, 4.0), (511.0, 63.0), (1000.0, 1000.0)] {
            let mut msg = aton("VIRTUAL", 53.61, 1.594, 30);
            msg.half_length = length;
            msg.half_width = width;
            let encoded = encode_message21(&msg).unwrap();
            let fields = Message21Fields::decode(encoded.bits()).unwrap();
            assert_eq!(fields.half_length, 0);
            assert_eq!(fields.half_width, 0);
        }
    }

    #[test]
    fn test_negative_coordinates_are_twos_complement() {
        let msg = encode_message21(&aton("SOUTH WEST", -53.61, -1.594, 30)).unwrap();
        assert_eq!(msg.unpadded_len(), MESSAGE_21_FIXED_BITS);

        let fields = Message21Fields::decode(msg.bits()).unwrap();
        assert!((fields.latitude + 53.61).abs() < 1e-6);
        assert!((fields.longitude + 1.594).abs() < 1e-6);
    }

    #[test]
    fn test_not_available_position() {
        let msg = encode_message21(&aton("NO POSITION", 91.0, 181.0, 0)).unwrap();
        let fields = Message21Fields::decode(msg.bits()).unwrap();
        assert_eq!(fields.latitude, 91.0);
        assert_eq!(fields.longitude, 181.0);
    }

    #[test]
    fn test_message21_domain_checks() {
        let mut msg = aton("BAD", 53.61, 1.594, 30);
        msg.mmsi = 1 << 30;
        assert!(matches!(
            encode_message21(&msg),
            Err(EncodingError::OutOfRange { field: "mmsi", .. })
        ));

        let msg = aton("BAD", 53.61, 1.594, 32);
        assert!(matches!(
            encode_message21(&msg),
            Err(EncodingError::OutOfRange { field: "aton_type", .. })
        ));

        let msg = aton("BAD", 95.0, 1.594, 30);
        assert!(matches!(
            encode_message21(&msg),
            Err(EncodingError::InvalidCoordinate { field: "latitude", .. })
        ));

        let msg = aton("BAD", 53.61, f64::NAN, 30);
        assert!(matches!(
            encode_message21(&msg),
            Err(EncodingError::InvalidCoordinate { field: "longitude", .. })
        ));

        let msg = aton("Bad_Name", 53.61, 1.594, 30);
        assert!(matches!(
            encode_message21(&msg),
            Err(EncodingError::InvalidCharacter { field: "name", character: '_' })
        ));

        let mut msg = aton("HUGE", 53.61, 1.594, 30);
        msg.virtual_aton = false;
        msg.half_width = 64.0;
        assert!(matches!(
            encode_message21(&msg),
            Err(EncodingError::OutOfRange { field: "half_width", .. })
        ));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let msg = aton("Test AtoN No 1", 53.61, 1.594, 30);
        assert_eq!(encode_message21(&msg), encode_message21(&msg));
    }
}
