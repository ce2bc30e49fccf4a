//! NMEA sentence framing.
//!
//! Sentences render through [`fmt::Display`] without a checksum; use
//! [`Sentence::to_string_with_checksum`] for the wire form. A VDES-1000
//! expects each line wrapped in a [`TagBlock`].

use std::fmt;

use aton_core::config::BaseStationConfig;
use aton_core::AisChannel;

use crate::bits::BitBuffer;
use crate::codec::{armor, dearmor, verify_checksum, with_checksum, SentenceError};
use crate::messages::EncodedMessage;

/// Most payload characters carried by one sentence.
pub const MAX_PAYLOAD_CHARS: usize = 60;

/// Talker identifier used unless configured otherwise.
pub const DEFAULT_TALKER_ID: &str = "AI";

/// Anything that renders as a single NMEA sentence.
pub trait Sentence: fmt::Display {
    /// The sentence followed by `*hh`.
    fn to_string_with_checksum(&self) -> String {
        with_checksum(&self.to_string())
    }
}

/// Split armored payload characters into sentence-sized parts.
///
/// Always yields at least one part, so an empty payload still frames.
fn split_payload(payload: &str) -> Vec<String> {
    let chars: Vec<char> = payload.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(MAX_PAYLOAD_CHARS)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

fn opt<T: fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

// ============================================================================
// VDM
// ============================================================================

/// Raw AIS payload carrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VdmSentence {
    pub talker_id: String,
    pub total: usize,
    pub part: usize,
    pub sequence_id: Option<u8>,
    pub channel: AisChannel,
    pub payload: String,
    pub fill_bits: u8,
}

impl VdmSentence {
    /// Frame an encoded message, splitting it over as many parts as needed.
    ///
    /// Fill bits are reported on the last part only.
    pub fn from_message(
        message: &EncodedMessage,
        channel: AisChannel,
        sequence_id: Option<u8>,
    ) -> Vec<VdmSentence> {
        let parts = split_payload(&message.armored());
        let total = parts.len();
        parts
            .into_iter()
            .enumerate()
            .map(|(i, payload)| VdmSentence {
                talker_id: DEFAULT_TALKER_ID.to_string(),
                total,
                part: i + 1,
                sequence_id,
                channel,
                payload,
                fill_bits: if i + 1 == total { message.fill_bits() } else { 0 },
            })
            .collect()
    }

    /// Number of sentences an encoded message needs.
    pub fn part_count(message: &EncodedMessage) -> usize {
        message.bits().len().div_ceil(6).div_ceil(MAX_PAYLOAD_CHARS).max(1)
    }

    pub fn with_talker_id(mut self, talker_id: &str) -> Self {
        self.talker_id = talker_id.to_string();
        self
    }

    /// Parse a received sentence, verifying its checksum.
    pub fn parse(line: &str) -> Result<Self, SentenceError> {
        let body = verify_checksum(line)?;
        let fields: Vec<&str> = body[1..].split(',').collect();
        if fields.len() != 7 {
            return Err(SentenceError::MalformedField("field count"));
        }

        let address = fields[0];
        if address.len() < 3 || !address.ends_with("VDM") {
            return Err(SentenceError::UnexpectedFormatter {
                expected: "VDM",
                received: address.to_string(),
            });
        }

        let total = fields[1]
            .parse()
            .map_err(|_| SentenceError::MalformedField("total"))?;
        let part = fields[2]
            .parse()
            .map_err(|_| SentenceError::MalformedField("part"))?;
        let sequence_id = match fields[3] {
            "" => None,
            seq => Some(seq.parse().map_err(|_| SentenceError::MalformedField("sequence id"))?),
        };
        let channel = match fields[4] {
            "A" | "1" => AisChannel::A,
            "B" | "2" => AisChannel::B,
            "" => AisChannel::None,
            _ => return Err(SentenceError::MalformedField("channel")),
        };
        dearmor(fields[5])?;
        let fill_bits = fields[6]
            .parse::<u8>()
            .ok()
            .filter(|fill| *fill <= 5)
            .ok_or(SentenceError::MalformedField("fill bits"))?;

        Ok(VdmSentence {
            talker_id: address[..address.len() - 3].to_string(),
            total,
            part,
            sequence_id,
            channel,
            payload: fields[5].to_string(),
            fill_bits,
        })
    }

    /// Reassemble the message bits carried by a complete set of parts.
    pub fn decode_payload(parts: &[VdmSentence]) -> Result<BitBuffer, SentenceError> {
        let mut bits = BitBuffer::new();
        for part in parts {
            bits.extend_from(&dearmor(&part.payload)?);
        }
        let fill = parts.last().map(|p| p.fill_bits as usize).unwrap_or(0);
        Ok(bits.slice(0, bits.len().saturating_sub(fill)))
    }
}

impl fmt::Display for VdmSentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "!{}VDM,{},{},{},{},{},{}",
            self.talker_id,
            self.total,
            self.part,
            opt(&self.sequence_id),
            self.channel.letter().unwrap_or(""),
            self.payload,
            self.fill_bits
        )
    }
}

impl Sentence for VdmSentence {}

// ============================================================================
// BBM
// ============================================================================

/// Broadcast binary message carrier, asking a device to transmit Message 6/8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BbmSentence {
    pub talker_id: String,
    pub total: usize,
    pub part: usize,
    pub sequence_id: Option<u8>,
    pub channel: AisChannel,
    pub message_id: u8,
    pub payload: String,
    pub fill_bits: u8,
}

impl BbmSentence {
    pub fn from_message(
        message: &EncodedMessage,
        channel: AisChannel,
        sequence_id: Option<u8>,
    ) -> Vec<BbmSentence> {
        let parts = split_payload(&message.armored());
        let total = parts.len();
        parts
            .into_iter()
            .enumerate()
            .map(|(i, payload)| BbmSentence {
                talker_id: DEFAULT_TALKER_ID.to_string(),
                total,
                part: i + 1,
                sequence_id,
                channel,
                message_id: message.message_id(),
                payload,
                fill_bits: if i + 1 == total { message.fill_bits() } else { 0 },
            })
            .collect()
    }

    pub fn with_talker_id(mut self, talker_id: &str) -> Self {
        self.talker_id = talker_id.to_string();
        self
    }
}

impl fmt::Display for BbmSentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "!{}BBM,{},{},{},{},{},{},{}",
            self.talker_id,
            self.total,
            self.part,
            opt(&self.sequence_id),
            self.channel.index(),
            self.message_id,
            self.payload,
            self.fill_bits
        )
    }
}

impl Sentence for BbmSentence {}

// ============================================================================
// TSA
// ============================================================================

/// Transmit slot assignment: tells the device when to send the linked VDM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsaSentence {
    pub talker_id: String,
    pub unique_id: Option<String>,
    pub vdm_link: u8,
    /// `None`/`Both` render as channel `A`.
    pub channel: AisChannel,
    /// UTC hour and minute of the transmission.
    pub utc: Option<(u8, u8)>,
    pub start_slot: Option<u16>,
    /// Priority, defaulting to 2 when absent.
    pub priority: Option<u8>,
    pub vdm: Vec<VdmSentence>,
}

impl TsaSentence {
    /// Schedule an encoded message for immediate transmission.
    ///
    /// The linked VDM sentences carry `vdm_link` as their sequence id.
    pub fn for_message(message: &EncodedMessage, channel: AisChannel, vdm_link: u8) -> Self {
        TsaSentence {
            talker_id: DEFAULT_TALKER_ID.to_string(),
            unique_id: None,
            vdm_link,
            channel,
            utc: None,
            start_slot: None,
            priority: None,
            vdm: VdmSentence::from_message(message, channel, Some(vdm_link)),
        }
    }

    pub fn with_talker_id(mut self, talker_id: &str) -> Self {
        self.talker_id = talker_id.to_string();
        self.vdm = self
            .vdm
            .into_iter()
            .map(|s| s.with_talker_id(talker_id))
            .collect();
        self
    }

    /// The TSA line followed by its VDM lines, each checksummed.
    pub fn lines(&self) -> Vec<String> {
        std::iter::once(self.to_string_with_checksum())
            .chain(self.vdm.iter().map(|s| s.to_string_with_checksum()))
            .collect()
    }
}

impl fmt::Display for TsaSentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let utc = self
            .utc
            .map(|(hour, minute)| format!("{:02}{:02}", hour, minute))
            .unwrap_or_default();
        write!(
            f,
            "!{}TSA,{},{},{},{},{},{}",
            self.talker_id,
            self.unique_id.as_deref().unwrap_or(""),
            self.vdm_link,
            self.channel.letter().unwrap_or("A"),
            utc,
            opt(&self.start_slot),
            self.priority.unwrap_or(2)
        )
    }
}

impl Sentence for TsaSentence {}

// ============================================================================
// ABB
// ============================================================================

/// Application-specific broadcast over the VDE data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbbSentence {
    pub talker_id: String,
    pub total: usize,
    pub part: usize,
    pub sequence_id: u8,
    pub source_id: Option<String>,
    pub channel: AisChannel,
    pub asm_id: Option<u16>,
    /// 0 for binary data.
    pub format: u8,
    pub payload: String,
    pub fill_bits: u8,
}

impl AbbSentence {
    /// Frame raw bytes, splitting over as many parts as needed.
    pub fn from_bytes(bytes: &[u8], channel: AisChannel, sequence_id: u8) -> Vec<AbbSentence> {
        let mut bits = BitBuffer::from_bytes(bytes);
        let fill = bits.pad_to_multiple(6) as u8;
        let parts = split_payload(&armor(&bits));
        let total = parts.len();
        parts
            .into_iter()
            .enumerate()
            .map(|(i, payload)| AbbSentence {
                talker_id: DEFAULT_TALKER_ID.to_string(),
                total,
                part: i + 1,
                sequence_id,
                source_id: None,
                channel,
                asm_id: None,
                format: 0,
                payload,
                fill_bits: if i + 1 == total { fill } else { 0 },
            })
            .collect()
    }

    pub fn with_source_id(mut self, source_id: &str) -> Self {
        self.source_id = Some(source_id.to_string());
        self
    }

    pub fn with_talker_id(mut self, talker_id: &str) -> Self {
        self.talker_id = talker_id.to_string();
        self
    }
}

impl fmt::Display for AbbSentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "!{}ABB,{:02},{:02},{},{},{},{},{},{},{}",
            self.talker_id,
            self.total,
            self.part,
            self.sequence_id,
            self.source_id.as_deref().unwrap_or(""),
            self.channel.index(),
            opt(&self.asm_id),
            self.format,
            self.payload,
            self.fill_bits
        )
    }
}

impl Sentence for AbbSentence {}

// ============================================================================
// Base station configuration
// ============================================================================

/// Proprietary `$PVDBS` sentence carrying a base-station configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseStationSentence<'a> {
    config: &'a BaseStationConfig,
}

impl<'a> BaseStationSentence<'a> {
    pub fn new(config: &'a BaseStationConfig) -> Self {
        Self { config }
    }
}

impl fmt::Display for BaseStationSentence<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.config;
        write!(
            f,
            "$PVDBS,{},{},{},{},{},{},{},{},{},{},{},{}",
            c.unique_id.as_deref().unwrap_or(""),
            opt(&c.rx_channel_a),
            opt(&c.rx_channel_b),
            opt(&c.tx_channel_a),
            opt(&c.tx_channel_b),
            opt(&c.tx_power_a.map(|p| p.code())),
            opt(&c.tx_power_b.map(|p| p.code())),
            opt(&c.vdl_message_retries),
            opt(&c.vdl_message_repeat_indicator),
            opt(&c.ratdma_control.map(u8::from)),
            opt(&c.utc_synchronisation_source.map(|s| s.code())),
            opt(&c.ads_interval)
        )
    }
}

impl Sentence for BaseStationSentence<'_> {}

// ============================================================================
// Tag blocks
// ============================================================================

/// IEC 61162-450 tag block grouping related sentences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagBlock {
    pub total: usize,
    pub number: usize,
    pub group_id: u8,
    pub source_id: String,
    /// The complete sentence, checksum included.
    pub sentence: String,
}

impl TagBlock {
    /// Wrap a group of sentences, numbering them from 1.
    pub fn wrap_all(sentences: &[String], group_id: u8, source_id: &str) -> Vec<TagBlock> {
        sentences
            .iter()
            .enumerate()
            .map(|(i, sentence)| TagBlock {
                total: sentences.len(),
                number: i + 1,
                group_id,
                source_id: source_id.to_string(),
                sentence: sentence.clone(),
            })
            .collect()
    }
}

impl fmt::Display for TagBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = format!(
            "g:{}-{}-{},s:{}",
            self.total, self.number, self.group_id, self.source_id
        );
        write!(f, "\\{}\\{}", with_checksum(&tag), self.sentence)
    }
}
