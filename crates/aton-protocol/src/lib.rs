//! # aton-protocol
//!
//! AIS/VDES wire protocol for the AtoN broadcast engine.
//!
//! This crate provides:
//! - Bit-level packing and the AIS 6-bit text alphabet
//! - Encoders for AIS messages 6, 8 and 21
//! - NMEA sentence framing (VDM, BBM, TSA, ABB), checksums and
//!   IEC 61162-450 tag blocks
//!
//! Message encoders return padded bit strings together with the fill-bit
//! count; armoring into printable payload characters happens when a
//! sentence is framed.

pub mod bits;
pub mod codec;
pub mod messages;
pub mod sentences;

pub use bits::{bits_to_bytes, int_to_bits, text_to_bits, BitBuffer};
pub use codec::{armor, checksum, dearmor, EncodingError, SentenceError};
pub use messages::*;
pub use sentences::*;
