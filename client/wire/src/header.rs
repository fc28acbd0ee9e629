//! Packet header parsing and validation.
//!
//! Every packet from the device opens with an 18-byte little-endian header,
//! immediately followed by `data_size` raw payload bytes.

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::WireError;

/// Marker value opening every packet header.
///
/// All four bytes are identical so a reader that lost framing can resync by
/// scanning the stream for four equal bytes.
pub const MAGIC_RESPONSE: u32 = 0xCCCC_CCCC;

/// Encoded packet header size in bytes
pub const PACKET_HEADER_SIZE: usize = 18;

/// Largest payload the device sends in a single packet.
///
/// A header claiming more than this indicates a desynchronized or corrupted
/// stream, not a big packet.
pub const MAX_PAYLOAD_SIZE: i32 = 0x50000;

bitflags! {
    /// Packet header flags bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PacketFlags: u8 {
        /// Payload is video bitstream data
        const VIDEO = 1 << 0;
        /// Payload is audio sample data
        const AUDIO = 1 << 1;
        /// Payload is auxiliary data
        const DATA = 1 << 2;
        /// Payload references a previously seen NAL unit instead of resending it
        const HASH = 1 << 3;
        /// Payload carries multiple NAL units
        const MULTI_NAL = 1 << 4;
        /// Payload is a structured error report, not media
        const ERROR = 1 << 5;
    }
}

/// Fixed 18-byte header preceding every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Must equal [`MAGIC_RESPONSE`]
    pub magic: u32,
    /// Payload length in bytes, excluding the header
    pub data_size: i32,
    /// Device-side capture timestamp, monotonic but not wall-clock-correlated
    pub timestamp: u64,
    /// Payload kind and interpretation flags
    pub flags: PacketFlags,
    /// Cache index for hash-replay packets
    pub replay_slot: u8,
}

// The encoded layout has no padding, keep the constant honest.
const _: () = assert!(PACKET_HEADER_SIZE == 4 + 4 + 8 + 1 + 1);

impl PacketHeader {
    /// Create a header for a payload of the given kind and size
    pub fn new(flags: PacketFlags, data_size: i32, timestamp: u64) -> Self {
        Self {
            magic: MAGIC_RESPONSE,
            data_size,
            timestamp,
            flags,
            replay_slot: 0,
        }
    }

    /// Encode the header to bytes (little-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.magic);
        buf.put_i32_le(self.data_size);
        buf.put_u64_le(self.timestamp);
        buf.put_u8(self.flags.bits());
        buf.put_u8(self.replay_slot);
    }

    /// Decode a header from bytes (little-endian).
    ///
    /// Fails with [`WireError::TruncatedHeader`] rather than returning a
    /// partially populated structure. Unknown flag bits are preserved so
    /// future devices stay parseable.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < PACKET_HEADER_SIZE {
            return Err(WireError::TruncatedHeader {
                expected: PACKET_HEADER_SIZE,
                got: raw.len(),
            });
        }

        let mut buf = raw;
        Ok(Self {
            magic: buf.get_u32_le(),
            data_size: buf.get_i32_le(),
            timestamp: buf.get_u64_le(),
            flags: PacketFlags::from_bits_retain(buf.get_u8()),
            replay_slot: buf.get_u8(),
        })
    }

    /// Structural sanity check on an inbound header.
    ///
    /// Advisory only: a `false` result means the stream is likely
    /// desynchronized, the caller decides whether to rescan or reconnect.
    /// A zero `data_size` is valid and marks a keep-alive packet.
    pub fn validate(&self) -> bool {
        if self.magic != MAGIC_RESPONSE {
            return false;
        }

        if self.data_size < 0 || self.data_size > MAX_PAYLOAD_SIZE {
            return false;
        }

        true
    }

    /// Payload is video bitstream data
    pub fn is_video(&self) -> bool {
        self.flags.contains(PacketFlags::VIDEO)
    }

    /// Payload is audio sample data
    pub fn is_audio(&self) -> bool {
        self.flags.contains(PacketFlags::AUDIO)
    }

    /// Payload replays an already transmitted NAL unit via [`Self::replay_slot`]
    pub fn is_replay(&self) -> bool {
        self.flags.contains(PacketFlags::HASH)
    }

    /// Payload carries multiple NAL units
    pub fn is_multi_nal(&self) -> bool {
        self.flags.contains(PacketFlags::MULTI_NAL)
    }

    /// Payload is a structured error report, overriding the media flags
    pub fn is_error(&self) -> bool {
        self.flags.contains(PacketFlags::ERROR)
    }

    /// Payload length as a buffer size
    pub fn payload_len(&self) -> usize {
        self.data_size.max(0) as usize
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "magic {:08X}, len {} bytes, ts {}",
            self.magic,
            self.data_size as i64 + PACKET_HEADER_SIZE as i64,
            self.timestamp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> PacketHeader {
        let mut header = PacketHeader::new(
            PacketFlags::VIDEO | PacketFlags::MULTI_NAL,
            4096,
            0x1122_3344_5566_7788,
        );
        header.replay_slot = 7;
        header
    }

    #[test]
    fn test_header_encode_decode() {
        let header = sample_header();

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);

        let decoded = PacketHeader::decode(&buf).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let header = PacketHeader::new(PacketFlags::AUDIO, 0x0102, 1);

        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        assert_eq!(&buf[0..4], &[0xCC, 0xCC, 0xCC, 0xCC]);
        assert_eq!(&buf[4..8], &[0x02, 0x01, 0x00, 0x00]);
        assert_eq!(buf[16], PacketFlags::AUDIO.bits());
    }

    #[test]
    fn test_truncated_header() {
        let mut buf = BytesMut::new();
        sample_header().encode(&mut buf);

        let err = PacketHeader::decode(&buf[..PACKET_HEADER_SIZE - 1]).unwrap_err();
        assert!(matches!(
            err,
            WireError::TruncatedHeader { expected: PACKET_HEADER_SIZE, got } if got == PACKET_HEADER_SIZE - 1
        ));
    }

    #[test]
    fn test_validate_accepts_valid_headers() {
        assert!(sample_header().validate());

        // Empty keep-alive packets are valid
        let keepalive = PacketHeader::new(PacketFlags::empty(), 0, 0);
        assert!(keepalive.validate());

        let max = PacketHeader::new(PacketFlags::VIDEO, MAX_PAYLOAD_SIZE, 0);
        assert!(max.validate());
    }

    #[test]
    fn test_validate_rejects_bad_magic_any_byte() {
        let mut buf = BytesMut::new();
        sample_header().encode(&mut buf);

        for i in 0..4 {
            let mut corrupted = buf.clone();
            corrupted[i] ^= 0x01;
            let header = PacketHeader::decode(&corrupted).unwrap();
            assert!(!header.validate(), "magic byte {i} corruption not caught");
        }
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        let oversized = PacketHeader::new(PacketFlags::VIDEO, MAX_PAYLOAD_SIZE + 1, 0);
        assert!(!oversized.validate());

        let negative = PacketHeader::new(PacketFlags::VIDEO, -1, 0);
        assert!(!negative.validate());
    }

    #[test]
    fn test_flag_predicates() {
        let header = PacketHeader::new(PacketFlags::VIDEO | PacketFlags::HASH, 0, 0);
        assert!(header.is_video());
        assert!(header.is_replay());
        assert!(!header.is_audio());
        assert!(!header.is_error());

        let error = PacketHeader::new(PacketFlags::ERROR, 32, 0);
        assert!(error.is_error());
    }

    #[test]
    fn test_unknown_flag_bits_survive_decode() {
        let mut buf = BytesMut::new();
        sample_header().encode(&mut buf);
        buf[16] |= 1 << 7;

        let header = PacketHeader::decode(&buf).unwrap();
        assert!(header.is_video());
        assert_eq!(header.flags.bits() & (1 << 7), 1 << 7);
    }
}
