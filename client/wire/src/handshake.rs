//! Handshake wire structures.
//!
//! A fresh connection starts with the device sending a 10-byte hello block
//! identifying itself and its protocol version. The client answers with a
//! 16-byte [`ProtoHandshakeRequest`] describing what it wants to receive,
//! and the device closes the exchange with a 32-bit response code.

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::WireError;

/// Size of the hello block sent by the device
pub const HELLO_PACKET_SIZE: usize = 10;

/// Encoded handshake request size in bytes
pub const HANDSHAKE_REQUEST_SIZE: usize = 16;

/// Marker value opening every handshake request
pub const REQUEST_MAGIC: u32 = 0xAAAA_AAAA;

/// Response code the device sends when the handshake succeeded
pub const HANDSHAKE_OK_CODE: u32 = 6;

/// Hello blocks start with this literal prefix
const HELLO_PREFIX: &[u8] = b"SysDVR|";

const RESERVED_SIZE: usize = 6;

const _: () = assert!(HANDSHAKE_REQUEST_SIZE == 4 + 2 + 1 + 1 + 1 + 1 + RESERVED_SIZE);

/// Protocol version tag: the two ASCII digit characters from the hello
/// block, first character in the low byte.
///
/// Versions compare as the literal two-character string, not as a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion(u16);

impl ProtocolVersion {
    /// Protocol version "02"
    pub const V02: Self = Self::from_ascii(b'0', b'2');
    /// Protocol version "03"
    pub const V03: Self = Self::from_ascii(b'0', b'3');

    /// Pack two ASCII characters into a version tag
    pub const fn from_ascii(first: u8, second: u8) -> Self {
        Self(first as u16 | ((second as u16) << 8))
    }

    /// Raw 16-bit tag as echoed in the handshake request
    pub const fn tag(self) -> u16 {
        self.0
    }

    /// The two ASCII characters, in stream order
    pub const fn as_chars(self) -> [u8; 2] {
        [self.0 as u8, (self.0 >> 8) as u8]
    }

    /// Whether this client implements the version
    pub fn is_supported(self) -> bool {
        self == Self::V02 || self == Self::V03
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [first, second] = self.as_chars();
        write!(f, "{}{}", first as char, second as char)
    }
}

/// Parse the 10-byte hello block sent by the device on a fresh connection.
///
/// The block must read `"SysDVR|"` + two ASCII version characters + NUL.
/// A wrong prefix means the peer is not a compatible device
/// ([`WireError::ProtocolMismatch`]); a right prefix with broken framing is
/// [`WireError::MalformedHello`]. Whether the returned version is one this
/// client supports is the caller's call, see
/// [`ProtocolVersion::is_supported`].
pub fn parse_hello(data: &[u8]) -> Result<ProtocolVersion, WireError> {
    if data.len() < HELLO_PREFIX.len() || &data[..HELLO_PREFIX.len()] != HELLO_PREFIX {
        return Err(WireError::ProtocolMismatch);
    }

    if data.len() != HELLO_PACKET_SIZE || data[HELLO_PACKET_SIZE - 1] != 0 {
        return Err(WireError::MalformedHello);
    }

    let first = data[HELLO_PREFIX.len()];
    let second = data[HELLO_PREFIX.len() + 1];
    if !first.is_ascii() || !second.is_ascii() {
        return Err(WireError::MalformedHello);
    }

    Ok(ProtocolVersion::from_ascii(first, second))
}

bitflags! {
    /// Requested packet kinds
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MetaFlags: u8 {
        /// Request video packets
        const VIDEO = 1 << 0;
        /// Request audio packets
        const AUDIO = 1 << 1;
    }
}

bitflags! {
    /// Video stream negotiation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct VideoFlags: u8 {
        /// Replace duplicate NAL units with hash references
        const USE_NAL_HASHES = 1 << 0;
        /// Inject PPS/SPS parameter sets before every keyframe
        const INJECT_PPS_SPS = 1 << 1;
        /// Restrict hash replay to keyframes
        const NAL_HASHES_KEYFRAMES_ONLY = 1 << 2;
    }
}

bitflags! {
    /// Device feature negotiation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct FeatureFlags: u8 {
        /// Blank the console screen while capturing
        const TURN_OFF_CONSOLE_SCREEN = 1 << 0;
    }
}

/// Fixed 16-byte handshake request (client to device)
///
/// The trailing six reserved bytes are kept zero on the wire and are not
/// represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtoHandshakeRequest {
    /// Must equal [`REQUEST_MAGIC`]
    pub magic: u32,
    /// Echo of the version negotiated from the hello block
    pub version: ProtocolVersion,
    /// Requested packet kinds
    pub meta: MetaFlags,
    /// Video stream options
    pub video: VideoFlags,
    /// Audio frames batched per transmission
    pub audio_batching: u8,
    /// Device feature options
    pub features: FeatureFlags,
}

impl ProtoHandshakeRequest {
    /// Create an empty request echoing the negotiated version
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            magic: REQUEST_MAGIC,
            version,
            meta: MetaFlags::empty(),
            video: VideoFlags::empty(),
            audio_batching: 0,
            features: FeatureFlags::empty(),
        }
    }

    /// Encode the request to bytes (little-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.magic);
        buf.put_u16_le(self.version.tag());
        buf.put_u8(self.meta.bits());
        buf.put_u8(self.video.bits());
        buf.put_u8(self.audio_batching);
        buf.put_u8(self.features.bits());
        buf.put_bytes(0, RESERVED_SIZE);
    }

    /// Decode a request from bytes (little-endian)
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < HANDSHAKE_REQUEST_SIZE {
            return Err(WireError::TruncatedHeader {
                expected: HANDSHAKE_REQUEST_SIZE,
                got: raw.len(),
            });
        }

        let mut buf = raw;
        Ok(Self {
            magic: buf.get_u32_le(),
            version: ProtocolVersion(buf.get_u16_le()),
            meta: MetaFlags::from_bits_retain(buf.get_u8()),
            video: VideoFlags::from_bits_retain(buf.get_u8()),
            audio_batching: buf.get_u8(),
            features: FeatureFlags::from_bits_retain(buf.get_u8()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hello_current_version() {
        let version = parse_hello(b"SysDVR|03\0").unwrap();
        assert_eq!(version, ProtocolVersion::V03);
        assert_eq!(version.to_string(), "03");
        assert!(version.is_supported());
    }

    #[test]
    fn test_parse_hello_old_version() {
        let version = parse_hello(b"SysDVR|02\0").unwrap();
        assert_eq!(version, ProtocolVersion::V02);
        assert!(version.is_supported());
    }

    #[test]
    fn test_parse_hello_future_version_is_unsupported() {
        let version = parse_hello(b"SysDVR|99\0").unwrap();
        assert_eq!(version.to_string(), "99");
        assert!(!version.is_supported());
    }

    #[test]
    fn test_parse_hello_wrong_prefix() {
        assert!(matches!(
            parse_hello(b"XysDVR|03\0"),
            Err(WireError::ProtocolMismatch)
        ));
    }

    #[test]
    fn test_parse_hello_missing_terminator() {
        assert!(matches!(
            parse_hello(b"SysDVR|03X"),
            Err(WireError::MalformedHello)
        ));
    }

    #[test]
    fn test_parse_hello_non_ascii_version() {
        assert!(matches!(
            parse_hello(b"SysDVR|\xFF3\0"),
            Err(WireError::MalformedHello)
        ));
    }

    #[test]
    fn test_version_tag_packing() {
        // First character lands in the low byte
        assert_eq!(ProtocolVersion::V03.tag(), (b'0' as u16) | ((b'3' as u16) << 8));
        assert_eq!(ProtocolVersion::V03.as_chars(), [b'0', b'3']);
    }

    #[test]
    fn test_request_encode_decode_roundtrip() {
        let mut request = ProtoHandshakeRequest::new(ProtocolVersion::V03);
        request.meta = MetaFlags::VIDEO | MetaFlags::AUDIO;
        request.video =
            VideoFlags::USE_NAL_HASHES | VideoFlags::INJECT_PPS_SPS | VideoFlags::NAL_HASHES_KEYFRAMES_ONLY;
        request.audio_batching = 3;
        request.features = FeatureFlags::TURN_OFF_CONSOLE_SCREEN;

        let mut buf = BytesMut::new();
        request.encode(&mut buf);
        assert_eq!(buf.len(), HANDSHAKE_REQUEST_SIZE);

        let decoded = ProtoHandshakeRequest::decode(&buf).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn test_request_roundtrip_all_flag_combinations() {
        for meta in 0..4u8 {
            for video in 0..8u8 {
                for features in 0..2u8 {
                    let mut request = ProtoHandshakeRequest::new(ProtocolVersion::V02);
                    request.meta = MetaFlags::from_bits_retain(meta);
                    request.video = VideoFlags::from_bits_retain(video);
                    request.features = FeatureFlags::from_bits_retain(features);
                    request.audio_batching = meta ^ video;

                    let mut buf = BytesMut::new();
                    request.encode(&mut buf);
                    assert_eq!(ProtoHandshakeRequest::decode(&buf).unwrap(), request);
                }
            }
        }
    }

    #[test]
    fn test_request_reserved_bytes_are_zero() {
        let mut buf = BytesMut::new();
        ProtoHandshakeRequest::new(ProtocolVersion::V03).encode(&mut buf);
        assert_eq!(&buf[HANDSHAKE_REQUEST_SIZE - RESERVED_SIZE..], &[0u8; RESERVED_SIZE]);
    }

    #[test]
    fn test_request_truncated() {
        let mut buf = BytesMut::new();
        ProtoHandshakeRequest::new(ProtocolVersion::V03).encode(&mut buf);
        assert!(ProtoHandshakeRequest::decode(&buf[..10]).is_err());
    }
}
