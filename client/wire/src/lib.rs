//! Wire structures for the device streaming protocol.
//!
//! This crate implements the byte-exact, little-endian wire format spoken by
//! the console sysmodule: the 18-byte packet header that precedes every
//! media payload, the 10-byte hello block and 16-byte negotiation request
//! exchanged during the handshake, and the structured error reports the
//! device can send in-band.
//!
//! ## Wire Format
//!
//! ```text
//! handshake hello  (device -> client): "SysDVR|" + 2 version digits + NUL   (10 bytes)
//! handshake request (client -> device): ProtoHandshakeRequest               (16 bytes)
//! handshake response (device -> client): u32 response code, 6 = OK          (4 bytes)
//! packet            (device -> client): PacketHeader + data_size raw bytes  (18 + N bytes)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod error_report;
pub mod handshake;
pub mod header;

// Re-export main types
pub use error::WireError;
pub use error_report::{describe_error_payload, ERROR_REPORT_SIZE};
pub use handshake::{
    parse_hello, FeatureFlags, MetaFlags, ProtoHandshakeRequest, ProtocolVersion, VideoFlags,
    HANDSHAKE_OK_CODE, HANDSHAKE_REQUEST_SIZE, HELLO_PACKET_SIZE, REQUEST_MAGIC,
};
pub use header::{
    PacketFlags, PacketHeader, MAGIC_RESPONSE, MAX_PAYLOAD_SIZE, PACKET_HEADER_SIZE,
};
