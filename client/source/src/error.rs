//! Streaming source error types.

use thiserror::Error;

use crate::source::SourceState;
use sysview_wire::{PacketHeader, ProtocolVersion, WireError};

/// Errors surfaced by a streaming source.
///
/// Negotiation failures are distinguished because the troubleshooting
/// guidance differs: a [`WireError::ProtocolMismatch`] means the peer is not
/// a compatible device at all, while version errors usually mean one side
/// needs an update.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Structural wire-format failure
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Transport-level I/O failure
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The device speaks a protocol version this client does not implement
    #[error("unsupported protocol version {0}, make sure the client and the console sysmodule are both up to date")]
    UnsupportedVersion(ProtocolVersion),

    /// The device rejected a version that passed the local support check,
    /// protocol logic is stale on one of the two sides
    #[error("the console rejected the protocol version, make sure the client and the console sysmodule are both up to date")]
    HandshakeVersionRejected,

    /// The device refused the handshake with an internal error code
    #[error("handshake failed: device error code {0}")]
    HandshakeFailed(u32),

    /// An inbound header failed validation, the stream is likely desynchronized
    #[error("corrupted packet header ({0})")]
    BadHeader(PacketHeader),

    /// The operation was aborted by a cooperative cancellation request
    #[error("operation cancelled")]
    Cancelled,

    /// An operation was attempted in the wrong lifecycle state
    #[error("invalid operation in state {actual:?}, expected {expected:?}")]
    WrongState {
        /// State the source is actually in
        actual: SourceState,
        /// State the operation requires
        expected: SourceState,
    },
}
