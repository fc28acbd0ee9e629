//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// A fixed-size structure was cut short by the transport
    #[error("truncated header: got {got} of {expected} bytes")]
    TruncatedHeader {
        /// Bytes the structure requires
        expected: usize,
        /// Bytes actually available
        got: usize,
    },

    /// The hello block does not carry the expected protocol prefix
    #[error("the device did not identify as a compatible sysmodule, check that it is running and up to date")]
    ProtocolMismatch,

    /// The hello block carries the right prefix but is structurally broken
    #[error("malformed handshake hello packet")]
    MalformedHello,
}
