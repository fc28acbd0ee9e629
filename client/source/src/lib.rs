//! Streaming source lifecycle for pulling live A/V packets from a device.
//!
//! This crate drives the client side of the stream protocol: it opens a
//! transport, negotiates the protocol version and capabilities, then hands
//! the caller an ordered sequence of typed packets. Transports are pluggable
//! behind the [`StreamTransport`] trait; TCP is built in and any duplex byte
//! stream (a USB bulk-endpoint pipe, a test fixture) plugs in through
//! [`IoTransport`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use sysview_source::{
//!     PacketPool, StreamKind, StreamingOptions, StreamingSource, TcpTransport,
//! };
//!
//! # async fn example() -> Result<(), sysview_source::SourceError> {
//! let transport = TcpTransport::new("192.168.1.20:6668".parse().unwrap());
//! let pool = PacketPool::default();
//! let mut source = StreamingSource::new(
//!     transport,
//!     StreamKind::Both,
//!     StreamingOptions::default(),
//!     pool,
//! );
//!
//! source.connect().await?;
//! loop {
//!     let packet = source.read_next_packet().await?;
//!     if packet.header.is_error() {
//!         eprintln!("device reported: {}", packet.describe_error());
//!     }
//!     // packet.buffer returns to the pool when dropped
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod handshake;
pub mod pool;
pub mod source;
pub mod transport;

// Re-export main types
pub use error::SourceError;
pub use handshake::{check_handshake_code, negotiate};
pub use pool::{PacketPool, PoolBuffer};
pub use source::{
    ReceivedPacket, SourceEvent, SourceState, StreamKind, StreamingOptions, StreamingSource,
};
pub use transport::{IoTransport, StreamTransport, TcpTransport};
