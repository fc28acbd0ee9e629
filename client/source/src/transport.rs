//! Transport backends for streaming sources.
//!
//! Protocol logic only sees the [`StreamTransport`] trait; the byte-level
//! I/O behind it is pluggable. [`TcpTransport`] is the built-in network
//! variant, [`IoTransport`] adapts any already-open duplex byte stream
//! (USB bulk-endpoint pipes, in-memory test streams).

use async_trait::async_trait;
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::SourceError;
use crate::source::StreamKind;
use sysview_wire::{ProtoHandshakeRequest, HANDSHAKE_REQUEST_SIZE};

/// Byte-level backend driven by a [`StreamingSource`](crate::StreamingSource).
///
/// Contracts: `read_exact` fills the whole buffer or fails, it never returns
/// a partial read. `read_handshake_hello` and `send_handshake` are only
/// called between `connect` and the first packet read. `close` must be safe
/// to call repeatedly and on a transport that never connected.
#[async_trait]
pub trait StreamTransport: Send {
    /// Open the underlying link
    async fn connect(&mut self) -> Result<(), SourceError>;

    /// Fill `buf` completely from the stream
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SourceError>;

    /// Read the fixed-size hello block the device sends on a fresh
    /// connection, at most `max_bytes` long
    async fn read_handshake_hello(
        &mut self,
        kind: StreamKind,
        max_bytes: usize,
    ) -> Result<Vec<u8>, SourceError>;

    /// Send the negotiation request and return the device's 32-bit response
    /// code
    async fn send_handshake(&mut self, request: &ProtoHandshakeRequest)
        -> Result<u32, SourceError>;

    /// Tear down the link
    async fn close(&mut self);
}

fn not_connected() -> SourceError {
    SourceError::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "transport is not connected",
    ))
}

async fn send_handshake_over<S>(
    stream: &mut S,
    request: &ProtoHandshakeRequest,
) -> Result<u32, SourceError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = BytesMut::with_capacity(HANDSHAKE_REQUEST_SIZE);
    request.encode(&mut buf);
    stream.write_all(&buf).await?;

    let mut code = [0u8; 4];
    stream.read_exact(&mut code).await?;
    Ok(u32::from_le_bytes(code))
}

/// TCP transport connecting to the device's stream endpoint.
///
/// Each connection carries a single negotiated stream, so the stream kind
/// plays no role in the hello read.
pub struct TcpTransport {
    addr: SocketAddr,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Transport dialing `addr` on every `connect`
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, stream: None }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, SourceError> {
        self.stream.as_mut().ok_or_else(not_connected)
    }
}

#[async_trait]
impl StreamTransport for TcpTransport {
    async fn connect(&mut self) -> Result<(), SourceError> {
        // Drop any stale stream from a previous attempt first
        self.close().await;

        let stream = TcpStream::connect(self.addr).await?;
        stream.set_nodelay(true)?;
        debug!("TCP transport connected to {}", self.addr);

        self.stream = Some(stream);
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SourceError> {
        self.stream_mut()?.read_exact(buf).await?;
        Ok(())
    }

    async fn read_handshake_hello(
        &mut self,
        _kind: StreamKind,
        max_bytes: usize,
    ) -> Result<Vec<u8>, SourceError> {
        let mut hello = vec![0u8; max_bytes];
        self.read_exact(&mut hello).await?;
        Ok(hello)
    }

    async fn send_handshake(
        &mut self,
        request: &ProtoHandshakeRequest,
    ) -> Result<u32, SourceError> {
        send_handshake_over(self.stream_mut()?, request).await
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
            debug!("TCP transport to {} closed", self.addr);
        }
    }
}

/// Adapter exposing any duplex byte stream as a transport.
///
/// The stream is handed in already open, so `connect` only checks it is
/// still there. After `close` the transport cannot reconnect; backends that
/// can re-open their link (like [`TcpTransport`]) own that logic themselves,
/// USB backends re-open the endpoint externally and build a fresh adapter.
pub struct IoTransport<S> {
    stream: Option<S>,
}

impl<S> IoTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-open duplex stream
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    fn stream_mut(&mut self) -> Result<&mut S, SourceError> {
        self.stream.as_mut().ok_or_else(not_connected)
    }
}

#[async_trait]
impl<S> StreamTransport for IoTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn connect(&mut self) -> Result<(), SourceError> {
        if self.stream.is_some() {
            Ok(())
        } else {
            Err(not_connected())
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SourceError> {
        self.stream_mut()?.read_exact(buf).await?;
        Ok(())
    }

    async fn read_handshake_hello(
        &mut self,
        _kind: StreamKind,
        max_bytes: usize,
    ) -> Result<Vec<u8>, SourceError> {
        let mut hello = vec![0u8; max_bytes];
        self.read_exact(&mut hello).await?;
        Ok(hello)
    }

    async fn send_handshake(
        &mut self,
        request: &ProtoHandshakeRequest,
    ) -> Result<u32, SourceError> {
        send_handshake_over(self.stream_mut()?, request).await
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
    }
}
