//! Streaming source lifecycle.
//!
//! A [`StreamingSource`] owns one transport and walks it through
//! `Disconnected -> Connecting -> Handshaking -> Streaming -> Stopped`,
//! handing the caller one validated packet per read. `flush` tears the
//! transport down and re-handshakes without leaving the active region, so
//! callers recover from a desynchronized stream without a new `connect`.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::handshake;
use crate::pool::{PacketPool, PoolBuffer};
use crate::transport::StreamTransport;
use sysview_wire::{describe_error_payload, PacketHeader, ProtocolVersion, PACKET_HEADER_SIZE};

/// Which packet kinds a source requests from the device; fixed for the
/// source's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    /// Video packets only
    Video,
    /// Audio packets only
    Audio,
    /// Both kinds over one stream
    Both,
}

impl StreamKind {
    /// Whether video packets are requested
    pub fn wants_video(self) -> bool {
        matches!(self, StreamKind::Video | StreamKind::Both)
    }

    /// Whether audio packets are requested
    pub fn wants_audio(self) -> bool {
        matches!(self, StreamKind::Audio | StreamKind::Both)
    }
}

/// Immutable configuration supplied at source construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingOptions {
    /// Audio frames batched per transmission
    pub audio_batching: u8,
    /// Ask the device to replace duplicate NAL units with hash references
    pub use_nal_replay: bool,
    /// Restrict hash replay to keyframes
    pub use_nal_replay_only_on_keyframes: bool,
    /// Blank the console screen while capturing
    pub turn_off_console_screen: bool,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            audio_batching: 2,
            use_nal_replay: false,
            use_nal_replay_only_on_keyframes: false,
            turn_off_console_screen: false,
        }
    }
}

/// Lifecycle states of a streaming source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// No transport open
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport open, negotiation in progress
    Handshaking,
    /// Delivering packets
    Streaming,
    /// Shut down for good
    Stopped,
}

/// Non-fatal notifications emitted by a source.
///
/// Delivery is best-effort over the channel registered with
/// [`StreamingSource::with_events`]; this is a notification path, never an
/// error path.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// Handshake completed on a fresh connection
    Connected {
        /// Version negotiated with the device
        version: ProtocolVersion,
    },
    /// A flush re-established the stream
    Reconnected,
    /// Free-form user-relevant message
    Notice(String),
}

/// A parsed header paired with its payload buffer, if any
#[derive(Debug)]
pub struct ReceivedPacket {
    /// The validated packet header
    pub header: PacketHeader,
    /// Pool-owned payload, `None` exactly when `data_size` is zero.
    /// Dropping it returns the storage to the pool.
    pub buffer: Option<PoolBuffer>,
}

impl ReceivedPacket {
    /// Payload bytes, empty for keep-alive packets
    pub fn payload(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }

    /// Human-readable report for packets with the error flag set.
    ///
    /// Never fails, structural problems come back as diagnostic text.
    pub fn describe_error(&self) -> String {
        describe_error_payload(&self.header, self.buffer.as_deref())
    }
}

/// Client-side source producing an ordered sequence of typed packets from
/// one device stream.
///
/// Not safe for concurrent reads; to interrupt an in-flight read from
/// another task, trigger the token from [`Self::cancel_handle`] (that is
/// the cross-task form of `stop_streaming`).
pub struct StreamingSource<T> {
    transport: T,
    kind: StreamKind,
    options: StreamingOptions,
    pool: PacketPool,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<SourceEvent>>,
    state: SourceState,
}

impl<T: StreamTransport> StreamingSource<T> {
    /// Create a source over `transport`, requesting `kind` packets
    pub fn new(transport: T, kind: StreamKind, options: StreamingOptions, pool: PacketPool) -> Self {
        Self {
            transport,
            kind,
            options,
            pool,
            cancel: CancellationToken::new(),
            events: None,
            state: SourceState::Disconnected,
        }
    }

    /// Register a channel for non-fatal notifications
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SourceEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Token other tasks use to interrupt an in-flight operation.
    ///
    /// Cancelling it makes the pending read fail with
    /// [`SourceError::Cancelled`] and moves the source to `Stopped`.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Which packet kinds this source requests
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// The configuration this source was built with
    pub fn options(&self) -> &StreamingOptions {
        &self.options
    }

    fn emit(&self, event: SourceEvent) {
        if let Some(events) = &self.events {
            events.send(event).ok();
        }
    }

    /// Open the transport and negotiate the stream.
    ///
    /// On failure the transport is torn down before returning, so the source
    /// stays usable for another attempt without leaking resources; retry
    /// policy is the caller's.
    pub async fn connect(&mut self) -> Result<(), SourceError> {
        if self.state != SourceState::Disconnected {
            return Err(SourceError::WrongState {
                actual: self.state,
                expected: SourceState::Disconnected,
            });
        }

        self.state = SourceState::Connecting;
        match self.establish().await {
            Ok(version) => {
                self.state = SourceState::Streaming;
                self.emit(SourceEvent::Connected { version });
                Ok(())
            }
            Err(err) => {
                self.fail_connection(&err).await;
                Err(err)
            }
        }
    }

    /// Read one packet; valid only while `Streaming`.
    ///
    /// Suspends until the transport delivers bytes. Cancellation is observed
    /// at the start of the header read and of the payload read; a read
    /// cancelled after bytes were consumed closes the transport, a header is
    /// never left half-read on a connection that keeps being used.
    pub async fn read_next_packet(&mut self) -> Result<ReceivedPacket, SourceError> {
        if self.state != SourceState::Streaming {
            return Err(SourceError::WrongState {
                actual: self.state,
                expected: SourceState::Streaming,
            });
        }

        let mut raw = [0u8; PACKET_HEADER_SIZE];
        self.read_or_cancel(&mut raw).await?;

        let header = PacketHeader::decode(&raw)?;
        if !header.validate() {
            // Resynchronization policy is the caller's: flush or abort
            warn!("received a corrupted packet header: {header}");
            return Err(SourceError::BadHeader(header));
        }

        if header.data_size == 0 {
            return Ok(ReceivedPacket {
                header,
                buffer: None,
            });
        }

        let mut buffer = self.pool.checkout(header.payload_len());
        // On cancellation the buffer drops here and returns to the pool
        self.read_or_cancel(&mut buffer).await?;

        Ok(ReceivedPacket {
            header,
            buffer: Some(buffer),
        })
    }

    /// Discard transport state and re-establish the stream.
    ///
    /// Recovers from a desynchronized stream by forcing a reconnect and a
    /// fresh handshake. The source never leaves the active region: on
    /// success it is `Streaming` again and the caller does not `connect`.
    pub async fn flush(&mut self) -> Result<(), SourceError> {
        if self.state == SourceState::Stopped {
            return Err(SourceError::WrongState {
                actual: self.state,
                expected: SourceState::Streaming,
            });
        }

        info!("flushing stream state, reconnecting to the device");
        self.transport.close().await;
        self.state = SourceState::Connecting;

        match self.establish().await {
            Ok(version) => {
                self.state = SourceState::Streaming;
                debug!("stream re-established on protocol version {version}");
                self.emit(SourceEvent::Reconnected);
                Ok(())
            }
            Err(err) => {
                self.fail_connection(&err).await;
                Err(err)
            }
        }
    }

    /// Stop streaming for good and tear down the transport.
    ///
    /// Idempotent. Interrupts an in-flight read through the cancellation
    /// token, which is an expected outcome and not a peer failure.
    pub async fn stop_streaming(&mut self) {
        self.cancel.cancel();

        if self.state != SourceState::Stopped {
            self.transport.close().await;
            self.state = SourceState::Stopped;
            debug!("streaming source stopped");
        }
    }

    async fn establish(&mut self) -> Result<ProtocolVersion, SourceError> {
        let cancelled = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => true,
            result = self.transport.connect() => {
                result?;
                false
            }
        };
        if cancelled {
            return Err(SourceError::Cancelled);
        }

        self.state = SourceState::Handshaking;
        let negotiated = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = handshake::negotiate(&mut self.transport, self.kind, &self.options) => {
                Some(result?)
            }
        };
        negotiated.ok_or(SourceError::Cancelled)
    }

    async fn fail_connection(&mut self, err: &SourceError) {
        self.transport.close().await;
        self.state = if matches!(err, SourceError::Cancelled) {
            SourceState::Stopped
        } else {
            SourceState::Disconnected
        };
    }

    async fn read_or_cancel(&mut self, buf: &mut [u8]) -> Result<(), SourceError> {
        let cancelled = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => true,
            result = self.transport.read_exact(buf) => {
                result?;
                false
            }
        };

        if cancelled {
            // The read may have consumed part of a header or payload, the
            // connection must not be reused
            self.transport.close().await;
            self.state = SourceState::Stopped;
            return Err(SourceError::Cancelled);
        }
        Ok(())
    }
}

impl<T> Drop for StreamingSource<T> {
    fn drop(&mut self) {
        // Transports close with their streams; make sure nothing keeps
        // waiting on our token
        self.cancel.cancel();
    }
}
