//! Diagnostic streaming client binary.
//!
//! Connects to a device over TCP, drives the streaming source, and logs
//! per-kind packet counters plus any in-band device error reports. Useful
//! for verifying that a device streams correctly before pointing a player
//! at it.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sysview_source::{
    PacketPool, SourceError, SourceEvent, StreamKind, StreamingOptions, StreamingSource,
    TcpTransport,
};

/// Live A/V stream client for SysDVR devices
#[derive(Parser, Debug)]
#[command(name = "sysview", version, about = "Live A/V stream client for SysDVR devices")]
struct Args {
    /// Device stream address, e.g. 192.168.1.20:6668
    #[arg(long)]
    connect: SocketAddr,

    /// Stream kinds to request: video, audio or both
    #[arg(long, default_value = "both")]
    kind: String,

    /// Audio frames batched per transmission
    #[arg(long, default_value = "2")]
    audio_batching: u8,

    /// Replace duplicate NAL units with hash references
    #[arg(long)]
    nal_replay: bool,

    /// Restrict NAL hash replay to keyframes
    #[arg(long)]
    nal_replay_keyframes_only: bool,

    /// Blank the console screen while capturing
    #[arg(long)]
    screen_off: bool,

    /// Delay before reconnecting after a stream error, e.g. 2s
    #[arg(long, default_value = "2s")]
    reconnect_delay: humantime::Duration,

    /// Interval between packet counter reports, e.g. 5s
    #[arg(long, default_value = "5s")]
    report_interval: humantime::Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_kind(kind: &str) -> Result<StreamKind> {
    match kind {
        "video" => Ok(StreamKind::Video),
        "audio" => Ok(StreamKind::Audio),
        "both" => Ok(StreamKind::Both),
        other => anyhow::bail!("unknown stream kind: {other} (expected video, audio or both)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let kind = parse_kind(&args.kind)?;
    let options = StreamingOptions {
        audio_batching: args.audio_batching,
        use_nal_replay: args.nal_replay,
        use_nal_replay_only_on_keyframes: args.nal_replay_keyframes_only,
        turn_off_console_screen: args.screen_off,
    };

    let pool = PacketPool::default();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut source = StreamingSource::new(TcpTransport::new(args.connect), kind, options, pool)
        .with_events(event_tx);

    // Ctrl-C stops the in-flight read through the cancel handle
    let cancel = source.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            cancel.cancel();
        }
    });

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SourceEvent::Connected { version } => {
                    info!("connected, protocol version {version}")
                }
                SourceEvent::Reconnected => info!("stream re-established"),
                SourceEvent::Notice(message) => info!("{message}"),
            }
        }
    });

    info!("connecting to {}", args.connect);
    source.connect().await?;

    let mut video_packets = 0u64;
    let mut audio_packets = 0u64;
    let mut last_report = Instant::now();
    let report_interval: Duration = args.report_interval.into();

    loop {
        match source.read_next_packet().await {
            Ok(packet) => {
                if packet.header.is_error() {
                    warn!("device reported: {}", packet.describe_error());
                } else if packet.header.is_video() {
                    video_packets += 1;
                } else if packet.header.is_audio() {
                    audio_packets += 1;
                }

                if last_report.elapsed() >= report_interval {
                    info!("{video_packets} video / {audio_packets} audio packets received");
                    last_report = Instant::now();
                }
            }

            Err(SourceError::Cancelled) => break,

            Err(SourceError::BadHeader(header)) => {
                warn!("stream desynchronized ({header}), flushing");
                if reconnect(&mut source, Duration::ZERO).await.is_break() {
                    break;
                }
            }

            Err(err) => {
                error!("stream error: {err}");
                if reconnect(&mut source, args.reconnect_delay.into())
                    .await
                    .is_break()
                {
                    break;
                }
            }
        }
    }

    source.stop_streaming().await;
    info!("stopped after {video_packets} video / {audio_packets} audio packets");
    Ok(())
}

/// Flush the source after a delay; `Break` means shutdown was requested.
async fn reconnect(
    source: &mut StreamingSource<TcpTransport>,
    delay: Duration,
) -> std::ops::ControlFlow<()> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    match source.flush().await {
        Ok(()) => std::ops::ControlFlow::Continue(()),
        Err(SourceError::Cancelled) => std::ops::ControlFlow::Break(()),
        Err(err) => {
            // Stay in the retry loop, the next read maps to another flush
            warn!("reconnect failed: {err}");
            std::ops::ControlFlow::Continue(())
        }
    }
}
