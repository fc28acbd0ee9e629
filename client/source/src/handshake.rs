//! Capability negotiation with the device.
//!
//! Runs once per connection before any media packet is accepted: read the
//! hello block, validate the advertised version, send the 16-byte request,
//! check the response code.

use tracing::{debug, info};

use crate::error::SourceError;
use crate::source::{StreamKind, StreamingOptions};
use crate::transport::StreamTransport;
use sysview_wire::{
    parse_hello, MetaFlags, ProtoHandshakeRequest, ProtocolVersion, VideoFlags,
    FeatureFlags, HANDSHAKE_OK_CODE, HELLO_PACKET_SIZE,
};

/// Response code the device sends when it rejects the echoed version
const CODE_WRONG_VERSION: u32 = 1;

/// Map a device handshake response code to a result.
///
/// Code 1 means the version was rejected even though it passed the local
/// support check; other non-OK codes are internal device checks and carry no
/// further meaning on this side.
pub fn check_handshake_code(code: u32) -> Result<(), SourceError> {
    match code {
        HANDSHAKE_OK_CODE => Ok(()),
        CODE_WRONG_VERSION => Err(SourceError::HandshakeVersionRejected),
        other => Err(SourceError::HandshakeFailed(other)),
    }
}

fn build_request(
    version: ProtocolVersion,
    kind: StreamKind,
    options: &StreamingOptions,
) -> ProtoHandshakeRequest {
    let mut request = ProtoHandshakeRequest::new(version);

    if kind.wants_video() {
        request.meta |= MetaFlags::VIDEO;
    }
    if kind.wants_audio() {
        request.meta |= MetaFlags::AUDIO;
    }

    // Parameter sets are always injected so decoders can start mid-stream
    request.video = VideoFlags::INJECT_PPS_SPS;
    if options.use_nal_replay {
        request.video |= VideoFlags::USE_NAL_HASHES;
    }
    if options.use_nal_replay_only_on_keyframes {
        request.video |= VideoFlags::NAL_HASHES_KEYFRAMES_ONLY;
    }

    request.audio_batching = options.audio_batching;
    if options.turn_off_console_screen {
        request.features |= FeatureFlags::TURN_OFF_CONSOLE_SCREEN;
    }

    request
}

/// Perform the full negotiation over `transport`.
///
/// Must complete before the first packet read; on success the device starts
/// streaming the requested packet kinds.
pub async fn negotiate<T: StreamTransport + ?Sized>(
    transport: &mut T,
    kind: StreamKind,
    options: &StreamingOptions,
) -> Result<ProtocolVersion, SourceError> {
    let hello = transport.read_handshake_hello(kind, HELLO_PACKET_SIZE).await?;
    let version = parse_hello(&hello)?;

    if !version.is_supported() {
        return Err(SourceError::UnsupportedVersion(version));
    }
    debug!("device speaks protocol version {version}");

    let request = build_request(version, kind, options);
    let code = transport.send_handshake(&request).await?;
    check_handshake_code(code)?;

    info!("handshake complete, streaming {kind:?} on protocol version {version}");
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::IoTransport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use sysview_wire::HANDSHAKE_REQUEST_SIZE;

    async fn run_device(mut device: DuplexStream, hello: &[u8], code: u32) -> Option<ProtoHandshakeRequest> {
        device.write_all(hello).await.unwrap();

        let mut raw = [0u8; HANDSHAKE_REQUEST_SIZE];
        if device.read_exact(&mut raw).await.is_err() {
            return None;
        }
        device.write_all(&code.to_le_bytes()).await.unwrap();
        Some(ProtoHandshakeRequest::decode(&raw).unwrap())
    }

    async fn negotiate_against(
        hello: &'static [u8],
        code: u32,
        kind: StreamKind,
        options: StreamingOptions,
    ) -> (Result<ProtocolVersion, SourceError>, Option<ProtoHandshakeRequest>) {
        let (client, device) = tokio::io::duplex(256);
        let device_task = tokio::spawn(run_device(device, hello, code));

        let mut transport = IoTransport::new(client);
        let result = negotiate(&mut transport, kind, &options).await;
        drop(transport);

        (result, device_task.await.unwrap())
    }

    #[tokio::test]
    async fn test_negotiation_success() {
        let options = StreamingOptions {
            audio_batching: 3,
            use_nal_replay: true,
            use_nal_replay_only_on_keyframes: true,
            turn_off_console_screen: true,
        };
        let (result, request) =
            negotiate_against(b"SysDVR|03\0", 6, StreamKind::Both, options).await;

        assert_eq!(result.unwrap(), ProtocolVersion::V03);

        let request = request.unwrap();
        assert_eq!(request.version, ProtocolVersion::V03);
        assert!(request.meta.contains(MetaFlags::VIDEO | MetaFlags::AUDIO));
        assert!(request.video.contains(
            VideoFlags::USE_NAL_HASHES
                | VideoFlags::INJECT_PPS_SPS
                | VideoFlags::NAL_HASHES_KEYFRAMES_ONLY
        ));
        assert_eq!(request.audio_batching, 3);
        assert!(request
            .features
            .contains(FeatureFlags::TURN_OFF_CONSOLE_SCREEN));
    }

    #[tokio::test]
    async fn test_negotiation_video_only_request() {
        let (result, request) = negotiate_against(
            b"SysDVR|02\0",
            6,
            StreamKind::Video,
            StreamingOptions::default(),
        )
        .await;

        assert_eq!(result.unwrap(), ProtocolVersion::V02);

        let request = request.unwrap();
        assert!(request.meta.contains(MetaFlags::VIDEO));
        assert!(!request.meta.contains(MetaFlags::AUDIO));
        // PPS/SPS injection is unconditional
        assert!(request.video.contains(VideoFlags::INJECT_PPS_SPS));
    }

    #[tokio::test]
    async fn test_unsupported_version_sends_no_request() {
        let (result, request) = negotiate_against(
            b"SysDVR|99\0",
            6,
            StreamKind::Both,
            StreamingOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(SourceError::UnsupportedVersion(v)) if v.to_string() == "99"));
        assert!(request.is_none(), "no request should reach the device");
    }

    #[tokio::test]
    async fn test_wrong_prefix_fails_with_mismatch() {
        let (result, _) = negotiate_against(
            b"XysDVR|03\0",
            6,
            StreamKind::Both,
            StreamingOptions::default(),
        )
        .await;

        assert!(matches!(
            result,
            Err(SourceError::Wire(sysview_wire::WireError::ProtocolMismatch))
        ));
    }

    #[tokio::test]
    async fn test_version_rejected_by_device() {
        let (result, _) = negotiate_against(
            b"SysDVR|03\0",
            1,
            StreamKind::Both,
            StreamingOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(SourceError::HandshakeVersionRejected)));
    }

    #[tokio::test]
    async fn test_other_code_is_opaque_failure() {
        let (result, _) = negotiate_against(
            b"SysDVR|03\0",
            42,
            StreamKind::Both,
            StreamingOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(SourceError::HandshakeFailed(42))));
    }
}
