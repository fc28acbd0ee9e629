//! Decoding of in-band device error packets.
//!
//! Packets with the error flag set carry a 32-byte structured report instead
//! of media data. Decoding happens on the failure-reporting path, so this
//! module returns diagnostic text instead of failing.

use bytes::Buf;
use tracing::debug;

use crate::header::PacketHeader;

/// Minimum payload length of a structured error report
pub const ERROR_REPORT_SIZE: usize = 32;

/// Error type tag for errors originating inside the device OS
const ERROR_TYPE_DEVICE_OS: u32 = 1;

/// Render a device error packet as a human-readable report.
///
/// `payload` is the packet's payload buffer, if any. Structural problems
/// (wrong flag, missing or short payload) come back as text too, this
/// function never fails.
pub fn describe_error_payload(header: &PacketHeader, payload: Option<&[u8]>) -> String {
    if !header.is_error() {
        return "packet is not an error report".to_string();
    }

    let Some(data) = payload else {
        return "error packet has no payload".to_string();
    };

    if data.len() < ERROR_REPORT_SIZE {
        return format!("error packet payload too short ({} bytes)", data.len());
    }

    let mut buf = data;
    let error_type = buf.get_u32_le();
    let error_code = buf.get_u32_le();
    let context1 = buf.get_u64_le();
    let context2 = buf.get_u64_le();
    let context3 = buf.get_u64_le();

    debug!(
        "decoding device error packet: type {} code {:#x}",
        error_type, error_code
    );

    if error_type == ERROR_TYPE_DEVICE_OS {
        format!("device OS error code 0x{error_code:x} context {context1:x} {context2:x} {context3:x}")
    } else {
        format!("unknown error type 0x{error_type:x}")
    }
}
