//! Datagram codec for telegrams
//!
//! Every telegram travels in exactly one UDP datagram as a JSON document:
//! ```text
//! { "device_id": "V7", "cmd_key": "rptac", "next_point_names": ["P1"], ... }
//! ```
//!
//! Datagrams carry their own boundaries, so no length prefix is written.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::Telegram;

/// Maximum datagram size (64 KiB), matching the receive buffer
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Datagram too large: {0} bytes (max: {MAX_DATAGRAM_SIZE})")]
    DatagramTooLarge(usize),

    #[error("Empty datagram")]
    Empty,

    #[error("Telegram has no device id")]
    MissingDeviceId,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a telegram into a single datagram payload
pub fn encode(telegram: &Telegram) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(256).writer();
    serde_json::to_writer(&mut buf, telegram)?;
    let buf = buf.into_inner();

    if buf.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::DatagramTooLarge(buf.len()));
    }

    Ok(buf.freeze())
}

/// Decode a telegram from a received datagram payload
pub fn decode(datagram: &[u8]) -> Result<Telegram, CodecError> {
    if datagram.is_empty() {
        return Err(CodecError::Empty);
    }
    if datagram.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::DatagramTooLarge(datagram.len()));
    }

    let telegram: Telegram = serde_json::from_slice(datagram)?;
    if telegram.device_id.is_empty() {
        return Err(CodecError::MissingDeviceId);
    }

    Ok(telegram)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PathStep;

    #[test]
    fn test_decode_minimal_report() {
        let datagram = br#"{"device_id":"V7","cmd_key":"rptac","next_point_names":["P1"]}"#;
        let telegram = decode(datagram).expect("decode failed");

        assert_eq!(telegram.device_id, "V7");
        assert_eq!(telegram.reported_point(), Some("P1"));
        assert!(telegram.params.path_steps.is_none());
        assert!(telegram.handshake_key.is_empty());
    }

    #[test]
    fn test_route_survives_encoding() {
        let route = Telegram::new("V7", "route")
            .with_points(["P1", "P2"])
            .with_path_steps(vec![PathStep::new("P1", "move"), PathStep::new("P2", "stop")]);

        let encoded = encode(&route).expect("encode failed");
        let decoded = decode(&encoded).expect("decode failed");

        assert_eq!(decoded, route);
    }

    #[test]
    fn test_empty_datagram() {
        assert!(matches!(decode(b""), Err(CodecError::Empty)));
    }

    #[test]
    fn test_missing_device_id() {
        let datagram = br#"{"device_id":"","cmd_key":"rptac"}"#;
        assert!(matches!(decode(datagram), Err(CodecError::MissingDeviceId)));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(decode(b"##V7,rptac##"), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_oversized_telegram() {
        let route = Telegram::new("V7", "route").with_raw("x".repeat(MAX_DATAGRAM_SIZE));
        assert!(matches!(encode(&route), Err(CodecError::DatagramTooLarge(_))));
    }
}
