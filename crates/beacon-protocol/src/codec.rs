//! Codec for encoding and decoding Beacon messages.
//!
//! Messages are carried as one JSON object per transport frame, so no
//! length prefix is needed: the transport already delimits frames.

use bytes::Bytes;
use thiserror::Error;

use crate::message::Message;

/// Default maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a message to bytes.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    FrameCodec::default().encode(message)
}

/// Decode a message from bytes.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid message.
pub fn decode(data: &[u8]) -> Result<Message, ProtocolError> {
    FrameCodec::default().decode(data)
}

/// Codec with a configurable frame size limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl FrameCodec {
    /// Create a codec that rejects frames larger than `max_frame_size`.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Get the frame size limit.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a message to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the result is too large.
    pub fn encode(&self, message: &Message) -> Result<Bytes, ProtocolError> {
        let payload = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;
        self.check_size(payload.len())?;
        Ok(Bytes::from(payload))
    }

    /// Decode a message from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or invalid.
    pub fn decode(&self, data: &[u8]) -> Result<Message, ProtocolError> {
        self.check_size(data.len())?;
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[test]
    fn test_decode_wire_examples() {
        let init = decode(br#"{"type":"init","content":"abc"}"#).unwrap();
        assert_eq!(init.kind, MessageType::Init);
        assert_eq!(init.content_str(), Some("abc"));

        let private = decode(br#"{"type":"private","clientId":"123456789","content":{"sdp":"v=0"}}"#)
            .unwrap();
        assert_eq!(private.kind, MessageType::Private);
        assert_eq!(private.client_id.as_deref(), Some("123456789"));
    }

    #[test]
    fn test_encode_omits_absent_fields() {
        let encoded = encode(&Message::room("r1", "hi")).unwrap();
        assert_eq!(&encoded[..], br#"{"type":"room","roomId":"r1","content":"hi"}"#);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode(b"not json"), Err(ProtocolError::Decode(_))));
        assert!(matches!(decode(b"{}"), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_frame_too_large() {
        let codec = FrameCodec::with_max_frame_size(16);
        let data = br#"{"type":"global","content":"0123456789"}"#;
        match codec.decode(data) {
            Err(ProtocolError::FrameTooLarge { size, max }) => {
                assert_eq!(size, data.len());
                assert_eq!(max, 16);
            }
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }

        assert!(matches!(
            codec.encode(&Message::global("0123456789")),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }
}
