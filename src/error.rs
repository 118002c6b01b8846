// MIT License - Copyright (c) 2026 Peter Wright
// Error types

/// All errors that can occur in the miio-lan-bridge library.
///
/// Call-level failures reported by a device (vendor errors, reply timeouts)
/// are not errors: they come back as a [`CallResult`](crate::protocol::CallResult)
/// with a non-zero status code.
#[derive(Debug, thiserror::Error)]
pub enum MiioError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Packet too short: {len} bytes (header is 32)")]
    PacketTooShort { len: usize },

    #[error("Bad packet magic: {found:#06x}")]
    BadMagic { found: u16 },

    #[error("Payload decryption failed")]
    Decrypt,

    #[error("Invalid token: {reason}")]
    InvalidToken { reason: String },

    #[error("Handshake timeout")]
    HandshakeTimeout,

    #[error("Unsupported device model: {model}")]
    UnsupportedModel { model: String },

    #[error("Payload too large: {len} bytes")]
    PayloadTooLarge { len: usize },

    #[error("Cannot load device info for {id}")]
    InfoUnavailable { id: String },

    #[error("Report ingestor started already")]
    AlreadyStarted,

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Channel closed")]
    ChannelClosed,
}

impl MiioError {
    /// Whether the error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MiioError::Io(_)
                | MiioError::HandshakeTimeout
                | MiioError::InfoUnavailable { .. }
                | MiioError::Mqtt(_)
                | MiioError::ChannelClosed
        )
    }

    /// Whether the error is a framing problem with a single datagram.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            MiioError::PacketTooShort { .. } | MiioError::BadMagic { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MiioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(MiioError::HandshakeTimeout.is_retryable());
        assert!(MiioError::ChannelClosed.is_retryable());
        assert!(!MiioError::Decrypt.is_retryable());
        assert!(!MiioError::AlreadyStarted.is_retryable());
    }

    #[test]
    fn test_framing_classification() {
        assert!(MiioError::BadMagic { found: 0x1234 }.is_framing());
        assert!(MiioError::PacketTooShort { len: 3 }.is_framing());
        assert!(!MiioError::Decrypt.is_framing());
        assert!(!MiioError::PayloadTooLarge { len: 70_000 }.is_framing());
    }

    #[test]
    fn test_bad_magic_display() {
        let e = MiioError::BadMagic { found: 0xbeef };
        assert_eq!(e.to_string(), "Bad packet magic: 0xbeef");
    }
}
