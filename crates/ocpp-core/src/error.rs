//! Engine error types and event codes.

// ── Event codes reported through `CommunicatorEvents::on_error` ─────

/// A send was attempted without a connection and could not be queued.
pub const NOT_CONNECTED: &str = "Not connected";
/// A confirmation completion hook returned an error.
pub const CONFIRMATION_COMPLETED_HANDLER_FAILED: &str = "ConfirmationCompletedHandlerFailed";

/// Payload packing or unpacking failed.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload could not be converted to or from its wire form.
    #[error("conversion failed: {message}")]
    Conversion {
        /// Description of the failed conversion.
        message: String,
    },
}

/// Transport-level failure reported by a [`Radio`](crate::radio::Radio).
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    /// The transport is closed or the peer is unreachable.
    #[error("not connected")]
    NotConnected,

    /// The connection attempt itself failed.
    #[error("connect failed: {message}")]
    ConnectFailed {
        /// Description of the handshake or dial failure.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_error_display() {
        let err = CodecError::Conversion {
            message: "missing field".into(),
        };
        assert_eq!(err.to_string(), "conversion failed: missing field");
    }

    #[test]
    fn radio_error_display() {
        assert_eq!(RadioError::NotConnected.to_string(), "not connected");
        let err = RadioError::ConnectFailed {
            message: "refused".into(),
        };
        assert_eq!(err.to_string(), "connect failed: refused");
    }
}
