//! Typed connect/disconnect failure reasons.

use thiserror::Error;
use tracing::warn;

/// Normalized transport failure, translated from the numeric MQTT reason
/// code the broker reports on connect and disconnect.
///
/// The taxonomy is closed: every nonzero code maps to one of these, with
/// [`TransportError::Unknown`] as the fallback for codes the table does not
/// know, so callers never see an untranslated raw number.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused: incorrect protocol version")]
    IncorrectProtocolVersion,

    #[error("connection refused: invalid client identifier")]
    InvalidClientId,

    #[error("connection refused: server unavailable")]
    ServerUnavailable,

    #[error("connection refused: bad username or password")]
    BadCredentials,

    #[error("connection refused: not authorised")]
    NotAuthorized,

    /// The robot did not accept the connection at all. Also synthesized
    /// when a periodic reconnect loop exhausts its retries.
    #[error("connection refused")]
    ConnectionRefused,

    /// Socket-level failure surfaced by the transport event loop.
    #[error("network failure: {0}")]
    Network(String),

    /// Reason code missing from the translation table.
    #[error("UNKNOWN_ERROR (reason code {0})")]
    Unknown(u8),
}

impl TransportError {
    /// Translates a numeric reason code. Code 0 means success and yields
    /// `None`; unmapped codes are logged as anomalies and tagged
    /// [`TransportError::Unknown`].
    pub fn from_reason_code(code: u8) -> Option<Self> {
        match code {
            0 => None,
            1 => Some(Self::IncorrectProtocolVersion),
            2 => Some(Self::InvalidClientId),
            3 => Some(Self::ServerUnavailable),
            4 => Some(Self::BadCredentials),
            5 => Some(Self::NotAuthorized),
            7 => Some(Self::ConnectionRefused),
            other => {
                warn!("unexpected transport reason code: {}", other);
                Some(Self::Unknown(other))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_success() {
        assert_eq!(TransportError::from_reason_code(0), None);
    }

    #[test]
    fn mapped_codes_translate() {
        assert_eq!(
            TransportError::from_reason_code(1),
            Some(TransportError::IncorrectProtocolVersion)
        );
        assert_eq!(
            TransportError::from_reason_code(4),
            Some(TransportError::BadCredentials)
        );
        assert_eq!(
            TransportError::from_reason_code(5),
            Some(TransportError::NotAuthorized)
        );
        assert_eq!(
            TransportError::from_reason_code(7),
            Some(TransportError::ConnectionRefused)
        );
    }

    #[test]
    fn unmapped_codes_become_unknown() {
        assert_eq!(
            TransportError::from_reason_code(42),
            Some(TransportError::Unknown(42))
        );
        assert!(TransportError::Unknown(42)
            .to_string()
            .contains("UNKNOWN_ERROR"));
    }
}
