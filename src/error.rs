//! Relay error kinds

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The duplex upgrade was refused; the rejection itself is answered by axum.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The inference backend could not be reached, returned a failure status, or
    /// broke off while its body was being read.
    #[error("{0}")]
    Transport(String),

    #[error("client disconnected")]
    ClientDisconnected,

    /// An inbound frame could not be decoded.
    #[error("malformed client frame: {0}")]
    ClientProtocol(String),
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_message_is_shown_verbatim() {
        let e = RelayError::Transport("connection refused".to_string());
        assert_eq!(e.to_string(), "connection refused");
    }

    #[test]
    fn test_client_protocol_message() {
        let e = RelayError::ClientProtocol("expected value at line 1 column 1".into());
        assert_eq!(
            e.to_string(),
            "malformed client frame: expected value at line 1 column 1"
        );
    }
}
