//! Error types for the client library.

use common::{StatusCode, XtError};
use thiserror::Error;

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Failed to establish a TCP connection to the server.
    #[error("connection error: {0}")]
    Connection(#[source] std::io::Error),

    /// Framing/decoding error on an otherwise-connected socket.
    #[error("protocol error: {0}")]
    Protocol(#[source] XtError),

    /// The server processed the request and returned a non-`Success`
    /// status code.
    #[error("server returned status {status} ({code:?})", code = StatusCode::from_code(*status))]
    Database { status: u16 },
}

impl ClientError {
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ClientError::Connection(_))
    }

    pub fn is_protocol_error(&self) -> bool {
        matches!(self, ClientError::Protocol(_))
    }

    pub fn is_database_error(&self) -> bool {
        matches!(self, ClientError::Database { .. })
    }

    /// The wire status code, if this is a `Database` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Database { status } => Some(*status),
            _ => None,
        }
    }

    /// The decoded [`StatusCode`], if this is a `Database` error and the
    /// code is one the table assigns.
    pub fn status_code(&self) -> Option<StatusCode> {
        self.status().and_then(StatusCode::from_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error() {
        let err = ClientError::Connection(std::io::Error::other("test"));
        assert!(err.is_connection_error());
        assert!(!err.is_protocol_error());
        assert!(!err.is_database_error());
        assert!(err.status().is_none());
    }

    #[test]
    fn test_protocol_error() {
        let err = ClientError::Protocol(XtError::Protocol("bad frame".into()));
        assert!(!err.is_connection_error());
        assert!(err.is_protocol_error());
        assert!(!err.is_database_error());
    }

    #[test]
    fn test_database_error() {
        let err = ClientError::Database {
            status: StatusCode::KeyNotFound.code(),
        };
        assert!(!err.is_connection_error());
        assert!(!err.is_protocol_error());
        assert!(err.is_database_error());
        assert_eq!(err.status(), Some(4));
        assert_eq!(err.status_code(), Some(StatusCode::KeyNotFound));
    }

    #[test]
    fn test_database_error_with_unassigned_code() {
        let err = ClientError::Database { status: 250 };
        assert_eq!(err.status_code(), None);
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::Connection(std::io::Error::other("connection refused"));
        assert!(err.to_string().contains("connection error"));

        let err = ClientError::Database {
            status: StatusCode::DuplicateKey.code(),
        };
        assert!(err.to_string().contains("status 5"));
    }
}
