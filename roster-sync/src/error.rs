//! Application-wide error types.

use thiserror::Error;

use crate::remote::RemoteResponse;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// The first four variants form the failure taxonomy of remote operations:
/// the retry executor retries network and server failures, never client
/// or decode errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error during {operation}: {message}")]
    Network { operation: String, message: String },

    #[error("Server error during {operation}: HTTP {status}")]
    Server { operation: String, status: u16 },

    #[error("Client error during {operation}: HTTP {status}")]
    Client { operation: String, status: u16 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("No active session")]
    NoSession,

    #[error("Invalid identity: {0}")]
    Identity(#[from] roster_core::CoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify a non-successful response.
    pub fn from_response(operation: impl Into<String>, response: &RemoteResponse) -> Self {
        let operation = operation.into();
        match response.status {
            None => Self::Network {
                operation,
                message: response
                    .error
                    .clone()
                    .unwrap_or_else(|| "no response".to_string()),
            },
            Some(status) if (400..500).contains(&status) => Self::Client { operation, status },
            Some(status) => Self::Server { operation, status },
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let network = Error::from_response("Heartbeat", &RemoteResponse::failed("refused"));
        assert!(matches!(network, Error::Network { .. }));

        let client = Error::from_response("Heartbeat", &RemoteResponse::new(404, ""));
        assert!(matches!(client, Error::Client { status: 404, .. }));

        let server = Error::from_response("Heartbeat", &RemoteResponse::new(503, ""));
        assert!(matches!(server, Error::Server { status: 503, .. }));
    }

    #[test]
    fn test_display() {
        let err = Error::from_response("SyncFriendList", &RemoteResponse::new(500, ""));
        assert_eq!(err.to_string(), "Server error during SyncFriendList: HTTP 500");
    }
}
