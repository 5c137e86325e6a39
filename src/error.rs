use thiserror::Error;

/// Errors surfaced by the routing core.
///
/// Mirrors the shape of a transport-layer error enum: one variant per
/// failure class named in the error handling design, each carrying enough
/// context to log without the caller re-deriving it.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("storage error during {operation}: {reason}")]
    Storage { operation: String, reason: String },

    #[error("no connected neighbors")]
    NoNeighbors,

    #[error("no route to destination")]
    NoRoute,

    #[error("transport send to {neighbor} failed: {reason}")]
    TransportSend { neighbor: String, reason: String },

    #[error("encryption failed for peer {peer}: {reason}")]
    EncryptFailed { peer: String, reason: String },

    #[error("decryption failed for peer {peer}: {reason}")]
    DecryptFailed { peer: String, reason: String },

    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },
}

impl RoutingError {
    pub fn storage(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RoutingError::Storage {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<rusqlite::Error> for RoutingError {
    fn from(err: rusqlite::Error) -> Self {
        RoutingError::Storage {
            operation: "sqlite".to_string(),
            reason: err.to_string(),
        }
    }
}
