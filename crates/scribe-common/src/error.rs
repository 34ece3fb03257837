use thiserror::Error;

/// Failures reported by host-side collaborators (capture, storage, transport).
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    // ============================================================
    // Capture Errors
    // ============================================================
    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Capture refused: context {0} is not the recording owner")]
    NotOwner(String),

    // ============================================================
    // Navigation Errors
    // ============================================================
    #[error("Navigation failed: {0}")]
    Navigation(String),

    // ============================================================
    // Storage Errors
    // ============================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ============================================================
    // Transport Errors
    // ============================================================
    #[error("Timeout: {operation}")]
    Timeout { operation: String },

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Not ready")]
    NotReady,

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Other: {0}")]
    Other(String),
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Serialization(e.to_string())
    }
}
