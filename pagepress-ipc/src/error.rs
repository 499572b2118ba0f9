//! IPC error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
}

impl IpcError {
    /// A malformed message: drop it and keep reading. Everything else means
    /// the pipe itself is gone.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            IpcError::Deserialization(_) | IpcError::VersionMismatch { .. }
        )
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        IpcError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            IpcError::Deserialization(err.to_string())
        } else {
            IpcError::Serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_classification() {
        assert!(IpcError::Deserialization("bad json".to_string()).is_malformed());
        assert!(IpcError::VersionMismatch {
            expected: 1,
            actual: 2
        }
        .is_malformed());
        assert!(!IpcError::Io("pipe broke".to_string()).is_malformed());
        assert!(!IpcError::ConnectionClosed.is_malformed());
    }
}
