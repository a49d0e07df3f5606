//! Error types for framewire.

use std::io;

use thiserror::Error;

/// Main error type for all transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// Configuration document could not be parsed.
    #[error("Config JSON error: {0}")]
    ConfigJson(#[from] serde_json::Error),

    /// A frame header (inbound) or payload (outbound) exceeds the size cap.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: u64, max: u32 },

    /// Stream upgrade (e.g. TLS handshake) failed.
    #[error("Stream upgrade failed: {0}")]
    Upgrade(String),

    /// A connect/send/receive deadline expired.
    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl TransportError {
    /// Whether this error is the peer going away rather than a real fault.
    ///
    /// Reset-family errors end a session like an orderly close.
    pub fn is_transport_reset(&self) -> bool {
        match self {
            TransportError::Io(e) => is_reset_kind(e.kind()),
            _ => false,
        }
    }
}

fn is_reset_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

/// Result type alias using TransportError.
pub type Result<T> = std::result::Result<T, TransportError>;
