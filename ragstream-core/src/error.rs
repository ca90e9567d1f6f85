//! Error types for the Ragstream core library.
//!
//! Uses `thiserror` for public API error types. Streaming failures are kept
//! separate from REST and configuration failures so callers can decide which
//! ones are local to a single channel.

use std::path::PathBuf;

/// Top-level error type for the Ragstream core library.
#[derive(Debug, thiserror::Error)]
pub enum RagstreamError {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by streaming channels and the protocols running on them.
///
/// `MalformedEvent` and `ProtocolViolation` are recoverable: the offending
/// frame is dropped and the channel keeps running. `Transport` and `Timeout`
/// end the channel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("Malformed event: {reason}")]
    MalformedEvent { reason: String },

    #[error("Protocol violation on {key}: {reason}")]
    ProtocolViolation { key: String, reason: String },

    #[error("Transport error on {key}: {message}")]
    Transport { key: String, message: String },

    #[error("No terminal event on {key} within {after_secs}s")]
    Timeout { key: String, after_secs: u64 },

    #[error("Channel {key} is receive-only")]
    NotWritable { key: String },

    #[error("No live channel for {key}")]
    UnknownChannel { key: String },

    #[error("A turn is already streaming for conversation {conversation_id}")]
    TurnInProgress { conversation_id: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid stream key: {key}")]
    InvalidKey { key: String },
}

impl StreamError {
    /// Whether the channel survives this error (the frame is simply dropped).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StreamError::MalformedEvent { .. } | StreamError::ProtocolViolation { .. }
        )
    }
}

/// Errors from the non-streaming backend endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Server returned {status} for {url}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("Could not decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid base URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `RagstreamError`.
pub type Result<T> = std::result::Result<T, RagstreamError>;
