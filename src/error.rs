//! Error types for the dispatch gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the dispatch gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed or unreadable transcript record
    #[error("ingestion error: {0}")]
    Ingestion(String),

    /// Language model error (timeout, transport, quota)
    #[error("model error: {0}")]
    Model(String),

    /// Tool invocation error
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Conversation protocol violation (e.g. second tool request in one turn)
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Playback device or provider failure
    #[error("playback error: {0}")]
    Playback(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors from a tool invocation
///
/// Folded into session history as a tool-failure turn rather than
/// surfaced to the operator; the model is still asked for a reply.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool is not registered or not in the persona's allowed set
    #[error("tool not authorized: {0}")]
    Unauthorized(String),

    /// Tool ran but failed
    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),

    /// Tool did not return within the configured timeout
    #[error("tool timed out: {0}")]
    Timeout(String),
}
