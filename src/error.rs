//! Error types for Campfire
//!
//! This module defines all error types used throughout the runtime,
//! using `thiserror` for ergonomic error handling. Variants follow the
//! error taxonomy surfaced over the API: each maps to a stable kind
//! string and, in the HTTP shim, to a status code.

use thiserror::Error;

/// Main error type for Campfire operations
///
/// This enum encompasses all failure modes across the store, the context
/// ingestor, the retrieval index, tool execution, the stream orchestrator,
/// and the provider adapter.
#[derive(Error, Debug)]
pub enum CampfireError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input failed validation (bad parameters, malformed body, unknown enum value)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced row or resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation conflicts with current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A path resolved outside the configured repository root
    #[error("Path not allowed: {0}")]
    UnauthorizedPath(String),

    /// The provider, embedder, or a fetched host could not be reached
    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    /// An operation exceeded its wall-clock limit
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A payload exceeded the configured size cap
    #[error("Payload too large: {0}")]
    Oversize(String),

    /// A content type outside the allowlist
    #[error("Unsupported media type: {0}")]
    UnsupportedMime(String),

    /// A URL fetch required more redirects than permitted
    #[error("Too many redirects: {0}")]
    TooManyRedirects(String),

    /// Storage layer errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Schema migration failure (fatal at startup)
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Provider-related errors (streaming, response shape)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Tool execution errors
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Retrieval index errors (build, cache, embedding)
    #[error("Index error: {0}")]
    Index(String),

    /// Failed to parse a server-sent event from the provider stream
    #[error("Failed to parse SSE event: {0}")]
    SseParse(String),

    /// Provider stream ended before the round completed
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    /// Internal runtime error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CampfireError {
    /// Stable kind string for this error, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation(_) | Self::TooManyRedirects(_) | Self::Serialization(_) => {
                "validation"
            }
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::UnauthorizedPath(_) => "unauthorized_path",
            Self::Upstream(_)
            | Self::Provider(_)
            | Self::SseParse(_)
            | Self::StreamInterrupted(_)
            | Self::Http(_) => "upstream_unavailable",
            Self::Timeout(_) => "timeout",
            Self::Oversize(_) => "oversize",
            Self::UnsupportedMime(_) => "unsupported_mime",
            Self::Storage(_)
            | Self::Migration(_)
            | Self::Tool(_)
            | Self::Index(_)
            | Self::Internal(_)
            | Self::Io(_) => "internal",
        }
    }
}

/// Result type alias for Campfire operations
///
/// Uses `anyhow::Error` as the error type, allowing rich context and easy
/// propagation with `?` while typed `CampfireError` values remain
/// downcastable at the API boundary.
pub type Result<T> = anyhow::Result<T>;
