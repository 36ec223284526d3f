//! Error types for the selkie core.
//!
//! Each error variant carries a stable error code (SCREAMING_SNAKE_CASE)
//! that is included in the Display output and accessible via
//! [`SelkieError::code()`]. Codes are part of the public API contract and
//! will not change.
//!
//! Errors never cross the public boundary as panics: parse problems become
//! [`StreamEvent::ParseError`](crate::extractor::events::StreamEvent)
//! events, dispatch problems become typed
//! [`DispatchStatus`](crate::extractor::call::DispatchStatus) fields.

/// Stable error codes for programmatic error handling.
///
/// These codes never change and form part of the public API contract.
/// Use these for distinguishing errors rather than parsing Display output.
pub mod error_codes {
    /// Invalid or missing configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// An embedded tool-call candidate failed to parse.
    pub const PARSE_FAILED: &str = "PARSE_FAILED";

    /// A registry dispatch failed inside the handler.
    pub const DISPATCH_FAILED: &str = "DISPATCH_FAILED";

    /// Request or operation timed out.
    pub const TIMEOUT_ERROR: &str = "TIMEOUT_ERROR";

    /// An LLM oracle call failed.
    pub const ORACLE_FAILED: &str = "ORACLE_FAILED";

    /// The interaction graph violated an invariant.
    pub const GRAPH_INVALID: &str = "GRAPH_INVALID";

    /// A game session could not run to completion.
    pub const SESSION_ERROR: &str = "SESSION_ERROR";

    /// An event channel closed while the producer was still running.
    pub const CHANNEL_CLOSED: &str = "CHANNEL_CLOSED";
}

/// Errors produced by the selkie core.
///
/// Each variant includes a stable error code accessible via
/// [`SelkieError::code()`]. The Display impl formats as `[CODE] message`.
#[derive(Debug, thiserror::Error)]
pub enum SelkieError {
    /// Invalid or missing configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// An embedded tool-call candidate failed to parse.
    #[error("[{}] {}", error_codes::PARSE_FAILED, .0)]
    Parse(String),

    /// A registry dispatch failed inside the handler.
    #[error("[{}] {}", error_codes::DISPATCH_FAILED, .0)]
    Dispatch(String),

    /// Request or operation timed out.
    #[error("[{}] {}", error_codes::TIMEOUT_ERROR, .0)]
    Timeout(String),

    /// An LLM oracle call failed.
    #[error("[{}] {}", error_codes::ORACLE_FAILED, .0)]
    Oracle(String),

    /// The interaction graph violated an invariant.
    #[error("[{}] {}", error_codes::GRAPH_INVALID, .0)]
    Graph(String),

    /// A game session could not run to completion.
    #[error("[{}] {}", error_codes::SESSION_ERROR, .0)]
    Session(String),

    /// An event channel closed while the producer was still running.
    #[error("[{}] {}", error_codes::CHANNEL_CLOSED, .0)]
    Channel(String),
}

impl SelkieError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Parse(_) => error_codes::PARSE_FAILED,
            Self::Dispatch(_) => error_codes::DISPATCH_FAILED,
            Self::Timeout(_) => error_codes::TIMEOUT_ERROR,
            Self::Oracle(_) => error_codes::ORACLE_FAILED,
            Self::Graph(_) => error_codes::GRAPH_INVALID,
            Self::Session(_) => error_codes::SESSION_ERROR,
            Self::Channel(_) => error_codes::CHANNEL_CLOSED,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Config(m)
            | Self::Parse(m)
            | Self::Dispatch(m)
            | Self::Timeout(m)
            | Self::Oracle(m)
            | Self::Graph(m)
            | Self::Session(m)
            | Self::Channel(m) => m,
        }
    }

    /// Returns true if this error represents a transient failure that can
    /// be retried.
    ///
    /// Oracle and timeout failures are typically transient (network,
    /// rate limits). Configuration, parse, and graph errors need a code or
    /// input fix, not a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Parse(_) | Self::Graph(_) => false,
            Self::Dispatch(_) => false,
            Self::Timeout(_) | Self::Oracle(_) => true,
            Self::Session(_) | Self::Channel(_) => false,
        }
    }
}

/// Convenience alias for selkie results.
pub type Result<T> = std::result::Result<T, SelkieError>;
