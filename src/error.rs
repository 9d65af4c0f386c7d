//! Feed errors.
//!
//! ERROR HANDLING
//! ==============
//! Only the history side produces errors that reach callers. Live-side
//! problems (missing channel, unknown ids, malformed payloads) degrade the
//! feed to history-only viewing and are logged instead of returned.

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;

/// Grepable error code and retryable flag for surfaced errors.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Errors produced by feed configuration and history fetching.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    ConfigParse(String),

    /// A required environment variable is not set.
    #[error("missing config: env var {var} not set")]
    MissingConfig { var: String },

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// The history request could not be sent or its body could not be read.
    #[error("history request failed: {0}")]
    FetchRequest(String),

    /// The history endpoint returned a non-success HTTP status.
    #[error("history response error: status {status}")]
    FetchResponse { status: u16, body: String },

    /// The history response body was not a page.
    #[error("history response parse failed: {0}")]
    FetchParse(String),

    /// A live event payload was not a message.
    #[error("malformed live event payload: {0}")]
    MalformedEvent(String),
}

impl ErrorCode for FeedError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigParse(_) => "E_CONFIG_PARSE",
            Self::MissingConfig { .. } => "E_MISSING_CONFIG",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::FetchRequest(_) => "E_FETCH_REQUEST",
            Self::FetchResponse { .. } => "E_FETCH_RESPONSE",
            Self::FetchParse(_) => "E_FETCH_PARSE",
            Self::MalformedEvent(_) => "E_MALFORMED_EVENT",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::FetchRequest(_) | Self::FetchResponse { status: 429 | 500..=599, .. })
    }
}
