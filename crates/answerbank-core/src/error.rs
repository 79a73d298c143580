//! Error types for the answer-resolution engine.
//!
//! Errors are organized by concern so that log lines carry enough context
//! (provider name, HTTP status, endpoint) to act on. None of these ever cross
//! the engine's `query` boundary: the engine logs them and reports "no answer".

use thiserror::Error;

/// Top-level error type for answerbank operations.
#[derive(Error, Debug)]
pub enum AnswerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Provider (question bank / LLM) errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// OCR errors
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// `provider` names an adapter that does not exist
    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    /// A key the selected adapter requires is absent or empty
    #[error("Missing required key '{key}' for provider {provider}")]
    MissingKey { provider: String, key: String },

    /// A key is present but cannot be interpreted
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by answer providers while talking to their backends.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport failure or non-success HTTP status
    #[error("{provider} HTTP error: {message}")]
    Http {
        provider: String,
        message: String,
        status_code: Option<u16>,
    },

    /// Request exceeded its timeout
    #[error("{provider} request timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    /// Payload was missing fields or had the wrong shape
    #[error("{provider} returned a malformed response: {message}")]
    Response { provider: String, message: String },

    /// Every credential available to the provider is used up
    #[error("{provider} quota exhausted: {message}")]
    QuotaExhausted { provider: String, message: String },
}

impl ProviderError {
    /// Build an HTTP error from a `reqwest` failure, classifying timeouts.
    pub fn from_reqwest(provider: &str, err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout {
                provider: provider.to_string(),
                timeout_ms,
            }
        } else {
            ProviderError::Http {
                provider: provider.to_string(),
                message: err.to_string(),
                status_code: err.status().map(|s| s.as_u16()),
            }
        }
    }

    /// Shorthand for a response-shape error.
    pub fn response(provider: &str, message: impl Into<String>) -> Self {
        ProviderError::Response {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

/// OCR fallback chain errors.
#[derive(Error, Debug)]
pub enum OcrError {
    /// Question image could not be downloaded
    #[error("Image download failed for {url}: {message}")]
    Download { url: String, message: String },

    /// Image bytes could not be decoded or re-encoded
    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    /// Local engine failed to initialize or to run
    #[error("Local OCR engine error: {0}")]
    Engine(String),

    /// Remote OCR backend (vision model or HTTP service) failed
    #[error("{backend} OCR failed: {message}")]
    Backend { backend: String, message: String },

    /// Scratch file handling failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for answerbank results.
pub type Result<T> = std::result::Result<T, AnswerError>;

/// Convenience type alias for provider-specific results.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
