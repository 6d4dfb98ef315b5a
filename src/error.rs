use thiserror::Error;

/// Errors that can occur while querying the telemetry store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Telemetry store returned error {status}: {body}")]
    QueryFailed { status: u16, body: String },

    #[error("Failed to decode query response: {0}")]
    DecodeError(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::HttpError(e.to_string())
    }
}

/// Errors that can occur when talking to the twin graph
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TwinError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Twin not found: {0}")]
    NotFound(String),

    #[error("Twin service returned error {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for TwinError {
    fn from(e: reqwest::Error) -> Self {
        TwinError::HttpError(e.to_string())
    }
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
