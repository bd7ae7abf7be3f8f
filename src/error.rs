use thiserror::Error;

/// Errors surfaced by the aggregator facade.
///
/// Provider failures never show up here; they are captured per provider in
/// the response debug block.
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("aggregation failed: {0}")]
    Internal(String),
}

impl AggregatorError {
    pub fn invalid(message: impl Into<String>) -> Self {
        AggregatorError::InvalidRequest(message.into())
    }

    /// True for requestor mistakes (bad parameters) as opposed to facade faults.
    pub fn is_client_error(&self) -> bool {
        matches!(self, AggregatorError::InvalidRequest(_))
    }
}

/// Errors raised by built-in providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} responded with status {status}")]
    Status { provider: String, status: u16 },

    #[error("missing configuration: {0}")]
    MissingConfig(String),
}

/// Errors while loading settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
