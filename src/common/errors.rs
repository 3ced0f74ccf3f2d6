//! Error types for the application

use thiserror::Error;

/// Result type alias using our PortfolioError
pub type Result<T> = std::result::Result<T, PortfolioError>;

/// Main error type for the trading core
///
/// Safety rejections are not represented here: a rejected trade is a normal
/// `TradeRecord` with `executed == false`.
#[derive(Error, Debug)]
pub enum PortfolioError {
    /// Configuration errors (bad allocations, invalid limits, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed trade intent (non-positive amount, ...)
    #[error("Invalid trade intent: {0}")]
    InvalidIntent(String),

    /// No usable spot price for an asset
    #[error("no price available for {0}")]
    PriceUnavailable(String),

    /// The exchange answered but refused or failed the request
    #[error("Exchange rejected request: {0}")]
    ExchangeRejected(String),

    /// Network/transport failure talking to the exchange
    #[error("Exchange transport error: {0}")]
    Transport(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The exchange client does not offer this capability
    #[error("Unsupported capability: {0}")]
    Unsupported(String),

    /// Schedule or audit persistence failures
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Channel send errors
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Channel receive errors
    #[error("Channel receive error: {0}")]
    ChannelReceive(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PortfolioError {
    /// True for failures that came from talking to the exchange
    pub fn is_exchange_failure(&self) -> bool {
        matches!(
            self,
            PortfolioError::ExchangeRejected(_)
                | PortfolioError::Transport(_)
                | PortfolioError::Timeout(_)
        )
    }
}

impl From<config::ConfigError> for PortfolioError {
    fn from(err: config::ConfigError) -> Self {
        PortfolioError::Configuration(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for PortfolioError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        PortfolioError::Timeout(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_failure_classification() {
        assert!(PortfolioError::Transport("reset".into()).is_exchange_failure());
        assert!(PortfolioError::Timeout("30s".into()).is_exchange_failure());
        assert!(!PortfolioError::PriceUnavailable("BTC".into()).is_exchange_failure());
    }

    #[test]
    fn test_price_unavailable_message() {
        let err = PortfolioError::PriceUnavailable("ETH".into());
        assert_eq!(err.to_string(), "no price available for ETH");
    }
}
