//! Unified error handling for the grid executor
//!
//! Every component returns `TradingResult<T>`. The reconciliation loop is the
//! only place that looks at `ErrorKind` to decide between retrying on the next
//! pass, skipping a step, or skipping a symbol.

use std::io;
use thiserror::Error;

use crate::clients::broker::BrokerError;
use crate::config::ConfigError;

/// Coarse classification the engine uses to pick a recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,       // network blip, retried inside the broker layer
    Rejected,        // broker refused the action, retry next pass
    DataUnavailable, // price/position query failed, skip dependent step
    Invariant,       // missing metadata or config, skip the symbol
    Storage,         // state store or fill journal failure
}

/// Main error type for the grid executor
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("Missing instrument metadata for {0}")]
    MissingInstrument(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("State store error: {0}")]
    StateStore(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TradingError {
    pub fn data_unavailable(symbol: &str, reason: impl ToString) -> Self {
        TradingError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TradingError::Broker(err) => {
                if err.is_transient() {
                    ErrorKind::Transient
                } else if matches!(err, BrokerError::NotFound(_)) {
                    ErrorKind::DataUnavailable
                } else {
                    ErrorKind::Rejected
                }
            }
            TradingError::DataUnavailable { .. } => ErrorKind::DataUnavailable,
            TradingError::ConfigNotFound(_)
            | TradingError::Config(_)
            | TradingError::MissingInstrument(_)
            | TradingError::Invariant(_) => ErrorKind::Invariant,
            TradingError::Database(_)
            | TradingError::StateStore(_)
            | TradingError::Serialization(_)
            | TradingError::Io(_) => ErrorKind::Storage,
            TradingError::Internal(_) => ErrorKind::Invariant,
        }
    }

    /// Broker-side trouble a later pass may get past
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::Rejected | ErrorKind::DataUnavailable
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TradingError::ConfigNotFound(_) | TradingError::Config(_) => "config",
            TradingError::Broker(_) => "broker",
            TradingError::DataUnavailable { .. } => "market_data",
            TradingError::MissingInstrument(_) | TradingError::Invariant(_) => "invariant",
            TradingError::Database(_) => "database",
            TradingError::StateStore(_) | TradingError::Serialization(_) => "storage",
            TradingError::Io(_) => "io",
            TradingError::Internal(_) => "internal",
        }
    }

    /// Get a user-friendly error message with helpful context
    pub fn user_message(&self) -> String {
        match self {
            TradingError::ConfigNotFound(path) => format!(
                "Configuration file not found: {}\n\n\
                💡 Quick fix:\n\
                1. Run: grid-executor init\n\
                2. Add [instruments.*] and [symbols.*] tables\n\
                3. Try again",
                path
            ),
            TradingError::MissingInstrument(symbol) => format!(
                "No instrument metadata for {}\n\n\
                💡 Add an [instruments.{}] table with price_step, lot_size and decimals",
                symbol, symbol
            ),
            TradingError::Broker(BrokerError::Unauthorized(msg)) => format!(
                "Broker authentication failed: {}\n\n\
                💡 Check broker.api_token in config.toml",
                msg
            ),
            _ => self.to_string(),
        }
    }
}

impl From<io::Error> for TradingError {
    fn from(err: io::Error) -> Self {
        TradingError::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for TradingError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) => TradingError::Database(msg),
            rusqlite::Error::QueryReturnedNoRows => {
                TradingError::Database("Query returned no rows".to_string())
            }
            _ => TradingError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for TradingError {
    fn from(err: serde_json::Error) -> Self {
        TradingError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for TradingError {
    fn from(err: toml::de::Error) -> Self {
        TradingError::Config(ConfigError::Parse(err.to_string()))
    }
}

impl From<reqwest::Error> for TradingError {
    fn from(err: reqwest::Error) -> Self {
        TradingError::Broker(err.into())
    }
}

impl From<String> for TradingError {
    fn from(msg: String) -> Self {
        TradingError::Internal(msg)
    }
}

impl From<&str> for TradingError {
    fn from(msg: &str) -> Self {
        TradingError::Internal(msg.to_string())
    }
}

/// Result type alias using TradingError
pub type TradingResult<T> = Result<T, TradingError>;
