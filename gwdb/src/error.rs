use std::time::Duration;

use thiserror::Error;

/// Boxed driver error kept as the `source()` of a [`Error`].
pub type BoxDynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// GWDB error.
///
/// The taxonomy is closed: every failure surfaced by a pool, a cursor or the query catalog
/// is one of these five kinds. An empty result is never an error.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid connection parameters. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A connection could not be established or was lost.
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxDynError>,
    },

    /// No pooled connection became free before the acquire timeout expired.
    #[error("timed out after {0:?} waiting for a pooled connection")]
    PoolExhausted(Duration),

    /// A statement failed or its result could not be decoded.
    #[error("query failed: {message}")]
    Query {
        message: String,
        /// SQLSTATE reported by the server, if any.
        code: Option<String>,
        #[source]
        source: Option<BoxDynError>,
    },

    /// An expected relation or column does not exist.
    #[error("schema mismatch: {message}")]
    Schema {
        message: String,
        #[source]
        source: Option<BoxDynError>,
    },
}

impl Error {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn connection_with(message: impl Into<String>, source: impl Into<BoxDynError>) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            code: None,
            source: None,
        }
    }

    pub fn query_with(message: impl Into<String>, source: impl Into<BoxDynError>) -> Self {
        Self::Query {
            message: message.into(),
            code: None,
            source: Some(source.into()),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            source: None,
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::PoolExhausted(_) | Self::Query { .. } => true,
            Self::Configuration(_) | Self::Schema { .. } => false,
        }
    }

    /// SQLSTATE of a failed statement.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
