//! Error types and result aliases.
//!
//! Defines the core `BrokerError` enumeration and common `Result` type.

use thiserror::Error;

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Malformed or invalid payload from a participant.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No eligible proxy for the requested NAT class.
    #[error("no snowflake proxies currently available")]
    NoCapacity,

    /// The matched proxy did not answer in time.
    #[error("timed out waiting for answer!")]
    Timeout,

    /// Encoding or downstream failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// Client asked for a relay fingerprint the broker does not know.
    #[error("unknown bridge fingerprint: {0}")]
    UnknownBridge(String),

    /// Rescale could not relocate every session.
    #[error("rescale stranded {stranded} session(s) after migrating {migrated}")]
    PartialMigration { migrated: usize, stranded: usize },

    /// Side channel to a proxy failed.
    #[error("signaling error: {0}")]
    Signaling(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl BrokerError {
    /// HTTP status code used when this error reaches a participant.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) | Self::UnknownBridge(_) => 400,
            Self::NoCapacity => 503,
            Self::Timeout => 504,
            Self::Internal(_)
            | Self::PartialMigration { .. }
            | Self::Signaling(_)
            | Self::Config(_) => 500,
        }
    }
}

/// Result type alias for `BrokerError`.
pub type Result<T> = std::result::Result<T, BrokerError>;
