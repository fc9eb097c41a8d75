//! Error types for chainfacade

use crate::blockchain::Txid;

/// Failures surfaced by the facade and its collaborators.
///
/// An identifier the chain state does not know is never an error: read
/// paths return `Ok(None)` for that case.
#[derive(Debug, thiserror::Error)]
pub enum FacadeError {
    /// Every block source missed for the whole retry budget.
    #[error("Service unavailable: block body not available after {attempts} attempts")]
    ServiceUnavailable { attempts: u32 },

    /// The requested mode is explicitly unsupported.
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// A source answer could not be proven against the local header chain.
    #[error("Verification failure: {0}")]
    VerificationFailure(String),

    /// Reserved for the unspent-output consistency check.
    #[error("Output {txid}:{index} is already spent")]
    OutputAlreadySpent { txid: Txid, index: u32 },

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Malformed block: {0}")]
    MalformedBlock(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No transaction sources registered")]
    EmptyRegistry,

    /// A collaborator could not be reached or timed out.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A collaborator answered with something we could not understand.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for FacadeError {
    fn from(err: rusqlite::Error) -> Self {
        FacadeError::Database(err.to_string())
    }
}

impl From<toml::de::Error> for FacadeError {
    fn from(err: toml::de::Error) -> Self {
        FacadeError::Config(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, FacadeError>;
