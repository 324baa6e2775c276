//! Crate-wide error taxonomy.
//!
//! Every fallible boundary in the clearnode (frame parsing, signature
//! recovery, ledger mutation, chain interaction) returns a [`ClearnodeError`]
//! variant. The [`RpcRouter`](crate::rpc::router) converts a variant into an
//! error response; the chain reconciler only ever logs it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClearnodeError {
    /// Frame parse failure, missing/extra fields, method not valid in the
    /// connection's current state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid signature, unknown challenge, expired session, reused
    /// challenge.
    #[error("auth error: {0}")]
    Auth(String),

    /// Bad parameters, missing quorum, insufficient balance, inconsistent
    /// allocation sums.
    #[error("validation error: {0}")]
    Validation(String),

    /// Duplicate open channel, app-session not found or not open.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage backend failure inside a transaction.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// RPC call failure, log parse failure, missing asset on a chain event.
    #[error("chain error: {0}")]
    Chain(String),
}

impl ClearnodeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn chain(msg: impl Into<String>) -> Self {
        Self::Chain(msg.into())
    }
}

impl From<serde_json::Error> for ClearnodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(format!("invalid JSON: {e}"))
    }
}

impl From<alloy::signers::Error> for ClearnodeError {
    fn from(e: alloy::signers::Error) -> Self {
        Self::Auth(format!("signature error: {e}"))
    }
}

impl From<std::time::SystemTimeError> for ClearnodeError {
    fn from(e: std::time::SystemTimeError) -> Self {
        Self::Protocol(format!("system clock error: {e}"))
    }
}

pub type ClearnodeResult<T> = Result<T, ClearnodeError>;
