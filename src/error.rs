//! Error taxonomy for the connection core.

use thiserror::Error;

/// Errors surfaced by providers, the registry and the session manager.
///
/// Provider-level errors never escape the registry: they are normalized into
/// [`ConnectionResult`](crate::providers::ConnectionResult) instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("wallet backend not available: {0}")]
    BackendAbsent(String),
    #[error("user rejected the request")]
    UserRejected,
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("wallet reports {actual}, expected {expected}")]
    AddressMismatch { expected: String, actual: String },
    #[error("profile persistence unavailable: {0}")]
    PersistenceUnavailable(String),
    #[error("profile uniqueness collision: {0}")]
    UniquenessCollision(String),
    #[error("unknown wallet provider: {0}")]
    UnknownProvider(String),
    #[error("a request is already pending in the wallet")]
    RequestPending,
    #[error("storage: {0}")]
    Storage(String),
    #[error("{0}")]
    Backend(String),
}

impl WalletError {
    /// Whether a bounded retry may resolve this error on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WalletError::BackendAbsent(_)
                | WalletError::Timeout(_)
                | WalletError::RequestPending
                | WalletError::Backend(_)
        )
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::Storage(format!("json: {e}"))
    }
}

pub type WalletResult<T> = Result<T, WalletError>;
