//! error types for tkey

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // === validation errors ===
    #[error("invalid secret: must be a non-zero scalar below the secp256k1 group order")]
    InvalidSecret,

    #[error("invalid identity: must be a non-empty string")]
    InvalidIdentity,

    #[error("invalid threshold: {threshold}-of-{total}")]
    InvalidThreshold { threshold: usize, total: usize },

    #[error("malformed share: {0}")]
    MalformedShare(String),

    #[error("polynomial mismatch: {left} vs {right}")]
    PolynomialMismatch { left: String, right: String },

    #[error("degenerate shares: index {0} supplied twice")]
    DegenerateShares(u32),

    #[error("not enough shares: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    #[error("share verification failed")]
    ShareVerificationFailed,

    #[error("share index {0} is not the provider share (index 1)")]
    NotProviderShare(u32),

    // === state errors ===
    #[error(
        "remote share belongs to key {public_key}; {required_shares} more share(s) required to recover it"
    )]
    ResplitRefused {
        public_key: String,
        required_shares: usize,
    },

    // === transport errors ===
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("remote rejected request: {0}")]
    RemoteRejected(String),

    #[error("config error: {0}")]
    Config(String),

    // === operation failures, each carrying the inner cause ===
    #[error("key split failed: {0}")]
    KeySplitFailed(#[source] Box<Error>),

    #[error("save failed: {0}")]
    SaveFailed(#[source] Box<Error>),

    #[error("retrieve failed: {0}")]
    RetrieveFailed(#[source] Box<Error>),

    #[error("delete failed: {0}")]
    DeleteFailed(#[source] Box<Error>),

    #[error("reconstruct failed: {0}")]
    ReconstructFailed(#[source] Box<Error>),
}

impl Error {
    /// true when the underlying failure is a transport hiccup that a caller may retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TransientNetwork(_) => true,
            Error::KeySplitFailed(inner)
            | Error::SaveFailed(inner)
            | Error::RetrieveFailed(inner)
            | Error::DeleteFailed(inner)
            | Error::ReconstructFailed(inner) => inner.is_retryable(),
            _ => false,
        }
    }

    /// innermost cause, skipping operation wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::KeySplitFailed(inner)
            | Error::SaveFailed(inner)
            | Error::RetrieveFailed(inner)
            | Error::DeleteFailed(inner)
            | Error::ReconstructFailed(inner) => inner.root(),
            other => other,
        }
    }

    pub(crate) fn key_split(self) -> Self {
        Error::KeySplitFailed(Box::new(self))
    }

    pub(crate) fn save(self) -> Self {
        Error::SaveFailed(Box::new(self))
    }

    pub(crate) fn retrieve(self) -> Self {
        Error::RetrieveFailed(Box::new(self))
    }

    pub(crate) fn delete(self) -> Self {
        Error::DeleteFailed(Box::new(self))
    }

    pub(crate) fn reconstruct(self) -> Self {
        Error::ReconstructFailed(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_through_wrappers() {
        let err = Error::TransientNetwork("timeout".into()).key_split();
        assert!(err.is_retryable());
        assert!(matches!(err.root(), Error::TransientNetwork(_)));

        let err = Error::RemoteRejected("bad payload".into()).save();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_wrapper_message_carries_cause() {
        let err = Error::InsufficientShares { have: 1, need: 2 }.reconstruct();
        assert_eq!(
            err.to_string(),
            "reconstruct failed: not enough shares: have 1, need 2"
        );
    }
}
