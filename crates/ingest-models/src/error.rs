//! Decode error types.

use thiserror::Error;

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors raised while turning a wire message into a job descriptor.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed job message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid artifact url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Artifact url {url} does not reference bucket {bucket}")]
    WrongBucket { url: String, bucket: String },

    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),
}

impl DecodeError {
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }
}
