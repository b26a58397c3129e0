//! # Sync Errors
//!
//! Failure classes of one sync tick. Each variant carries the text written to
//! the subscription status.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Subscription or channel deleted mid-cycle
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Fetch(String),

    #[error("{0}")]
    Classification(String),

    /// A kustomize root failed to override or build, the whole batch was dropped
    #[error("failed to apply kustomization: {0}")]
    KustomizeBuild(String),

    /// Nothing deployable and the tick did not otherwise succeed
    #[error("{0}")]
    EmptyResourceSet(String),

    #[error("{0}")]
    Apply(String),
}

impl SyncError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

/// Cap `message` to `max_len` characters
#[must_use]
pub fn truncate_message(message: &str, max_len: usize) -> String {
    match message.char_indices().nth(max_len) {
        Some((end, _)) => message[..end].to_string(),
        None => message.to_string(),
    }
}
