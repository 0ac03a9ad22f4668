//! Error types for namespace cleanup

use thiserror::Error;

/// Errors from the cleanup controller
#[derive(Debug, Error)]
pub enum CleanupError {
    /// The auto-delete label isn't a lifetime
    #[error("invalid auto-delete lifetime {value:?} on namespace {namespace}: {message}")]
    InvalidLifetime {
        /// Namespace carrying the label
        namespace: String,
        /// Raw label value
        value: String,
        /// What's wrong with it
        message: String,
    },

    /// API failure
    #[error(transparent)]
    Api(#[from] platform_common::Error),
}
