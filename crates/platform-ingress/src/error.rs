//! Error types for ingress annotation

use thiserror::Error;

/// Errors from the ingress annotator
#[derive(Debug, Error)]
pub enum IngressError {
    /// The oauth2-proxy Service could not be read
    #[error("failed to get service {namespace}/{name}: {source}")]
    ServiceLookup {
        /// Service name
        name: String,
        /// Service namespace
        namespace: String,
        /// Underlying failure
        #[source]
        source: platform_common::Error,
    },

    /// Any other API failure
    #[error(transparent)]
    Api(#[from] platform_common::Error),
}

impl IngressError {
    /// True if the target ingress has disappeared
    pub fn is_not_found(&self) -> bool {
        matches!(self, IngressError::Api(e) if e.is_not_found())
    }
}
