//! Error types for the platform operator
//!
//! Store failures keep the underlying kube-rs error so callers can tell an
//! optimistic-concurrency conflict or a missing object apart from every other
//! failure by HTTP status code rather than by message text.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for platform operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The object was modified concurrently (HTTP 409)
    #[error("conflict updating {kind}/{name}: object was modified concurrently")]
    Conflict {
        /// Kind of the object being written
        kind: String,
        /// Name of the object being written
        name: String,
    },

    /// The object does not exist (HTTP 404)
    #[error("{kind}/{name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Name of the missing object
        name: String,
    },

    /// A resource quantity string could not be parsed
    #[error("invalid quantity {value:?} for {resource}: {message}")]
    InvalidQuantity {
        /// Resource name the quantity belongs to (e.g. "cpu")
        resource: String,
        /// The raw quantity string
        value: String,
        /// Description of what's invalid
        message: String,
    },

    /// A label selector could not be rendered as a list query
    #[error("invalid label selector: {message}")]
    InvalidSelector {
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Validation error for a resource spec
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Internal error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where it failed
        context: String,
    },
}

impl Error {
    /// Create a conflict error for the given object
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a not-found error for the given object
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an invalid-quantity error
    pub fn invalid_quantity(
        resource: impl Into<String>,
        value: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::InvalidQuantity {
            resource: resource.into(),
            value: value.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-selector error
    pub fn invalid_selector(msg: impl Into<String>) -> Self {
        Self::InvalidSelector {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific resource kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Map a kube-rs error, lifting 409 and 404 into their own variants
    pub fn from_kube(kind: &str, name: &str, source: kube::Error) -> Self {
        match &source {
            kube::Error::Api(ae) if ae.code == 409 => Self::conflict(kind, name),
            kube::Error::Api(ae) if ae.code == 404 => Self::not_found(kind, name),
            _ => Self::Kube { source },
        }
    }

    /// True if the write lost an optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }

    /// True if the target object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// True if the operation may succeed when retried unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // 4xx other than conflict and throttling won't change on retry
                !matches!(
                    source,
                    kube::Error::Api(ae)
                        if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
                )
            }
            Error::Conflict { .. } => true,
            Error::NotFound { .. } => false,
            Error::InvalidQuantity { .. } => false,
            Error::InvalidSelector { .. } => false,
            Error::Serialization { .. } => false,
            Error::Validation { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}
