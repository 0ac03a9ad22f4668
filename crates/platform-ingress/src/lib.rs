//! Ingress SSO annotation
//!
//! Ingresses carrying `platform.dev/restrict-to-groups` are wired to the
//! cluster's oauth2-proxy through nginx auth annotations, and only members of
//! the listed groups are let through.

pub mod annotator;
pub mod controller;
pub mod error;

pub use annotator::{IngressApi, KubeIngressApi, SsoAnnotator, SsoConfig};
pub use controller::{error_policy, reconcile, IngressContext};
pub use error::IngressError;
