//! Pod mutation for the platform operator
//!
//! Pods pick up selected annotations from their namespace, get their images
//! routed through a registry mirror, receive a default image pull secret and
//! tolerate the taints their namespace declares. The same rules run in the
//! admission webhook (for new pods) and in two reconcilers (for existing pods
//! when namespace annotations change).

pub mod config;
pub mod controller;
pub mod mutate;

pub use config::PodMutatorConfig;
pub use controller::{
    error_policy, reconcile_namespace, reconcile_pod, KubePodClient, PodClient, PodContext,
};
pub use mutate::PodMutator;
