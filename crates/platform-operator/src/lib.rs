//! Multi-tenant platform operator
//!
//! Wires the quota engine, pod mutation, ingress SSO and namespace cleanup
//! into one process: kube-rs controllers for the level-triggered parts and an
//! axum server for the admission webhooks.

#![deny(missing_docs)]

/// Command-line and environment configuration
pub mod config;
/// Controller construction per feature
pub mod controller_runner;
/// CRD installation
pub mod startup;
/// Admission webhook handlers and server
pub mod webhook;
