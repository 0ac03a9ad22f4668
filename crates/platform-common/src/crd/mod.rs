//! Custom Resource Definitions for the platform operator

mod cluster_quota;

pub use cluster_quota::{
    ClusterResourceQuota, ClusterResourceQuotaSpec, ClusterResourceQuotaStatus, NamespaceUsage,
    QuotaUsage,
};
