//! ClusterResourceQuota CRD types

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::resources::ResourceList;
use crate::selector::NamespaceSelector;
use crate::Error;

/// A resource ceiling shared by every namespace matching a label selector
///
/// The sum of `hard` across all ResourceQuotas in the selected namespaces may
/// never exceed `spec.hard`. The operator keeps `status` in sync with the
/// live per-namespace quotas.
///
/// Example:
/// ```yaml
/// apiVersion: platform.dev/v1
/// kind: ClusterResourceQuota
/// metadata:
///   name: team-a
/// spec:
///   matchLabels:
///     team: a
///   hard:
///     cpu: "2"
///     memory: 8Gi
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "platform.dev",
    version = "v1",
    kind = "ClusterResourceQuota",
    shortname = "crq",
    status = "ClusterResourceQuotaStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceQuotaSpec {
    /// Which namespaces count against this quota
    #[serde(flatten)]
    pub selector: NamespaceSelector,

    /// Ceiling for the summed hard limits of all matched ResourceQuotas
    #[serde(default)]
    pub hard: BTreeMap<String, Quantity>,
}

/// Hard and used totals for a set of quotas
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct QuotaUsage {
    /// Declared limits
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hard: BTreeMap<String, Quantity>,
    /// Current consumption
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub used: BTreeMap<String, Quantity>,
}

impl QuotaUsage {
    /// Build from parsed resource lists
    pub fn from_lists(hard: &ResourceList, used: &ResourceList) -> Self {
        Self {
            hard: hard.to_k8s(),
            used: used.to_k8s(),
        }
    }

    /// Parse the recorded `used` map
    pub fn used_list(&self) -> Result<ResourceList, Error> {
        ResourceList::from_k8s(&self.used)
    }
}

/// Usage recorded for one namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct NamespaceUsage {
    /// Namespace name
    pub namespace: String,
    /// Summed quotas of that namespace
    pub status: QuotaUsage,
}

/// Observed state of a ClusterResourceQuota
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceQuotaStatus {
    /// Totals across all matched namespaces
    #[serde(default)]
    pub total: QuotaUsage,
    /// Per-namespace breakdown, sorted by namespace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by_namespace: Vec<NamespaceUsage>,
}

impl ClusterResourceQuotaStatus {
    /// Entry for a namespace, if recorded
    pub fn namespace(&self, name: &str) -> Option<&NamespaceUsage> {
        self.by_namespace.iter().find(|e| e.namespace == name)
    }
}

impl ClusterResourceQuotaSpec {
    /// Parse `hard` into exact quantities
    pub fn hard_list(&self) -> Result<ResourceList, Error> {
        ResourceList::from_k8s(&self.hard)
    }
}
