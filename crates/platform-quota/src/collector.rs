//! Resource collector
//!
//! Lists the namespaces a selector matches and the ResourceQuotas inside
//! them. Namespaces may hold several quotas; they are summed per namespace.
//! A listing failure is returned as an error so callers can tell "unknown"
//! apart from "over budget".

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use k8s_openapi::api::core::v1::ResourceQuota;
use kube::ResourceExt;

use platform_common::resources::{self, ResourceList};
use platform_common::selector::NamespaceSelector;
use platform_common::Result;

use crate::store::QuotaStore;

/// Identity of one ResourceQuota
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuotaId {
    /// Namespace of the quota
    pub namespace: String,
    /// Name of the quota
    pub name: String,
}

impl QuotaId {
    /// Build an identity from parts
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a ResourceQuota object
    pub fn of(rq: &ResourceQuota) -> Self {
        Self::new(rq.namespace().unwrap_or_default(), rq.name_any())
    }
}

impl fmt::Display for QuotaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One ResourceQuota reduced to its parsed limits and usage
#[derive(Clone, Debug, PartialEq)]
pub struct QuotaRecord {
    /// Which quota this is
    pub id: QuotaId,
    /// `spec.hard`
    pub hard: ResourceList,
    /// `status.used`
    pub used: ResourceList,
}

impl QuotaRecord {
    /// Parse a ResourceQuota
    pub fn from_resource_quota(rq: &ResourceQuota) -> Result<Self> {
        let hard = ResourceList::from_k8s_opt(rq.spec.as_ref().and_then(|s| s.hard.as_ref()))?;
        let used = ResourceList::from_k8s_opt(rq.status.as_ref().and_then(|s| s.used.as_ref()))?;
        Ok(Self {
            id: QuotaId::of(rq),
            hard,
            used,
        })
    }
}

/// Summed quotas of a single namespace
#[derive(Clone, Debug, PartialEq)]
pub struct NamespaceTotals {
    /// Namespace name
    pub namespace: String,
    /// Sum of `hard` across the namespace's quotas
    pub hard: ResourceList,
    /// Sum of `used` across the namespace's quotas
    pub used: ResourceList,
}

/// Quotas found under a selector
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchedQuotas {
    /// Every matched namespace, including those with no quotas
    pub namespaces: BTreeSet<String>,
    /// Quotas in the matched namespaces
    pub records: Vec<QuotaRecord>,
}

impl MatchedQuotas {
    /// Sum of `hard` over all records
    pub fn total_hard(&self) -> ResourceList {
        resources::sum(self.records.iter().map(|r| &r.hard))
    }

    /// Sum of `used` over all records
    pub fn total_used(&self) -> ResourceList {
        resources::sum(self.records.iter().map(|r| &r.used))
    }

    /// Per-namespace sums, sorted by namespace
    ///
    /// Namespaces without any quota are left out.
    pub fn by_namespace(&self) -> Vec<NamespaceTotals> {
        let mut grouped: BTreeMap<&str, NamespaceTotals> = BTreeMap::new();
        for record in &self.records {
            let entry = grouped
                .entry(record.id.namespace.as_str())
                .or_insert_with(|| NamespaceTotals {
                    namespace: record.id.namespace.clone(),
                    hard: ResourceList::new(),
                    used: ResourceList::new(),
                });
            entry.hard = resources::add(&entry.hard, &record.hard);
            entry.used = resources::add(&entry.used, &record.used);
        }
        grouped.into_values().collect()
    }

    /// True if a record with this identity is present
    pub fn contains(&self, id: &QuotaId) -> bool {
        self.records.iter().any(|r| &r.id == id)
    }

    /// Replace the `hard` of a record, or add it if absent
    ///
    /// Ignored when the namespace is outside the matched set.
    pub fn upsert_hard(&mut self, id: &QuotaId, hard: &ResourceList) {
        if !self.namespaces.contains(&id.namespace) {
            return;
        }
        match self.records.iter_mut().find(|r| &r.id == id) {
            Some(record) => record.hard = hard.clone(),
            None => self.records.push(QuotaRecord {
                id: id.clone(),
                hard: hard.clone(),
                used: ResourceList::new(),
            }),
        }
    }
}

/// Collect the quotas of every namespace matched by `selector`
///
/// `exclude` drops one quota by identity, for "what if this object were
/// replaced" questions.
pub async fn find_matching(
    store: &dyn QuotaStore,
    selector: &NamespaceSelector,
    exclude: Option<&QuotaId>,
) -> Result<MatchedQuotas> {
    let namespaces = store.list_namespaces(selector).await?;

    let mut matched = MatchedQuotas::default();
    for ns in &namespaces {
        let ns_name = ns.name_any();
        for rq in store.list_resource_quotas(&ns_name).await? {
            let record = QuotaRecord::from_resource_quota(&rq)?;
            if exclude == Some(&record.id) {
                continue;
            }
            matched.records.push(record);
        }
        matched.namespaces.insert(ns_name);
    }
    matched.records.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(matched)
}
