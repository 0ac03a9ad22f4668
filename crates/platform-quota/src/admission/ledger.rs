use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use platform_common::resources::ResourceList;

use crate::collector::{MatchedQuotas, QuotaId};

struct Pending {
    hard: ResourceList,
    expires_at: Instant,
}

#[derive(Default)]
struct Entries {
    quotas: HashMap<QuotaId, Pending>,
    ceilings: HashMap<String, Pending>,
}

/// Quota writes admitted but not yet visible in the store
///
/// The webhook answers before the API server persists the object, so a
/// second request decided right after the first would not see it in a live
/// listing. Admitted ResourceQuotas are overlaid on listings and admitted
/// ClusterResourceQuota ceilings tighten the stored ones until the store
/// reflects the same `hard` or the TTL runs out.
pub struct PendingAdmissions {
    ttl: Duration,
    entries: Mutex<Entries>,
}

impl PendingAdmissions {
    /// A ledger whose entries live for at most `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Remember an admitted ResourceQuota
    pub fn record(&self, id: QuotaId, hard: ResourceList) {
        let expires_at = Instant::now() + self.ttl;
        self.lock().quotas.insert(id, Pending { hard, expires_at });
    }

    /// Remember an admitted ClusterResourceQuota ceiling
    pub fn record_ceiling(&self, name: &str, hard: ResourceList) {
        let expires_at = Instant::now() + self.ttl;
        self.lock()
            .ceilings
            .insert(name.to_string(), Pending { hard, expires_at });
    }

    /// The ceiling to enforce for `name` given what the store holds
    ///
    /// Per resource, the lower of the stored and the admitted ceiling. The
    /// admitted entry is dropped once the store shows it or it expires.
    pub fn effective_ceiling(&self, name: &str, stored: &ResourceList) -> ResourceList {
        let now = Instant::now();
        let mut entries = self.lock();
        let Some(pending) = entries.ceilings.get(name) else {
            return stored.clone();
        };
        if pending.expires_at <= now {
            debug!(cluster_quota = %name, "pending ceiling expired");
            entries.ceilings.remove(name);
            return stored.clone();
        }
        if &pending.hard == stored {
            debug!(cluster_quota = %name, "pending ceiling persisted");
            entries.ceilings.remove(name);
            return stored.clone();
        }
        tightest(stored, &pending.hard)
    }

    /// Drop expired quota entries and those the listing already shows
    pub fn reconcile_with(&self, matched: &MatchedQuotas) {
        let now = Instant::now();
        self.lock().quotas.retain(|id, pending| {
            if pending.expires_at <= now {
                debug!(quota = %id, "pending admission expired");
                return false;
            }
            let persisted = matched
                .records
                .iter()
                .any(|r| &r.id == id && r.hard == pending.hard);
            if persisted {
                debug!(quota = %id, "pending admission persisted");
            }
            !persisted
        });
    }

    /// Live quota entries
    pub fn snapshot(&self) -> Vec<(QuotaId, ResourceList)> {
        let now = Instant::now();
        self.lock()
            .quotas
            .iter()
            .filter(|(_, p)| p.expires_at > now)
            .map(|(id, p)| (id.clone(), p.hard.clone()))
            .collect()
    }

    /// Number of tracked quota entries, expired or not
    pub fn len(&self) -> usize {
        self.lock().quotas.len()
    }

    /// True if no quota entry is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        // Entries are plain data, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per resource, the smaller limit; a resource capped on one side only keeps that cap
fn tightest(a: &ResourceList, b: &ResourceList) -> ResourceList {
    let mut out = a.clone();
    for (name, limit) in b.iter() {
        if !a.contains(name) || *limit < a.get(name) {
            out.insert(name, *limit);
        }
    }
    out
}
