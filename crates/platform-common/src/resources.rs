//! Resource lists and quota arithmetic
//!
//! A [`ResourceList`] maps resource names (`cpu`, `memory`, `pods`...) to
//! exact quantities. Missing keys count as zero everywhere. All operations
//! return new lists and never mutate their inputs.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::quantity::ResourceQuantity;
use crate::Error;

/// A map from resource name to quantity, ordered by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceList(BTreeMap<String, ResourceQuantity>);

impl ResourceList {
    /// An empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a Kubernetes resource map
    ///
    /// Fails on the first malformed quantity, naming the resource.
    pub fn from_k8s(map: &BTreeMap<String, Quantity>) -> Result<Self, Error> {
        map.iter()
            .map(|(name, q)| Ok((name.clone(), ResourceQuantity::from_k8s(name, q)?)))
            .collect::<Result<BTreeMap<_, _>, Error>>()
            .map(Self)
    }

    /// Parse an optional Kubernetes resource map, treating `None` as empty
    pub fn from_k8s_opt(map: Option<&BTreeMap<String, Quantity>>) -> Result<Self, Error> {
        map.map(Self::from_k8s).transpose().map(Option::unwrap_or_default)
    }

    /// Render as a Kubernetes resource map with canonical quantities
    pub fn to_k8s(&self) -> BTreeMap<String, Quantity> {
        self.0
            .iter()
            .map(|(name, q)| (name.clone(), q.to_k8s()))
            .collect()
    }

    /// Set a resource
    pub fn insert(&mut self, name: impl Into<String>, quantity: ResourceQuantity) {
        self.0.insert(name.into(), quantity);
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, name: impl Into<String>, quantity: ResourceQuantity) -> Self {
        self.insert(name, quantity);
        self
    }

    /// The quantity for a resource, zero when absent
    pub fn get(&self, name: &str) -> ResourceQuantity {
        self.0.get(name).copied().unwrap_or(ResourceQuantity::ZERO)
    }

    /// True if the resource has an explicit entry
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Resource names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Entries in resource-name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceQuantity)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of explicit entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no explicit entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if every entry is zero (an empty list is zero)
    pub fn is_zero(&self) -> bool {
        self.0.values().all(ResourceQuantity::is_zero)
    }

    /// True if any entry is below zero
    pub fn has_negative(&self) -> bool {
        self.0.values().any(ResourceQuantity::is_negative)
    }
}

impl FromIterator<(String, ResourceQuantity)> for ResourceList {
    fn from_iter<T: IntoIterator<Item = (String, ResourceQuantity)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Union of keys; each value is `a[key] + b[key]`
pub fn add(a: &ResourceList, b: &ResourceList) -> ResourceList {
    combine(a, b, |x, y| x + y)
}

/// Union of keys; each value is `a[key] - b[key]`, possibly negative
pub fn subtract(a: &ResourceList, b: &ResourceList) -> ResourceList {
    combine(a, b, |x, y| x - y)
}

fn combine(
    a: &ResourceList,
    b: &ResourceList,
    op: impl Fn(ResourceQuantity, ResourceQuantity) -> ResourceQuantity,
) -> ResourceList {
    let mut result = a.clone();
    for (name, qb) in &b.0 {
        let qa = a.get(name);
        result.0.insert(name.clone(), op(qa, *qb));
    }
    result
}

/// Sum any number of lists
pub fn sum<'a>(lists: impl IntoIterator<Item = &'a ResourceList>) -> ResourceList {
    lists
        .into_iter()
        .fold(ResourceList::new(), |acc, list| add(&acc, list))
}

/// Check `a <= b` over the keys of `b`
///
/// Keys only in `a` are ignored; `b` defines the checked set. Returns the
/// violated names in resource-name order.
pub fn less_than_or_equal(a: &ResourceList, b: &ResourceList) -> (bool, Vec<String>) {
    let violated: Vec<String> = b
        .iter()
        .filter(|(name, limit)| a.get(name) > **limit)
        .map(|(name, _)| name.to_string())
        .collect();
    (violated.is_empty(), violated)
}

/// True if `a` exceeds `b` for at least one key of `b`
pub fn greater_than(a: &ResourceList, b: &ResourceList) -> (bool, Vec<String>) {
    let (within, violated) = less_than_or_equal(a, b);
    (!within, violated)
}

/// Render violations as `name(actual > limit)` separated by spaces
pub fn describe_violations(actual: &ResourceList, limit: &ResourceList, names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("{}({} > {})", name, actual.get(name), limit.get(name)))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[(&str, &str)]) -> ResourceList {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.parse().unwrap()))
            .collect()
    }

    fn samples() -> Vec<ResourceList> {
        vec![
            ResourceList::new(),
            list(&[("cpu", "1")]),
            list(&[("cpu", "250m"), ("memory", "1Gi")]),
            list(&[("memory", "512Mi"), ("pods", "10")]),
            list(&[("cpu", "-300m"), ("pods", "3")]),
        ]
    }

    #[test]
    fn add_is_commutative_and_associative() {
        let s = samples();
        for a in &s {
            for b in &s {
                assert_eq!(add(a, b), add(b, a));
                for c in &s {
                    assert_eq!(add(&add(a, b), c), add(a, &add(b, c)));
                }
            }
        }
    }

    #[test]
    fn subtract_then_add_restores_original() {
        let s = samples();
        for a in &s {
            for b in &s {
                let restored = add(&subtract(a, b), b);
                for name in a.names() {
                    assert_eq!(restored.get(name), a.get(name));
                }
                // Keys only in b come back as explicit zeros
                for name in b.names().filter(|n| !a.contains(n)) {
                    assert!(restored.get(name).is_zero());
                }
            }
        }
    }

    #[test]
    fn less_than_or_equal_is_reflexive() {
        for a in samples() {
            let (ok, violated) = less_than_or_equal(&a, &a);
            assert!(ok);
            assert!(violated.is_empty());
        }
    }

    #[test]
    fn limit_keys_define_the_checked_set() {
        let usage = list(&[("cpu", "3"), ("memory", "1Gi")]);
        let limit = list(&[("memory", "2Gi")]);
        // cpu is over "something" but not limited, so it's ignored
        assert_eq!(less_than_or_equal(&usage, &limit), (true, vec![]));

        // Missing keys in the usage count as zero
        let limit = list(&[("pods", "0")]);
        assert_eq!(less_than_or_equal(&usage, &limit), (true, vec![]));
    }

    #[test]
    fn reports_every_violated_resource() {
        let usage = list(&[("cpu", "2100m"), ("memory", "3Gi"), ("pods", "1")]);
        let limit = list(&[("cpu", "2"), ("memory", "2Gi"), ("pods", "5")]);
        let (exceeds, violated) = greater_than(&usage, &limit);
        assert!(exceeds);
        assert_eq!(violated, vec!["cpu".to_string(), "memory".to_string()]);
        assert_eq!(
            describe_violations(&usage, &limit, &violated),
            "cpu(2100m > 2) memory(3Gi > 2Gi)"
        );
    }

    #[test]
    fn sum_matches_repeated_add() {
        let s = samples();
        let expected = s.iter().fold(ResourceList::new(), |acc, l| add(&acc, l));
        assert_eq!(sum(&s), expected);
        assert_eq!(sum(&s).get("cpu").to_string(), "950m");
    }

    #[test]
    fn inputs_are_not_mutated() {
        let a = list(&[("cpu", "1")]);
        let b = list(&[("cpu", "2"), ("memory", "1Gi")]);
        let _ = add(&a, &b);
        let _ = subtract(&a, &b);
        assert_eq!(a, list(&[("cpu", "1")]));
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn from_k8s_rejects_bad_quantities() {
        let mut map = BTreeMap::new();
        map.insert("cpu".to_string(), Quantity("1".to_string()));
        map.insert("memory".to_string(), Quantity("lots".to_string()));
        let err = ResourceList::from_k8s(&map).unwrap_err();
        assert!(err.to_string().contains("memory"));

        assert!(ResourceList::from_k8s_opt(None).unwrap().is_empty());
    }

    #[test]
    fn to_k8s_renders_canonical_strings() {
        let l = add(&list(&[("cpu", "0.9")]), &list(&[("cpu", "1.2")]));
        assert_eq!(l.to_k8s()["cpu"], Quantity("2100m".to_string()));
    }
}
