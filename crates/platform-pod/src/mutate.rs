//! Pod mutation rules
//!
//! Pure functions over k8s-openapi types; nothing here talks to the API
//! server.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, LocalObjectReference, Namespace, Pod, Toleration};
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::config::PodMutatorConfig;

const DEFAULT_TOLERATION_EFFECT: &str = "NoSchedule";
const TOLERATION_EFFECTS: &[&str] = &["NoSchedule", "PreferNoSchedule", "NoExecute"];

/// Applies the configured pod rules
#[derive(Clone, Debug, Default)]
pub struct PodMutator {
    config: PodMutatorConfig,
}

impl PodMutator {
    /// Create a mutator
    pub fn new(config: PodMutatorConfig) -> Self {
        Self { config }
    }

    /// The settings in use
    pub fn config(&self) -> &PodMutatorConfig {
        &self.config
    }

    /// Every admission-time rule, in order
    pub fn mutate(&self, ns: &Namespace, mut pod: Pod) -> Pod {
        self.inherit_annotations(ns, &mut pod);
        self.inject_pull_secret(&mut pod);
        self.add_namespace_tolerations(ns, &mut pod);
        if let Some(spec) = pod.spec.as_mut() {
            for container in spec.containers.iter_mut() {
                self.rewrite_container(container);
            }
            for container in spec.init_containers.iter_mut().flatten() {
                self.rewrite_container(container);
            }
        }
        pod
    }

    /// Copy inheritable namespace annotations the pod doesn't set itself
    ///
    /// Returns true if anything was added. Annotations already on the pod
    /// always win.
    pub fn inherit_annotations(&self, ns: &Namespace, pod: &mut Pod) -> bool {
        let inherited: BTreeMap<String, String> = ns
            .annotations()
            .iter()
            .filter(|(k, _)| self.config.inherits(k))
            .filter(|(k, _)| !pod.annotations().contains_key(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if inherited.is_empty() {
            return false;
        }
        debug!(pod = %pod.name_any(), count = inherited.len(), "inheriting namespace annotations");
        pod.annotations_mut().extend(inherited);
        true
    }

    /// Route an image through the default registry
    ///
    /// Whitelisted images and images already under the prefix are returned
    /// unchanged.
    pub fn rewrite_image(&self, image: &str) -> Option<String> {
        let prefix = self.config.default_registry_prefix.as_deref()?;
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty()
            || self.config.is_whitelisted(image)
            || image.starts_with(&format!("{}/", prefix))
        {
            return None;
        }
        Some(format!("{}/{}", prefix, image))
    }

    fn rewrite_container(&self, container: &mut Container) {
        let Some(image) = container.image.as_deref() else {
            return;
        };
        if let Some(to) = self.rewrite_image(image) {
            debug!(container = %container.name, from = %image, to = %to, "rewriting image");
            container.image = Some(to);
        }
    }

    /// Add the default pull secret to pods that have none
    pub fn inject_pull_secret(&self, pod: &mut Pod) -> bool {
        let Some(secret) = self.config.default_image_pull_secret.as_deref() else {
            return false;
        };
        let Some(spec) = pod.spec.as_mut() else {
            return false;
        };
        if spec.image_pull_secrets.as_ref().is_some_and(|s| !s.is_empty()) {
            return false;
        }
        spec.image_pull_secrets = Some(vec![LocalObjectReference {
            name: secret.to_string(),
        }]);
        true
    }

    /// Tolerate the taints listed in the namespace annotation
    pub fn add_namespace_tolerations(&self, ns: &Namespace, pod: &mut Pod) -> bool {
        let Some(raw) = ns.annotations().get(&self.config.tolerations_annotation) else {
            return false;
        };
        let wanted = parse_tolerations(raw);
        let Some(spec) = pod.spec.as_mut() else {
            return false;
        };
        let existing = spec.tolerations.get_or_insert_with(Vec::new);
        let mut changed = false;
        for toleration in wanted {
            if !existing.contains(&toleration) {
                existing.push(toleration);
                changed = true;
            }
        }
        changed
    }
}

/// Parse `key=value[:Effect];...`
///
/// The effect defaults to NoSchedule. Malformed entries are skipped.
pub fn parse_tolerations(raw: &str) -> Vec<Toleration> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let Some((key, rest)) = entry.split_once('=') else {
                warn!(entry, "ignoring toleration without '='");
                return None;
            };
            let (value, effect) = match rest.split_once(':') {
                Some((value, effect)) if TOLERATION_EFFECTS.contains(&effect) => (value, effect),
                Some((_, effect)) => {
                    warn!(entry, effect, "ignoring toleration with unknown effect");
                    return None;
                }
                None => (rest, DEFAULT_TOLERATION_EFFECT),
            };
            if key.is_empty() {
                warn!(entry, "ignoring toleration with empty key");
                return None;
            }
            Some(Toleration {
                key: Some(key.to_string()),
                operator: Some("Equal".to_string()),
                value: Some(value.to_string()),
                effect: Some(effect.to_string()),
                ..Default::default()
            })
        })
        .collect()
}
