//! Pod mutation settings

/// Namespace annotation read for tolerations when none is configured
pub const DEFAULT_TOLERATIONS_ANNOTATION: &str = "tolerations";

/// What the pod mutator changes
#[derive(Clone, Debug)]
pub struct PodMutatorConfig {
    /// Annotation key prefixes a pod inherits from its namespace
    pub annotations: Vec<String>,
    /// Registry every non-whitelisted image is pulled through
    pub default_registry_prefix: Option<String>,
    /// Image prefixes left untouched
    pub registry_whitelist: Vec<String>,
    /// Pull secret added to pods that declare none
    pub default_image_pull_secret: Option<String>,
    /// Namespace annotation holding `key=value[:Effect];...` tolerations
    pub tolerations_annotation: String,
}

impl Default for PodMutatorConfig {
    fn default() -> Self {
        Self {
            annotations: Vec::new(),
            default_registry_prefix: None,
            registry_whitelist: Vec::new(),
            default_image_pull_secret: None,
            tolerations_annotation: DEFAULT_TOLERATIONS_ANNOTATION.to_string(),
        }
    }
}

impl PodMutatorConfig {
    /// True if pods should inherit this namespace annotation
    pub fn inherits(&self, annotation: &str) -> bool {
        self.annotations
            .iter()
            .any(|prefix| !prefix.is_empty() && annotation.starts_with(prefix.as_str()))
    }

    /// True if the image must not be rewritten
    pub fn is_whitelisted(&self, image: &str) -> bool {
        self.registry_whitelist
            .iter()
            .any(|prefix| !prefix.is_empty() && image.starts_with(prefix.as_str()))
    }
}
