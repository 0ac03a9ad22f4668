//! Namespace label selectors
//!
//! A selector is rendered into a label query for server-side listing and can
//! also be evaluated locally against a label map.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Set-based selector operator
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum SelectorOperator {
    /// Label value is one of the listed values
    In,
    /// Label is absent or its value is not one of the listed values
    NotIn,
    /// Label is present with any value
    Exists,
    /// Label is absent
    DoesNotExist,
}

/// One set-based requirement
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub struct LabelSelectorRequirement {
    /// Label key
    pub key: String,
    /// How the key relates to the values
    pub operator: SelectorOperator,
    /// Values for In/NotIn; must be empty for Exists/DoesNotExist
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Selects namespaces by label
///
/// All requirements are ANDed. An empty selector matches every namespace.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    /// Exact label matches
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    /// Set-based requirements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl NamespaceSelector {
    /// Selector with only exact label matches
    pub fn from_labels<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            match_labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            match_expressions: Vec::new(),
        }
    }

    /// True if the selector has no requirements
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Check the selector is well formed
    pub fn validate(&self) -> Result<(), Error> {
        for (key, value) in &self.match_labels {
            validate_token("label key", key)?;
            if !value.is_empty() {
                validate_token("label value", value)?;
            }
        }
        for req in &self.match_expressions {
            validate_token("label key", &req.key)?;
            match req.operator {
                SelectorOperator::In | SelectorOperator::NotIn => {
                    if req.values.is_empty() {
                        return Err(Error::invalid_selector(format!(
                            "operator {:?} on {} requires at least one value",
                            req.operator, req.key
                        )));
                    }
                    for v in &req.values {
                        validate_token("label value", v)?;
                    }
                }
                SelectorOperator::Exists | SelectorOperator::DoesNotExist => {
                    if !req.values.is_empty() {
                        return Err(Error::invalid_selector(format!(
                            "operator {:?} on {} takes no values",
                            req.operator, req.key
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Render as a label query (`a=b,c in (d,e),!f`)
    ///
    /// An empty selector renders as an empty query, which lists everything.
    pub fn to_query(&self) -> Result<String, Error> {
        self.validate()?;
        let mut parts: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        for req in &self.match_expressions {
            parts.push(match req.operator {
                SelectorOperator::In => format!("{} in ({})", req.key, req.values.join(",")),
                SelectorOperator::NotIn => {
                    format!("{} notin ({})", req.key, req.values.join(","))
                }
                SelectorOperator::Exists => req.key.clone(),
                SelectorOperator::DoesNotExist => format!("!{}", req.key),
            });
        }
        Ok(parts.join(","))
    }

    /// Evaluate against a label map
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let labels_ok = self
            .match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v));
        labels_ok
            && self.match_expressions.iter().all(|req| {
                let value = labels.get(&req.key);
                match req.operator {
                    SelectorOperator::In => value.is_some_and(|v| req.values.contains(v)),
                    SelectorOperator::NotIn => !value.is_some_and(|v| req.values.contains(v)),
                    SelectorOperator::Exists => value.is_some(),
                    SelectorOperator::DoesNotExist => value.is_none(),
                }
            })
    }
}

fn validate_token(what: &str, token: &str) -> Result<(), Error> {
    if token.is_empty() {
        return Err(Error::invalid_selector(format!("{} must not be empty", what)));
    }
    if token
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, ',' | '=' | '!' | '(' | ')'))
    {
        return Err(Error::invalid_selector(format!(
            "{} {:?} contains reserved characters",
            what, token
        )));
    }
    Ok(())
}
