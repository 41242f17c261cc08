//! Label handling for cluster objects
//!
//! Nodes and topology descriptors are matched through simple `key=value`
//! selectors, and node roles are recovered from the two label conventions
//! used by Kubernetes distributions.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Label map attached to nodes, workload instances and descriptors
pub type LabelMap = BTreeMap<String, String>;

/// Prefix-keyed role label, e.g. `node-role.kubernetes.io/master`
pub const ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

/// Single key role label, e.g. `kubernetes.io/role=node`
pub const ROLE_LABEL: &str = "kubernetes.io/role";

/// Placeholder rendered for nodes without any role label
pub const NO_ROLE: &str = "<none>";

/// A single `key=value` requirement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelRequirement {
    pub key: String,
    pub value: String,
}

impl LabelRequirement {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, labels: &LabelMap) -> bool {
        labels.get(&self.key).map(|v| v == &self.value).unwrap_or(false)
    }
}

impl fmt::Display for LabelRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// A comma-separated list of `key=value` requirements.
///
/// [`LabelSelector::matches_all`] gives the usual Kubernetes conjunction;
/// [`LabelSelector::matches_any`] is used for node capability labels where any
/// one of several marker labels is enough.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LabelSelector {
    requirements: Vec<LabelRequirement>,
}

impl LabelSelector {
    /// An empty selector matches everything under `matches_all` and nothing under `matches_any`
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn with_requirement(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push(LabelRequirement::new(key, value));
        self
    }

    pub fn requirements(&self) -> &[LabelRequirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches_all(&self, labels: &LabelMap) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn matches_any(&self, labels: &LabelMap) -> bool {
        self.requirements.iter().any(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let mut requirements = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                crate::Error::config(format!("label requirement '{}' is not key=value", part))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(crate::Error::config(format!(
                    "label requirement '{}' has an empty key",
                    part
                )));
            }
            requirements.push(LabelRequirement::new(key, value.trim()));
        }
        Ok(Self { requirements })
    }
}

impl TryFrom<String> for LabelSelector {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        value.parse()
    }
}

impl From<LabelSelector> for String {
    fn from(selector: LabelSelector) -> Self {
        selector.to_string()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Collect node roles from both label conventions, sorted and de-duplicated
pub fn node_roles(labels: &LabelMap) -> BTreeSet<String> {
    let mut roles = BTreeSet::new();
    for (key, value) in labels {
        if let Some(role) = key.strip_prefix(ROLE_LABEL_PREFIX) {
            if !role.is_empty() {
                roles.insert(role.to_string());
            }
        } else if key == ROLE_LABEL && !value.is_empty() {
            roles.insert(value.clone());
        }
    }
    roles
}

/// Render a role set the way node listings show it
pub fn format_roles<'a>(roles: impl IntoIterator<Item = &'a String>) -> String {
    let joined = roles
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",");
    if joined.is_empty() {
        NO_ROLE.to_string()
    } else {
        joined
    }
}
