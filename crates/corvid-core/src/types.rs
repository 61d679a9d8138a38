use crate::{CorvidError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The resource kinds the scheduler watches and binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Pod,
    Node,
    Service,
}

impl ResourceKind {
    /// Get the apiVersion string (all scheduler kinds live in the core group)
    pub fn api_version(&self) -> &'static str {
        "v1"
    }

    /// Get the kind name (e.g., "Pod")
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::Node => "Node",
            ResourceKind::Service => "Service",
        }
    }

    /// Get the resource name (lowercase, plural)
    pub fn resource_name(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pods",
            ResourceKind::Node => "nodes",
            ResourceKind::Service => "services",
        }
    }

    /// Check if objects of this kind live in a namespace
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ResourceKind::Node)
    }

    /// Get the API path for the collection across all namespaces
    pub fn collection_path(&self) -> String {
        format!("/api/{}/{}", self.api_version(), self.resource_name())
    }

    /// Get the API path for a single object
    pub fn object_path(&self, namespace: &str, name: &str) -> String {
        if self.is_namespaced() {
            format!(
                "/api/{}/namespaces/{}/{}/{}",
                self.api_version(),
                namespace,
                self.resource_name(),
                name
            )
        } else {
            format!("/api/{}/{}/{}", self.api_version(), self.resource_name(), name)
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

/// ObjectKey uniquely identifies an object within its kind
///
/// Rendered as `namespace/name`, or bare `name` for cluster-scoped objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace (empty for cluster-scoped objects)
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Create a new namespaced ObjectKey
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a cluster-scoped ObjectKey
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// Parse a `namespace/name` or `name` string
    pub fn parse(key: &str) -> Result<Self> {
        let mut parts = key.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::cluster_scoped(name)),
            (Some(ns), Some(name), None) if !name.is_empty() => Ok(Self::new(ns, name)),
            _ => Err(CorvidError::invalid_key(key)),
        }
    }

    /// Check if this is a namespaced key
    pub fn is_namespaced(&self) -> bool {
        !self.namespace.is_empty()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_namespaced() {
            write!(f, "{}/{}", self.namespace, self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Resource version as reported by the remote store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVersion(pub String);

impl ResourceVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ResourceVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Equality-based label selector
///
/// An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Selector that matches every label set
    pub fn everything() -> Self {
        Self::default()
    }

    /// Build a selector requiring every given key/value pair
    pub fn from_map(requirements: &BTreeMap<String, String>) -> Self {
        Self {
            requirements: requirements.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Check whether a label set satisfies all requirements
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.requirements
            .iter()
            .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }
}
