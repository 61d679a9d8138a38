//! Scheduler policy documents
//!
//! A policy names the fit predicates and priority functions to run, optionally
//! defining new ones through arguments. Documents are JSON, or YAML when read
//! from a `.yaml`/`.yml` file.

use crate::error::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Predicates and priorities to build the placement algorithm from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub predicates: Vec<PredicatePolicy>,
    #[serde(default)]
    pub priorities: Vec<PriorityPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicatePolicy {
    /// Registered predicate name, or the name to register the argument under
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument: Option<PredicateArgument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateArgument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels_presence: Option<LabelsPresence>,
}

/// Nodes must have (or lack) every listed label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelsPresence {
    pub labels: Vec<String>,
    pub presence: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityPolicy {
    pub name: String,
    pub weight: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument: Option<PriorityArgument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityArgument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_anti_affinity: Option<ServiceAntiAffinityArgument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_preference: Option<LabelPreference>,
}

/// Spread a service's pods across the values of a node label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAntiAffinityArgument {
    pub label: String,
}

/// Prefer nodes that have (or lack) a label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelPreference {
    pub label: String,
    pub presence: bool,
}

impl Policy {
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data)
            .map_err(|e| SchedulerError::policy_load(format!("invalid JSON policy: {}", e)))
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        serde_yaml::from_str(data)
            .map_err(|e| SchedulerError::policy_load(format!("invalid YAML policy: {}", e)))
    }

    /// Read a policy file, choosing the format by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            SchedulerError::policy_load(format!("cannot read {}: {}", path.display(), e))
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        debug!(
            "Loading {} policy from {}",
            if is_yaml { "YAML" } else { "JSON" },
            path.display()
        );

        if is_yaml {
            Self::from_yaml(&data)
        } else {
            Self::from_json(&data)
        }
    }

    /// Check the document before anything is registered from it
    ///
    /// Every problem found is reported in a single `InvalidPolicy` error.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let mut seen = HashSet::new();
        for predicate in &self.predicates {
            if predicate.name.trim().is_empty() {
                problems.push("predicate with an empty name".to_string());
            } else if !seen.insert(predicate.name.as_str()) {
                problems.push(format!("duplicate predicate {}", predicate.name));
            }
            if let Some(argument) = &predicate.argument {
                if argument.labels_presence.is_none() {
                    problems.push(format!(
                        "predicate {} has an argument without a supported field",
                        predicate.name
                    ));
                }
            }
        }

        let mut seen = HashSet::new();
        for priority in &self.priorities {
            if priority.name.trim().is_empty() {
                problems.push("priority with an empty name".to_string());
            } else if !seen.insert(priority.name.as_str()) {
                problems.push(format!("duplicate priority {}", priority.name));
            }
            if priority.weight <= 0 {
                problems.push(format!(
                    "priority {} should have a positive weight applied to it",
                    priority.name
                ));
            }
            if let Some(argument) = &priority.argument {
                let set = [
                    argument.service_anti_affinity.is_some(),
                    argument.label_preference.is_some(),
                ]
                .into_iter()
                .filter(|s| *s)
                .count();
                if set != 1 {
                    problems.push(format!(
                        "priority {} argument must set exactly one of serviceAntiAffinity or labelPreference",
                        priority.name
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SchedulerError::invalid_policy(problems.join("; ")))
        }
    }
}
