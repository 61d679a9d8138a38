// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// Node lister returned nothing
    #[error("No nodes available to schedule pods")]
    #[diagnostic(
        code(scheduler::no_nodes_available),
        help("Register at least one node that is Ready and not marked unschedulable")
    )]
    NoNodesAvailable,

    /// Every node was rejected by at least one predicate
    #[error(
        "Failed to find fit for pod {pod_name}: {}",
        describe_failures(.failed_predicates)
    )]
    #[diagnostic(
        code(scheduler::fit_error),
        help("Check node resources, ports, taints, selectors and pod requirements")
    )]
    FitError {
        pod_name: String,
        /// Node name to the predicates that rejected it
        failed_predicates: BTreeMap<String, BTreeSet<String>>,
    },

    /// Predicate key not registered
    #[error("Unknown fit predicate: {name}")]
    #[diagnostic(
        code(scheduler::unknown_predicate),
        help("Register the predicate or pass an argument that defines it")
    )]
    UnknownPredicate { name: String },

    /// Priority key not registered
    #[error("Unknown priority function: {name}")]
    #[diagnostic(
        code(scheduler::unknown_priority),
        help("Register the priority function or pass an argument that defines it")
    )]
    UnknownPriority { name: String },

    /// Algorithm provider not registered
    #[error("Unknown algorithm provider: {name}")]
    #[diagnostic(
        code(scheduler::unknown_provider),
        help("The built-in provider is DefaultProvider")
    )]
    UnknownProvider { name: String },

    /// Policy document failed validation
    #[error("Invalid scheduler policy: {reason}")]
    #[diagnostic(
        code(scheduler::invalid_policy),
        help("Priorities need a positive weight and names must be unique")
    )]
    InvalidPolicy { reason: String },

    /// Policy document could not be read or parsed
    #[error("Failed to load policy: {message}")]
    #[diagnostic(
        code(scheduler::policy_load),
        help("Policy files are JSON, or YAML when the extension is .yaml or .yml")
    )]
    PolicyLoad { message: String },

    /// Remote store error
    #[error("Client error: {0}")]
    #[diagnostic(
        code(scheduler::client_error),
        help("Check connectivity to the API server")
    )]
    ClientError(#[from] corvid_client::ClientError),

    /// Cache error
    #[error("Cache error: {0}")]
    #[diagnostic(
        code(scheduler::cache_error),
        help("This is likely a malformed object in the cluster")
    )]
    CacheError(#[from] corvid_cache::CacheError),

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(scheduler::core_error),
        help("This is an internal error")
    )]
    CoreError(#[from] corvid_core::CorvidError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError { message: String },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

fn describe_failures(failed: &BTreeMap<String, BTreeSet<String>>) -> String {
    failed
        .iter()
        .map(|(node, predicates)| {
            let names: Vec<&str> = predicates.iter().map(String::as_str).collect();
            format!("{} ({})", node, names.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl SchedulerError {
    /// Create a FitError
    pub fn fit_error(
        pod_name: impl Into<String>,
        failed_predicates: BTreeMap<String, BTreeSet<String>>,
    ) -> Self {
        Self::FitError {
            pod_name: pod_name.into(),
            failed_predicates,
        }
    }

    /// Create an UnknownPredicate error
    pub fn unknown_predicate(name: impl Into<String>) -> Self {
        Self::UnknownPredicate { name: name.into() }
    }

    /// Create an UnknownPriority error
    pub fn unknown_priority(name: impl Into<String>) -> Self {
        Self::UnknownPriority { name: name.into() }
    }

    /// Create an UnknownProvider error
    pub fn unknown_provider(name: impl Into<String>) -> Self {
        Self::UnknownProvider { name: name.into() }
    }

    /// Create an InvalidPolicy error
    pub fn invalid_policy(reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            reason: reason.into(),
        }
    }

    /// Create a PolicyLoad error
    pub fn policy_load(message: impl Into<String>) -> Self {
        Self::PolicyLoad {
            message: message.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_error_lists_failures() {
        let mut failed = BTreeMap::new();
        failed.insert(
            "node-1".to_string(),
            ["PodFitsPorts".to_string(), "PodFitsResources".to_string()]
                .into_iter()
                .collect(),
        );
        failed.insert(
            "node-2".to_string(),
            ["HostName".to_string()].into_iter().collect(),
        );

        let err = SchedulerError::fit_error("default/web", failed);
        assert_eq!(
            err.to_string(),
            "Failed to find fit for pod default/web: node-1 (PodFitsPorts, PodFitsResources); node-2 (HostName)"
        );
    }
}
