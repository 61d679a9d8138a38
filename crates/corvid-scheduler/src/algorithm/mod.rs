//! Placement algorithm: fit predicates, priority functions and the generic
//! scheduler that combines them

pub mod generic;
pub mod predicates;
pub mod priorities;

use crate::error::Result;
use crate::listers::NodeLister;
use corvid_core::{pod_host, Node, Pod};
use std::collections::HashMap;
use std::sync::Arc;

pub use generic::GenericScheduler;

/// Highest score a priority function hands out
pub const MAX_PRIORITY: i32 = 10;

/// Chooses a node for a pod
pub trait ScheduleAlgorithm: Send + Sync {
    /// Name of the chosen node
    fn schedule(&self, pod: &Pod, node_lister: &dyn NodeLister) -> Result<String>;
}

/// Everything a predicate or priority function may look at for one decision
#[derive(Debug, Clone)]
pub struct SchedulingContext {
    /// Pod being placed
    pub pod: Pod,
    /// Candidate nodes
    pub nodes: Vec<Arc<Node>>,
    /// Pods already placed (or assumed placed), by node name
    pub pods_by_node: HashMap<String, Vec<Arc<Pod>>>,
}

impl SchedulingContext {
    pub fn new(pod: Pod, nodes: Vec<Arc<Node>>, existing: &[Arc<Pod>]) -> Self {
        let mut pods_by_node: HashMap<String, Vec<Arc<Pod>>> = HashMap::new();
        for p in existing {
            if let Some(host) = pod_host(p) {
                pods_by_node
                    .entry(host.to_string())
                    .or_default()
                    .push(p.clone());
            }
        }

        Self {
            pod,
            nodes,
            pods_by_node,
        }
    }

    /// Pods placed on `node_name`
    pub fn pods_on(&self, node_name: &str) -> &[Arc<Pod>] {
        self.pods_by_node
            .get(node_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Same pods, restricted to a subset of nodes
    pub fn with_nodes(&self, nodes: Vec<Arc<Node>>) -> Self {
        Self {
            pod: self.pod.clone(),
            nodes,
            pods_by_node: self.pods_by_node.clone(),
        }
    }
}

/// Result of filtering a node
#[derive(Debug, Clone)]
pub struct FilterResult {
    pub node_name: String,
    pub passed: bool,
    /// Reason for failure (if any)
    pub reason: Option<String>,
}

impl FilterResult {
    pub fn pass(node_name: String) -> Self {
        Self {
            node_name,
            passed: true,
            reason: None,
        }
    }

    pub fn fail(node_name: String, reason: String) -> Self {
        Self {
            node_name,
            passed: false,
            reason: Some(reason),
        }
    }
}

/// Result of scoring a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreResult {
    pub node_name: String,
    /// Score (0-10, higher is better)
    pub score: i32,
}

impl ScoreResult {
    pub fn new(node_name: String, score: i32) -> Self {
        Self { node_name, score }
    }
}

/// Decides whether a pod may run on a node
pub trait FitPredicate: Send + Sync {
    fn filter(&self, context: &SchedulingContext, node: &Node) -> FilterResult;

    /// Name of the predicate
    fn name(&self) -> &str;
}

/// Ranks every candidate node for a pod
pub trait PriorityFunction: Send + Sync {
    /// One score per node in `context.nodes`
    fn prioritize(&self, context: &SchedulingContext) -> Result<Vec<ScoreResult>>;

    /// Name of the priority function
    fn name(&self) -> &str;
}

/// A priority function with its weight
#[derive(Clone)]
pub struct PriorityConfig {
    pub function: Arc<dyn PriorityFunction>,
    pub weight: i32,
}

impl PriorityConfig {
    pub fn new(function: Arc<dyn PriorityFunction>, weight: i32) -> Self {
        Self { function, weight }
    }
}

pub(crate) fn node_name(node: &Node) -> String {
    node.metadata
        .name
        .clone()
        .unwrap_or_else(|| "unknown".to_string())
}
