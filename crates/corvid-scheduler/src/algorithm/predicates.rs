use super::{node_name, FilterResult, FitPredicate, SchedulingContext};
use corvid_core::{pod_host, pod_host_ports, Node, ResourceQuantities};
use std::collections::HashSet;
use tracing::debug;

/// Pod requests plus requests of pods already on the node fit within allocatable
///
/// A zero allocatable quantity means the node does not report that resource,
/// and it is not checked.
pub struct PodFitsResources;

impl FitPredicate for PodFitsResources {
    fn filter(&self, context: &SchedulingContext, node: &Node) -> FilterResult {
        let node_name = node_name(node);
        let request = ResourceQuantities::pod_requests(&context.pod);
        if request.is_zero() {
            return FilterResult::pass(node_name);
        }

        let capacity = ResourceQuantities::node_allocatable(node);
        let mut in_use = ResourceQuantities::default();
        for existing in context.pods_on(&node_name) {
            in_use += ResourceQuantities::pod_requests(existing);
        }

        debug!(
            "Node {} has CPU: {} milli, Memory: {} bytes ({} milli, {} bytes in use)",
            node_name,
            capacity.cpu_millicores,
            capacity.memory_bytes,
            in_use.cpu_millicores,
            in_use.memory_bytes
        );

        if capacity.cpu_millicores > 0
            && in_use.cpu_millicores.saturating_add(request.cpu_millicores)
                > capacity.cpu_millicores
        {
            return FilterResult::fail(
                node_name,
                format!(
                    "Insufficient CPU: requested {} milli, available {} milli",
                    request.cpu_millicores,
                    capacity.cpu_millicores.saturating_sub(in_use.cpu_millicores)
                ),
            );
        }

        if capacity.memory_bytes > 0
            && in_use.memory_bytes.saturating_add(request.memory_bytes) > capacity.memory_bytes
        {
            return FilterResult::fail(
                node_name,
                format!(
                    "Insufficient memory: requested {} bytes, available {} bytes",
                    request.memory_bytes,
                    capacity.memory_bytes.saturating_sub(in_use.memory_bytes)
                ),
            );
        }

        FilterResult::pass(node_name)
    }

    fn name(&self) -> &str {
        "PodFitsResources"
    }
}

/// Host ports the pod wants are free on the node
pub struct PodFitsPorts;

impl FitPredicate for PodFitsPorts {
    fn filter(&self, context: &SchedulingContext, node: &Node) -> FilterResult {
        let node_name = node_name(node);
        let wanted = pod_host_ports(&context.pod);
        if wanted.is_empty() {
            return FilterResult::pass(node_name);
        }

        let in_use: HashSet<i32> = context
            .pods_on(&node_name)
            .iter()
            .flat_map(|p| pod_host_ports(p))
            .collect();

        match wanted.iter().find(|port| in_use.contains(*port)) {
            Some(port) => FilterResult::fail(node_name, format!("Host port {} is in use", port)),
            None => FilterResult::pass(node_name),
        }
    }

    fn name(&self) -> &str {
        "PodFitsPorts"
    }
}

/// Node labels satisfy the pod's node selector
pub struct MatchNodeSelector;

impl FitPredicate for MatchNodeSelector {
    fn filter(&self, context: &SchedulingContext, node: &Node) -> FilterResult {
        let node_name = node_name(node);

        let node_selector = match context
            .pod
            .spec
            .as_ref()
            .and_then(|s| s.node_selector.as_ref())
        {
            Some(selector) => selector,
            None => return FilterResult::pass(node_name), // No selector = pass
        };

        let node_labels = node.metadata.labels.as_ref();
        for (key, value) in node_selector {
            let node_value = node_labels.and_then(|labels| labels.get(key));

            if node_value != Some(value) {
                return FilterResult::fail(
                    node_name,
                    format!("Node selector mismatch: {}={}", key, value),
                );
            }
        }

        FilterResult::pass(node_name)
    }

    fn name(&self) -> &str {
        "MatchNodeSelector"
    }
}

/// A pod that names a host only fits that host
pub struct HostName;

impl FitPredicate for HostName {
    fn filter(&self, context: &SchedulingContext, node: &Node) -> FilterResult {
        let node_name = node_name(node);
        match pod_host(&context.pod) {
            Some(host) if host != node_name => {
                FilterResult::fail(node_name, format!("Pod requests host {}", host))
            }
            _ => FilterResult::pass(node_name),
        }
    }

    fn name(&self) -> &str {
        "HostName"
    }
}

/// Pod tolerates every taint on the node
pub struct TaintToleration;

impl FitPredicate for TaintToleration {
    fn filter(&self, context: &SchedulingContext, node: &Node) -> FilterResult {
        let node_name = node_name(node);

        let taints = match node.spec.as_ref().and_then(|s| s.taints.as_ref()) {
            Some(t) if !t.is_empty() => t,
            _ => return FilterResult::pass(node_name), // No taints = pass
        };

        let tolerations = context
            .pod
            .spec
            .as_ref()
            .and_then(|s| s.tolerations.as_deref())
            .unwrap_or_default();

        for taint in taints {
            let tolerated = tolerations.iter().any(|toleration| {
                let key_matches = match toleration.key.as_deref() {
                    Some(key) => key == taint.key,
                    // Empty key with Exists tolerates everything
                    None => toleration.operator.as_deref() == Some("Exists"),
                };
                let effect_matches = match toleration.effect.as_deref() {
                    None | Some("") => true,
                    Some(effect) => effect == taint.effect,
                };
                let value_matches = toleration.operator.as_deref() == Some("Exists")
                    || toleration.value.as_deref().unwrap_or_default()
                        == taint.value.as_deref().unwrap_or_default();
                key_matches && effect_matches && value_matches
            });

            if !tolerated {
                return FilterResult::fail(
                    node_name,
                    format!("Pod does not tolerate taint: {}={}", taint.key, taint.effect),
                );
            }
        }

        FilterResult::pass(node_name)
    }

    fn name(&self) -> &str {
        "TaintToleration"
    }
}

/// Node has (or lacks, when `presence` is false) every listed label
pub struct NodeLabelPresence {
    name: String,
    labels: Vec<String>,
    presence: bool,
}

impl NodeLabelPresence {
    pub fn new(name: impl Into<String>, labels: Vec<String>, presence: bool) -> Self {
        Self {
            name: name.into(),
            labels,
            presence,
        }
    }
}

impl FitPredicate for NodeLabelPresence {
    fn filter(&self, _context: &SchedulingContext, node: &Node) -> FilterResult {
        let node_name = node_name(node);
        let node_labels = node.metadata.labels.as_ref();

        for label in &self.labels {
            let present = node_labels.is_some_and(|l| l.contains_key(label));
            if present != self.presence {
                let verb = if self.presence { "lacks" } else { "has" };
                return FilterResult::fail(node_name, format!("Node {} label {}", verb, label));
            }
        }

        FilterResult::pass(node_name)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
