use super::{node_name, PriorityFunction, SchedulingContext, ScoreResult, MAX_PRIORITY};
use crate::error::Result;
use crate::listers::{PodLister, ServiceLister};
use corvid_core::{pod_host, LabelSelector, Node, Pod, ResourceQuantities};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Requests of pods on the node plus the pod being placed
fn requested_on(context: &SchedulingContext, node_name: &str) -> ResourceQuantities {
    let mut total = ResourceQuantities::pod_requests(&context.pod);
    for existing in context.pods_on(node_name) {
        total += ResourceQuantities::pod_requests(existing);
    }
    total
}

fn unused_capacity_score(requested: i64, capacity: i64) -> i32 {
    if capacity == 0 || requested > capacity {
        return 0;
    }
    let unused = i128::from(capacity - requested);
    (unused * i128::from(MAX_PRIORITY) / i128::from(capacity)) as i32
}

/// Prefer nodes with the most unrequested CPU and memory
pub struct LeastRequestedPriority;

impl PriorityFunction for LeastRequestedPriority {
    fn prioritize(&self, context: &SchedulingContext) -> Result<Vec<ScoreResult>> {
        Ok(context
            .nodes
            .iter()
            .map(|node| {
                let node_name = node_name(node);
                let capacity = ResourceQuantities::node_allocatable(node);
                let requested = requested_on(context, &node_name);

                let cpu_score =
                    unused_capacity_score(requested.cpu_millicores, capacity.cpu_millicores);
                let memory_score =
                    unused_capacity_score(requested.memory_bytes, capacity.memory_bytes);
                let score = (cpu_score + memory_score) / 2;

                debug!(
                    "Node {} least requested score: {} (CPU: {}, Memory: {})",
                    node_name, score, cpu_score, memory_score
                );
                ScoreResult::new(node_name, score)
            })
            .collect())
    }

    fn name(&self) -> &str {
        "LeastRequestedPriority"
    }
}

fn fraction_of_capacity(requested: i64, capacity: i64) -> f64 {
    if capacity == 0 {
        return 1.0;
    }
    requested as f64 / capacity as f64
}

/// Prefer nodes where CPU and memory would be used in similar proportions
pub struct BalancedResourceAllocation;

impl PriorityFunction for BalancedResourceAllocation {
    fn prioritize(&self, context: &SchedulingContext) -> Result<Vec<ScoreResult>> {
        Ok(context
            .nodes
            .iter()
            .map(|node| {
                let node_name = node_name(node);
                let capacity = ResourceQuantities::node_allocatable(node);
                let requested = requested_on(context, &node_name);

                let cpu_fraction =
                    fraction_of_capacity(requested.cpu_millicores, capacity.cpu_millicores);
                let memory_fraction =
                    fraction_of_capacity(requested.memory_bytes, capacity.memory_bytes);

                let score = if cpu_fraction >= 1.0 || memory_fraction >= 1.0 {
                    0
                } else {
                    let diff = (cpu_fraction - memory_fraction).abs();
                    (MAX_PRIORITY as f64 - diff * MAX_PRIORITY as f64) as i32
                };

                debug!(
                    "Node {} balanced allocation score: {} (CPU: {:.3}, Memory: {:.3})",
                    node_name, score, cpu_fraction, memory_fraction
                );
                ScoreResult::new(node_name, score)
            })
            .collect())
    }

    fn name(&self) -> &str {
        "BalancedResourceAllocation"
    }
}

/// Pods in the pod's namespace selected by the first service that selects the pod
fn service_peers(
    pod: &Pod,
    pod_lister: &dyn PodLister,
    service_lister: &dyn ServiceLister,
) -> Result<Vec<Arc<Pod>>> {
    let services = service_lister.get_pod_services(pod)?;
    let selector = match services
        .first()
        .and_then(|svc| svc.spec.as_ref())
        .and_then(|spec| spec.selector.as_ref())
    {
        Some(selector) => LabelSelector::from_map(selector),
        None => return Ok(Vec::new()),
    };

    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    Ok(pod_lister
        .list(&selector)?
        .into_iter()
        .filter(|p| p.metadata.namespace.as_deref().unwrap_or_default() == namespace)
        .collect())
}

/// Prefer nodes running fewer pods of the same service
pub struct ServiceSpreadingPriority {
    pod_lister: Arc<dyn PodLister>,
    service_lister: Arc<dyn ServiceLister>,
}

impl ServiceSpreadingPriority {
    pub fn new(pod_lister: Arc<dyn PodLister>, service_lister: Arc<dyn ServiceLister>) -> Self {
        Self {
            pod_lister,
            service_lister,
        }
    }
}

impl PriorityFunction for ServiceSpreadingPriority {
    fn prioritize(&self, context: &SchedulingContext) -> Result<Vec<ScoreResult>> {
        let peers = service_peers(
            &context.pod,
            self.pod_lister.as_ref(),
            self.service_lister.as_ref(),
        )?;

        let mut counts: HashMap<&str, i32> = HashMap::new();
        for peer in &peers {
            if let Some(host) = pod_host(peer) {
                *counts.entry(host).or_default() += 1;
            }
        }
        let max_count = counts.values().copied().max().unwrap_or(0);

        Ok(context
            .nodes
            .iter()
            .map(|node| {
                let node_name = node_name(node);
                let score = if max_count > 0 {
                    let count = counts.get(node_name.as_str()).copied().unwrap_or(0);
                    (MAX_PRIORITY as f64 * (max_count - count) as f64 / max_count as f64) as i32
                } else {
                    MAX_PRIORITY
                };
                ScoreResult::new(node_name, score)
            })
            .collect())
    }

    fn name(&self) -> &str {
        "ServiceSpreadingPriority"
    }
}

/// Spread a service's pods across the values of a node label
///
/// Nodes without the label score zero.
pub struct ServiceAntiAffinity {
    name: String,
    label: String,
    pod_lister: Arc<dyn PodLister>,
    service_lister: Arc<dyn ServiceLister>,
}

impl ServiceAntiAffinity {
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        pod_lister: Arc<dyn PodLister>,
        service_lister: Arc<dyn ServiceLister>,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            pod_lister,
            service_lister,
        }
    }

    fn label_value<'a>(&self, node: &'a Node) -> Option<&'a str> {
        node.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(&self.label))
            .map(String::as_str)
    }
}

impl PriorityFunction for ServiceAntiAffinity {
    fn prioritize(&self, context: &SchedulingContext) -> Result<Vec<ScoreResult>> {
        let peers = service_peers(
            &context.pod,
            self.pod_lister.as_ref(),
            self.service_lister.as_ref(),
        )?;

        let labeled: HashMap<String, &str> = context
            .nodes
            .iter()
            .filter_map(|node| self.label_value(node).map(|v| (node_name(node), v)))
            .collect();

        let mut per_value: HashMap<&str, i32> = HashMap::new();
        for peer in &peers {
            if let Some(value) = pod_host(peer).and_then(|host| labeled.get(host).copied()) {
                *per_value.entry(value).or_default() += 1;
            }
        }
        let total = peers.len() as i32;

        Ok(context
            .nodes
            .iter()
            .map(|node| {
                let node_name = node_name(node);
                let score = match labeled.get(&node_name) {
                    None => 0,
                    Some(_) if total == 0 => MAX_PRIORITY,
                    Some(value) => {
                        let count = per_value.get(value).copied().unwrap_or(0);
                        (MAX_PRIORITY as f64 * (total - count) as f64 / total as f64) as i32
                    }
                };
                ScoreResult::new(node_name, score)
            })
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Prefer nodes that have (or lack, when `presence` is false) a label
pub struct NodeLabelPriority {
    name: String,
    label: String,
    presence: bool,
}

impl NodeLabelPriority {
    pub fn new(name: impl Into<String>, label: impl Into<String>, presence: bool) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            presence,
        }
    }
}

impl PriorityFunction for NodeLabelPriority {
    fn prioritize(&self, context: &SchedulingContext) -> Result<Vec<ScoreResult>> {
        Ok(context
            .nodes
            .iter()
            .map(|node| {
                let has_label = node
                    .metadata
                    .labels
                    .as_ref()
                    .is_some_and(|labels| labels.contains_key(&self.label));
                let score = if has_label == self.presence {
                    MAX_PRIORITY
                } else {
                    0
                };
                ScoreResult::new(node_name(node), score)
            })
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Every node scores the same; used when no priorities are configured
pub struct EqualPriority;

impl PriorityFunction for EqualPriority {
    fn prioritize(&self, context: &SchedulingContext) -> Result<Vec<ScoreResult>> {
        Ok(context
            .nodes
            .iter()
            .map(|node| ScoreResult::new(node_name(node), 1))
            .collect())
    }

    fn name(&self) -> &str {
        "EqualPriority"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listers::{StoreToPodLister, StoreToServiceLister};
    use corvid_cache::{Store, ThreadSafeStore};
    use corvid_core::{ObjectMeta, Service};
    use k8s_openapi::api::core::v1::{
        Container, NodeStatus, PodSpec, ResourceRequirements, ServiceSpec,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn create_test_node(name: &str, cpu: &str, memory: &str) -> Arc<Node> {
        let mut allocatable = BTreeMap::new();
        allocatable.insert("cpu".to_string(), Quantity(cpu.to_string()));
        allocatable.insert("memory".to_string(), Quantity(memory.to_string()));
        Arc::new(Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: None,
            status: Some(NodeStatus {
                allocatable: Some(allocatable),
                ..Default::default()
            }),
        })
    }

    fn labeled_node(name: &str, labels: &[(&str, &str)]) -> Arc<Node> {
        Arc::new(Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn create_test_pod(cpu: &str, memory: &str) -> Pod {
        let mut requests = BTreeMap::new();
        requests.insert("cpu".to_string(), Quantity(cpu.to_string()));
        requests.insert("memory".to_string(), Quantity(memory.to_string()));
        Pod {
            metadata: ObjectMeta {
                name: Some("test-pod".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "app".to_string(),
                    resources: Some(ResourceRequirements {
                        requests: Some(requests),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn app_pod(name: &str, app: &str, node: Option<&str>) -> Pod {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), app.to_string());
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: node.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn app_service(app: &str) -> Service {
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), app.to_string());
        Service {
            metadata: ObjectMeta {
                name: Some(app.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(selector),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn listers(
        pods: Vec<Pod>,
        services: Vec<Service>,
    ) -> (Arc<dyn PodLister>, Arc<dyn ServiceLister>) {
        let pod_store = Arc::new(ThreadSafeStore::<Pod>::new());
        for pod in pods {
            pod_store.add(pod).unwrap();
        }
        let service_store = Arc::new(ThreadSafeStore::<Service>::new());
        for service in services {
            service_store.add(service).unwrap();
        }
        (
            Arc::new(StoreToPodLister::new(pod_store)),
            Arc::new(StoreToServiceLister::new(service_store)),
        )
    }

    fn scores(results: Vec<ScoreResult>) -> BTreeMap<String, i32> {
        results
            .into_iter()
            .map(|r| (r.node_name, r.score))
            .collect()
    }

    #[test]
    fn test_least_requested_prefers_empty_node() {
        let context = SchedulingContext::new(
            create_test_pod("1", "2Gi"),
            vec![
                create_test_node("small", "2", "4Gi"),
                create_test_node("large", "8", "16Gi"),
            ],
            &[],
        );

        let scores = scores(LeastRequestedPriority.prioritize(&context).unwrap());
        // small: cpu 5, memory 5; large: cpu 8, memory 8
        assert_eq!(scores["small"], 5);
        assert_eq!(scores["large"], 8);
    }

    #[test]
    fn test_least_requested_overcommitted_node_scores_zero() {
        let context = SchedulingContext::new(
            create_test_pod("4", "8Gi"),
            vec![create_test_node("tiny", "1", "1Gi")],
            &[],
        );
        let scores = scores(LeastRequestedPriority.prioritize(&context).unwrap());
        assert_eq!(scores["tiny"], 0);
    }

    #[test]
    fn test_balanced_allocation() {
        let context = SchedulingContext::new(
            create_test_pod("1", "1Gi"),
            vec![
                create_test_node("balanced", "4", "4Gi"),
                create_test_node("skewed", "2", "16Gi"),
            ],
            &[],
        );

        let scores = scores(BalancedResourceAllocation.prioritize(&context).unwrap());
        assert_eq!(scores["balanced"], 10);
        assert!(scores["skewed"] < scores["balanced"]);
    }

    #[test]
    fn test_service_spreading_prefers_nodes_without_peers() {
        let (pod_lister, service_lister) = listers(
            vec![
                app_pod("web-1", "web", Some("node-1")),
                app_pod("web-2", "web", Some("node-1")),
                app_pod("db-1", "db", Some("node-2")),
            ],
            vec![app_service("web")],
        );
        let context = SchedulingContext::new(
            app_pod("web-3", "web", None),
            vec![labeled_node("node-1", &[]), labeled_node("node-2", &[])],
            &[],
        );

        let priority = ServiceSpreadingPriority::new(pod_lister, service_lister);
        let scores = scores(priority.prioritize(&context).unwrap());
        assert_eq!(scores["node-1"], 0);
        assert_eq!(scores["node-2"], 10);
    }

    #[test]
    fn test_service_spreading_without_service_is_flat() {
        let (pod_lister, service_lister) =
            listers(vec![app_pod("web-1", "web", Some("node-1"))], Vec::new());
        let context = SchedulingContext::new(
            app_pod("web-2", "web", None),
            vec![labeled_node("node-1", &[]), labeled_node("node-2", &[])],
            &[],
        );

        let priority = ServiceSpreadingPriority::new(pod_lister, service_lister);
        let scores = scores(priority.prioritize(&context).unwrap());
        assert_eq!(scores["node-1"], 10);
        assert_eq!(scores["node-2"], 10);
    }

    #[test]
    fn test_service_anti_affinity_spreads_across_zones() {
        let (pod_lister, service_lister) = listers(
            vec![
                app_pod("web-1", "web", Some("a-1")),
                app_pod("web-2", "web", Some("a-2")),
                app_pod("web-3", "web", Some("b-1")),
                app_pod("web-4", "web", Some("b-1")),
            ],
            vec![app_service("web")],
        );
        let context = SchedulingContext::new(
            app_pod("web-5", "web", None),
            vec![
                labeled_node("a-1", &[("zone", "a")]),
                labeled_node("a-2", &[("zone", "a")]),
                labeled_node("b-1", &[("zone", "b")]),
                labeled_node("c-1", &[("zone", "c")]),
                labeled_node("bare", &[]),
            ],
            &[],
        );

        let priority = ServiceAntiAffinity::new("ZoneSpread", "zone", pod_lister, service_lister);
        let scores = scores(priority.prioritize(&context).unwrap());
        assert_eq!(scores["a-1"], 5);
        assert_eq!(scores["b-1"], 5);
        assert_eq!(scores["c-1"], 10);
        assert_eq!(scores["bare"], 0);
    }

    #[test]
    fn test_node_label_priority() {
        let context = SchedulingContext::new(
            Pod::default(),
            vec![
                labeled_node("ssd", &[("disk", "ssd")]),
                labeled_node("plain", &[]),
            ],
            &[],
        );

        let prefer = NodeLabelPriority::new("PreferDisk", "disk", true);
        let scores = scores(prefer.prioritize(&context).unwrap());
        assert_eq!(scores["ssd"], 10);
        assert_eq!(scores["plain"], 0);
    }

    #[test]
    fn test_equal_priority() {
        let context = SchedulingContext::new(
            Pod::default(),
            vec![labeled_node("a", &[]), labeled_node("b", &[])],
            &[],
        );
        let scores = scores(EqualPriority.prioritize(&context).unwrap());
        assert!(scores.values().all(|s| *s == 1));
    }

    #[test]
    fn test_unused_capacity_score_near_limits() {
        assert_eq!(unused_capacity_score(0, i64::MAX), MAX_PRIORITY);
        assert_eq!(unused_capacity_score(1, i64::MAX), MAX_PRIORITY - 1);
        assert_eq!(unused_capacity_score(i64::MAX, i64::MAX), 0);
        assert_eq!(unused_capacity_score(5, 0), 0);
    }
}
