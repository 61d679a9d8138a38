use super::priorities::EqualPriority;
use super::{node_name, FitPredicate, PriorityConfig, ScheduleAlgorithm, SchedulingContext};
use crate::error::{Result, SchedulerError};
use crate::listers::{NodeLister, PodLister};
use corvid_cache::object_key;
use corvid_core::{LabelSelector, Node, Pod, Resource};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Weighted total of every priority for one node
#[derive(Debug, Clone, PartialEq, Eq)]
struct HostPriority {
    host: String,
    score: i64,
}

/// Filters nodes through every predicate, ranks the survivors with the
/// weighted priorities and picks one of the best at random
pub struct GenericScheduler {
    predicates: Vec<Arc<dyn FitPredicate>>,
    priorities: Vec<PriorityConfig>,
    pod_lister: Arc<dyn PodLister>,
    rng: Mutex<StdRng>,
}

impl GenericScheduler {
    pub fn new(
        predicates: Vec<Arc<dyn FitPredicate>>,
        priorities: Vec<PriorityConfig>,
        pod_lister: Arc<dyn PodLister>,
        rng: StdRng,
    ) -> Self {
        Self {
            predicates,
            priorities,
            pod_lister,
            rng: Mutex::new(rng),
        }
    }

    /// Nodes passing every predicate, plus the predicates each rejected node failed
    fn find_nodes_that_fit(
        &self,
        context: &SchedulingContext,
    ) -> (Vec<Arc<Node>>, BTreeMap<String, BTreeSet<String>>) {
        let mut fitting = Vec::new();
        let mut failed: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for node in &context.nodes {
            let mut fits = true;
            for predicate in &self.predicates {
                let result = predicate.filter(context, node);
                if !result.passed {
                    debug!(
                        "Node {} failed {}: {}",
                        result.node_name,
                        predicate.name(),
                        result.reason.as_deref().unwrap_or("no reason given")
                    );
                    failed
                        .entry(result.node_name)
                        .or_default()
                        .insert(predicate.name().to_string());
                    fits = false;
                    break;
                }
            }
            if fits {
                fitting.push(node.clone());
            }
        }

        (fitting, failed)
    }

    /// Weighted sum of every priority, per node; saturates instead of overflowing
    fn prioritize_nodes(&self, context: &SchedulingContext) -> Result<Vec<HostPriority>> {
        let equal;
        let configs: &[PriorityConfig] = if self.priorities.is_empty() {
            equal = [PriorityConfig::new(Arc::new(EqualPriority), 1)];
            &equal
        } else {
            &self.priorities
        };

        let mut combined: HashMap<String, i64> = context
            .nodes
            .iter()
            .map(|node| (node_name(node), 0))
            .collect();

        for config in configs {
            for result in config.function.prioritize(context)? {
                debug!(
                    "{} scored node {} at {} (weight {})",
                    config.function.name(),
                    result.node_name,
                    result.score,
                    config.weight
                );
                let weighted = i64::from(result.score).saturating_mul(i64::from(config.weight));
                let total = combined.entry(result.node_name).or_default();
                *total = total.saturating_add(weighted);
            }
        }

        Ok(combined
            .into_iter()
            .map(|(host, score)| HostPriority { host, score })
            .collect())
    }

    /// Random pick among the nodes sharing the highest score
    fn select_host(&self, scores: &[HostPriority]) -> Result<String> {
        let best = scores
            .iter()
            .map(|s| s.score)
            .max()
            .ok_or_else(|| SchedulerError::internal_error("No scored nodes to select from"))?;

        let mut candidates: Vec<&str> = scores
            .iter()
            .filter(|s| s.score == best)
            .map(|s| s.host.as_str())
            .collect();
        candidates.sort_unstable();

        let index = self
            .rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .random_range(0..candidates.len());
        Ok(candidates[index].to_string())
    }
}

impl ScheduleAlgorithm for GenericScheduler {
    fn schedule(&self, pod: &Pod, node_lister: &dyn NodeLister) -> Result<String> {
        let nodes = node_lister.list()?;
        if nodes.is_empty() {
            return Err(SchedulerError::NoNodesAvailable);
        }

        let existing = self.pod_lister.list(&LabelSelector::everything())?;
        let context = SchedulingContext::new(pod.clone(), nodes, &existing);

        let (fitting, failed) = self.find_nodes_that_fit(&context);
        if fitting.is_empty() {
            let pod_key = object_key(pod).unwrap_or_else(|_| pod.name_any().to_string());
            return Err(SchedulerError::fit_error(pod_key, failed));
        }

        let scores = self.prioritize_nodes(&context.with_nodes(fitting))?;
        let host = self.select_host(&scores)?;

        info!(
            "Selected node {} for pod {} ({} of {} nodes fit)",
            host,
            pod.name_any(),
            scores.len(),
            context.nodes.len()
        );
        Ok(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::predicates::{HostName, PodFitsPorts, PodFitsResources};
    use crate::algorithm::priorities::LeastRequestedPriority;
    use crate::algorithm::{FilterResult, PriorityFunction, ScoreResult};
    use corvid_core::ObjectMeta;
    use k8s_openapi::api::core::v1::{
        Container, ContainerPort, NodeStatus, PodSpec, ResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use rand::SeedableRng;

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

    fn create_test_pod(name: &str, cpu: &str, memory: &str) -> Pod {
        let mut requests = BTreeMap::new();
        requests.insert("cpu".to_string(), Quantity(cpu.to_string()));
        requests.insert("memory".to_string(), Quantity(memory.to_string()));
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
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

    fn with_host_port(mut pod: Pod, port: i32) -> Pod {
        if let Some(spec) = pod.spec.as_mut() {
            spec.containers[0].ports = Some(vec![ContainerPort {
                container_port: port,
                host_port: Some(port),
                ..Default::default()
            }]);
        }
        pod
    }

    fn on_node(mut pod: Pod, node: &str) -> Arc<Pod> {
        if let Some(spec) = pod.spec.as_mut() {
            spec.node_name = Some(node.to_string());
        }
        Arc::new(pod)
    }

    fn no_pods() -> Arc<dyn PodLister> {
        Arc::new(Vec::<Arc<Pod>>::new())
    }

    fn scheduler(
        predicates: Vec<Arc<dyn FitPredicate>>,
        priorities: Vec<PriorityConfig>,
        pod_lister: Arc<dyn PodLister>,
    ) -> GenericScheduler {
        GenericScheduler::new(
            predicates,
            priorities,
            pod_lister,
            StdRng::seed_from_u64(42),
        )
    }

    #[test]
    fn test_no_nodes_available() {
        let scheduler = scheduler(vec![Arc::new(PodFitsResources)], Vec::new(), no_pods());
        let nodes: Vec<Arc<Node>> = Vec::new();

        let result = scheduler.schedule(&create_test_pod("web", "1", "1Gi"), &nodes);
        assert!(matches!(result, Err(SchedulerError::NoNodesAvailable)));
    }

    #[test]
    fn test_fit_error_records_failing_predicate_per_node() {
        let occupied = create_test_node("occupied", "8", "16Gi");
        let small = create_test_node("small", "1", "1Gi");
        let existing = vec![on_node(
            with_host_port(create_test_pod("other", "100m", "64Mi"), 8080),
            "occupied",
        )];
        let scheduler = scheduler(
            vec![Arc::new(PodFitsResources), Arc::new(PodFitsPorts)],
            Vec::new(),
            Arc::new(existing),
        );

        let pod = with_host_port(create_test_pod("web", "2", "2Gi"), 8080);
        let err = scheduler
            .schedule(&pod, &vec![occupied, small])
            .unwrap_err();

        match err {
            SchedulerError::FitError {
                pod_name,
                failed_predicates,
            } => {
                assert_eq!(pod_name, "default/web");
                assert!(failed_predicates["small"].contains("PodFitsResources"));
                assert!(failed_predicates["occupied"].contains("PodFitsPorts"));
            }
            other => panic!("expected FitError, got {other:?}"),
        }
    }

    #[test]
    fn test_picks_highest_scoring_node() {
        let nodes = vec![
            create_test_node("small", "2", "4Gi"),
            create_test_node("large", "16", "64Gi"),
        ];
        let scheduler = scheduler(
            vec![Arc::new(PodFitsResources)],
            vec![PriorityConfig::new(Arc::new(LeastRequestedPriority), 1)],
            no_pods(),
        );

        for _ in 0..10 {
            let host = scheduler
                .schedule(&create_test_pod("web", "1", "1Gi"), &nodes)
                .unwrap();
            assert_eq!(host, "large");
        }
    }

    #[test]
    fn test_existing_pods_count_against_capacity() {
        let nodes = vec![
            create_test_node("busy", "4", "8Gi"),
            create_test_node("idle", "4", "8Gi"),
        ];
        let existing = vec![on_node(create_test_pod("other", "3", "6Gi"), "busy")];
        let scheduler = scheduler(
            vec![Arc::new(PodFitsResources)],
            Vec::new(),
            Arc::new(existing),
        );

        let host = scheduler
            .schedule(&create_test_pod("web", "2", "2Gi"), &nodes)
            .unwrap();
        assert_eq!(host, "idle");
    }

    #[test]
    fn test_ties_spread_across_nodes() {
        let nodes = vec![
            create_test_node("a", "4", "8Gi"),
            create_test_node("b", "4", "8Gi"),
            create_test_node("c", "4", "8Gi"),
        ];
        let scheduler = scheduler(Vec::new(), Vec::new(), no_pods());

        let chosen: BTreeSet<String> = (0..100)
            .map(|_| {
                scheduler
                    .schedule(&create_test_pod("web", "1", "1Gi"), &nodes)
                    .unwrap()
            })
            .collect();
        assert!(chosen.len() > 1);
        assert!(chosen.iter().all(|n| ["a", "b", "c"].contains(&n.as_str())));
    }

    struct FixedScore {
        node: &'static str,
    }

    impl PriorityFunction for FixedScore {
        fn prioritize(&self, context: &SchedulingContext) -> Result<Vec<ScoreResult>> {
            Ok(context
                .nodes
                .iter()
                .map(|n| {
                    let name = node_name(n);
                    let score = if name == self.node { 10 } else { 0 };
                    ScoreResult::new(name, score)
                })
                .collect())
        }

        fn name(&self) -> &str {
            "FixedScore"
        }
    }

    #[test]
    fn test_weights_scale_priorities() {
        let nodes = vec![
            create_test_node("a", "4", "8Gi"),
            create_test_node("b", "4", "8Gi"),
        ];
        let scheduler = scheduler(
            Vec::new(),
            vec![
                PriorityConfig::new(Arc::new(FixedScore { node: "a" }), 1),
                PriorityConfig::new(Arc::new(FixedScore { node: "b" }), 3),
            ],
            no_pods(),
        );

        let host = scheduler
            .schedule(&create_test_pod("web", "1", "1Gi"), &nodes)
            .unwrap();
        assert_eq!(host, "b");
    }

    struct RejectAll;

    impl FitPredicate for RejectAll {
        fn filter(&self, _context: &SchedulingContext, node: &Node) -> FilterResult {
            FilterResult::fail(node_name(node), "rejected".to_string())
        }

        fn name(&self) -> &str {
            "RejectAll"
        }
    }

    #[test]
    fn test_first_failing_predicate_is_recorded() {
        let nodes = vec![create_test_node("a", "4", "8Gi")];
        let scheduler = scheduler(
            vec![Arc::new(RejectAll), Arc::new(HostName)],
            Vec::new(),
            no_pods(),
        );

        match scheduler.schedule(&create_test_pod("web", "1", "1Gi"), &nodes) {
            Err(SchedulerError::FitError {
                failed_predicates, ..
            }) => {
                let failed: Vec<&str> =
                    failed_predicates["a"].iter().map(String::as_str).collect();
                assert_eq!(failed, vec!["RejectAll"]);
            }
            other => panic!("expected FitError, got {other:?}"),
        }
    }

    #[test]
    fn test_extreme_weights_and_quantities_do_not_overflow() {
        let nodes = vec![
            create_test_node("huge", "4", "1e19"),
            create_test_node("regular", "4", "8Gi"),
        ];
        let scheduler = scheduler(
            vec![Arc::new(PodFitsResources)],
            vec![
                PriorityConfig::new(Arc::new(LeastRequestedPriority), i32::MAX),
                PriorityConfig::new(Arc::new(LeastRequestedPriority), i32::MAX - 1),
                PriorityConfig::new(Arc::new(FixedScore { node: "regular" }), 1_000),
            ],
            no_pods(),
        );

        // Least requested scores huge 8 and regular 7, each weighted by ~2^32
        let host = scheduler
            .schedule(&create_test_pod("web", "1", "1Gi"), &nodes)
            .unwrap();
        assert_eq!(host, "huge");
    }

    #[test]
    fn test_weighted_totals_widen_past_i32() {
        let nodes = vec![create_test_node("a", "4", "8Gi")];
        let scheduler = scheduler(
            Vec::new(),
            vec![PriorityConfig::new(Arc::new(FixedScore { node: "a" }), i32::MAX)],
            no_pods(),
        );
        let context = SchedulingContext::new(
            create_test_pod("web", "1", "1Gi"),
            nodes,
            &[],
        );

        let totals = scheduler.prioritize_nodes(&context).unwrap();
        assert_eq!(
            totals,
            vec![HostPriority {
                host: "a".to_string(),
                score: 10 * i64::from(i32::MAX),
            }]
        );
    }
}
