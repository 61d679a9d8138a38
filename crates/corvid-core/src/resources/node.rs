use k8s_openapi::api::core::v1::Node;

/// Status string of the condition with the given type, if the node reports it
pub fn node_condition_status<'a>(node: &'a Node, condition_type: &str) -> Option<&'a str> {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == condition_type))
        .map(|c| c.status.as_str())
}

/// A node may receive pods only when it is not cordoned and explicitly reports Ready=True.
///
/// A missing Ready condition is an unknown state and counts as not ready.
pub fn is_node_schedulable(node: &Node) -> bool {
    let unschedulable = node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);

    if unschedulable {
        return false;
    }

    node_condition_status(node, "Ready") == Some("True")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeSpec, NodeStatus};

    fn make_node(unschedulable: Option<bool>, conditions: Vec<(&str, &str)>) -> Node {
        Node {
            spec: Some(NodeSpec {
                unschedulable,
                ..Default::default()
            }),
            status: Some(NodeStatus {
                conditions: Some(
                    conditions
                        .into_iter()
                        .map(|(t, s)| NodeCondition {
                            type_: t.to_string(),
                            status: s.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_ready_node_is_schedulable() {
        assert!(is_node_schedulable(&make_node(None, vec![("Ready", "True")])));
        assert!(is_node_schedulable(&make_node(
            Some(false),
            vec![("Ready", "True")]
        )));
    }

    #[test]
    fn test_cordoned_node_is_excluded() {
        assert!(!is_node_schedulable(&make_node(
            Some(true),
            vec![("Ready", "True")]
        )));
    }

    #[test]
    fn test_missing_ready_condition_is_excluded() {
        assert!(!is_node_schedulable(&make_node(None, vec![])));
        assert!(!is_node_schedulable(&make_node(
            None,
            vec![("MemoryPressure", "False")]
        )));
        assert!(!is_node_schedulable(&Node::default()));
    }

    #[test]
    fn test_not_ready_node_is_excluded() {
        assert!(!is_node_schedulable(&make_node(None, vec![("Ready", "False")])));
        assert!(!is_node_schedulable(&make_node(
            None,
            vec![("Ready", "Unknown")]
        )));
    }
}
