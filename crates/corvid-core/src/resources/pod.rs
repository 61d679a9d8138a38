use k8s_openapi::api::core::v1::Pod;

/// The node a pod is bound to, if any. An empty `spec.nodeName` counts as unassigned.
pub fn pod_host(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|n| !n.is_empty())
}

/// Whether the remote store has recorded an assignment for this pod
pub fn is_pod_assigned(pod: &Pod) -> bool {
    pod_host(pod).is_some()
}

/// Host ports requested by any container of the pod (zero ports are ignored)
pub fn pod_host_ports(pod: &Pod) -> Vec<i32> {
    let Some(spec) = &pod.spec else {
        return Vec::new();
    };

    spec.containers
        .iter()
        .filter_map(|c| c.ports.as_ref())
        .flatten()
        .filter_map(|p| p.host_port)
        .filter(|port| *port != 0)
        .collect()
}
